//! Deep value equality with cycle guarding.
//!
//! Change tracking needs a structural equality predicate over arbitrary
//! value graphs, including graphs with cycles. Recursion is guarded by an
//! explicit visited set of pointer pairs passed through every call: a pair
//! already on the comparison stack is assumed equal, so a cycle closes
//! instead of recursing forever. Live instances delegate to their own
//! equality (identity unless the type overrides it); arrays and payload
//! containers compare elementwise.

use hashbrown::HashSet;
use std::rc::Rc;

use crate::value::Value;

/// Pointer pairs currently on the comparison stack.
pub type VisitSet = HashSet<(usize, usize)>;

/// Compares two values structurally, guarding against cycles.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut visited = VisitSet::new();
    deep_equal_in(a, b, &mut visited)
}

/// Comparison step carrying the visited set.
///
/// Referents re-enter through this function when comparing their
/// contents, so the same visited set threads through the whole graph.
pub fn deep_equal_in(a: &Value, b: &Value, visited: &mut VisitSet) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if !visited.insert(pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(u, v)| deep_equal_in(u, v, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if !visited.insert(pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, u)| {
                    y.get(k)
                        .map_or(false, |v| deep_equal_in(u, v, visited))
                })
        }
        (Value::Ref(x), Value::Ref(y)) => {
            if x.id() == y.id() {
                return true;
            }
            if !visited.insert((x.addr(), y.addr())) {
                return true;
            }
            x.referent().deep_eq(y, visited)
        }
        // Scalars, and mixed variants, fall through to shallow equality.
        _ => a == b,
    }
}
