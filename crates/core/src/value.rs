//! Runtime values for the Orrery model layer.
//!
//! This module defines the `Value` enum which represents any value a
//! property slot, attribute, change entry or mapper payload can hold.
//! Scalar variants compare structurally; the reference variants (`List`,
//! `Map` when aliased, and `Ref`) compare by identity where noted.

use core::any::Any;
use core::cell::{Cell, RefCell};
use core::fmt;
use hashbrown::HashMap;
use std::rc::Rc;

use crate::eq::VisitSet;

/// Shared, mutable list payload.
pub type ValueList = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable map payload.
pub type ValueMap = Rc<RefCell<HashMap<String, Value>>>;

thread_local! {
    static NEXT_REF_ID: Cell<u64> = const { Cell::new(1) };
}

/// Returns the next identity counter value for a referent.
///
/// Every observable instance and reactive array takes one of these at
/// construction; the counter is process-wide and never reused.
pub fn next_ref_id() -> u64 {
    NEXT_REF_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

/// What kind of live object an `ObjRef` points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// An observable object instance.
    Object,
    /// A reactive array.
    Array,
}

/// A live object that values can reference.
///
/// Implemented by the reactive layer's instances and arrays. The trait is
/// deliberately small: identity, a display name, and the deep-equality
/// hook used by change tracking (instances delegate to their own `eq`,
/// arrays compare elementwise).
pub trait Referent: Any {
    /// The unique identity counter value assigned at construction.
    fn referent_id(&self) -> u64;

    /// Whether this is an object or an array.
    fn referent_kind(&self) -> RefKind;

    /// Display name of the referent's type, for diagnostics.
    fn referent_type_name(&self) -> String;

    /// Deep-equality hook. `visited` carries the pointer pairs already on
    /// the comparison stack; see `crate::eq`.
    fn deep_eq(&self, other: &ObjRef, visited: &mut VisitSet) -> bool;

    /// Upcast for downcasting back to the concrete type.
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

/// A shared handle to a live referent.
#[derive(Clone)]
pub struct ObjRef {
    referent: Rc<dyn Referent>,
}

impl ObjRef {
    /// Wraps a referent.
    pub fn new(referent: Rc<dyn Referent>) -> Self {
        Self { referent }
    }

    /// Returns the referent's identity counter value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.referent.referent_id()
    }

    /// Returns the referent kind.
    #[inline]
    pub fn kind(&self) -> RefKind {
        self.referent.referent_kind()
    }

    /// Returns the referent's pointer address, used as a visited-set key.
    #[inline]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.referent) as *const () as usize
    }

    /// Returns the underlying referent.
    #[inline]
    pub fn referent(&self) -> &Rc<dyn Referent> {
        &self.referent
    }

    /// Attempts to recover the concrete referent type.
    pub fn downcast<T: Referent>(&self) -> Option<Rc<T>> {
        self.referent.clone().as_any_rc().downcast::<T>().ok()
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}#{}>",
            self.referent.referent_type_name(),
            self.referent.referent_id()
        )
    }
}

/// A value held by a property slot, change entry or mapper payload.
#[derive(Clone, Debug)]
pub enum Value {
    /// Null / absent value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Calendar date stored as Unix timestamp in milliseconds (midnight UTC).
    Date(i64),
    /// Date and time stored as Unix timestamp in milliseconds.
    DateTime(i64),
    /// Shared list payload (raw mapper data, change entries).
    List(ValueList),
    /// Shared map payload (raw mapper data, change/error tables).
    Map(ValueMap),
    /// A live observable instance or reactive array.
    Ref(ObjRef),
}

impl Value {
    /// Creates a list value from a plain vector.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Creates an empty map value.
    pub fn map() -> Self {
        Value::Map(Self::empty_map())
    }

    /// Creates a bare shared map payload.
    pub fn empty_map() -> ValueMap {
        Rc::new(RefCell::new(HashMap::new()))
    }

    /// Creates a bare shared list payload.
    pub fn empty_list() -> ValueList {
        Rc::new(RefCell::new(Vec::new()))
    }

    /// Creates a map value from key/value pairs.
    pub fn map_from<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map: HashMap<String, Value> =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Map(Rc::new(RefCell::new(map)))
    }

    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Javascript-style truthiness, used for flags carried in payloads.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Date(_) | Value::DateTime(_) => true,
            Value::List(_) | Value::Map(_) | Value::Ref(_) => true,
        }
    }

    /// Returns the boolean if this is a Boolean, None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the i64 if this is an Integer, None otherwise.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the numeric value if this is an Integer or Number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice if this is a String, None otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the millisecond timestamp if this is a Date or DateTime.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Value::Date(v) | Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the shared list handle if this is a List, None otherwise.
    pub fn as_list(&self) -> Option<&ValueList> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the shared map handle if this is a Map, None otherwise.
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the object reference if this is a Ref, None otherwise.
    pub fn as_ref_value(&self) -> Option<&ObjRef> {
        match self {
            Value::Ref(v) => Some(v),
            _ => None,
        }
    }

    /// Convenience lookup into a Map value.
    pub fn map_get(&self, key: &str) -> Option<Value> {
        self.as_map().and_then(|m| m.borrow().get(key).cloned())
    }

    /// A short label for this value's variant, for diagnostics.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Ref(r) => match r.kind() {
                RefKind::Object => "object",
                RefKind::Array => "array",
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            // Coercion-friendly payloads: 9 and 9.0 are the same value.
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Map(a), Value::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v == w))
            }
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
