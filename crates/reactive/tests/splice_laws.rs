//! Algebraic laws of the reactive array's splice primitive.

use std::cell::RefCell;
use std::rc::Rc;

use orrery_core::Value;
use orrery_reactive::{Handler, ObsArray, OnOptions, Scheduler};
use proptest::prelude::*;

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Integer(*v)).collect()
}

proptest! {
    /// Removed count is min(n, len - start) and removed elements keep
    /// their original order.
    #[test]
    fn splice_removed_span_law(
        items in prop::collection::vec(-100i64..100, 0..24),
        start in 0usize..32,
        deleted in 0usize..32,
        added in prop::collection::vec(-100i64..100, 0..8),
    ) {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&items));

        let removed = arr.apply_splice(start, deleted, ints(&added)).unwrap();

        let clamped_start = start.min(items.len());
        let expected_removed = deleted.min(items.len() - clamped_start);
        prop_assert_eq!(removed.len(), expected_removed);
        prop_assert_eq!(
            removed,
            ints(&items[clamped_start..clamped_start + expected_removed])
        );

        let mut expected: Vec<i64> = items[..clamped_start].to_vec();
        expected.extend(&added);
        expected.extend(&items[clamped_start + expected_removed..]);
        prop_assert_eq!(arr.to_vec(), ints(&expected));
    }

    /// Any burst of mutations in one turn yields at most one `size`
    /// notification per flush.
    #[test]
    fn batching_law(pushes in 1usize..12) {
        let scheduler = Scheduler::new();
        let arr = ObsArray::new(&scheduler);

        let size_fires = Rc::new(RefCell::new(0u32));
        let spy = size_fires.clone();
        arr.on(
            "size",
            Handler::func(move |_, _, _| {
                *spy.borrow_mut() += 1;
                Ok(())
            }),
            OnOptions::default(),
        );

        for i in 0..pushes {
            arr.push(Value::Integer(i as i64)).unwrap();
        }
        scheduler.run_until_idle();

        prop_assert_eq!(*size_fires.borrow(), 1);
        prop_assert_eq!(arr.len(), pushes);
    }

    /// Derived mutators agree with plain vector semantics.
    #[test]
    fn derived_mutators_agree_with_vec(
        items in prop::collection::vec(-100i64..100, 0..16),
    ) {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&items));
        let mut mirror = items.clone();

        arr.push(Value::Integer(7)).unwrap();
        mirror.push(7);
        arr.unshift(Value::Integer(-7)).unwrap();
        mirror.insert(0, -7);

        let popped = arr.pop().unwrap().and_then(|v| v.as_i64());
        prop_assert_eq!(popped, mirror.pop());
        let shifted = arr.shift().unwrap().and_then(|v| v.as_i64());
        prop_assert_eq!(shifted, Some(mirror.remove(0)));

        prop_assert_eq!(arr.to_vec(), ints(&mirror));
    }
}
