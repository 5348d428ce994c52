//! Reactive arrays.
//!
//! An ordered, mutable, observable sequence. Every structural mutation
//! funnels through one primitive — replace a contiguous span with a new
//! span — so the pseudo-property notifications stay consistent: `size`
//! fires iff the length changed, `first` iff the span started at index 0,
//! `@` on every mutation. Derived mutators (push/pop/shift/unshift/
//! replace/clear) are defined in terms of the primitive.
//!
//! Arrays can proxy to an owner instance: their own structural changes
//! and every element's property changes are then forwarded to the owner
//! under `"<name>.<prop>"` events. An installed delegate hook observes
//! the primitive (the association engine uses this seam for type checks,
//! inverse sync and change aggregation).

use core::any::Any;
use core::cell::RefCell;
use std::rc::{Rc, Weak};

use orrery_core::{
    deep_equal_in, next_ref_id, ObjRef, RefKind, Referent, Result, Value, VisitSet,
};
use orrery_core::Error;

use crate::object::{Instance, ObservableInner};
use crate::registry::{DispatchMode, Handler, NotificationRegistry, OffFilter, OnOptions};
use crate::scheduler::{Flushable, Scheduler};

/// Hook observing the structural mutation primitive.
pub trait ArrayDelegate {
    /// Runs before an item is inserted; an error aborts the mutation.
    fn check_insert(&self, array: &ObsArray, item: &Value) -> Result<()>;

    /// Runs after the splice with the actual added/removed spans.
    fn after_splice(&self, array: &ObsArray, start: usize, added: &[Value], removed: &[Value]);
}

/// Shared state of one reactive array.
pub struct ArrayInner {
    id: u64,
    items: RefCell<Vec<Value>>,
    dirty: RefCell<Vec<String>>,
    registry: NotificationRegistry,
    scheduler: Scheduler,
    proxy: RefCell<Option<(Weak<ObservableInner>, String)>>,
    delegate: RefCell<Option<Rc<dyn ArrayDelegate>>>,
}

impl Flushable for ArrayInner {
    fn flushable_id(&self) -> u64 {
        self.id
    }

    fn flush_dirty(&self) {
        let names: Vec<String> = core::mem::take(&mut *self.dirty.borrow_mut());
        if names.is_empty() {
            return;
        }
        for name in &names {
            let data = match name.as_str() {
                "size" => Some(Value::Integer(self.items.borrow().len() as i64)),
                "first" => Some(self.items.borrow().first().cloned().unwrap_or(Value::Null)),
                _ => None,
            };
            if let Err(err) = self
                .registry
                .dispatch(None, name, data.as_ref(), DispatchMode::SkipStar)
            {
                tracing::warn!(property = %name, %err, "flush dispatch failed");
            }
        }
        let direct: Vec<Value> = names
            .iter()
            .filter(|n| !n.contains('.'))
            .map(|n| Value::from(n.as_str()))
            .collect();
        if !direct.is_empty() {
            let data = Value::list(direct);
            if let Err(err) = self
                .registry
                .dispatch(None, "*", Some(&data), DispatchMode::StarOnly)
            {
                tracing::warn!(%err, "flush dispatch failed");
            }
        }
    }
}

impl Referent for ArrayInner {
    fn referent_id(&self) -> u64 {
        self.id
    }

    fn referent_kind(&self) -> RefKind {
        RefKind::Array
    }

    fn referent_type_name(&self) -> String {
        "Array".to_string()
    }

    fn deep_eq(&self, other: &ObjRef, visited: &mut VisitSet) -> bool {
        let Some(other) = other.downcast::<ArrayInner>() else {
            return false;
        };
        if self.id == other.id {
            return true;
        }
        let a = self.items.borrow().clone();
        let b = other.items.borrow().clone();
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(x, y)| deep_equal_in(x, y, visited))
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A shared handle to a reactive array.
#[derive(Clone)]
pub struct ObsArray {
    inner: Rc<ArrayInner>,
}

impl ObsArray {
    /// Creates an empty array.
    pub fn new(scheduler: &Scheduler) -> Self {
        Self::from_vec(scheduler, Vec::new())
    }

    /// Creates an array from existing items.
    pub fn from_vec(scheduler: &Scheduler, items: Vec<Value>) -> Self {
        let inner = Rc::new(ArrayInner {
            id: next_ref_id(),
            items: RefCell::new(items),
            dirty: RefCell::new(Vec::new()),
            registry: NotificationRegistry::new(),
            scheduler: scheduler.clone(),
            proxy: RefCell::new(None),
            delegate: RefCell::new(None),
        });
        Self { inner }
    }

    /// Returns the unique identity counter value.
    #[inline]
    pub fn array_id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the scheduler this array notifies through.
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Wraps this array as a `Value`.
    pub fn as_value(&self) -> Value {
        Value::Ref(ObjRef::new(self.inner.clone()))
    }

    /// Recovers an array from a `Value`, if it holds one.
    pub fn from_value(value: &Value) -> Option<ObsArray> {
        value
            .as_ref_value()
            .filter(|r| r.kind() == RefKind::Array)
            .and_then(|r| r.downcast::<ArrayInner>())
            .map(|inner| ObsArray { inner })
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// Returns true if the array is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Returns the element at `index`, if any.
    pub fn at(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Snapshot of the current contents.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Position of the first element equal to `value`.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.inner.items.borrow().iter().position(|v| v == value)
    }

    /// Returns whether any element equals `value`.
    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    /// Installs the delegate hook (at most one).
    pub fn set_delegate(&self, delegate: Rc<dyn ArrayDelegate>) {
        *self.inner.delegate.borrow_mut() = Some(delegate);
    }

    /// The structural mutation primitive.
    ///
    /// Replaces `deleted` elements starting at `start` with `added`,
    /// maintains element proxy registration, emits `size`/`first`/`@`,
    /// forwards to the proxy target and runs the delegate. Returns the
    /// removed elements in their original order.
    pub fn apply_splice(
        &self,
        start: usize,
        deleted: usize,
        added: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let delegate = self.inner.delegate.borrow().clone();
        if let Some(delegate) = &delegate {
            for item in &added {
                delegate.check_insert(self, item)?;
            }
        }

        let (removed, len_changed) = {
            let mut items = self.inner.items.borrow_mut();
            let old_len = items.len();
            let start = start.min(old_len);
            let deleted = deleted.min(old_len - start);
            let removed: Vec<Value> = items
                .splice(start..start + deleted, added.iter().cloned())
                .collect();
            (removed, items.len() != old_len)
        };

        self.sync_element_proxies(&added, &removed);

        if len_changed {
            self.mark("size");
        }
        if start == 0 {
            self.mark("first");
        }
        self.mark("@");

        if let Some(delegate) = delegate {
            delegate.after_splice(self, start, &added, &removed);
        }
        Ok(removed)
    }

    fn sync_element_proxies(&self, added: &[Value], removed: &[Value]) {
        let proxy = self.inner.proxy.borrow().clone();
        let Some((weak, name)) = proxy else { return };
        let Some(target) = weak.upgrade().map(Instance::from_inner) else {
            return;
        };
        for item in removed {
            if let Some(instance) = Instance::from_value(item) {
                instance.deregister_proxy(&target, &name);
            }
        }
        for item in added {
            if let Some(instance) = Instance::from_value(item) {
                instance.register_proxy(&target, &name);
            }
        }
    }

    /// Marks a pseudo-property dirty and schedules the flush, forwarding
    /// to the proxy target under the prefixed name.
    pub fn did_change(&self, name: &str) {
        self.mark(name);
    }

    fn mark(&self, name: &str) {
        {
            let mut dirty = self.inner.dirty.borrow_mut();
            if dirty.iter().any(|n| n == name) {
                return;
            }
            dirty.push(name.to_string());
        }
        if !name.contains('.') {
            let proxy = self.inner.proxy.borrow().clone();
            if let Some((weak, proxy_name)) = proxy {
                if let Some(target) = weak.upgrade().map(Instance::from_inner) {
                    target.did_change(&format!("{proxy_name}.{name}"));
                }
            }
        }
        self.inner.scheduler.enqueue_dirty(self.inner.clone());
    }

    /// JS-style splice: negative `index` counts from the end and must not
    /// remain negative after adjustment; omitted `deleted` removes through
    /// the end. Returns the removed elements.
    pub fn splice(
        &self,
        index: i64,
        deleted: Option<usize>,
        added: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let len = self.len() as i64;
        let start = if index < 0 { index + len } else { index };
        if start < 0 {
            return Err(Error::IndexOutOfRange {
                index,
                len: len as usize,
            });
        }
        let start = start.min(len) as usize;
        let deleted = deleted.unwrap_or(len as usize - start);
        self.apply_splice(start, deleted, added)
    }

    /// Appends an element.
    pub fn push(&self, value: Value) -> Result<()> {
        self.apply_splice(self.len(), 0, vec![value]).map(|_| ())
    }

    /// Removes and returns the last element.
    pub fn pop(&self) -> Result<Option<Value>> {
        let len = self.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(self.apply_splice(len - 1, 1, Vec::new())?.into_iter().next())
    }

    /// Removes and returns the first element.
    pub fn shift(&self) -> Result<Option<Value>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(self.apply_splice(0, 1, Vec::new())?.into_iter().next())
    }

    /// Prepends an element.
    pub fn unshift(&self, value: Value) -> Result<()> {
        self.apply_splice(0, 0, vec![value]).map(|_| ())
    }

    /// Replaces the whole contents.
    pub fn replace(&self, items: Vec<Value>) -> Result<Vec<Value>> {
        self.apply_splice(0, self.len(), items)
    }

    /// Removes every element.
    pub fn clear(&self) -> Result<Vec<Value>> {
        self.replace(Vec::new())
    }

    /// Removes the first element equal to `value`; returns whether one
    /// was removed.
    pub fn remove_value(&self, value: &Value) -> Result<bool> {
        match self.index_of(value) {
            Some(index) => {
                self.apply_splice(index, 1, Vec::new())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Maps into a new reactive array.
    pub fn map(&self, f: impl Fn(&Value) -> Value) -> ObsArray {
        let items = self.inner.items.borrow().iter().map(f).collect();
        ObsArray::from_vec(&self.inner.scheduler, items)
    }

    /// Filters into a new reactive array.
    pub fn filter(&self, f: impl Fn(&Value) -> bool) -> ObsArray {
        let items = self
            .inner
            .items
            .borrow()
            .iter()
            .filter(|v| f(v))
            .cloned()
            .collect();
        ObsArray::from_vec(&self.inner.scheduler, items)
    }

    /// Copies a range into a new reactive array.
    pub fn slice(&self, start: usize, end: Option<usize>) -> ObsArray {
        let items = self.inner.items.borrow();
        let end = end.unwrap_or(items.len()).min(items.len());
        let start = start.min(end);
        ObsArray::from_vec(&self.inner.scheduler, items[start..end].to_vec())
    }

    /// Concatenates into a new reactive array.
    pub fn concat(&self, other: &ObsArray) -> ObsArray {
        let mut items = self.to_vec();
        items.extend(other.to_vec());
        ObsArray::from_vec(&self.inner.scheduler, items)
    }

    /// Flattens nested sequences one level at a time until no element is
    /// itself a sequence.
    pub fn flatten(&self) -> ObsArray {
        let mut items = self.to_vec();
        loop {
            let mut expanded = Vec::with_capacity(items.len());
            let mut changed = false;
            for value in &items {
                if let Some(list) = value.as_list() {
                    expanded.extend(list.borrow().iter().cloned());
                    changed = true;
                } else if let Some(array) = ObsArray::from_value(value) {
                    expanded.extend(array.to_vec());
                    changed = true;
                } else {
                    expanded.push(value.clone());
                }
            }
            items = expanded;
            if !changed {
                break;
            }
        }
        ObsArray::from_vec(&self.inner.scheduler, items)
    }

    /// Drops null elements.
    pub fn compact(&self) -> ObsArray {
        self.filter(|v| !v.is_null())
    }

    /// Drops duplicate elements, preserving first-occurrence order.
    pub fn uniq(&self) -> ObsArray {
        let mut items: Vec<Value> = Vec::new();
        for value in self.inner.items.borrow().iter() {
            if !items.iter().any(|v| v == value) {
                items.push(value.clone());
            }
        }
        ObsArray::from_vec(&self.inner.scheduler, items)
    }

    /// Sliding-window iteration: every `n` consecutive elements.
    pub fn for_each_cons(&self, n: usize, mut f: impl FnMut(&[Value])) {
        if n == 0 {
            return;
        }
        let items = self.inner.items.borrow().clone();
        for window in items.windows(n) {
            f(window);
        }
    }

    /// Fixed-chunk iteration: consecutive slices of up to `n` elements.
    pub fn for_each_slice(&self, n: usize, mut f: impl FnMut(&[Value])) {
        if n == 0 {
            return;
        }
        let items = self.inner.items.borrow().clone();
        for chunk in items.chunks(n) {
            f(chunk);
        }
    }

    /// Establishes forwarding onto `target` under `name`: the array's own
    /// structural changes and every element's property changes surface as
    /// `"<name>.<prop>"` on the target. Setup emits nothing.
    pub fn proxy(&self, target: &Instance, name: &str) {
        *self.inner.proxy.borrow_mut() = Some((target.downgrade(), name.to_string()));
        for item in self.inner.items.borrow().iter() {
            if let Some(instance) = Instance::from_value(item) {
                instance.register_proxy(target, name);
            }
        }
    }

    /// Tears down the forwarding relation.
    pub fn unproxy(&self) {
        let proxy = self.inner.proxy.borrow_mut().take();
        let Some((weak, name)) = proxy else { return };
        let Some(target) = weak.upgrade().map(Instance::from_inner) else {
            return;
        };
        for item in self.inner.items.borrow().iter() {
            if let Some(instance) = Instance::from_value(item) {
                instance.deregister_proxy(&target, &name);
            }
        }
    }

    /// Registers a handler tuple; see `OnOptions`.
    pub fn on(&self, event: impl Into<String>, handler: Handler, opts: OnOptions) -> &Self {
        self.inner
            .registry
            .on(event, handler, opts.observer.as_ref(), opts.context, opts.once);
        self
    }

    /// Removes registrations matching the provided filters.
    pub fn off(&self, filter: OffFilter) -> &Self {
        self.inner.registry.off(&filter);
        self
    }

    /// Synchronously emits an event to matching registrations.
    pub fn emit(&self, event: &str, data: Option<&Value>) -> Result<()> {
        self.inner
            .registry
            .dispatch(None, event, data, DispatchMode::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TypeRegistry;
    use crate::descriptor::Descriptor;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Integer(*v)).collect()
    }

    fn spy(count: Rc<RefCell<u32>>) -> Handler {
        Handler::func(move |_, _, _| {
            *count.borrow_mut() += 1;
            Ok(())
        })
    }

    #[test]
    fn test_splice_basics() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3, 4]));

        let removed = arr.splice(1, Some(2), ints(&[9])).unwrap();
        assert_eq!(removed, ints(&[2, 3]));
        assert_eq!(arr.to_vec(), ints(&[1, 9, 4]));
    }

    #[test]
    fn test_splice_negative_index() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3]));

        let removed = arr.splice(-2, Some(1), Vec::new()).unwrap();
        assert_eq!(removed, ints(&[2]));
        assert_eq!(arr.to_vec(), ints(&[1, 3]));
    }

    #[test]
    fn test_splice_negative_out_of_range() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1]));

        assert!(matches!(
            arr.splice(-5, None, Vec::new()).unwrap_err(),
            Error::IndexOutOfRange { .. }
        ));
    }

    #[test]
    fn test_splice_omitted_count_deletes_through_end() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3, 4]));

        let removed = arr.splice(1, None, Vec::new()).unwrap();
        assert_eq!(removed, ints(&[2, 3, 4]));
        assert_eq!(arr.to_vec(), ints(&[1]));
    }

    #[test]
    fn test_removed_count_clamped() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3]));

        let removed = arr.splice(2, Some(10), Vec::new()).unwrap();
        assert_eq!(removed, ints(&[3]));
    }

    #[test]
    fn test_derived_mutators() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::new(&scheduler);

        arr.push(Value::Integer(1)).unwrap();
        arr.push(Value::Integer(2)).unwrap();
        arr.unshift(Value::Integer(0)).unwrap();
        assert_eq!(arr.to_vec(), ints(&[0, 1, 2]));

        assert_eq!(arr.pop().unwrap(), Some(Value::Integer(2)));
        assert_eq!(arr.shift().unwrap(), Some(Value::Integer(0)));
        assert_eq!(arr.to_vec(), ints(&[1]));

        arr.replace(ints(&[7, 8])).unwrap();
        assert_eq!(arr.to_vec(), ints(&[7, 8]));

        arr.clear().unwrap();
        assert!(arr.is_empty());
        assert_eq!(arr.pop().unwrap(), None);
        assert_eq!(arr.shift().unwrap(), None);
    }

    #[test]
    fn test_size_first_at_events() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::new(&scheduler);

        let size = Rc::new(RefCell::new(0));
        let first = Rc::new(RefCell::new(0));
        let any = Rc::new(RefCell::new(0));
        arr.on("size", spy(size.clone()), OnOptions::default());
        arr.on("first", spy(first.clone()), OnOptions::default());
        arr.on("@", spy(any.clone()), OnOptions::default());

        arr.push(Value::Integer(1)).unwrap();
        scheduler.run_until_idle();
        // push at index 0 of an empty array: all three fire.
        assert_eq!((*size.borrow(), *first.borrow(), *any.borrow()), (1, 1, 1));

        arr.push(Value::Integer(2)).unwrap();
        scheduler.run_until_idle();
        // span started at 1: no `first`.
        assert_eq!((*size.borrow(), *first.borrow(), *any.borrow()), (2, 1, 2));

        // Replacing index 1 with one element: length unchanged, no `size`.
        arr.apply_splice(1, 1, ints(&[9])).unwrap();
        scheduler.run_until_idle();
        assert_eq!((*size.borrow(), *first.borrow(), *any.borrow()), (2, 1, 3));
    }

    #[test]
    fn test_batched_one_notification_per_property() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::new(&scheduler);

        let size = Rc::new(RefCell::new(0));
        arr.on("size", spy(size.clone()), OnOptions::default());

        arr.push(Value::Integer(1)).unwrap();
        arr.push(Value::Integer(2)).unwrap();
        arr.push(Value::Integer(3)).unwrap();
        scheduler.run_until_idle();

        assert_eq!(*size.borrow(), 1);
    }

    #[test]
    fn test_map_filter_preserve_reactive_type() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3, 4]));

        let doubled = arr.map(|v| Value::Integer(v.as_i64().unwrap() * 2));
        assert_eq!(doubled.to_vec(), ints(&[2, 4, 6, 8]));

        let even = arr.filter(|v| v.as_i64().unwrap() % 2 == 0);
        assert_eq!(even.to_vec(), ints(&[2, 4]));

        // Results are live reactive arrays themselves.
        even.push(Value::Integer(6)).unwrap();
        assert_eq!(even.to_vec(), ints(&[2, 4, 6]));
    }

    #[test]
    fn test_slice_and_concat() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3, 4]));

        assert_eq!(arr.slice(1, Some(3)).to_vec(), ints(&[2, 3]));
        assert_eq!(arr.slice(2, None).to_vec(), ints(&[3, 4]));

        let other = ObsArray::from_vec(&scheduler, ints(&[5]));
        assert_eq!(arr.concat(&other).to_vec(), ints(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_flatten() {
        let scheduler = Scheduler::new();
        let nested = ObsArray::from_vec(&scheduler, ints(&[3, 4]));
        let arr = ObsArray::from_vec(
            &scheduler,
            vec![
                Value::Integer(1),
                Value::list(vec![
                    Value::Integer(2),
                    Value::list(vec![nested.as_value()]),
                ]),
            ],
        );

        assert_eq!(arr.flatten().to_vec(), ints(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_compact_and_uniq() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(
            &scheduler,
            vec![
                Value::Integer(1),
                Value::Null,
                Value::Integer(1),
                Value::Integer(2),
            ],
        );

        assert_eq!(arr.compact().to_vec(), ints(&[1, 1, 2]));
        assert_eq!(
            arr.uniq().to_vec(),
            vec![Value::Integer(1), Value::Null, Value::Integer(2)]
        );
    }

    #[test]
    fn test_for_each_cons_and_slice() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3, 4, 5]));

        let mut windows = Vec::new();
        arr.for_each_cons(2, |w| windows.push(w.to_vec()));
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0], ints(&[1, 2]));
        assert_eq!(windows[3], ints(&[4, 5]));

        let mut chunks = Vec::new();
        arr.for_each_slice(2, |c| chunks.push(c.to_vec()));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], ints(&[5]));
    }

    #[test]
    fn test_proxy_forwards_structural_and_element_changes() {
        let scheduler = Scheduler::new();
        let types = TypeRegistry::new();
        let owner_ty = types.define("Owner", None, &scheduler).unwrap();
        let item_ty = types.define("Item", None, &scheduler).unwrap();
        item_ty.define_property(Descriptor::new("qty"));

        let owner = owner_ty.create();
        let item = item_ty.create();
        let arr = ObsArray::new(&scheduler);
        arr.proxy(&owner, "things");

        let structural = Rc::new(RefCell::new(0));
        owner.on("things.size", spy(structural.clone()), OnOptions::default());
        let prop = Rc::new(RefCell::new(0));
        owner.on("things.qty", spy(prop.clone()), OnOptions::default());

        arr.push(item.as_value()).unwrap();
        scheduler.run_until_idle();
        assert_eq!(*structural.borrow(), 1);

        item.set("qty", Value::Integer(5)).unwrap();
        item.set("qty", Value::Integer(6)).unwrap();
        scheduler.run_until_idle();
        // Exactly once per flush, even for two mutations.
        assert_eq!(*prop.borrow(), 1);

        // Removal deregisters the element proxy.
        arr.pop().unwrap();
        scheduler.run_until_idle();
        item.set("qty", Value::Integer(7)).unwrap();
        scheduler.run_until_idle();
        assert_eq!(*prop.borrow(), 1);
    }

    #[test]
    fn test_delegate_check_insert_aborts() {
        struct OnlyInts;
        impl ArrayDelegate for OnlyInts {
            fn check_insert(&self, _array: &ObsArray, item: &Value) -> Result<()> {
                match item {
                    Value::Integer(_) => Ok(()),
                    other => Err(Error::invalid_operation(format!(
                        "expected integer, got {}",
                        other.type_label()
                    ))),
                }
            }
            fn after_splice(&self, _: &ObsArray, _: usize, _: &[Value], _: &[Value]) {}
        }

        let scheduler = Scheduler::new();
        let arr = ObsArray::new(&scheduler);
        arr.set_delegate(Rc::new(OnlyInts));

        arr.push(Value::Integer(1)).unwrap();
        assert!(arr.push(Value::from("no")).is_err());
        assert_eq!(arr.to_vec(), ints(&[1]));
    }

    #[test]
    fn test_delegate_sees_added_and_removed() {
        struct Recorder {
            log: Rc<RefCell<Vec<(usize, usize)>>>,
        }
        impl ArrayDelegate for Recorder {
            fn check_insert(&self, _: &ObsArray, _: &Value) -> Result<()> {
                Ok(())
            }
            fn after_splice(
                &self,
                _: &ObsArray,
                _: usize,
                added: &[Value],
                removed: &[Value],
            ) {
                self.log.borrow_mut().push((added.len(), removed.len()));
            }
        }

        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2]));
        let log = Rc::new(RefCell::new(Vec::new()));
        arr.set_delegate(Rc::new(Recorder { log: log.clone() }));

        arr.splice(0, Some(1), ints(&[8, 9])).unwrap();
        assert_eq!(*log.borrow(), vec![(2, 1)]);
    }

    #[test]
    fn test_remove_value_by_identity() {
        let scheduler = Scheduler::new();
        let arr = ObsArray::from_vec(&scheduler, ints(&[1, 2, 3]));

        assert!(arr.remove_value(&Value::Integer(2)).unwrap());
        assert!(!arr.remove_value(&Value::Integer(9)).unwrap());
        assert_eq!(arr.to_vec(), ints(&[1, 3]));
    }
}
