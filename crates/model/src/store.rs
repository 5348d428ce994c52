//! The store facade.
//!
//! A `Store` owns every process-scoped service of the layer: the
//! scheduler (flush queue + task lanes), the type registry, the model
//! metadata registry, the identity map and the converter registry, plus
//! the load guard that suppresses change tracking during
//! deserialization. Services are reached through the store by
//! construction — nothing here is an ambient global — and `reset()`
//! restores a pristine state between tests or sessions.

use core::cell::{Cell, RefCell};
use hashbrown::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use orrery_core::{ConverterRegistry, Error, Result};
use orrery_reactive::{Scheduler, TypeRegistry};

use crate::identity::IdentityMap;
use crate::model::{ModelBuilder, ModelType};

pub(crate) struct StoreInner {
    pub(crate) scheduler: Scheduler,
    pub(crate) types: TypeRegistry,
    pub(crate) models: RefCell<HashMap<String, ModelType>>,
    pub(crate) identity: IdentityMap,
    pub(crate) converters: ConverterRegistry,
    loading: Cell<u32>,
    inverse_guard: RefCell<HashSet<(u64, String)>>,
}

impl StoreInner {
    /// Returns whether a load is in progress (changes must not register).
    pub(crate) fn is_loading(&self) -> bool {
        self.loading.get() > 0
    }

    /// Looks up a registered model type by name.
    pub(crate) fn model(&self, name: &str) -> Result<ModelType> {
        self.models
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_type(name))
    }

    /// Marks one side of an inverse sync as in progress.
    pub(crate) fn guard_inverse(&self, instance_id: u64, assoc: &str) {
        self.inverse_guard
            .borrow_mut()
            .insert((instance_id, assoc.to_string()));
    }

    /// Clears an inverse-sync mark.
    pub(crate) fn unguard_inverse(&self, instance_id: u64, assoc: &str) {
        self.inverse_guard
            .borrow_mut()
            .remove(&(instance_id, assoc.to_string()));
    }

    /// Returns whether an association is currently being synchronized
    /// from its other side (mutating it again would recurse forever).
    pub(crate) fn inverse_guarded(&self, instance_id: u64, assoc: &str) -> bool {
        self.inverse_guard
            .borrow()
            .contains(&(instance_id, assoc.to_string()))
    }
}

/// RAII guard marking a load in progress.
pub(crate) struct LoadGuard {
    store: Rc<StoreInner>,
}

impl LoadGuard {
    pub(crate) fn new(store: &Rc<StoreInner>) -> Self {
        store.loading.set(store.loading.get() + 1);
        Self {
            store: store.clone(),
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.store.loading.set(self.store.loading.get() - 1);
    }
}

/// The facade owning all process-scoped services.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store with built-in converters and empty registries.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                scheduler: Scheduler::new(),
                types: TypeRegistry::new(),
                models: RefCell::new(HashMap::new()),
                identity: IdentityMap::new(),
                converters: ConverterRegistry::with_builtins(),
                loading: Cell::new(0),
                inverse_guard: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Rc<StoreInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Rc::downgrade(&self.inner)
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Returns the global type registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    /// Returns the identity map.
    pub fn identity(&self) -> &IdentityMap {
        &self.inner.identity
    }

    /// Returns the converter registry.
    pub fn converters(&self) -> &ConverterRegistry {
        &self.inner.converters
    }

    /// Starts defining a model type.
    pub fn define(&self, name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(self.clone(), name.into())
    }

    /// Looks up a registered model type by name.
    pub fn model(&self, name: &str) -> Result<ModelType> {
        self.inner.model(name)
    }

    /// Wraps a live instance with its registered model type.
    pub fn model_for(&self, instance: &orrery_reactive::Instance) -> Result<crate::model::Model> {
        crate::model::Model::for_instance(&self.inner, instance)
    }

    /// Returns whether a load is in progress.
    pub fn is_loading(&self) -> bool {
        self.inner.is_loading()
    }

    /// Forces an immediate synchronous change flush.
    pub fn flush_now(&self) {
        self.inner.scheduler.flush_now();
    }

    /// Pumps the scheduler until no work remains.
    pub fn run_until_idle(&self) {
        self.inner.scheduler.run_until_idle();
    }

    /// Runs a callback once after the next flush completes.
    pub fn delay(&self, f: impl FnOnce() + 'static) {
        self.inner.scheduler.delay(f);
    }

    /// Restores pristine state: clears identity, model metadata, the
    /// type registry, and reinstalls built-in converters.
    pub fn reset(&self) {
        self.inner.identity.clear();
        self.inner.models.borrow_mut().clear();
        self.inner.types.clear();
        self.inner.converters.reset();
    }
}
