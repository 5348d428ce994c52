//! Observable object types and instances.
//!
//! An `ObjectType` is a named, globally registered descriptor table with
//! an explicit parent chain: descriptor resolution walks the chain at
//! lookup time (structural delegation, never copied), so a change to a
//! shared ancestor descriptor is visible to every subtype that has not
//! overridden it. An `Instance` owns slots, an optional value cache, a
//! dirty set, its notification registry, and the proxy targets it
//! forwards changes to.
//!
//! Mutation never notifies synchronously. A write marks the property
//! dirty, expands dependents to a fixed point, forwards to proxy targets
//! under a `"<name>.<prop>"` event, and schedules the instance on the
//! scheduler's flush queue. The flush fires each dirty property at most
//! once, then a single `"*"` notification if any direct (undotted)
//! property changed.

use core::any::Any;
use core::cell::RefCell;
use core::fmt;
use hashbrown::HashMap;
use std::rc::{Rc, Weak};

use orrery_core::{
    next_ref_id, Error, ObjRef, RefKind, Referent, Result, Value, ValueMap, VisitSet,
};

use crate::descriptor::Descriptor;
use crate::registry::{
    invoke_handler, DispatchMode, Handler, NotificationRegistry, OffFilter, OnOptions,
};
use crate::scheduler::{Flushable, Scheduler};

/// A late-bound method installed on a type and invocable by name from
/// notification registrations: `(instance, event, data, context)`.
pub type MethodFn = Rc<dyn Fn(&Instance, &str, Option<&Value>, Option<&Value>) -> Result<()>>;

/// Overridable instance equality.
pub type EqFn = Rc<dyn Fn(&Instance, &Instance) -> bool>;

struct TypeInner {
    name: String,
    parent: Option<ObjectType>,
    descriptors: RefCell<HashMap<String, Rc<Descriptor>>>,
    methods: RefCell<HashMap<String, MethodFn>>,
    eq_override: RefCell<Option<EqFn>>,
    scheduler: Scheduler,
}

/// A named observable type: descriptor table + method table + parent.
#[derive(Clone)]
pub struct ObjectType {
    inner: Rc<TypeInner>,
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.name())
            .finish()
    }
}

impl ObjectType {
    /// Creates a subtype of `parent` (or a root type).
    ///
    /// The type is not registered anywhere by itself; see
    /// `TypeRegistry::define` for the globally named path.
    pub fn extend(name: impl Into<String>, parent: Option<&ObjectType>, scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(TypeInner {
                name: name.into(),
                parent: parent.cloned(),
                descriptors: RefCell::new(HashMap::new()),
                methods: RefCell::new(HashMap::new()),
                eq_override: RefCell::new(None),
                scheduler: scheduler.clone(),
            }),
        }
    }

    /// Returns the type name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the parent type, if any.
    pub fn parent(&self) -> Option<ObjectType> {
        self.inner.parent.clone()
    }

    /// Returns the scheduler this type's instances notify through.
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Registers (or overrides) a property descriptor.
    ///
    /// A subtype may add and shadow descriptors but never remove an
    /// ancestor's.
    pub fn define_property(&self, descriptor: Descriptor) -> &Self {
        self.inner
            .descriptors
            .borrow_mut()
            .insert(descriptor.name().to_string(), Rc::new(descriptor));
        self
    }

    /// Resolves a descriptor by walking the parent chain.
    pub fn descriptor(&self, name: &str) -> Option<Rc<Descriptor>> {
        let mut current = Some(self.clone());
        while let Some(ty) = current {
            if let Some(d) = ty.inner.descriptors.borrow().get(name) {
                return Some(d.clone());
            }
            current = ty.inner.parent.clone();
        }
        None
    }

    /// Chain-merged descriptors, closest definition winning.
    pub fn descriptors(&self) -> Vec<Rc<Descriptor>> {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(ty) = current {
            for (name, d) in ty.inner.descriptors.borrow().iter() {
                if !seen.iter().any(|s| s == name) {
                    seen.push(name.clone());
                    out.push(d.clone());
                }
            }
            current = ty.inner.parent.clone();
        }
        out
    }

    /// Installs a named method.
    pub fn define_method(&self, name: impl Into<String>, method: MethodFn) -> &Self {
        self.inner.methods.borrow_mut().insert(name.into(), method);
        self
    }

    /// Resolves a method by walking the parent chain.
    pub fn method(&self, name: &str) -> Option<MethodFn> {
        let mut current = Some(self.clone());
        while let Some(ty) = current {
            if let Some(m) = ty.inner.methods.borrow().get(name) {
                return Some(m.clone());
            }
            current = ty.inner.parent.clone();
        }
        None
    }

    /// Overrides instance equality for this type.
    pub fn set_eq(&self, eq: EqFn) -> &Self {
        *self.inner.eq_override.borrow_mut() = Some(eq);
        self
    }

    fn eq_fn(&self) -> Option<EqFn> {
        let mut current = Some(self.clone());
        while let Some(ty) = current {
            if let Some(f) = ty.inner.eq_override.borrow().as_ref() {
                return Some(f.clone());
            }
            current = ty.inner.parent.clone();
        }
        None
    }

    /// Returns whether this type is `ancestor` or descends from it.
    pub fn is(&self, ancestor: &ObjectType) -> bool {
        let mut current = Some(self.clone());
        while let Some(ty) = current {
            if Rc::ptr_eq(&ty.inner, &ancestor.inner) {
                return true;
            }
            current = ty.inner.parent.clone();
        }
        false
    }

    /// Properties dirtied by a change to `changed`, via the dependency
    /// graph (path dependencies also trigger on their first segment).
    pub fn dependents_of(&self, changed: &str) -> Vec<String> {
        self.descriptors()
            .iter()
            .filter(|d| d.triggered_by(changed))
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Creates a new instance of this type.
    pub fn create(&self) -> Instance {
        let ty = self.clone();
        let inner = Rc::new_cyclic(|weak: &Weak<ObservableInner>| ObservableInner {
            id: next_ref_id(),
            self_weak: weak.clone(),
            ty,
            slots: RefCell::new(HashMap::new()),
            cache: RefCell::new(HashMap::new()),
            overlay: RefCell::new(HashMap::new()),
            dirty: RefCell::new(Vec::new()),
            registry: NotificationRegistry::new(),
            proxies: RefCell::new(Vec::new()),
        });
        Instance { inner }
    }
}

/// Global name → type table used by the string-resolution paths
/// (association target types, subclass discriminators).
#[derive(Clone, Default)]
pub struct TypeRegistry {
    inner: Rc<RefCell<HashMap<String, ObjectType>>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a uniquely named type.
    pub fn define(
        &self,
        name: impl Into<String>,
        parent: Option<&ObjectType>,
        scheduler: &Scheduler,
    ) -> Result<ObjectType> {
        let name = name.into();
        let ty = ObjectType::extend(name.clone(), parent, scheduler);
        self.register(ty.clone())?;
        Ok(ty)
    }

    /// Registers an existing type under its name.
    pub fn register(&self, ty: ObjectType) -> Result<()> {
        let mut table = self.inner.borrow_mut();
        if table.contains_key(ty.name()) {
            return Err(Error::duplicate_type(ty.name()));
        }
        table.insert(ty.name().to_string(), ty);
        Ok(())
    }

    /// Resolves a type by name.
    pub fn resolve(&self, name: &str) -> Result<ObjectType> {
        self.inner
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_type(name))
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }
}

/// Shared state of one observable instance.
pub struct ObservableInner {
    id: u64,
    self_weak: Weak<ObservableInner>,
    ty: ObjectType,
    slots: RefCell<HashMap<String, Value>>,
    cache: RefCell<HashMap<String, Value>>,
    overlay: RefCell<HashMap<String, Rc<Descriptor>>>,
    dirty: RefCell<Vec<String>>,
    registry: NotificationRegistry,
    proxies: RefCell<Vec<(Weak<ObservableInner>, String)>>,
}

impl ObservableInner {
    pub(crate) fn referent_id_raw(&self) -> u64 {
        self.id
    }

    fn instance(&self) -> Option<Instance> {
        self.self_weak.upgrade().map(|inner| Instance { inner })
    }
}

impl Flushable for ObservableInner {
    fn flushable_id(&self) -> u64 {
        self.id
    }

    fn flush_dirty(&self) {
        let names: Vec<String> = core::mem::take(&mut *self.dirty.borrow_mut());
        if names.is_empty() {
            return;
        }
        let Some(instance) = self.instance() else {
            return;
        };
        for name in &names {
            let data = if name.contains('.') {
                None
            } else {
                instance.get(name).ok()
            };
            if let Err(err) =
                self.registry
                    .dispatch(Some(&instance), name, data.as_ref(), DispatchMode::SkipStar)
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
            if let Err(err) =
                self.registry
                    .dispatch(Some(&instance), "*", Some(&data), DispatchMode::StarOnly)
            {
                tracing::warn!(%err, "flush dispatch failed");
            }
        }
    }
}

impl Referent for ObservableInner {
    fn referent_id(&self) -> u64 {
        self.id
    }

    fn referent_kind(&self) -> RefKind {
        RefKind::Object
    }

    fn referent_type_name(&self) -> String {
        self.ty.name().to_string()
    }

    fn deep_eq(&self, other: &ObjRef, _visited: &mut VisitSet) -> bool {
        // Identity objects own their equality: default identity, types may
        // override via `set_eq`.
        let Some(other) = other.downcast::<ObservableInner>() else {
            return false;
        };
        match (self.instance(), other.instance()) {
            (Some(a), Some(b)) => a.eq(&b),
            _ => false,
        }
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A weak handle to an observable instance.
///
/// Registries that must not keep instances alive (the identity map,
/// observer tables) hold these.
#[derive(Clone)]
pub struct WeakInstance {
    inner: Weak<ObservableInner>,
}

impl WeakInstance {
    /// Attempts to recover the live instance.
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(Instance::from_inner)
    }
}

/// A shared handle to an observable instance.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<ObservableInner>,
}

impl Instance {
    pub(crate) fn from_inner(inner: Rc<ObservableInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ObservableInner> {
        Rc::downgrade(&self.inner)
    }

    /// Returns a weak handle to this instance.
    pub fn weak_ref(&self) -> WeakInstance {
        WeakInstance {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns this instance's type.
    #[inline]
    pub fn object_type(&self) -> &ObjectType {
        &self.inner.ty
    }

    /// Returns the unique identity counter value.
    #[inline]
    pub fn instance_id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the scheduler this instance notifies through.
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        self.inner.ty.scheduler()
    }

    /// Wraps this instance as a `Value`.
    pub fn as_value(&self) -> Value {
        Value::Ref(ObjRef::new(self.inner.clone()))
    }

    /// Recovers an instance from a `Value`, if it holds one.
    pub fn from_value(value: &Value) -> Option<Instance> {
        value
            .as_ref_value()
            .filter(|r| r.kind() == RefKind::Object)
            .and_then(|r| r.downcast::<ObservableInner>())
            .map(Instance::from_inner)
    }

    /// Declares an instance-level descriptor, shadowing the type's.
    pub fn define_property(&self, descriptor: Descriptor) -> &Self {
        self.inner
            .overlay
            .borrow_mut()
            .insert(descriptor.name().to_string(), Rc::new(descriptor));
        self
    }

    fn find_descriptor(&self, name: &str) -> Option<Rc<Descriptor>> {
        if let Some(d) = self.inner.overlay.borrow().get(name) {
            return Some(d.clone());
        }
        self.inner.ty.descriptor(name)
    }

    /// Returns whether `name` is declared on this instance or its type.
    pub fn has_property(&self, name: &str) -> bool {
        self.find_descriptor(name).is_some()
    }

    /// Reads a property through its descriptor.
    ///
    /// Cached properties return the cached value until invalidated by a
    /// change; stored properties fall back to the descriptor default when
    /// the slot was never written.
    pub fn get(&self, name: &str) -> Result<Value> {
        let desc = self
            .find_descriptor(name)
            .ok_or_else(|| Error::unknown_property(self.inner.ty.name(), name))?;
        if desc.is_cached() {
            if let Some(v) = self.inner.cache.borrow().get(name) {
                return Ok(v.clone());
            }
        }
        let value = match desc.getter() {
            Some(getter) => getter(self)?,
            None => {
                let stored = self.inner.slots.borrow().get(name).cloned();
                match stored {
                    Some(v) => v,
                    None => desc.default().cloned().unwrap_or(Value::Null),
                }
            }
        };
        if desc.is_cached() {
            self.inner
                .cache
                .borrow_mut()
                .insert(name.to_string(), value.clone());
        }
        Ok(value)
    }

    /// Writes a property through its descriptor.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let desc = self
            .find_descriptor(name)
            .ok_or_else(|| Error::unknown_property(self.inner.ty.name(), name))?;
        if desc.is_readonly() {
            return Err(Error::readonly_property(self.inner.ty.name(), name));
        }
        match desc.setter() {
            Some(setter) => {
                let setter = setter.clone();
                if let Some(store) = setter(self, value)? {
                    self.store_and_mark(name, store);
                }
            }
            None => self.store_and_mark(name, value),
        }
        Ok(())
    }

    /// Bulk-assigns declared, writable properties; everything else in the
    /// payload is silently ignored.
    pub fn set_many(&self, attrs: &ValueMap) -> Result<()> {
        let entries: Vec<(String, Value)> = attrs
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in entries {
            match self.find_descriptor(&name) {
                Some(d) if !d.is_readonly() => self.set(&name, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn store_and_mark(&self, name: &str, value: Value) {
        self.inner.slots.borrow_mut().insert(name.to_string(), value);
        self.did_change(name);
    }

    /// Reads the raw stored slot, bypassing getters/cache/defaults.
    pub fn slot(&self, name: &str) -> Option<Value> {
        self.inner.slots.borrow().get(name).cloned()
    }

    /// Writes the raw stored slot without scheduling notification.
    pub fn set_slot(&self, name: &str, value: Value) {
        self.inner.slots.borrow_mut().insert(name.to_string(), value);
        self.inner.cache.borrow_mut().remove(name);
    }

    /// Marks a property dirty without going through its setter.
    ///
    /// Dependents are expanded immediately; the change is forwarded to
    /// proxy targets as `"<proxyName>.<name>"`; the flush is scheduled.
    pub fn did_change(&self, name: &str) {
        self.mark_dirty(name);
        self.scheduler().enqueue_dirty(self.inner.clone());
    }

    fn mark_dirty(&self, name: &str) {
        self.inner.cache.borrow_mut().remove(name);
        {
            let mut dirty = self.inner.dirty.borrow_mut();
            if dirty.iter().any(|n| n == name) {
                return;
            }
            dirty.push(name.to_string());
        }

        let mut dependents = self.inner.ty.dependents_of(name);
        for d in self.inner.overlay.borrow().values() {
            if d.triggered_by(name) {
                dependents.push(d.name().to_string());
            }
        }
        for dep in dependents {
            self.mark_dirty(&dep);
        }

        // Forwarded (dotted) names are never re-forwarded; dependency
        // paths are capped at two segments to match.
        if !name.contains('.') {
            let targets: Vec<(Weak<ObservableInner>, String)> =
                self.inner.proxies.borrow().clone();
            for (weak, proxy_name) in targets {
                if let Some(rc) = weak.upgrade() {
                    Instance::from_inner(rc).did_change(&format!("{proxy_name}.{name}"));
                }
            }
        }
    }

    /// Registers a handler tuple; see `OnOptions`.
    pub fn on(&self, event: impl Into<String>, handler: Handler, opts: OnOptions) -> &Self {
        let event = event.into();
        if opts.fire {
            let observer = opts.observer.clone().unwrap_or_else(|| self.clone());
            if let Err(err) =
                invoke_handler(&handler, Some(&observer), &event, None, opts.context.as_ref())
            {
                tracing::warn!(event = %event, %err, "fire-on-register failed");
            }
        }
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
            .dispatch(Some(self), event, data, DispatchMode::Full)
    }

    /// Number of live notification registrations (diagnostics).
    pub fn observer_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Establishes forwarding of this instance's changes onto `target`
    /// under `"<name>.<prop>"` events.
    pub fn register_proxy(&self, target: &Instance, name: &str) {
        let mut proxies = self.inner.proxies.borrow_mut();
        let exists = proxies.iter().any(|(weak, pname)| {
            pname == name
                && weak
                    .upgrade()
                    .map_or(false, |rc| rc.id == target.inner.id)
        });
        if !exists {
            proxies.push((Rc::downgrade(&target.inner), name.to_string()));
        }
    }

    /// Removes a forwarding relation.
    pub fn deregister_proxy(&self, target: &Instance, name: &str) {
        self.inner.proxies.borrow_mut().retain(|(weak, pname)| {
            !(pname == name
                && weak
                    .upgrade()
                    .map_or(false, |rc| rc.id == target.inner.id))
        });
    }

    /// Semantic equality: identity unless the type overrides it.
    pub fn eq(&self, other: &Instance) -> bool {
        if self.inner.id == other.inner.id {
            return true;
        }
        match self.inner.ty.eq_fn() {
            Some(f) => f(self, other),
            None => false,
        }
    }
}
