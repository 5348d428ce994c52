//! Model types and instances.
//!
//! A model is an observable instance whose type carries model metadata:
//! typed attributes (converter-backed), associations, validators, an
//! optional mapper and an optional subclass resolver. Lifecycle state
//! (`sourceState`, `isBusy`) and tracking state (`ownChanges`,
//! `ownErrors`) are reactive properties, with aggregating
//! `changes`/`errors`/`hasChanges`/`hasErrors` getters wired into the
//! dependency graph so owned-association changes ripple up through
//! proxied notifications.
//!
//! `sourceState` walks NEW → LOADED (load/save), EMPTY → LOADED (data
//! arrival), NEW/LOADED → DELETED; nothing leaves DELETED. `isBusy` is
//! orthogonal and true while a mapper call is outstanding.

use core::cell::RefCell;
use core::fmt;
use hashbrown::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use orrery_core::{inflect, Error, Result, Value, ValueMap};
use orrery_reactive::{Descriptor, Instance, MethodFn, ObsArray, ObjectType, Promise};

use crate::association::{self, AssocDef, AssocKind, AssocOptions};
use crate::changes::{self, UndoOptions};
use crate::mapper::Mapper;
use crate::store::{LoadGuard, Store, StoreInner};
use crate::validate::{self, ValidateOptions, Validator, ValidatorDef, ValidatorFn};

/// Lifecycle stage of a model relative to its backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// Freshly constructed, never persisted.
    New,
    /// A placeholder carrying only an id.
    Empty,
    /// Backed by loaded data.
    Loaded,
    /// Removed; terminal.
    Deleted,
}

impl SourceState {
    /// The canonical state label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::New => "NEW",
            SourceState::Empty => "EMPTY",
            SourceState::Loaded => "LOADED",
            SourceState::Deleted => "DELETED",
        }
    }

    fn parse(s: &str) -> SourceState {
        match s {
            "EMPTY" => SourceState::Empty,
            "LOADED" => SourceState::Loaded,
            "DELETED" => SourceState::Deleted,
            _ => SourceState::New,
        }
    }
}

/// One declared typed attribute.
pub struct AttrDef {
    pub name: String,
    /// Converter kind name ("string", "integer", ...).
    pub kind: String,
    pub default: Option<Value>,
}

/// Subclass resolver: inspects a payload and names the concrete subtype.
pub type ResolverFn = Rc<dyn Fn(&ValueMap) -> Option<String>>;

struct ModelTypeInner {
    ty: ObjectType,
    store: Weak<StoreInner>,
    parent: Option<ModelType>,
    attributes: Vec<Rc<AttrDef>>,
    associations: Vec<Rc<AssocDef>>,
    validators: Vec<Rc<ValidatorDef>>,
    validator_methods: RefCell<HashMap<String, ValidatorFn>>,
    mapper: RefCell<Option<Rc<dyn Mapper>>>,
    resolver: RefCell<Option<ResolverFn>>,
}

fn store_dropped() -> Error {
    Error::invalid_operation("store was dropped")
}

/// A registered model type: metadata handle over an `ObjectType`.
#[derive(Clone)]
pub struct ModelType {
    inner: Rc<ModelTypeInner>,
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name())
            .finish()
    }
}

impl ModelType {
    /// Returns the type name.
    #[inline]
    pub fn name(&self) -> &str {
        self.inner.ty.name()
    }

    /// Returns the underlying observable type.
    #[inline]
    pub fn object_type(&self) -> &ObjectType {
        &self.inner.ty
    }

    pub(crate) fn store(&self) -> Result<Rc<StoreInner>> {
        self.inner.store.upgrade().ok_or_else(store_dropped)
    }

    /// Chain-merged attribute declarations, closest definition winning.
    pub fn attributes(&self) -> Vec<Rc<AttrDef>> {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            for attr in &mtype.inner.attributes {
                if !seen.iter().any(|s| s == &attr.name) {
                    seen.push(attr.name.clone());
                    out.push(attr.clone());
                }
            }
            current = mtype.inner.parent.clone();
        }
        out
    }

    /// Chain-merged association declarations.
    pub fn associations(&self) -> Vec<Rc<AssocDef>> {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            for assoc in &mtype.inner.associations {
                if !seen.iter().any(|s| s == &assoc.name) {
                    seen.push(assoc.name.clone());
                    out.push(assoc.clone());
                }
            }
            current = mtype.inner.parent.clone();
        }
        out
    }

    /// Resolves an association by name along the chain.
    pub fn assoc(&self, name: &str) -> Option<Rc<AssocDef>> {
        self.associations().into_iter().find(|a| a.name == name)
    }

    /// Matches a payload key against association names and their
    /// id-reference spellings (`customerId`, `customer_id`,
    /// `lineItemIds`, `line_item_ids`).
    pub(crate) fn assoc_for_key(&self, key: &str) -> Option<Rc<AssocDef>> {
        for assoc in self.associations() {
            if assoc.name == key {
                return Some(assoc);
            }
            let keys = match assoc.kind {
                AssocKind::HasOne => inflect::has_one_keys(&assoc.name),
                AssocKind::HasMany => inflect::has_many_keys(&assoc.name),
            };
            if keys.iter().any(|k| k == key) {
                return Some(assoc);
            }
        }
        None
    }

    /// Every declared validator along the chain.
    pub(crate) fn validators(&self) -> Vec<Rc<ValidatorDef>> {
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            out.extend(mtype.inner.validators.iter().cloned());
            current = mtype.inner.parent.clone();
        }
        out
    }

    pub(crate) fn validator_method(&self, name: &str) -> Option<ValidatorFn> {
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            if let Some(f) = mtype.inner.validator_methods.borrow().get(name) {
                return Some(f.clone());
            }
            current = mtype.inner.parent.clone();
        }
        None
    }

    /// The bound mapper, inherited along the chain.
    pub fn mapper(&self) -> Option<Rc<dyn Mapper>> {
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            if let Some(m) = mtype.inner.mapper.borrow().as_ref() {
                return Some(m.clone());
            }
            current = mtype.inner.parent.clone();
        }
        None
    }

    /// Binds (or replaces) the mapper for this type.
    pub fn set_mapper(&self, mapper: Rc<dyn Mapper>) {
        *self.inner.mapper.borrow_mut() = Some(mapper);
    }

    fn resolver(&self) -> Option<ResolverFn> {
        let mut current = Some(self.clone());
        while let Some(mtype) = current {
            if let Some(r) = mtype.inner.resolver.borrow().as_ref() {
                return Some(r.clone());
            }
            current = mtype.inner.parent.clone();
        }
        None
    }

    /// Declares the subclass resolver consulted by `load`.
    pub fn set_resolver(&self, resolver: ResolverFn) {
        *self.inner.resolver.borrow_mut() = Some(resolver);
    }

    pub(crate) fn mapper_required(&self, method: &str) -> Result<Rc<dyn Mapper>> {
        self.mapper()
            .ok_or_else(|| Error::mapper_missing(self.name(), method))
    }

    /// Constructs a NEW model.
    pub fn create(&self) -> Model {
        let instance = self.inner.ty.create();
        instance.set_slot("sourceState", Value::from(SourceState::New.as_str()));
        instance.set_slot("isBusy", Value::Boolean(false));
        instance.set_slot("ownChanges", Value::map());
        instance.set_slot("ownErrors", Value::map());
        Model {
            instance,
            mtype: self.clone(),
        }
    }

    /// Constructs an EMPTY placeholder carrying only an id.
    pub fn empty(&self, id: Value) -> Result<Model> {
        let model = self.create();
        model
            .instance
            .set_slot("sourceState", Value::from(SourceState::Empty.as_str()));
        model.instance.set("id", id)?;
        Ok(model)
    }

    /// Returns the identity-mapped instance or an EMPTY placeholder;
    /// never touches the mapper.
    pub fn local(&self, id: &Value) -> Result<Model> {
        let store = self.store()?;
        match store.identity.get(self.name(), id) {
            Some(instance) => Model::for_instance(&store, &instance),
            None => self.empty(id.clone()),
        }
    }

    fn resolve_concrete(&self, attrs: &ValueMap) -> Result<ModelType> {
        let Some(resolver) = self.resolver() else {
            return Ok(self.clone());
        };
        let name = resolver(attrs).ok_or_else(|| Error::UnresolvedSubtype {
            ty: self.name().to_string(),
            name: "<none>".to_string(),
        })?;
        if name == self.name() {
            return Ok(self.clone());
        }
        let store = self.store()?;
        let concrete = store.models.borrow().get(&name).cloned();
        concrete.ok_or(Error::UnresolvedSubtype {
            ty: self.name().to_string(),
            name,
        })
    }

    /// The central deserialization entry point.
    ///
    /// Requires `attrs.id`. Resolves (or creates) the identity-mapped
    /// instance, assigns scalar attributes through coercion, recursively
    /// loads nested association payloads, reconciles to-many membership
    /// against the payload, and leaves the model LOADED with clean
    /// change/error state. Runs under the load guard so none of it
    /// registers as user changes.
    pub fn load(&self, attrs: &ValueMap) -> Result<Model> {
        let store = self.store()?;
        let id = attrs
            .borrow()
            .get("id")
            .cloned()
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::MissingId {
                ty: self.name().to_string(),
            })?;

        let concrete = self.resolve_concrete(attrs)?;
        let model = match store.identity.get(concrete.name(), &id) {
            Some(instance) => Model {
                instance,
                mtype: concrete.clone(),
            },
            None => concrete.empty(id.clone())?,
        };
        tracing::debug!(ty = concrete.name(), "loading record");

        {
            let _guard = LoadGuard::new(&store);
            model.apply_payload(&store, attrs)?;
            model.set_source_state(SourceState::Loaded);
            changes::clear_change_state(&model.instance);
            changes::clear_error_state(&model.instance);
        }
        Ok(model)
    }

    /// Maps `load` over a list of payloads.
    pub fn load_all(&self, items: &[Value]) -> Result<Vec<Model>> {
        items
            .iter()
            .map(|item| match item {
                Value::Map(map) => self.load(map),
                other => Err(Error::invalid_operation(format!(
                    "load_all expects map payloads, got {}",
                    other.type_label()
                ))),
            })
            .collect()
    }

    /// Returns the identity-mapped/empty instance immediately; fetches
    /// through the mapper when the instance is EMPTY or `refresh` is
    /// requested. The promise settles with the fetch (resolved
    /// immediately when no fetch was needed).
    pub fn get(&self, id: &Value, refresh: bool, opts: &Value) -> Result<(Model, Promise)> {
        let model = self.local(id)?;
        let needs_fetch = refresh || model.source_state() == SourceState::Empty;
        if !needs_fetch {
            let store = self.store()?;
            let promise = Promise::resolved(&store.scheduler, model.instance.as_value());
            return Ok((model, promise));
        }
        let promise = model.fetch(opts)?;
        Ok((model, promise))
    }
}

/// A live model: an observable instance plus its model metadata.
#[derive(Clone)]
pub struct Model {
    instance: Instance,
    mtype: ModelType,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type", &self.mtype.name())
            .finish()
    }
}

impl Model {
    /// Wraps an existing instance with its registered model type.
    pub(crate) fn for_instance(store: &Rc<StoreInner>, instance: &Instance) -> Result<Model> {
        let mtype = store.model(instance.object_type().name())?;
        Ok(Model {
            instance: instance.clone(),
            mtype,
        })
    }

    /// Returns the underlying observable instance.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the model type.
    #[inline]
    pub fn model_type(&self) -> &ModelType {
        &self.mtype
    }

    /// Wraps this model as a `Value`.
    pub fn as_value(&self) -> Value {
        self.instance.as_value()
    }

    /// Reads a property.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.instance.get(name)
    }

    /// Writes a property.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        self.instance.set(name, value)
    }

    /// The id, or Null while unassigned.
    pub fn id(&self) -> Value {
        self.instance.slot("id").unwrap_or(Value::Null)
    }

    /// Current lifecycle state.
    pub fn source_state(&self) -> SourceState {
        self.instance
            .slot("sourceState")
            .and_then(|v| v.as_str().map(SourceState::parse))
            .unwrap_or(SourceState::New)
    }

    /// Whether a mapper call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.instance
            .slot("isBusy")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub(crate) fn set_source_state(&self, state: SourceState) {
        self.instance
            .set_slot("sourceState", Value::from(state.as_str()));
        self.instance.did_change("sourceState");
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.instance.set_slot("isBusy", Value::Boolean(busy));
        self.instance.did_change("isBusy");
    }

    fn state_label(&self) -> String {
        let state = self.source_state().as_str();
        if self.is_busy() {
            format!("{state}-BUSY")
        } else {
            state.to_string()
        }
    }

    fn apply_payload(&self, store: &Rc<StoreInner>, attrs: &ValueMap) -> Result<()> {
        let entries: Vec<(String, Value)> = attrs
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut assoc_payloads: Vec<(Rc<AssocDef>, Value)> = Vec::new();
        let scalar_map = Value::empty_map();
        for (key, value) in entries {
            if key == "id" {
                if self.id().is_null() {
                    self.instance.set("id", value)?;
                }
                continue;
            }
            if let Some(assoc) = self.mtype.assoc_for_key(&key) {
                assoc_payloads.push((assoc, value));
                continue;
            }
            scalar_map.borrow_mut().insert(key, value);
        }

        self.instance.set_many(&scalar_map)?;
        for (assoc, payload) in assoc_payloads {
            self.apply_assoc_payload(store, &assoc, payload)?;
        }
        Ok(())
    }

    fn apply_assoc_payload(
        &self,
        store: &Rc<StoreInner>,
        assoc: &Rc<AssocDef>,
        payload: Value,
    ) -> Result<()> {
        let target = store.model(&assoc.target)?;
        match assoc.kind {
            AssocKind::HasOne => {
                let value = match payload {
                    Value::Null => Value::Null,
                    Value::Map(map) => target.load(&map)?.instance.as_value(),
                    scalar => target.local(&scalar)?.instance.as_value(),
                };
                self.instance.set(&assoc.name, value)?;
            }
            AssocKind::HasMany => {
                let items: Vec<Value> = match payload {
                    Value::Null => Vec::new(),
                    Value::List(list) => list.borrow().clone(),
                    other => {
                        return Err(Error::invalid_operation(format!(
                            "expected a list for `{}`, got {}",
                            assoc.name,
                            other.type_label()
                        )))
                    }
                };
                let mut desired: Vec<Instance> = Vec::new();
                for item in items {
                    let member = match item {
                        Value::Map(map) => target.load(&map)?,
                        scalar => target.local(&scalar)?,
                    };
                    let id = member.instance.instance_id();
                    if !desired.iter().any(|d| d.instance_id() == id) {
                        desired.push(member.instance.clone());
                    }
                }
                let array = association::has_many_array(store, &self.instance, assoc)?;
                // Diff-based reconciliation: drop members absent from the
                // payload, keep the rest without duplication.
                for existing in array.to_vec() {
                    let keep = Instance::from_value(&existing).is_some_and(|inst| {
                        desired.iter().any(|d| d.instance_id() == inst.instance_id())
                    });
                    if !keep {
                        array.remove_value(&existing)?;
                    }
                }
                for member in desired {
                    let value = member.as_value();
                    if !array.contains(&value) {
                        array.push(value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Merges a payload into this instance with full load semantics:
    /// LOADED afterwards, change/error tracking cleared.
    pub fn load_attrs(&self, attrs: &ValueMap) -> Result<()> {
        let store = self.mtype.store()?;
        let _guard = LoadGuard::new(&store);
        self.apply_payload(&store, attrs)?;
        self.set_source_state(SourceState::Loaded);
        changes::clear_change_state(&self.instance);
        changes::clear_error_state(&self.instance);
        Ok(())
    }

    /// Serializes id + attributes through their converters into the
    /// JSON-safe map handed to mappers.
    pub fn attrs(&self) -> Result<Value> {
        let store = self.mtype.store()?;
        let map = Value::empty_map();
        let id = self.id();
        if !id.is_null() {
            map.borrow_mut().insert("id".to_string(), id);
        }
        for attr in self.mtype.attributes() {
            let value = self.instance.get(&attr.name)?;
            let converter = store.converters.get(&attr.kind)?;
            map.borrow_mut()
                .insert(attr.name.clone(), converter.serialize(&value)?);
        }
        Ok(Value::Map(map))
    }

    /// Aggregated changes: own entries plus owned associations' entries
    /// under dotted paths.
    pub fn changes(&self) -> Value {
        self.instance.get("changes").unwrap_or_else(|_| Value::map())
    }

    /// Whether any change is tracked anywhere in the owned subtree.
    pub fn has_changes(&self) -> bool {
        self.instance
            .get("hasChanges")
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Aggregated errors, shaped like `changes`.
    pub fn errors(&self) -> Value {
        self.instance.get("errors").unwrap_or_else(|_| Value::map())
    }

    /// Whether any error is recorded anywhere in the owned subtree.
    pub fn has_errors(&self) -> bool {
        self.instance
            .get("hasErrors")
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Appends a deduplicated validation error and notifies observers.
    pub fn add_error(&self, name: &str, message: &str) {
        changes::add_error(&self.instance, name, message);
    }

    /// Runs applicable validators over this model and its owned
    /// associations; returns whether the subtree is error-free.
    pub fn validate(&self, context: Option<&str>) -> Result<bool> {
        let store = self.mtype.store()?;
        validate::validate_tree(&store, self, context, &mut HashSet::new())
    }

    /// Validates a single property.
    pub fn validate_attr(&self, name: &str, context: Option<&str>) -> Result<bool> {
        validate::validate_property(self, name, context)
    }

    /// Reverts every tracked change (to-many membership via inverse
    /// replay), recurses into owned associations subject to
    /// `except`/`only`, then re-runs validation.
    pub fn undo_changes(&self, opts: &UndoOptions) -> Result<()> {
        let store = self.mtype.store()?;
        changes::undo_changes(&store, &self.instance, opts)?;
        self.validate(None)?;
        Ok(())
    }

    fn record_failure(&self, error: &Value) {
        fn message_of(value: &Value) -> String {
            match value {
                Value::String(s) => s.clone(),
                Value::Integer(n) => n.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Boolean(b) => b.to_string(),
                _ => "request failed".to_string(),
            }
        }
        match error {
            Value::Map(map) => {
                for (key, value) in map.borrow().iter() {
                    match value {
                        Value::List(messages) => {
                            for message in messages.borrow().iter() {
                                changes::add_error(&self.instance, key, &message_of(message));
                            }
                        }
                        other => changes::add_error(&self.instance, key, &message_of(other)),
                    }
                }
            }
            other => changes::add_error(&self.instance, "base", &message_of(other)),
        }
    }

    fn fetch(&self, opts: &Value) -> Result<Promise> {
        if self.is_busy() {
            return Err(Error::invalid_state("get", self.state_label()));
        }
        let mapper = self.mtype.mapper_required("get")?;
        let promise = mapper
            .get(&self.id(), opts)
            .ok_or_else(|| Error::mapper_unsupported(self.mtype.name(), "get"))?;
        self.set_busy(true);

        let on_ok = self.clone();
        let on_err = self.clone();
        Ok(promise.then_or(
            move |payload| {
                let outcome = match payload.as_map() {
                    Some(map) => on_ok.load_attrs(map),
                    None => Err(Error::invalid_operation("get payload must be a map")),
                };
                on_ok.set_busy(false);
                match outcome {
                    Ok(()) => Ok(on_ok.instance.as_value()),
                    Err(err) => {
                        let message = Value::from(err.to_string());
                        on_ok.record_failure(&message);
                        Err(message)
                    }
                }
            },
            move |error| {
                on_err.record_failure(error);
                on_err.set_busy(false);
                Err(error.clone())
            },
        ))
    }

    /// Refresh-fetch shortcut: requires LOADED or EMPTY and not busy.
    pub fn refresh(&self, opts: &Value) -> Result<Promise> {
        let state = self.source_state();
        if self.is_busy() || !(state == SourceState::Loaded || state == SourceState::Empty) {
            return Err(Error::invalid_state("get", self.state_label()));
        }
        self.fetch(opts)
    }

    /// Persists through the mapper: `create` for NEW, `update` for
    /// LOADED. On success the returned attributes are loaded back in; on
    /// failure the rejection is folded into `errors` and re-propagated.
    pub fn save(&self, opts: &Value) -> Result<Promise> {
        let state = self.source_state();
        if self.is_busy() || !(state == SourceState::New || state == SourceState::Loaded) {
            return Err(Error::invalid_state("save", self.state_label()));
        }
        let method = if state == SourceState::New {
            "create"
        } else {
            "update"
        };
        let mapper = self.mtype.mapper_required(method)?;
        let promise = if state == SourceState::New {
            mapper.create(self, opts)
        } else {
            mapper.update(self, opts)
        }
        .ok_or_else(|| Error::mapper_unsupported(self.mtype.name(), method))?;

        tracing::debug!(ty = self.mtype.name(), state = state.as_str(), "saving model");
        self.set_busy(true);

        let on_ok = self.clone();
        let on_err = self.clone();
        Ok(promise.then_or(
            move |payload| {
                let outcome = match payload {
                    Value::Map(map) => on_ok.load_attrs(map),
                    Value::Null => {
                        // Nothing echoed back: the save still succeeded.
                        on_ok.set_source_state(SourceState::Loaded);
                        changes::clear_change_state(&on_ok.instance);
                        changes::clear_error_state(&on_ok.instance);
                        Ok(())
                    }
                    other => Err(Error::invalid_operation(format!(
                        "save payload must be a map, got {}",
                        other.type_label()
                    ))),
                };
                on_ok.set_busy(false);
                match outcome {
                    Ok(()) => Ok(on_ok.instance.as_value()),
                    Err(err) => {
                        let message = Value::from(err.to_string());
                        on_ok.record_failure(&message);
                        Err(message)
                    }
                }
            },
            move |error| {
                on_err.record_failure(error);
                on_err.set_busy(false);
                Err(error.clone())
            },
        ))
    }

    /// Deletes through the mapper.
    ///
    /// Already-DELETED models are a no-op; NEW models transition
    /// synchronously without touching the mapper.
    pub fn delete(&self, opts: &Value) -> Result<Promise> {
        let store = self.mtype.store()?;
        let scheduler = store.scheduler.clone();

        if self.source_state() == SourceState::Deleted {
            return Ok(Promise::resolved(&scheduler, self.instance.as_value()));
        }
        if self.is_busy() {
            return Err(Error::invalid_state("delete", self.state_label()));
        }
        if self.source_state() == SourceState::New {
            self.finalize_delete()?;
            return Ok(Promise::resolved(&scheduler, self.instance.as_value()));
        }

        let mapper = self.mtype.mapper_required("delete")?;
        let promise = mapper
            .delete(self, opts)
            .ok_or_else(|| Error::mapper_unsupported(self.mtype.name(), "delete"))?;
        self.set_busy(true);

        let on_ok = self.clone();
        let on_err = self.clone();
        Ok(promise.then_or(
            move |_| {
                let outcome = on_ok.finalize_delete();
                on_ok.set_busy(false);
                match outcome {
                    Ok(()) => Ok(on_ok.instance.as_value()),
                    Err(err) => Err(Value::from(err.to_string())),
                }
            },
            move |error| {
                on_err.record_failure(error);
                on_err.set_busy(false);
                Err(error.clone())
            },
        ))
    }

    fn finalize_delete(&self) -> Result<()> {
        let store = self.mtype.store()?;
        let id = self.id();
        if !id.is_null() {
            store
                .identity
                .remove(self.instance.object_type().name(), &id);
        }
        changes::clear_error_state(&self.instance);
        // Detach both ends of every declared inverse relation.
        for assoc in self.mtype.associations() {
            if assoc.inverse.is_none() {
                continue;
            }
            match assoc.kind {
                AssocKind::HasOne => {
                    self.instance.set(&assoc.name, Value::Null)?;
                }
                AssocKind::HasMany => {
                    if let Some(value) = self.instance.slot(&assoc.name) {
                        if let Some(array) = ObsArray::from_value(&value) {
                            array.clear()?;
                        }
                    }
                }
            }
        }
        self.set_source_state(SourceState::Deleted);
        tracing::debug!(ty = self.mtype.name(), "deleted model");
        Ok(())
    }
}

/// Builder for model type definitions.
pub struct ModelBuilder {
    store: Store,
    name: String,
    parent: Option<ModelType>,
    attrs: Vec<AttrDef>,
    assocs: Vec<AssocDef>,
    validators: Vec<ValidatorDef>,
    validator_methods: Vec<(String, ValidatorFn)>,
    methods: Vec<(String, MethodFn)>,
    mapper: Option<Rc<dyn Mapper>>,
    resolver: Option<ResolverFn>,
}

impl ModelBuilder {
    pub(crate) fn new(store: Store, name: String) -> Self {
        Self {
            store,
            name,
            parent: None,
            attrs: Vec::new(),
            assocs: Vec::new(),
            validators: Vec::new(),
            validator_methods: Vec::new(),
            methods: Vec::new(),
            mapper: None,
            resolver: None,
        }
    }

    /// Declares the parent model type.
    pub fn extends(mut self, parent: &ModelType) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Declares a typed attribute.
    pub fn attr(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.attrs.push(AttrDef {
            name: name.into(),
            kind: kind.into(),
            default: None,
        });
        self
    }

    /// Declares a typed attribute with a default value.
    pub fn attr_with_default(
        mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        default: Value,
    ) -> Self {
        self.attrs.push(AttrDef {
            name: name.into(),
            kind: kind.into(),
            default: Some(default),
        });
        self
    }

    /// Declares a to-one association.
    pub fn has_one(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        opts: AssocOptions,
    ) -> Self {
        self.assocs.push(AssocDef {
            name: name.into(),
            kind: AssocKind::HasOne,
            target: target.into(),
            inverse: opts.inverse,
            owner: opts.owner,
        });
        self
    }

    /// Declares a to-many association.
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        opts: AssocOptions,
    ) -> Self {
        self.assocs.push(AssocDef {
            name: name.into(),
            kind: AssocKind::HasMany,
            target: target.into(),
            inverse: opts.inverse,
            owner: opts.owner,
        });
        self
    }

    /// Declares a validator for a property.
    pub fn validate(
        mut self,
        property: impl Into<String>,
        validator: Validator,
        opts: ValidateOptions,
    ) -> Self {
        self.validators.push(ValidatorDef {
            property: property.into(),
            validator,
            on: opts.on,
            condition: opts.condition,
        });
        self
    }

    /// Registers a named validator body for `Validator::Method`
    /// resolution.
    pub fn validator_method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&Model) -> Option<String> + 'static,
    ) -> Self {
        self.validator_methods.push((name.into(), Rc::new(body)));
        self
    }

    /// Installs a named method for `Handler::Method` resolution.
    pub fn method(mut self, name: impl Into<String>, method: MethodFn) -> Self {
        self.methods.push((name.into(), method));
        self
    }

    /// Binds the mapper.
    pub fn mapper(mut self, mapper: Rc<dyn Mapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Declares the subclass resolver consulted by `load`.
    pub fn resolver(mut self, resolver: impl Fn(&ValueMap) -> Option<String> + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    /// Registers the type and installs all descriptors.
    pub fn build(self) -> Result<ModelType> {
        let store_inner = self.store.inner().clone();
        let store_w = self.store.downgrade();
        let parent_ty = self.parent.as_ref().map(|p| p.object_type().clone());
        let ty = store_inner
            .types
            .define(self.name.clone(), parent_ty.as_ref(), &store_inner.scheduler)?;

        if self.parent.is_none() {
            install_base_descriptors(&store_w, &ty);
        }
        for attr in &self.attrs {
            install_attr(&store_w, &ty, attr);
        }
        let assoc_defs: Vec<Rc<AssocDef>> = self.assocs.into_iter().map(Rc::new).collect();
        for def in &assoc_defs {
            match def.kind {
                AssocKind::HasOne => association::install_has_one(&store_w, &ty, def.clone()),
                AssocKind::HasMany => association::install_has_many(&store_w, &ty, def.clone()),
            }
        }
        for (name, method) in self.methods {
            ty.define_method(name, method);
        }

        let mtype = ModelType {
            inner: Rc::new(ModelTypeInner {
                ty: ty.clone(),
                store: store_w.clone(),
                parent: self.parent.clone(),
                attributes: self.attrs.into_iter().map(Rc::new).collect(),
                associations: assoc_defs,
                validators: self.validators.into_iter().map(Rc::new).collect(),
                validator_methods: RefCell::new(
                    self.validator_methods.into_iter().collect(),
                ),
                mapper: RefCell::new(self.mapper),
                resolver: RefCell::new(self.resolver),
            }),
        };

        // Aggregate getters need the merged owned-association list, so
        // they are installed per concrete type, shadowing any parent's.
        let owned: Vec<String> = mtype
            .associations()
            .iter()
            .filter(|a| a.owner)
            .map(|a| a.name.clone())
            .collect();
        install_aggregates(&store_w, &ty, &owned)?;

        store_inner
            .models
            .borrow_mut()
            .insert(self.name, mtype.clone());
        Ok(mtype)
    }
}

fn install_base_descriptors(store: &Weak<StoreInner>, ty: &ObjectType) {
    let id_store = store.clone();
    ty.define_property(Descriptor::new("id").set(move |instance, value| {
        if value.is_null() {
            return Err(Error::invalid_operation("id cannot be null"));
        }
        if let Some(existing) = instance.slot("id") {
            if !existing.is_null() {
                return Err(Error::IdAlreadySet {
                    ty: instance.object_type().name().to_string(),
                    existing,
                    assigned: value,
                });
            }
        }
        let store = id_store.upgrade().ok_or_else(store_dropped)?;
        store
            .identity
            .insert(instance.object_type().name(), &value, instance)?;
        Ok(Some(value))
    }));

    ty.define_property(Descriptor::new("sourceState").get(|instance| {
        Ok(instance
            .slot("sourceState")
            .unwrap_or_else(|| Value::from(SourceState::New.as_str())))
    }));
    ty.define_property(Descriptor::new("isBusy").get(|instance| {
        Ok(instance.slot("isBusy").unwrap_or(Value::Boolean(false)))
    }));
    ty.define_property(
        Descriptor::new("ownChanges")
            .get(|instance| Ok(Value::Map(changes::own_changes(instance)))),
    );
    ty.define_property(
        Descriptor::new("ownErrors")
            .get(|instance| Ok(Value::Map(changes::own_errors(instance)))),
    );
}

fn install_attr(store: &Weak<StoreInner>, ty: &ObjectType, attr: &AttrDef) {
    let setter_store = store.clone();
    let name = attr.name.clone();
    let kind = attr.kind.clone();
    let before_slot = format!("{}BeforeCoercion", attr.name);

    let mut descriptor = Descriptor::new(&attr.name)
        .attribute(&attr.kind)
        .set(move |instance, raw| {
            let store = setter_store.upgrade().ok_or_else(store_dropped)?;
            let converter = store.converters.get(&kind)?;
            let coerced = converter.coerce(&raw)?;
            // Validators may need the pre-coercion input (e.g. to tell a
            // blank string from a coerced null).
            instance.set_slot(&before_slot, raw);
            if !store.is_loading() {
                let prior = instance.get(&name).unwrap_or(Value::Null);
                changes::record_change(instance, &name, prior, coerced.clone());
            }
            Ok(Some(coerced))
        });
    if let Some(default) = &attr.default {
        descriptor = descriptor.default_value(default.clone());
    }
    ty.define_property(descriptor);
    ty.define_property(Descriptor::new(format!("{}BeforeCoercion", attr.name)));
}

fn install_aggregates(store: &Weak<StoreInner>, ty: &ObjectType, owned: &[String]) -> Result<()> {
    let mut change_deps: Vec<String> = vec!["ownChanges".to_string()];
    let mut error_deps: Vec<String> = vec!["ownErrors".to_string()];
    for name in owned {
        change_deps.push(format!("{name}.changes"));
        error_deps.push(format!("{name}.errors"));
    }

    let changes_store = store.clone();
    let change_refs: Vec<&str> = change_deps.iter().map(String::as_str).collect();
    ty.define_property(
        Descriptor::new("changes")
            .get(move |instance| {
                let store = changes_store.upgrade().ok_or_else(store_dropped)?;
                Ok(Value::map_from(changes::collect_changes(&store, instance)))
            })
            .depends_on(&change_refs)?,
    );

    let has_changes_store = store.clone();
    ty.define_property(
        Descriptor::new("hasChanges")
            .get(move |instance| {
                let store = has_changes_store.upgrade().ok_or_else(store_dropped)?;
                Ok(Value::Boolean(
                    !changes::collect_changes(&store, instance).is_empty(),
                ))
            })
            .depends_on(&["changes"])?,
    );

    let errors_store = store.clone();
    let error_refs: Vec<&str> = error_deps.iter().map(String::as_str).collect();
    ty.define_property(
        Descriptor::new("errors")
            .get(move |instance| {
                let store = errors_store.upgrade().ok_or_else(store_dropped)?;
                Ok(Value::map_from(changes::collect_errors(&store, instance)))
            })
            .depends_on(&error_refs)?,
    );

    let has_errors_store = store.clone();
    ty.define_property(
        Descriptor::new("hasErrors")
            .get(move |instance| {
                let store = has_errors_store.upgrade().ok_or_else(store_dropped)?;
                Ok(Value::Boolean(
                    !changes::collect_errors(&store, instance).is_empty(),
                ))
            })
            .depends_on(&["errors"])?,
    );
    Ok(())
}
