//! The association engine.
//!
//! Declarative one-to-one and one-to-many relations between model types.
//! Target types are given by name and resolved lazily through the store,
//! so forward references work. Declaring `inverse` keeps both sides
//! mutually consistent: mutating either side schedules the mirrored
//! mutation on the other, guarded by a per-(instance, association) flag
//! so the sync never recurses back. Declaring `owner` rolls the target's
//! changes and errors up into the owner's aggregates and records
//! membership changes (outside of loads).
//!
//! A to-many association is backed by a reactive array created on first
//! access; its delegate hook performs the type checks, inverse sync and
//! change aggregation on every structural mutation, and the array proxies
//! to its owner so member property changes surface as
//! `"<name>.<prop>"` notifications.

use std::rc::{Rc, Weak};

use orrery_core::{Error, Result, Value};
use orrery_reactive::{ArrayDelegate, Descriptor, Instance, ObsArray, ObjectType, WeakInstance};

use crate::changes;
use crate::store::StoreInner;

/// Relation arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssocKind {
    HasOne,
    HasMany,
}

/// Options for `has_one`/`has_many` declarations.
#[derive(Clone, Default)]
pub struct AssocOptions {
    /// Name of the reciprocal association on the target type.
    pub inverse: Option<String>,
    /// Roll the target's changes/errors into the owner's aggregates.
    pub owner: bool,
}

/// One declared association.
pub struct AssocDef {
    pub name: String,
    pub kind: AssocKind,
    /// Target type name, resolved lazily through the store.
    pub target: String,
    pub inverse: Option<String>,
    pub owner: bool,
}

fn store_dropped() -> Error {
    Error::invalid_operation("store was dropped")
}

/// Installs the property descriptor for a to-one association.
pub(crate) fn install_has_one(store: &Weak<StoreInner>, ty: &ObjectType, def: Rc<AssocDef>) {
    let store = store.clone();
    ty.define_property(
        Descriptor::new(&def.name)
            .default_value(Value::Null)
            .set(move |instance, value| set_has_one(&store, &def, instance, value)),
    );
}

/// Installs the property descriptor for a to-many association.
///
/// The property is read-only; all mutation goes through the backing
/// array, created on first access.
pub(crate) fn install_has_many(store: &Weak<StoreInner>, ty: &ObjectType, def: Rc<AssocDef>) {
    let store = store.clone();
    ty.define_property(Descriptor::new(&def.name).get(move |instance| {
        let store = store.upgrade().ok_or_else(store_dropped)?;
        has_many_array(&store, instance, &def).map(|array| array.as_value())
    }));
}

fn set_has_one(
    store: &Weak<StoreInner>,
    def: &Rc<AssocDef>,
    instance: &Instance,
    value: Value,
) -> Result<Option<Value>> {
    let store = store.upgrade().ok_or_else(store_dropped)?;
    let target = store.model(&def.target)?;

    let new_inst = match &value {
        Value::Null => None,
        other => match Instance::from_value(other) {
            Some(inst) if inst.object_type().is(target.object_type()) => Some(inst),
            _ => {
                return Err(Error::association_type(
                    instance.object_type().name(),
                    &def.name,
                    &def.target,
                    value.clone(),
                ))
            }
        },
    };

    let prior = instance.slot(&def.name).unwrap_or(Value::Null);
    let prev_inst = Instance::from_value(&prior);
    if let (Some(prev), Some(new)) = (&prev_inst, &new_inst) {
        if prev.instance_id() == new.instance_id() {
            return Ok(None);
        }
    }

    if def.owner && !store.is_loading() {
        changes::record_change(instance, &def.name, prior.clone(), value.clone());
    }

    if let Some(prev) = &prev_inst {
        prev.deregister_proxy(instance, &def.name);
    }
    if let Some(new) = &new_inst {
        new.register_proxy(instance, &def.name);
    }

    if let Some(inverse) = &def.inverse {
        // Skip when this very assignment is the mirrored half of a sync
        // initiated by the other side.
        if !store.inverse_guarded(instance.instance_id(), &def.name) {
            if let Some(prev) = &prev_inst {
                sync_inverse_remove(&store, prev, inverse, instance)?;
            }
            if let Some(new) = &new_inst {
                sync_inverse_add(&store, new, inverse, instance)?;
            }
        }
    }

    Ok(Some(value))
}

/// Returns the backing array for a to-many association, creating and
/// wiring it on first access.
pub(crate) fn has_many_array(
    store: &Rc<StoreInner>,
    instance: &Instance,
    def: &Rc<AssocDef>,
) -> Result<ObsArray> {
    if let Some(value) = instance.slot(&def.name) {
        if let Some(array) = ObsArray::from_value(&value) {
            return Ok(array);
        }
    }
    let array = ObsArray::new(&store.scheduler);
    array.set_delegate(Rc::new(HasManyDelegate {
        store: Rc::downgrade(store),
        owner: instance.weak_ref(),
        def: def.clone(),
    }));
    array.proxy(instance, &def.name);
    instance.set_slot(&def.name, array.as_value());
    Ok(array)
}

struct HasManyDelegate {
    store: Weak<StoreInner>,
    owner: WeakInstance,
    def: Rc<AssocDef>,
}

impl ArrayDelegate for HasManyDelegate {
    fn check_insert(&self, _array: &ObsArray, item: &Value) -> Result<()> {
        let store = self.store.upgrade().ok_or_else(store_dropped)?;
        let target = store.model(&self.def.target)?;
        match Instance::from_value(item) {
            Some(inst) if inst.object_type().is(target.object_type()) => Ok(()),
            _ => {
                let owner_name = self
                    .owner
                    .upgrade()
                    .map(|o| o.object_type().name().to_string())
                    .unwrap_or_default();
                Err(Error::association_type(
                    owner_name,
                    &self.def.name,
                    &self.def.target,
                    item.clone(),
                ))
            }
        }
    }

    fn after_splice(&self, _array: &ObsArray, _start: usize, added: &[Value], removed: &[Value]) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let Some(owner) = self.owner.upgrade() else {
            return;
        };

        if let Some(inverse) = &self.def.inverse {
            if !store.inverse_guarded(owner.instance_id(), &self.def.name) {
                for item in removed {
                    if let Some(member) = Instance::from_value(item) {
                        if let Err(err) = sync_inverse_remove(&store, &member, inverse, &owner) {
                            tracing::warn!(association = %self.def.name, %err, "inverse sync failed");
                        }
                    }
                }
                for item in added {
                    if let Some(member) = Instance::from_value(item) {
                        if let Err(err) = sync_inverse_add(&store, &member, inverse, &owner) {
                            tracing::warn!(association = %self.def.name, %err, "inverse sync failed");
                        }
                    }
                }
            }
        }

        // Loads reconcile membership without registering user changes.
        if self.def.owner && !store.is_loading() {
            changes::record_member_change(&owner, &self.def.name, added, removed);
        }
    }
}

fn sync_inverse_add(
    store: &Rc<StoreInner>,
    other: &Instance,
    inverse: &str,
    me: &Instance,
) -> Result<()> {
    store.guard_inverse(other.instance_id(), inverse);
    let result = (|| {
        let other_model = store.model(other.object_type().name())?;
        match other_model.assoc(inverse) {
            Some(def) => match def.kind {
                AssocKind::HasMany => {
                    let array = has_many_array(store, other, &def)?;
                    let mine = me.as_value();
                    if !array.contains(&mine) {
                        array.push(mine)?;
                    }
                    Ok(())
                }
                AssocKind::HasOne => other.set(inverse, me.as_value()),
            },
            None => Ok(()),
        }
    })();
    store.unguard_inverse(other.instance_id(), inverse);
    result
}

fn sync_inverse_remove(
    store: &Rc<StoreInner>,
    other: &Instance,
    inverse: &str,
    me: &Instance,
) -> Result<()> {
    store.guard_inverse(other.instance_id(), inverse);
    let result = (|| {
        let other_model = store.model(other.object_type().name())?;
        match other_model.assoc(inverse) {
            Some(def) => match def.kind {
                AssocKind::HasMany => {
                    let array = has_many_array(store, other, &def)?;
                    array.remove_value(&me.as_value())?;
                    Ok(())
                }
                AssocKind::HasOne => {
                    // Only clear if it still points at us.
                    let current = other.slot(inverse);
                    let points_here = current
                        .as_ref()
                        .and_then(Instance::from_value)
                        .is_some_and(|inst| inst.instance_id() == me.instance_id());
                    if points_here {
                        other.set(inverse, Value::Null)?;
                    }
                    Ok(())
                }
            },
            None => Ok(()),
        }
    })();
    store.unguard_inverse(other.instance_id(), inverse);
    result
}
