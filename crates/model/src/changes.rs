//! Change and error tracking.
//!
//! Every attribute (and owned-association) mutation outside of a load
//! compares the new value against the prior one with the cycle-guarded
//! deep-equality predicate: the first divergence records the prior value
//! under the property name, and returning to the recorded original clears
//! the entry. To-many membership tracks `{added, removed}` lists that
//! collapse when a member is added then removed (or vice versa) within
//! the same epoch.
//!
//! Own-state lives in the reactive `ownChanges`/`ownErrors` map slots so
//! observers see it move; the aggregating `changes`/`errors` getters
//! merge owned associations in under dotted paths, walking the graph with
//! an explicit visited set.

use hashbrown::HashSet;
use std::rc::Rc;

use orrery_core::{deep_equal, Result, Value, ValueList, ValueMap};
use orrery_reactive::{Instance, ObsArray};

use crate::association::AssocKind;
use crate::store::StoreInner;

/// Filters for `undo_changes`: association names to skip (`except`) or
/// the only ones to recurse into (`only`).
#[derive(Clone, Default)]
pub struct UndoOptions {
    pub except: Vec<String>,
    pub only: Vec<String>,
}

pub(crate) fn is_marked_destroyed(instance: &Instance) -> bool {
    instance.slot("_destroy").is_some_and(|v| v.truthy())
}

fn state_map(instance: &Instance, slot: &str) -> ValueMap {
    if let Some(Value::Map(map)) = instance.slot(slot) {
        return map;
    }
    let map = Value::empty_map();
    instance.set_slot(slot, Value::Map(map.clone()));
    map
}

pub(crate) fn own_changes(instance: &Instance) -> ValueMap {
    state_map(instance, "ownChanges")
}

pub(crate) fn own_errors(instance: &Instance) -> ValueMap {
    state_map(instance, "ownErrors")
}

/// Records a scalar (or to-one) mutation.
pub(crate) fn record_change(instance: &Instance, name: &str, prior: Value, new: Value) {
    let map = own_changes(instance);
    let existing = map.borrow().get(name).cloned();
    let mutated = match existing {
        Some(original) => {
            // Back to the recorded original: the change evaporates.
            if deep_equal(&original, &new) {
                map.borrow_mut().remove(name);
                true
            } else {
                false
            }
        }
        None => {
            if !deep_equal(&prior, &new) {
                map.borrow_mut().insert(name.to_string(), prior);
                true
            } else {
                false
            }
        }
    };
    if mutated {
        instance.did_change("ownChanges");
    }
}

fn entry_list(entry: &ValueMap, key: &str) -> ValueList {
    if let Some(Value::List(list)) = entry.borrow().get(key).cloned() {
        return list;
    }
    let list = Value::empty_list();
    entry
        .borrow_mut()
        .insert(key.to_string(), Value::List(list.clone()));
    list
}

fn list_remove(list: &ValueList, value: &Value) -> bool {
    let index = list.borrow().iter().position(|v| v == value);
    match index {
        Some(i) => {
            list.borrow_mut().remove(i);
            true
        }
        None => false,
    }
}

/// Records a to-many membership mutation, collapsing add/remove pairs.
pub(crate) fn record_member_change(
    instance: &Instance,
    name: &str,
    added: &[Value],
    removed: &[Value],
) {
    let map = own_changes(instance);
    let entry = match map.borrow().get(name).cloned() {
        Some(Value::Map(entry)) => entry,
        _ => Value::empty_map(),
    };
    let added_list = entry_list(&entry, "added");
    let removed_list = entry_list(&entry, "removed");

    for item in added {
        if !list_remove(&removed_list, item) && !added_list.borrow().iter().any(|v| v == item) {
            added_list.borrow_mut().push(item.clone());
        }
    }
    for item in removed {
        if !list_remove(&added_list, item) && !removed_list.borrow().iter().any(|v| v == item) {
            removed_list.borrow_mut().push(item.clone());
        }
    }

    if added_list.borrow().is_empty() && removed_list.borrow().is_empty() {
        map.borrow_mut().remove(name);
    } else {
        map.borrow_mut()
            .insert(name.to_string(), Value::Map(entry));
    }
    instance.did_change("ownChanges");
}

/// Drops all recorded changes (after a load or save).
pub(crate) fn clear_change_state(instance: &Instance) {
    instance.set_slot("ownChanges", Value::map());
    instance.did_change("ownChanges");
}

/// Drops all recorded errors.
pub(crate) fn clear_error_state(instance: &Instance) {
    instance.set_slot("ownErrors", Value::map());
    instance.did_change("ownErrors");
}

/// Drops recorded errors for one property.
pub(crate) fn clear_errors_for(instance: &Instance, name: &str) {
    let map = own_errors(instance);
    if map.borrow_mut().remove(name).is_some() {
        instance.did_change("ownErrors");
    }
}

/// Appends a deduplicated error message for a property.
pub(crate) fn add_error(instance: &Instance, name: &str, message: &str) {
    let map = own_errors(instance);
    let existing = map.borrow().get(name).cloned();
    let list = match existing {
        Some(Value::List(list)) => list,
        _ => {
            let list = Value::empty_list();
            map.borrow_mut()
                .insert(name.to_string(), Value::List(list.clone()));
            list
        }
    };
    let message = Value::from(message);
    if !list.borrow().iter().any(|v| v == &message) {
        list.borrow_mut().push(message);
    }
    instance.did_change("ownErrors");
}

fn collect_state(
    store: &Rc<StoreInner>,
    instance: &Instance,
    slot: &str,
    visited: &mut HashSet<u64>,
) -> Vec<(String, Value)> {
    if !visited.insert(instance.instance_id()) {
        return Vec::new();
    }
    let mut out: Vec<(String, Value)> = match instance.slot(slot) {
        Some(Value::Map(map)) => map
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Vec::new(),
    };

    let Ok(mtype) = store.model(instance.object_type().name()) else {
        return out;
    };
    for assoc in mtype.associations() {
        if !assoc.owner {
            continue;
        }
        let Some(value) = instance.slot(&assoc.name) else {
            continue;
        };
        match assoc.kind {
            AssocKind::HasOne => {
                if let Some(child) = Instance::from_value(&value) {
                    if is_marked_destroyed(&child) {
                        continue;
                    }
                    for (key, entry) in collect_state(store, &child, slot, visited) {
                        out.push((format!("{}.{}", assoc.name, key), entry));
                    }
                }
            }
            AssocKind::HasMany => {
                if let Some(array) = ObsArray::from_value(&value) {
                    for (index, item) in array.to_vec().iter().enumerate() {
                        let Some(child) = Instance::from_value(item) else {
                            continue;
                        };
                        if is_marked_destroyed(&child) {
                            continue;
                        }
                        for (key, entry) in collect_state(store, &child, slot, visited) {
                            out.push((format!("{}.{}.{}", assoc.name, index, key), entry));
                        }
                    }
                }
            }
        }
    }
    out
}

/// Own changes plus owned associations' changes under dotted paths.
pub(crate) fn collect_changes(
    store: &Rc<StoreInner>,
    instance: &Instance,
) -> Vec<(String, Value)> {
    collect_state(store, instance, "ownChanges", &mut HashSet::new())
}

/// Own errors plus owned associations' errors under dotted paths.
pub(crate) fn collect_errors(
    store: &Rc<StoreInner>,
    instance: &Instance,
) -> Vec<(String, Value)> {
    collect_state(store, instance, "ownErrors", &mut HashSet::new())
}

/// Reverts every tracked change, then recurses into owned associations.
pub(crate) fn undo_changes(
    store: &Rc<StoreInner>,
    instance: &Instance,
    opts: &UndoOptions,
) -> Result<()> {
    undo_in(store, instance, opts, &mut HashSet::new())
}

fn undo_in(
    store: &Rc<StoreInner>,
    instance: &Instance,
    opts: &UndoOptions,
    visited: &mut HashSet<u64>,
) -> Result<()> {
    if !visited.insert(instance.instance_id()) {
        return Ok(());
    }
    let Ok(mtype) = store.model(instance.object_type().name()) else {
        return Ok(());
    };

    let entries: Vec<(String, Value)> = own_changes(instance)
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (name, prior) in entries {
        match mtype.assoc(&name) {
            Some(assoc) if assoc.kind == AssocKind::HasMany => {
                let array = crate::association::has_many_array(store, instance, &assoc)?;
                let added: Vec<Value> = prior
                    .map_get("added")
                    .and_then(|v| v.as_list().map(|l| l.borrow().clone()))
                    .unwrap_or_default();
                let removed: Vec<Value> = prior
                    .map_get("removed")
                    .and_then(|v| v.as_list().map(|l| l.borrow().clone()))
                    .unwrap_or_default();
                for item in &added {
                    array.remove_value(item)?;
                }
                // Removed members come back front-first so early removals
                // end up earliest again.
                for item in removed.iter().rev() {
                    array.unshift(item.clone())?;
                }
            }
            _ => {
                instance.set(&name, prior)?;
            }
        }
    }

    for assoc in mtype.associations() {
        if !assoc.owner {
            continue;
        }
        if !opts.only.is_empty() && !opts.only.contains(&assoc.name) {
            continue;
        }
        if opts.except.contains(&assoc.name) {
            continue;
        }
        let Some(value) = instance.slot(&assoc.name) else {
            continue;
        };
        match assoc.kind {
            AssocKind::HasOne => {
                if let Some(child) = Instance::from_value(&value) {
                    undo_in(store, &child, &UndoOptions::default(), visited)?;
                }
            }
            AssocKind::HasMany => {
                if let Some(array) = ObsArray::from_value(&value) {
                    for item in array.to_vec() {
                        if let Some(child) = Instance::from_value(&item) {
                            undo_in(store, &child, &UndoOptions::default(), visited)?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
