//! The validation framework.
//!
//! Validators are registered per property as closures or late-bound
//! method names (resolved against the model type's validator table at
//! run time). A validator may be gated by a context string (`on`) — it
//! then only runs when validation is invoked with that context — and by
//! an `if` predicate. Validation never throws for invalid data: messages
//! accumulate on the model's reactive error state and the caller reads
//! the verdict from the returned flag.

use hashbrown::HashSet;
use std::rc::Rc;

use orrery_core::{Error, Result};
use orrery_reactive::{Instance, ObsArray};

use crate::association::AssocKind;
use crate::changes;
use crate::model::{Model, ModelType};
use crate::store::StoreInner;

/// A validator body: returns a message to record, or None when valid.
pub type ValidatorFn = Rc<dyn Fn(&Model) -> Option<String>>;

/// An `if` guard for a validator.
pub type ValidatorCond = Rc<dyn Fn(&Model) -> bool>;

/// A validator reference.
#[derive(Clone)]
pub enum Validator {
    /// A closure invoked directly.
    Func(ValidatorFn),
    /// A name resolved against the model type's validator table at call
    /// time.
    Method(String),
}

impl Validator {
    /// Wraps a closure.
    pub fn func(f: impl Fn(&Model) -> Option<String> + 'static) -> Self {
        Validator::Func(Rc::new(f))
    }

    /// Names a registered validator method.
    pub fn method(name: impl Into<String>) -> Self {
        Validator::Method(name.into())
    }
}

/// Options for a validator declaration.
#[derive(Clone, Default)]
pub struct ValidateOptions {
    /// Context gate: runs only under `validate(Some(context))`.
    pub on: Option<String>,
    /// Predicate gate: runs only when it returns true.
    pub condition: Option<ValidatorCond>,
}

/// One declared validator.
#[derive(Clone)]
pub struct ValidatorDef {
    pub(crate) property: String,
    pub(crate) validator: Validator,
    pub(crate) on: Option<String>,
    pub(crate) condition: Option<ValidatorCond>,
}

fn resolve(mtype: &ModelType, validator: &Validator) -> Result<ValidatorFn> {
    match validator {
        Validator::Func(f) => Ok(f.clone()),
        Validator::Method(name) => mtype
            .validator_method(name)
            .ok_or_else(|| Error::unknown_method(mtype.name(), name.clone())),
    }
}

/// Runs the applicable validators for a model, optionally scoped to one
/// property.
pub(crate) fn run_validators(
    model: &Model,
    context: Option<&str>,
    scope: Option<&str>,
) -> Result<()> {
    for vdef in model.model_type().validators() {
        if let Some(property) = scope {
            if vdef.property != property {
                continue;
            }
        }
        // Context-bound validators run only under their context;
        // unbound validators run under any.
        if let Some(on) = &vdef.on {
            if context != Some(on.as_str()) {
                continue;
            }
        }
        if let Some(condition) = &vdef.condition {
            if !condition(model) {
                continue;
            }
        }
        let body = resolve(model.model_type(), &vdef.validator)?;
        if let Some(message) = body(model) {
            changes::add_error(model.instance(), &vdef.property, &message);
        }
    }
    Ok(())
}

/// Validates a model and its owned associations, skipping members
/// flagged `_destroy`. Returns whether the whole subtree is error-free.
pub(crate) fn validate_tree(
    store: &Rc<StoreInner>,
    model: &Model,
    context: Option<&str>,
    visited: &mut HashSet<u64>,
) -> Result<bool> {
    if !visited.insert(model.instance().instance_id()) {
        return Ok(true);
    }
    changes::clear_error_state(model.instance());
    run_validators(model, context, None)?;

    let mut ok = changes::own_errors(model.instance()).borrow().is_empty();

    for assoc in model.model_type().associations() {
        if !assoc.owner {
            continue;
        }
        let Some(value) = model.instance().slot(&assoc.name) else {
            continue;
        };
        match assoc.kind {
            AssocKind::HasOne => {
                if let Some(child) = Instance::from_value(&value) {
                    if changes::is_marked_destroyed(&child) {
                        continue;
                    }
                    let child_model = Model::for_instance(store, &child)?;
                    ok &= validate_tree(store, &child_model, context, visited)?;
                }
            }
            AssocKind::HasMany => {
                if let Some(array) = ObsArray::from_value(&value) {
                    for item in array.to_vec() {
                        let Some(child) = Instance::from_value(&item) else {
                            continue;
                        };
                        if changes::is_marked_destroyed(&child) {
                            continue;
                        }
                        let child_model = Model::for_instance(store, &child)?;
                        ok &= validate_tree(store, &child_model, context, visited)?;
                    }
                }
            }
        }
    }
    Ok(ok)
}

/// Validates one property only: clears its errors, runs its validators.
pub(crate) fn validate_property(
    model: &Model,
    property: &str,
    context: Option<&str>,
) -> Result<bool> {
    changes::clear_errors_for(model.instance(), property);
    run_validators(model, context, Some(property))?;
    let clean = !changes::own_errors(model.instance())
        .borrow()
        .contains_key(property);
    Ok(clean)
}
