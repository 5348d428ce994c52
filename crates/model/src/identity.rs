//! The identity map.
//!
//! A process-wide registry keyed by (concrete type name, id) enforcing at
//! most one live instance per id. Entries are weak: an instance dropped
//! by its owner is treated as absent, so identity never extends a
//! model's lifetime.

use core::cell::RefCell;
use hashbrown::HashMap;

use orrery_core::{Error, Result, Value};
use orrery_reactive::{Instance, WeakInstance};

/// Hashable key form of an id value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdKey {
    Int(i64),
    Str(String),
}

/// Converts an id value into its key form.
///
/// Ids are scalars: integers (or integral numbers) and strings.
pub fn id_key(value: &Value) -> Result<IdKey> {
    match value {
        Value::Integer(n) => Ok(IdKey::Int(*n)),
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(IdKey::Int(*n as i64)),
        Value::String(s) => Ok(IdKey::Str(s.clone())),
        other => Err(Error::invalid_operation(format!(
            "id must be an integer or string, got {}",
            other.type_label()
        ))),
    }
}

/// Registry of live instances keyed by (type name, id).
pub struct IdentityMap {
    map: RefCell<HashMap<(String, IdKey), WeakInstance>>,
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMap {
    /// Creates an empty identity map.
    pub fn new() -> Self {
        Self {
            map: RefCell::new(HashMap::new()),
        }
    }

    /// Tracks an instance under (type name, id).
    ///
    /// Inserting a second live instance for an existing id is an error;
    /// a stale (dropped) entry is replaced.
    pub fn insert(&self, type_name: &str, id: &Value, instance: &Instance) -> Result<()> {
        let key = (type_name.to_string(), id_key(id)?);
        let mut map = self.map.borrow_mut();
        if let Some(existing) = map.get(&key).and_then(WeakInstance::upgrade) {
            if existing.instance_id() != instance.instance_id() {
                return Err(Error::DuplicateIdentity {
                    ty: type_name.to_string(),
                    id: id.clone(),
                });
            }
            return Ok(());
        }
        map.insert(key, instance.weak_ref());
        Ok(())
    }

    /// Returns the live instance for (type name, id), if tracked.
    pub fn get(&self, type_name: &str, id: &Value) -> Option<Instance> {
        let key = (type_name.to_string(), id_key(id).ok()?);
        self.map.borrow().get(&key).and_then(WeakInstance::upgrade)
    }

    /// Removes the entry for (type name, id).
    pub fn remove(&self, type_name: &str, id: &Value) {
        if let Ok(key) = id_key(id) {
            self.map.borrow_mut().remove(&(type_name.to_string(), key));
        }
    }

    /// Number of entries, live or stale.
    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    /// Returns true if no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    /// Prunes stale entries.
    pub fn cleanup(&self) {
        self.map
            .borrow_mut()
            .retain(|_, weak| weak.upgrade().is_some());
    }

    /// Empties the map entirely (test/session reset).
    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }
}
