//! The data-mapper capability contract.
//!
//! A mapper is the external collaborator that moves models to and from a
//! backing store. Every capability is optional: the default
//! implementations return `None`, and the model core converts that into
//! a synchronous `MapperUnsupported` error naming the type and method.
//! A capability that is provided returns a `Promise` the mapper settles
//! when the transport finishes; the core never blocks on it.

use orrery_core::Value;
use orrery_reactive::Promise;

use crate::model::Model;

/// Asynchronous CRUD/query capabilities for a model type.
pub trait Mapper {
    /// Runs a query; resolves with an array payload or a
    /// `{results, meta}` map payload.
    fn query(&self, opts: &Value) -> Option<Promise> {
        let _ = opts;
        None
    }

    /// Fetches one record by id; resolves with an attrs map.
    fn get(&self, id: &Value, opts: &Value) -> Option<Promise> {
        let _ = (id, opts);
        None
    }

    /// Persists a NEW model; resolves with an attrs map (including the
    /// assigned id).
    fn create(&self, model: &Model, opts: &Value) -> Option<Promise> {
        let _ = (model, opts);
        None
    }

    /// Persists a LOADED model; resolves with an attrs map.
    fn update(&self, model: &Model, opts: &Value) -> Option<Promise> {
        let _ = (model, opts);
        None
    }

    /// Deletes a model; resolves with no meaningful value.
    fn delete(&self, model: &Model, opts: &Value) -> Option<Promise> {
        let _ = (model, opts);
        None
    }
}
