//! Orrery Model - typed models, associations and the asynchronous
//! data-mapper protocol on top of the Orrery reactive layer.
//!
//! This crate provides:
//!
//! - `Store`: the facade owning all process-scoped services (scheduler,
//!   type registry, identity map, converter registry, load guard)
//! - `ModelBuilder` / `ModelType` / `Model`: typed attributes with
//!   converter-backed coercion, lifecycle states, change tracking,
//!   validation, and load/save/delete orchestration through a `Mapper`
//! - `IdentityMap`: at most one live instance per (type, id)
//! - associations: `has_one`/`has_many` with lazy target resolution,
//!   inverse synchronization and owned change/error aggregation
//! - `QueryArray`: the busy/queued query container
//!
//! # Example
//!
//! ```rust
//! use orrery_core::Value;
//! use orrery_model::Store;
//!
//! let store = Store::new();
//! let todo = store
//!     .define("Todo")
//!     .attr("name", "string")
//!     .attr("quantity", "number")
//!     .build()
//!     .unwrap();
//!
//! let payload = Value::map_from([
//!     ("id", Value::Integer(1)),
//!     ("name", Value::from("dishes")),
//!     ("quantity", Value::from("9")),
//! ]);
//! let model = todo.load(payload.as_map().unwrap()).unwrap();
//!
//! assert_eq!(model.get("quantity").unwrap(), Value::Number(9.0));
//! assert!(!model.has_changes());
//! ```

mod association;
mod changes;
mod identity;
mod mapper;
mod model;
mod query;
mod store;
mod validate;

pub use association::{AssocDef, AssocKind, AssocOptions};
pub use changes::UndoOptions;
pub use identity::{id_key, IdKey, IdentityMap};
pub use mapper::Mapper;
pub use model::{AttrDef, Model, ModelBuilder, ModelType, ResolverFn, SourceState};
pub use query::QueryArray;
pub use store::Store;
pub use validate::{ValidateOptions, Validator, ValidatorCond, ValidatorFn};
