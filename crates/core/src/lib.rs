//! Orrery Core - value, conversion and error types for the Orrery
//! reactive model layer.
//!
//! This crate provides the foundational types shared by the reactive and
//! model crates:
//!
//! - `Value`: the dynamic cell type property slots and mapper payloads hold
//! - `deep_equal`: structural equality with cycle guarding (change tracking)
//! - `Converter` / `ConverterRegistry`: attribute coercion and serialization
//! - `inflect`: association payload key derivation
//! - `json`: `Value` ⇄ `serde_json::Value` boundary conversion
//! - `Error`: error types for the whole layer
//!
//! # Example
//!
//! ```rust
//! use orrery_core::{ConverterRegistry, Value};
//!
//! let converters = ConverterRegistry::with_builtins();
//! let number = converters.get("number").unwrap();
//!
//! let canonical = number.coerce(&Value::from("9")).unwrap();
//! assert_eq!(canonical, Value::Number(9.0));
//! assert_eq!(number.serialize(&canonical).unwrap(), canonical);
//! ```

mod convert;
mod eq;
mod error;
pub mod inflect;
pub mod json;
mod value;

pub use convert::{Converter, ConverterRegistry};
pub use eq::{deep_equal, deep_equal_in, VisitSet};
pub use error::{Error, Result};
pub use value::{next_ref_id, ObjRef, RefKind, Referent, Value, ValueList, ValueMap};
