//! Error types for the Orrery model layer.

use crate::value::Value;

/// Result type alias for Orrery operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for Orrery operations.
///
/// Everything here is a programming error in the caller: it is returned
/// synchronously from the offending call and is not meant to be recovered
/// from at runtime. Validation and mapper failures are not errors in this
/// sense; they accumulate on the model's reactive `errors` state instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Property was never declared on the type or instance.
    #[error("unknown property `{property}` on type {ty}")]
    UnknownProperty { ty: String, property: String },

    /// Write attempted on a property declared with a getter but no setter.
    #[error("property `{property}` on type {ty} is read-only")]
    ReadonlyProperty { ty: String, property: String },

    /// A string-named handler or validator did not resolve to a method.
    #[error("unknown method `{method}` on type {ty}")]
    UnknownMethod { ty: String, method: String },

    /// Dependency paths may have at most two segments.
    #[error("dependency path `{path}` has more than two segments")]
    DependencyTooDeep { path: String },

    /// Type names are global and must be unique.
    #[error("type name `{name}` is already registered")]
    DuplicateType { name: String },

    /// No type registered under this name.
    #[error("unknown type `{name}`")]
    UnknownType { name: String },

    /// `id` is write-once.
    #[error("id already set on {ty}: was {existing:?}, got {assigned:?}")]
    IdAlreadySet {
        ty: String,
        existing: Value,
        assigned: Value,
    },

    /// The identity map already tracks a live instance for this id.
    #[error("an instance of {ty} with id {id:?} is already tracked")]
    DuplicateIdentity { ty: String, id: Value },

    /// Association assignment with a value of the wrong type.
    #[error("association `{association}` on {ty} expects {expected}, got {received:?}")]
    AssociationType {
        ty: String,
        association: String,
        expected: String,
        received: Value,
    },

    /// No mapper bound for a type that needs one.
    #[error("no mapper bound for type {ty} (required by `{method}`)")]
    MapperMissing { ty: String, method: String },

    /// The bound mapper does not provide this capability.
    #[error("mapper for type {ty} does not implement `{method}`")]
    MapperUnsupported { ty: String, method: String },

    /// Converter kinds are registered once, process-wide.
    #[error("duplicate converter registration for kind `{kind}`")]
    DuplicateConverter { kind: String },

    /// No converter registered under this kind name.
    #[error("unknown converter kind `{kind}`")]
    UnknownConverter { kind: String },

    /// A raw value could not be coerced to the converter's kind.
    #[error("cannot coerce {value:?} to {kind}")]
    Coerce { kind: String, value: Value },

    /// Operation attempted in a disallowed lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    /// `load` requires an id in the payload.
    #[error("cannot load {ty} without an id")]
    MissingId { ty: String },

    /// Subclass resolution failed for a discriminated payload.
    #[error("could not resolve subtype `{name}` of {ty}")]
    UnresolvedSubtype { ty: String, name: String },

    /// Array index out of range after negative-index adjustment.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    /// Catch-all for invalid operations.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl Error {
    /// Creates an unknown property error.
    pub fn unknown_property(ty: impl Into<String>, property: impl Into<String>) -> Self {
        Error::UnknownProperty {
            ty: ty.into(),
            property: property.into(),
        }
    }

    /// Creates a read-only property error.
    pub fn readonly_property(ty: impl Into<String>, property: impl Into<String>) -> Self {
        Error::ReadonlyProperty {
            ty: ty.into(),
            property: property.into(),
        }
    }

    /// Creates an unknown method error.
    pub fn unknown_method(ty: impl Into<String>, method: impl Into<String>) -> Self {
        Error::UnknownMethod {
            ty: ty.into(),
            method: method.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Error::UnknownType { name: name.into() }
    }

    /// Creates a duplicate type error.
    pub fn duplicate_type(name: impl Into<String>) -> Self {
        Error::DuplicateType { name: name.into() }
    }

    /// Creates an association type mismatch error.
    pub fn association_type(
        ty: impl Into<String>,
        association: impl Into<String>,
        expected: impl Into<String>,
        received: Value,
    ) -> Self {
        Error::AssociationType {
            ty: ty.into(),
            association: association.into(),
            expected: expected.into(),
            received,
        }
    }

    /// Creates a missing mapper error.
    pub fn mapper_missing(ty: impl Into<String>, method: impl Into<String>) -> Self {
        Error::MapperMissing {
            ty: ty.into(),
            method: method.into(),
        }
    }

    /// Creates an unsupported mapper capability error.
    pub fn mapper_unsupported(ty: impl Into<String>, method: impl Into<String>) -> Self {
        Error::MapperUnsupported {
            ty: ty.into(),
            method: method.into(),
        }
    }

    /// Creates a coercion failure error.
    pub fn coerce(kind: impl Into<String>, value: Value) -> Self {
        Error::Coerce {
            kind: kind.into(),
            value,
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        Error::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unknown_property("Person", "age");
        assert!(err.to_string().contains("age"));
        assert!(err.to_string().contains("Person"));

        let err = Error::invalid_state("save", "EMPTY-BUSY");
        assert_eq!(err.to_string(), "cannot save while EMPTY-BUSY");
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::mapper_missing("Todo", "query");
        match err {
            Error::MapperMissing { ty, method } => {
                assert_eq!(ty, "Todo");
                assert_eq!(method, "query");
            }
            _ => panic!("wrong error type"),
        }
    }
}
