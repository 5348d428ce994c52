//! Attribute converters.
//!
//! A converter is the capability pair `{coerce, serialize}` behind a typed
//! attribute: `coerce` turns raw payload input into the canonical stored
//! value, `serialize` turns the canonical value back into the JSON-safe
//! shape handed to mappers. Converters are registered process-wide under a
//! kind name; registering a duplicate kind is an error.

use core::cell::RefCell;
use core::fmt;
use hashbrown::HashMap;
use std::rc::Rc;
use time::format_description::well_known::Rfc3339;
use time::{format_description, Date, OffsetDateTime};

use crate::error::{Error, Result};
use crate::value::Value;

/// Coercion/serialization capability for one attribute kind.
pub trait Converter: fmt::Debug {
    /// Converts raw input into the canonical stored value.
    ///
    /// `Null` always passes through; an uncoercible value is an error.
    fn coerce(&self, raw: &Value) -> Result<Value>;

    /// Converts the canonical value into its JSON-safe payload shape.
    fn serialize(&self, value: &Value) -> Result<Value>;
}

/// Registry of converters keyed by kind name.
pub struct ConverterRegistry {
    table: RefCell<HashMap<String, Rc<dyn Converter>>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ConverterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            table: RefCell::new(HashMap::new()),
        }
    }

    /// Creates a registry pre-populated with the built-in kinds:
    /// `string`, `integer`, `number`, `boolean`, `date`, `datetime`, `any`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.install_builtins();
        registry
    }

    fn install_builtins(&self) {
        let mut table = self.table.borrow_mut();
        table.insert("string".into(), Rc::new(StringKind) as Rc<dyn Converter>);
        table.insert("integer".into(), Rc::new(IntegerKind));
        table.insert("number".into(), Rc::new(NumberKind));
        table.insert("boolean".into(), Rc::new(BooleanKind));
        table.insert("date".into(), Rc::new(DateKind));
        table.insert("datetime".into(), Rc::new(DateTimeKind));
        table.insert("any".into(), Rc::new(AnyKind));
    }

    /// Registers a converter under a kind name.
    ///
    /// Returns an error if the kind is already registered.
    pub fn register(&self, kind: impl Into<String>, converter: Rc<dyn Converter>) -> Result<()> {
        let kind = kind.into();
        let mut table = self.table.borrow_mut();
        if table.contains_key(&kind) {
            return Err(Error::DuplicateConverter { kind });
        }
        table.insert(kind, converter);
        Ok(())
    }

    /// Looks up a converter by kind name.
    pub fn get(&self, kind: &str) -> Result<Rc<dyn Converter>> {
        self.table
            .borrow()
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownConverter { kind: kind.into() })
    }

    /// Returns whether a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.table.borrow().contains_key(kind)
    }

    /// Drops all registrations and reinstalls the built-ins.
    pub fn reset(&self) {
        self.table.borrow_mut().clear();
        self.install_builtins();
    }
}

#[derive(Debug)]
struct StringKind;

impl Converter for StringKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::String(_) => Ok(raw.clone()),
            Value::Integer(n) => Ok(Value::String(n.to_string())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Boolean(b) => Ok(Value::String(b.to_string())),
            _ => Err(Error::coerce("string", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
struct IntegerKind;

impl Converter for IntegerKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Integer(_) => Ok(raw.clone()),
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => {
                Ok(Value::Integer(*n as i64))
            }
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(Value::Null);
                }
                s.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| Error::coerce("integer", raw.clone()))
            }
            _ => Err(Error::coerce("integer", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
struct NumberKind;

impl Converter for NumberKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Number(_) => Ok(raw.clone()),
            Value::Integer(n) => Ok(Value::Number(*n as f64)),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(Value::Null);
                }
                s.parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| Error::coerce("number", raw.clone()))
            }
            _ => Err(Error::coerce("number", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
struct BooleanKind;

impl Converter for BooleanKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Boolean(_) => Ok(raw.clone()),
            Value::Integer(0) => Ok(Value::Boolean(false)),
            Value::Integer(1) => Ok(Value::Boolean(true)),
            Value::String(s) => match s.trim() {
                "" => Ok(Value::Null),
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(Error::coerce("boolean", raw.clone())),
            },
            _ => Err(Error::coerce("boolean", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

const DATE_FORMAT: &str = "[year]-[month]-[day]";

fn parse_date_millis(s: &str) -> Option<i64> {
    let fd = format_description::parse(DATE_FORMAT).ok()?;
    let date = Date::parse(s, &fd).ok()?;
    Some(date.midnight().assume_utc().unix_timestamp() * 1000)
}

fn format_date_millis(ms: i64) -> Option<String> {
    let fd = format_description::parse(DATE_FORMAT).ok()?;
    let odt = OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()?;
    odt.date().format(&fd).ok()
}

fn parse_datetime_millis(s: &str) -> Option<i64> {
    let odt = OffsetDateTime::parse(s, &Rfc3339).ok()?;
    Some((odt.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn format_datetime_millis(ms: i64) -> Option<String> {
    let odt = OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()?;
    odt.format(&Rfc3339).ok()
}

#[derive(Debug)]
struct DateKind;

impl Converter for DateKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Date(_) => Ok(raw.clone()),
            Value::DateTime(ms) | Value::Integer(ms) => Ok(Value::Date(*ms)),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(Value::Null);
                }
                parse_date_millis(s)
                    .map(Value::Date)
                    .ok_or_else(|| Error::coerce("date", raw.clone()))
            }
            _ => Err(Error::coerce("date", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Date(ms) | Value::DateTime(ms) => format_date_millis(*ms)
                .map(Value::String)
                .ok_or_else(|| Error::coerce("date", value.clone())),
            _ => Err(Error::coerce("date", value.clone())),
        }
    }
}

#[derive(Debug)]
struct DateTimeKind;

impl Converter for DateTimeKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::DateTime(_) => Ok(raw.clone()),
            Value::Date(ms) | Value::Integer(ms) => Ok(Value::DateTime(*ms)),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(Value::Null);
                }
                parse_datetime_millis(s)
                    .map(Value::DateTime)
                    .ok_or_else(|| Error::coerce("datetime", raw.clone()))
            }
            _ => Err(Error::coerce("datetime", raw.clone())),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Date(ms) | Value::DateTime(ms) => format_datetime_millis(*ms)
                .map(Value::String)
                .ok_or_else(|| Error::coerce("datetime", value.clone())),
            _ => Err(Error::coerce("datetime", value.clone())),
        }
    }
}

/// Identity passthrough for untyped attributes.
#[derive(Debug)]
struct AnyKind;

impl Converter for AnyKind {
    fn coerce(&self, raw: &Value) -> Result<Value> {
        Ok(raw.clone())
    }

    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConverterRegistry {
        ConverterRegistry::with_builtins()
    }

    #[test]
    fn test_number_coerce_from_string() {
        let conv = registry().get("number").unwrap();
        assert_eq!(conv.coerce(&Value::from("9")).unwrap(), Value::Number(9.0));
        assert_eq!(conv.coerce(&Value::from(" 3.5 ")).unwrap(), Value::Number(3.5));
        assert_eq!(conv.coerce(&Value::from("")).unwrap(), Value::Null);
        assert!(conv.coerce(&Value::from("abc")).is_err());
    }

    #[test]
    fn test_number_serialize_is_idempotent() {
        let conv = registry().get("number").unwrap();
        let canonical = conv.coerce(&Value::from("9")).unwrap();
        let serialized = conv.serialize(&canonical).unwrap();
        assert_eq!(serialized, canonical);
        assert_eq!(serialized, Value::Integer(9));
    }

    #[test]
    fn test_integer_coerce() {
        let conv = registry().get("integer").unwrap();
        assert_eq!(conv.coerce(&Value::from("42")).unwrap(), Value::Integer(42));
        assert_eq!(conv.coerce(&Value::Number(7.0)).unwrap(), Value::Integer(7));
        assert!(conv.coerce(&Value::Number(7.5)).is_err());
    }

    #[test]
    fn test_string_coerce() {
        let conv = registry().get("string").unwrap();
        assert_eq!(conv.coerce(&Value::Integer(5)).unwrap(), Value::from("5"));
        assert_eq!(conv.coerce(&Value::Boolean(true)).unwrap(), Value::from("true"));
        assert_eq!(conv.coerce(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_boolean_coerce() {
        let conv = registry().get("boolean").unwrap();
        assert_eq!(conv.coerce(&Value::from("true")).unwrap(), Value::Boolean(true));
        assert_eq!(conv.coerce(&Value::Integer(0)).unwrap(), Value::Boolean(false));
        assert!(conv.coerce(&Value::from("yes")).is_err());
    }

    #[test]
    fn test_date_round_trip() {
        let conv = registry().get("date").unwrap();
        let coerced = conv.coerce(&Value::from("2024-03-01")).unwrap();
        match coerced {
            Value::Date(ms) => assert!(ms > 0),
            other => panic!("expected date, got {other:?}"),
        }
        let serialized = conv.serialize(&coerced).unwrap();
        assert_eq!(serialized, Value::from("2024-03-01"));
    }

    #[test]
    fn test_datetime_round_trip() {
        let conv = registry().get("datetime").unwrap();
        let coerced = conv.coerce(&Value::from("2024-03-01T12:30:00Z")).unwrap();
        let ms = match coerced {
            Value::DateTime(ms) => ms,
            other => panic!("expected datetime, got {other:?}"),
        };
        let serialized = conv.serialize(&Value::DateTime(ms)).unwrap();
        assert_eq!(serialized, Value::from("2024-03-01T12:30:00Z"));
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let reg = registry();
        let err = reg.register("string", Rc::new(AnyKind)).unwrap_err();
        assert!(matches!(err, Error::DuplicateConverter { .. }));
    }

    #[test]
    fn test_unknown_kind() {
        let err = registry().get("uuid").unwrap_err();
        assert!(matches!(err, Error::UnknownConverter { .. }));
    }

    #[test]
    fn test_reset_reinstalls_builtins() {
        let reg = registry();
        reg.register("custom", Rc::new(AnyKind)).unwrap();
        reg.reset();
        assert!(!reg.contains("custom"));
        assert!(reg.contains("string"));
    }
}
