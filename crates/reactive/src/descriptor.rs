//! Property descriptors.
//!
//! A descriptor is the per-(type, name) record behind a reactive
//! property: optional getter/setter, default value, dependency paths,
//! caching, and — for model attributes — the converter kind. Descriptors
//! live in per-type tables and are resolved by walking the type's parent
//! chain, so a subtype sees later changes to a shared ancestor descriptor
//! it has not overridden.

use core::fmt;
use std::rc::Rc;

use orrery_core::{Error, Result, Value};

use crate::object::Instance;

/// Computes a property value from its instance.
pub type GetterFn = Rc<dyn Fn(&Instance) -> Result<Value>>;

/// Intercepts a property write.
///
/// Returning `Ok(Some(v))` stores `v` and schedules notification;
/// returning `Ok(None)` means the setter handled storage itself.
pub type SetterFn = Rc<dyn Fn(&Instance, Value) -> Result<Option<Value>>>;

/// A property descriptor.
#[derive(Clone)]
pub struct Descriptor {
    name: String,
    getter: Option<GetterFn>,
    setter: Option<SetterFn>,
    default: Option<Value>,
    depends_on: Vec<String>,
    cached: bool,
    is_attribute: bool,
    converter: Option<String>,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("has_getter", &self.getter.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("default", &self.default)
            .field("depends_on", &self.depends_on)
            .field("cached", &self.cached)
            .field("is_attribute", &self.is_attribute)
            .field("converter", &self.converter)
            .finish()
    }
}

impl Descriptor {
    /// Creates a plain stored-slot descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            getter: None,
            setter: None,
            default: None,
            depends_on: Vec::new(),
            cached: false,
            is_attribute: false,
            converter: None,
        }
    }

    /// Installs a getter.
    pub fn get(mut self, f: impl Fn(&Instance) -> Result<Value> + 'static) -> Self {
        self.getter = Some(Rc::new(f));
        self
    }

    /// Installs a setter.
    pub fn set(mut self, f: impl Fn(&Instance, Value) -> Result<Option<Value>> + 'static) -> Self {
        self.setter = Some(Rc::new(f));
        self
    }

    /// Sets the fallback value used when the slot was never written.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Declares dependency paths.
    ///
    /// Paths have at most two segments ("a" or "a.b"); deeper paths are
    /// rejected.
    pub fn depends_on(mut self, paths: &[&str]) -> Result<Self> {
        for path in paths {
            if path.is_empty() || path.split('.').count() > 2 {
                return Err(Error::DependencyTooDeep {
                    path: (*path).into(),
                });
            }
            self.depends_on.push((*path).into());
        }
        Ok(self)
    }

    /// Enables value caching for this property.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Marks this property as a typed attribute with a converter kind.
    pub fn attribute(mut self, converter: impl Into<String>) -> Self {
        self.is_attribute = true;
        self.converter = Some(converter.into());
        self
    }

    /// Returns the property name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A property with a getter but no setter is read-only.
    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.getter.is_some() && self.setter.is_none()
    }

    /// Returns whether this property is a typed attribute.
    #[inline]
    pub fn is_attribute(&self) -> bool {
        self.is_attribute
    }

    /// Returns the converter kind, if this is an attribute.
    #[inline]
    pub fn converter_kind(&self) -> Option<&str> {
        self.converter.as_deref()
    }

    /// Returns whether value caching is enabled.
    #[inline]
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Returns the declared default value.
    #[inline]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns the declared dependency paths.
    #[inline]
    pub fn dependency_paths(&self) -> &[String] {
        &self.depends_on
    }

    pub(crate) fn getter(&self) -> Option<&GetterFn> {
        self.getter.as_ref()
    }

    pub(crate) fn setter(&self) -> Option<&SetterFn> {
        self.setter.as_ref()
    }

    /// Returns whether a change to `changed` dirties this property.
    ///
    /// A path dependency "a.b" is triggered by "a.b" itself and by its
    /// first segment "a".
    pub(crate) fn triggered_by(&self, changed: &str) -> bool {
        self.depends_on.iter().any(|path| {
            path == changed || path.split('.').next() == Some(changed)
        })
    }
}
