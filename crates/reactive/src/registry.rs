//! Per-instance notification registry.
//!
//! Every observable instance and reactive array owns one of these tables.
//! A registration is the tuple (event pattern, handler, observer, context,
//! once). Handlers are a tagged variant: a direct callable, or a method
//! name resolved against the observer type's method table at dispatch time
//! (late binding is deliberate — an overridden method wins even if the
//! registration predates the override).
//!
//! Dispatch is synchronous and most-recently-registered first. A handler
//! returning an error is logged and skipped; dispatch continues. A method
//! name that does not resolve is a programming error and aborts the emit.

use core::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use orrery_core::{Error, Result, Value};

use crate::object::{Instance, ObservableInner};

/// Direct handler callable: `(event, data, context)`.
pub type HandlerFn = Rc<dyn Fn(&str, Option<&Value>, Option<&Value>) -> Result<()>>;

/// A notification handler.
#[derive(Clone)]
pub enum Handler {
    /// A callable invoked directly.
    Func(HandlerFn),
    /// A method name looked up on the observer at dispatch time.
    Method(String),
}

impl Handler {
    /// Wraps a closure.
    pub fn func(
        f: impl Fn(&str, Option<&Value>, Option<&Value>) -> Result<()> + 'static,
    ) -> Self {
        Handler::Func(Rc::new(f))
    }

    /// Names a method on the observer.
    pub fn method(name: impl Into<String>) -> Self {
        Handler::Method(name.into())
    }

    fn same_as(&self, other: &Handler) -> bool {
        match (self, other) {
            (Handler::Func(a), Handler::Func(b)) => Rc::ptr_eq(a, b),
            (Handler::Method(a), Handler::Method(b)) => a == b,
            _ => false,
        }
    }
}

/// Options for `on`.
#[derive(Clone, Default)]
pub struct OnOptions {
    /// The instance the handler is bound to; defaults to the emitter.
    pub observer: Option<Instance>,
    /// Extra argument passed to the handler on every dispatch.
    pub context: Option<Value>,
    /// Invoke the handler immediately with no data.
    pub fire: bool,
    /// Remove the registration after its first dispatch.
    pub once: bool,
}

/// Filters for `off`. Omitted fields act as wildcards; an empty filter
/// removes every registration.
#[derive(Clone, Default)]
pub struct OffFilter {
    pub event: Option<String>,
    pub handler: Option<Handler>,
    pub observer: Option<Instance>,
    pub context: Option<Value>,
}

struct Registration {
    seq: u64,
    event: String,
    handler: Handler,
    observer: Option<Weak<ObservableInner>>,
    context: Option<Value>,
    once: bool,
}

/// Which registrations an internal dispatch addresses.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchMode {
    /// Normal `emit`: full wildcard/namespace matching.
    Full,
    /// Flush per-property dispatch: everything except the bare `"*"`
    /// pattern, which gets its own single batched notification.
    SkipStar,
    /// The batched `"*"` notification itself.
    StarOnly,
}

/// Returns whether a registration pattern matches an event name.
///
/// For an event `T` or namespaced `T:N`: exact match, `"*"`, and if
/// namespaced also `T:*`, `*:N` and `*:*`.
pub fn event_matches(pattern: &str, event: &str) -> bool {
    if pattern == event || pattern == "*" {
        return true;
    }
    match (event.split_once(':'), pattern.split_once(':')) {
        (Some((topic, ns)), Some((p_topic, p_ns))) => {
            (p_topic == topic || p_topic == "*") && (p_ns == ns || p_ns == "*")
        }
        _ => false,
    }
}

/// Invokes one handler, resolving method names against the observer.
pub(crate) fn invoke_handler(
    handler: &Handler,
    observer: Option<&Instance>,
    event: &str,
    data: Option<&Value>,
    context: Option<&Value>,
) -> Result<()> {
    match handler {
        Handler::Func(f) => {
            if let Err(err) = f(event, data, context) {
                tracing::warn!(event, %err, "notification handler failed");
            }
            Ok(())
        }
        Handler::Method(name) => {
            let observer = observer
                .ok_or_else(|| Error::unknown_method("<unbound>", name.clone()))?;
            let method = observer
                .object_type()
                .method(name)
                .ok_or_else(|| {
                    Error::unknown_method(observer.object_type().name(), name.clone())
                })?;
            if let Err(err) = method(observer, event, data, context) {
                tracing::warn!(event, method = %name, %err, "notification handler failed");
            }
            Ok(())
        }
    }
}

/// The registration table.
pub struct NotificationRegistry {
    regs: RefCell<Vec<Registration>>,
    next_seq: Cell<u64>,
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            regs: RefCell::new(Vec::new()),
            next_seq: Cell::new(1),
        }
    }

    /// Registers a handler tuple.
    pub fn on(
        &self,
        event: impl Into<String>,
        handler: Handler,
        observer: Option<&Instance>,
        context: Option<Value>,
        once: bool,
    ) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.regs.borrow_mut().push(Registration {
            seq,
            event: event.into(),
            handler,
            observer: observer.map(Instance::downgrade),
            context,
            once,
        });
    }

    /// Removes registrations matching all provided filters.
    pub fn off(&self, filter: &OffFilter) {
        self.regs.borrow_mut().retain(|reg| {
            if let Some(event) = &filter.event {
                if &reg.event != event {
                    return true;
                }
            }
            if let Some(handler) = &filter.handler {
                if !reg.handler.same_as(handler) {
                    return true;
                }
            }
            if let Some(observer) = &filter.observer {
                let matches = reg
                    .observer
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .map_or(false, |rc| rc.referent_id_raw() == observer.instance_id());
                if !matches {
                    return true;
                }
            }
            if let Some(context) = &filter.context {
                if reg.context.as_ref() != Some(context) {
                    return true;
                }
            }
            false
        });
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.regs.borrow().len()
    }

    /// Returns true if there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.regs.borrow().is_empty()
    }

    /// Synchronously dispatches an event to all matching registrations.
    pub(crate) fn dispatch(
        &self,
        default_observer: Option<&Instance>,
        event: &str,
        data: Option<&Value>,
        mode: DispatchMode,
    ) -> Result<()> {
        struct Shot {
            seq: u64,
            handler: Handler,
            observer: Option<Weak<ObservableInner>>,
            had_observer: bool,
            context: Option<Value>,
            once: bool,
        }

        // Snapshot so handlers may register/deregister during dispatch.
        let snapshot: Vec<Shot> = self
            .regs
            .borrow()
            .iter()
            .rev()
            .filter(|reg| match mode {
                DispatchMode::Full => event_matches(&reg.event, event),
                DispatchMode::SkipStar => reg.event != "*" && event_matches(&reg.event, event),
                DispatchMode::StarOnly => reg.event == "*",
            })
            .map(|reg| Shot {
                seq: reg.seq,
                handler: reg.handler.clone(),
                observer: reg.observer.clone(),
                had_observer: reg.observer.is_some(),
                context: reg.context.clone(),
                once: reg.once,
            })
            .collect();

        let mut spent: Vec<u64> = Vec::new();
        for shot in snapshot {
            let observer = if shot.had_observer {
                match shot.observer.as_ref().and_then(Weak::upgrade) {
                    Some(rc) => Some(Instance::from_inner(rc)),
                    // Observer was dropped: degrade silently, prune.
                    None => {
                        spent.push(shot.seq);
                        continue;
                    }
                }
            } else {
                default_observer.cloned()
            };

            invoke_handler(
                &shot.handler,
                observer.as_ref(),
                event,
                data,
                shot.context.as_ref(),
            )?;

            if shot.once {
                spent.push(shot.seq);
            }
        }

        if !spent.is_empty() {
            self.regs.borrow_mut().retain(|reg| !spent.contains(&reg.seq));
        }
        Ok(())
    }
}
