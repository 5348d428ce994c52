//! Single-threaded promise primitive.
//!
//! Mapper calls return a future-like object with resolve/reject and
//! then/catch chaining. Continuations are enqueued on the scheduler's
//! microtask lane, which is what orders "operation completed" callbacks
//! ahead of the deferred change flush when both land in the same turn.
//!
//! Callbacks return `Result<Value, Value>`: `Ok` settles the derived
//! promise fulfilled, `Err` settles it rejected, so a `catch` callback
//! returning `Ok` recovers the chain.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use orrery_core::Value;

use crate::scheduler::Scheduler;

type Callback = Box<dyn FnOnce(&Value) -> Result<Value, Value>>;

/// Observable settlement status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

struct Reaction {
    on_fulfilled: Option<Callback>,
    on_rejected: Option<Callback>,
    next: Promise,
}

enum State {
    Pending(Vec<Reaction>),
    Fulfilled(Value),
    Rejected(Value),
}

/// A shared handle to an eventual value.
#[derive(Clone)]
pub struct Promise {
    state: Rc<RefCell<State>>,
    scheduler: Scheduler,
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

impl Promise {
    fn pending(scheduler: &Scheduler) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
            scheduler: scheduler.clone(),
        }
    }

    /// Creates an already-fulfilled promise.
    pub fn resolved(scheduler: &Scheduler, value: Value) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Fulfilled(value))),
            scheduler: scheduler.clone(),
        }
    }

    /// Creates an already-rejected promise.
    pub fn rejected(scheduler: &Scheduler, error: Value) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Rejected(error))),
            scheduler: scheduler.clone(),
        }
    }

    /// Returns the current settlement status.
    pub fn status(&self) -> PromiseStatus {
        match &*self.state.borrow() {
            State::Pending(_) => PromiseStatus::Pending,
            State::Fulfilled(_) => PromiseStatus::Fulfilled,
            State::Rejected(_) => PromiseStatus::Rejected,
        }
    }

    /// Returns the fulfillment value, if fulfilled.
    pub fn value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            State::Fulfilled(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Returns the rejection payload, if rejected.
    pub fn error(&self) -> Option<Value> {
        match &*self.state.borrow() {
            State::Rejected(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Chains a fulfillment callback; rejections pass through.
    pub fn then(
        &self,
        on_fulfilled: impl FnOnce(&Value) -> Result<Value, Value> + 'static,
    ) -> Promise {
        self.chain(Some(Box::new(on_fulfilled)), None)
    }

    /// Chains both callbacks.
    pub fn then_or(
        &self,
        on_fulfilled: impl FnOnce(&Value) -> Result<Value, Value> + 'static,
        on_rejected: impl FnOnce(&Value) -> Result<Value, Value> + 'static,
    ) -> Promise {
        self.chain(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Chains a rejection callback; fulfillments pass through.
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(&Value) -> Result<Value, Value> + 'static,
    ) -> Promise {
        self.chain(None, Some(Box::new(on_rejected)))
    }

    fn chain(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Promise {
        let next = Promise::pending(&self.scheduler);
        let reaction = Reaction {
            on_fulfilled,
            on_rejected,
            next: next.clone(),
        };
        let settled = match &mut *self.state.borrow_mut() {
            State::Pending(reactions) => {
                reactions.push(reaction);
                None
            }
            State::Fulfilled(v) => Some((reaction, Ok(v.clone()))),
            State::Rejected(v) => Some((reaction, Err(v.clone()))),
        };
        if let Some((reaction, outcome)) = settled {
            self.schedule_reaction(reaction, outcome);
        }
        next
    }

    fn settle(&self, outcome: Result<Value, Value>) {
        let reactions = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(reactions) => {
                    let reactions = core::mem::take(reactions);
                    *state = match &outcome {
                        Ok(v) => State::Fulfilled(v.clone()),
                        Err(v) => State::Rejected(v.clone()),
                    };
                    reactions
                }
                // Settling twice is a no-op.
                _ => return,
            }
        };
        for reaction in reactions {
            self.schedule_reaction(reaction, outcome.clone());
        }
    }

    fn schedule_reaction(&self, reaction: Reaction, outcome: Result<Value, Value>) {
        self.scheduler.enqueue_micro(move || {
            let Reaction {
                on_fulfilled,
                on_rejected,
                next,
            } = reaction;
            let result = match outcome {
                Ok(value) => match on_fulfilled {
                    Some(cb) => cb(&value),
                    None => Ok(value),
                },
                Err(error) => match on_rejected {
                    Some(cb) => cb(&error),
                    None => Err(error),
                },
            };
            next.settle(result);
        });
    }
}

/// The writable side of a promise, handed to mapper implementations.
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    /// Creates a deferred with a pending promise.
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            promise: Promise::pending(scheduler),
        }
    }

    /// Returns a handle to the readable side.
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Fulfills the promise. No-op if already settled.
    pub fn resolve(&self, value: Value) {
        self.promise.settle(Ok(value));
    }

    /// Rejects the promise. No-op if already settled.
    pub fn reject(&self, error: Value) {
        self.promise.settle(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_runs_then() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::new(&scheduler);

        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        deferred.promise().then(move |v| {
            *s.borrow_mut() = Some(v.clone());
            Ok(Value::Null)
        });

        deferred.resolve(Value::Integer(5));
        scheduler.run_until_idle();

        assert_eq!(*seen.borrow(), Some(Value::Integer(5)));
    }

    #[test]
    fn test_reject_skips_then_hits_catch() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::new(&scheduler);

        let ok_hit = Rc::new(RefCell::new(false));
        let err_seen = Rc::new(RefCell::new(None));
        let o = ok_hit.clone();
        let e = err_seen.clone();
        deferred
            .promise()
            .then(move |_| {
                *o.borrow_mut() = true;
                Ok(Value::Null)
            })
            .catch(move |err| {
                *e.borrow_mut() = Some(err.clone());
                Ok(Value::Null)
            });

        deferred.reject(Value::from("boom"));
        scheduler.run_until_idle();

        assert!(!*ok_hit.borrow());
        assert_eq!(*err_seen.borrow(), Some(Value::from("boom")));
    }

    #[test]
    fn test_catch_recovers_chain() {
        let scheduler = Scheduler::new();
        let promise = Promise::rejected(&scheduler, Value::from("boom"));

        let recovered = promise.catch(|_| Ok(Value::Integer(1)));
        let end = recovered.then(|v| Ok(v.clone()));
        scheduler.run_until_idle();

        assert_eq!(end.status(), PromiseStatus::Fulfilled);
        assert_eq!(end.value(), Some(Value::Integer(1)));
    }

    #[test]
    fn test_then_on_settled_promise_still_fires() {
        let scheduler = Scheduler::new();
        let promise = Promise::resolved(&scheduler, Value::Integer(2));

        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        promise.then(move |v| {
            *s.borrow_mut() = Some(v.clone());
            Ok(Value::Null)
        });
        scheduler.run_until_idle();

        assert_eq!(*seen.borrow(), Some(Value::Integer(2)));
    }

    #[test]
    fn test_double_settle_is_ignored() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::new(&scheduler);
        deferred.resolve(Value::Integer(1));
        deferred.reject(Value::from("late"));
        scheduler.run_until_idle();

        assert_eq!(deferred.promise().status(), PromiseStatus::Fulfilled);
        assert_eq!(deferred.promise().value(), Some(Value::Integer(1)));
    }

    #[test]
    fn test_callback_error_rejects_derived() {
        let scheduler = Scheduler::new();
        let promise = Promise::resolved(&scheduler, Value::Null);

        let derived = promise.then(|_| Err(Value::from("broken")));
        scheduler.run_until_idle();

        assert_eq!(derived.status(), PromiseStatus::Rejected);
        assert_eq!(derived.error(), Some(Value::from("broken")));
    }

    #[test]
    fn test_continuations_are_microtasks() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let deferred = Deferred::new(&scheduler);
        let o = order.clone();
        deferred.promise().then(move |_| {
            o.borrow_mut().push("continuation");
            Ok(Value::Null)
        });

        let o = order.clone();
        scheduler.enqueue_deferred(move || o.borrow_mut().push("deferred"));

        deferred.resolve(Value::Null);
        scheduler.run_until_idle();

        assert_eq!(*order.borrow(), vec!["continuation", "deferred"]);
    }
}
