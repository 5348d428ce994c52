//! Orrery Reactive - observable objects, reactive arrays and the
//! change-notification engine of the Orrery model layer.
//!
//! This crate provides:
//!
//! - `Scheduler`: the two-phase cooperative scheduler (microtask lane +
//!   twice-deferred change flush) and the `delay` hook
//! - `Promise` / `Deferred`: the single-threaded future-like primitive
//!   mappers settle
//! - `NotificationRegistry` / `Handler`: per-instance event registration
//!   with wildcard/namespace matching and late-bound method handlers
//! - `Descriptor`: property metadata (getter/setter/default/dependencies/
//!   cache/attribute)
//! - `ObjectType` / `TypeRegistry` / `Instance`: the observable object
//!   system with parent-chain descriptor resolution and change proxying
//! - `ObsArray`: the reactive array whose mutations all funnel through a
//!   single splice primitive
//!
//! # Example
//!
//! ```rust
//! use orrery_reactive::{Descriptor, Handler, OnOptions, Scheduler, TypeRegistry};
//! use orrery_core::Value;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let scheduler = Scheduler::new();
//! let types = TypeRegistry::new();
//!
//! let person = types.define("Person", None, &scheduler).unwrap();
//! person.define_property(Descriptor::new("name"));
//!
//! let justin = person.create();
//! let fired = Rc::new(RefCell::new(0));
//! let spy = fired.clone();
//! justin.on(
//!     "name",
//!     Handler::func(move |_, _, _| {
//!         *spy.borrow_mut() += 1;
//!         Ok(())
//!     }),
//!     OnOptions::default(),
//! );
//!
//! justin.set("name", Value::from("Justin")).unwrap();
//! justin.set("name", Value::from("Brian")).unwrap();
//! scheduler.run_until_idle();
//!
//! // Both writes coalesced into one batched notification.
//! assert_eq!(*fired.borrow(), 1);
//! ```

mod array;
mod descriptor;
mod object;
mod promise;
mod registry;
mod scheduler;

pub use array::{ArrayDelegate, ObsArray};
pub use descriptor::{Descriptor, GetterFn, SetterFn};
pub use object::{EqFn, Instance, MethodFn, ObjectType, TypeRegistry, WeakInstance};
pub use promise::{Deferred, Promise, PromiseStatus};
pub use registry::{event_matches, Handler, HandlerFn, NotificationRegistry, OffFilter, OnOptions};
pub use scheduler::{Flushable, Scheduler};
