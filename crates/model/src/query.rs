//! The query container.
//!
//! A reactive array representing the in-flight or settled result of a
//! mapper query. At most one query is in flight per container: a
//! `query()` call while busy overwrites the queued-request slot instead
//! of running concurrently, and the queued request is issued as soon as
//! the current one settles. Busy/error/meta state changes surface as
//! batched `isBusy`/`error`/`meta` notifications on the array.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use orrery_core::{Error, Result, Value};
use orrery_reactive::{ObsArray, Promise, Scheduler};

use crate::model::ModelType;

struct QueryArrayInner {
    array: ObsArray,
    mtype: ModelType,
    scheduler: Scheduler,
    busy: Cell<bool>,
    error: RefCell<Option<Value>>,
    meta: RefCell<Option<Value>>,
    queued: RefCell<Option<Value>>,
    pending: RefCell<Option<Promise>>,
}

/// A reactive array fed by mapper queries.
#[derive(Clone)]
pub struct QueryArray {
    inner: Rc<QueryArrayInner>,
}

impl QueryArray {
    /// Creates an empty container for a model type.
    pub fn new(mtype: &ModelType) -> Result<Self> {
        let store = mtype.store()?;
        let scheduler = store.scheduler.clone();
        Ok(Self {
            inner: Rc::new(QueryArrayInner {
                array: ObsArray::new(&scheduler),
                mtype: mtype.clone(),
                scheduler,
                busy: Cell::new(false),
                error: RefCell::new(None),
                meta: RefCell::new(None),
                queued: RefCell::new(None),
                pending: RefCell::new(None),
            }),
        })
    }

    /// The backing reactive array of loaded models.
    pub fn array(&self) -> &ObsArray {
        &self.inner.array
    }

    /// The owning model type.
    pub fn model_type(&self) -> &ModelType {
        &self.inner.mtype
    }

    /// Whether a query is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.get()
    }

    /// The last rejection payload, if the latest query failed.
    pub fn error(&self) -> Option<Value> {
        self.inner.error.borrow().clone()
    }

    /// Metadata from the last `{results, meta}` shaped payload.
    pub fn meta(&self) -> Option<Value> {
        self.inner.meta.borrow().clone()
    }

    /// Number of loaded models.
    pub fn len(&self) -> usize {
        self.inner.array.len()
    }

    /// Returns true if no models are loaded.
    pub fn is_empty(&self) -> bool {
        self.inner.array.is_empty()
    }

    /// Runs (or queues) a query.
    ///
    /// While busy, `opts` lands in the queued slot — overwriting any
    /// previously queued request — and the returned promise tracks the
    /// in-flight query.
    pub fn query(&self, opts: Value) -> Result<Promise> {
        if self.inner.busy.get() {
            *self.inner.queued.borrow_mut() = Some(opts);
            return Ok(self.current_promise());
        }
        self.issue(opts)
    }

    fn set_busy(&self, busy: bool) {
        if self.inner.busy.get() != busy {
            self.inner.busy.set(busy);
            self.inner.array.did_change("isBusy");
        }
    }

    fn set_error(&self, error: Option<Value>) {
        *self.inner.error.borrow_mut() = error;
        self.inner.array.did_change("error");
    }

    fn issue(&self, opts: Value) -> Result<Promise> {
        let mapper = self.inner.mtype.mapper_required("query")?;
        let promise = mapper
            .query(&opts)
            .ok_or_else(|| Error::mapper_unsupported(self.inner.mtype.name(), "query"))?;
        self.set_busy(true);

        let on_ok = self.clone();
        let on_err = self.clone();
        let derived = promise.then_or(
            move |payload| {
                let outcome = on_ok.apply_result(payload);
                on_ok.set_busy(false);
                let result = match outcome {
                    Ok(value) => {
                        on_ok.set_error(None);
                        Ok(value)
                    }
                    Err(err) => {
                        let message = Value::from(err.to_string());
                        on_ok.set_error(Some(message.clone()));
                        Err(message)
                    }
                };
                on_ok.pump_queued();
                result
            },
            move |error| {
                on_err.set_error(Some(error.clone()));
                on_err.set_busy(false);
                on_err.pump_queued();
                Err(error.clone())
            },
        );
        *self.inner.pending.borrow_mut() = Some(derived.clone());
        Ok(derived)
    }

    fn apply_result(&self, payload: &Value) -> Result<Value> {
        match payload {
            Value::List(items) => {
                let items = items.borrow().clone();
                let models = self.inner.mtype.load_all(&items)?;
                self.inner
                    .array
                    .replace(models.iter().map(|m| m.as_value()).collect())?;
            }
            Value::Map(map) => {
                let results = map.borrow().get("results").cloned().ok_or_else(|| {
                    Error::invalid_operation(
                        "query payload must be an array or a {results, meta} map",
                    )
                })?;
                let items = results
                    .as_list()
                    .ok_or_else(|| Error::invalid_operation("query results must be a list"))?
                    .borrow()
                    .clone();
                let models = self.inner.mtype.load_all(&items)?;
                self.inner
                    .array
                    .replace(models.iter().map(|m| m.as_value()).collect())?;
                *self.inner.meta.borrow_mut() = map.borrow().get("meta").cloned();
                self.inner.array.did_change("meta");
            }
            other => {
                return Err(Error::invalid_operation(format!(
                    "query payload must be an array or map, got {}",
                    other.type_label()
                )))
            }
        }
        Ok(self.inner.array.as_value())
    }

    fn pump_queued(&self) {
        let queued = self.inner.queued.borrow_mut().take();
        if let Some(opts) = queued {
            if let Err(err) = self.issue(opts) {
                tracing::warn!(ty = self.inner.mtype.name(), %err, "queued query failed to issue");
            }
        }
    }

    fn current_promise(&self) -> Promise {
        self.inner
            .pending
            .borrow()
            .clone()
            .unwrap_or_else(|| Promise::resolved(&self.inner.scheduler, Value::Null))
    }

    /// Chains onto the latest pending query, regardless of queueing.
    pub fn then(
        &self,
        on_fulfilled: impl FnOnce(&Value) -> core::result::Result<Value, Value> + 'static,
    ) -> Promise {
        self.current_promise().then(on_fulfilled)
    }

    /// Chains a rejection handler onto the latest pending query.
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(&Value) -> core::result::Result<Value, Value> + 'static,
    ) -> Promise {
        self.current_promise().catch(on_rejected)
    }
}
