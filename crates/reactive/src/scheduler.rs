//! Two-phase cooperative scheduler.
//!
//! All change delivery in this layer is batched: mutations mark their
//! instance dirty and the actual notifications happen in a deferred flush.
//! The scheduler runs two lanes:
//!
//! - the *microtask* lane carries promise continuations,
//! - the *deferred* lane carries everything macrotask-like, including the
//!   flush itself.
//!
//! The flush is enqueued through two deferred hops, and `run_until_idle`
//! always drains the microtask lane before taking one deferred step. The
//! resulting contract is the load-bearing ordering guarantee of the whole
//! layer: a promise settled in the same turn as a mutation delivers its
//! continuations before that mutation's change notifications fire.
//!
//! There is no event loop here; hosts (and tests) pump the scheduler with
//! `run_until_idle`, or force a synchronous drain with `flush_now`.

use core::cell::{Cell, RefCell};
use hashbrown::HashSet;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Something the flush can drain: an observable instance or array with
/// pending dirty properties.
pub trait Flushable {
    /// The identity counter value of this participant.
    fn flushable_id(&self) -> u64;

    /// Delivers all pending notifications for this participant.
    fn flush_dirty(&self);
}

type Job = Box<dyn FnOnce()>;

/// The cooperative scheduler owning both task lanes and the dirty queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

struct SchedulerInner {
    microtasks: RefCell<VecDeque<Job>>,
    deferred: RefCell<VecDeque<Job>>,
    dirty: RefCell<Vec<Weak<dyn Flushable>>>,
    dirty_ids: RefCell<HashSet<u64>>,
    flush_scheduled: Cell<bool>,
    after_flush: RefCell<Vec<Job>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a new scheduler with empty lanes.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                microtasks: RefCell::new(VecDeque::new()),
                deferred: RefCell::new(VecDeque::new()),
                dirty: RefCell::new(Vec::new()),
                dirty_ids: RefCell::new(HashSet::new()),
                flush_scheduled: Cell::new(false),
                after_flush: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Enqueues a job on the microtask lane.
    pub fn enqueue_micro(&self, job: impl FnOnce() + 'static) {
        self.inner.microtasks.borrow_mut().push_back(Box::new(job));
    }

    /// Enqueues a job on the deferred lane.
    pub fn enqueue_deferred(&self, job: impl FnOnce() + 'static) {
        self.inner.deferred.borrow_mut().push_back(Box::new(job));
    }

    /// Adds a participant to the dirty queue and schedules a flush.
    ///
    /// Participants are deduplicated by id and held weakly; a participant
    /// dropped before the flush is silently skipped.
    pub fn enqueue_dirty(&self, item: Rc<dyn Flushable>) {
        let id = item.flushable_id();
        if self.inner.dirty_ids.borrow_mut().insert(id) {
            self.inner.dirty.borrow_mut().push(Rc::downgrade(&item));
        }
        self.schedule_flush();
    }

    /// Registers a one-shot callback to run right after the next flush
    /// completes, scheduling a flush if none is pending.
    pub fn delay(&self, job: impl FnOnce() + 'static) {
        self.inner.after_flush.borrow_mut().push(Box::new(job));
        self.schedule_flush();
    }

    /// Schedules the flush through two deferred hops.
    ///
    /// The double hop is what keeps the flush behind every deferred job
    /// (and, because `run_until_idle` drains microtasks between deferred
    /// steps, behind every promise continuation) enqueued in the current
    /// turn.
    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.get() {
            return;
        }
        self.inner.flush_scheduled.set(true);
        let hop = self.clone();
        self.enqueue_deferred(move || {
            let land = hop.clone();
            hop.enqueue_deferred(move || land.flush_step());
        });
    }

    /// Forces an immediate synchronous flush, bypassing the deferral.
    pub fn flush_now(&self) {
        self.flush_step();
    }

    fn flush_step(&self) {
        self.inner.flush_scheduled.set(false);
        loop {
            let batch = core::mem::take(&mut *self.inner.dirty.borrow_mut());
            if batch.is_empty() {
                break;
            }
            self.inner.dirty_ids.borrow_mut().clear();
            for weak in batch {
                if let Some(item) = weak.upgrade() {
                    item.flush_dirty();
                }
            }
            // Observers may have dirtied more instances; those drain in
            // this same flush so a turn settles to a fixed point.
        }
        let callbacks = core::mem::take(&mut *self.inner.after_flush.borrow_mut());
        for job in callbacks {
            job();
        }
    }

    /// Pumps both lanes until nothing is queued.
    ///
    /// Microtasks drain fully before each deferred step.
    pub fn run_until_idle(&self) {
        loop {
            let micro = self.inner.microtasks.borrow_mut().pop_front();
            if let Some(job) = micro {
                job();
                continue;
            }
            let deferred = self.inner.deferred.borrow_mut().pop_front();
            if let Some(job) = deferred {
                job();
                continue;
            }
            break;
        }
    }

    /// Returns true if any lane or the dirty queue still has work.
    pub fn has_pending(&self) -> bool {
        !self.inner.microtasks.borrow().is_empty()
            || !self.inner.deferred.borrow().is_empty()
            || !self.inner.dirty.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Spy {
        id: u64,
        flushes: RefCell<u32>,
    }

    impl Flushable for Spy {
        fn flushable_id(&self) -> u64 {
            self.id
        }
        fn flush_dirty(&self) {
            *self.flushes.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_dirty_dedupe() {
        let scheduler = Scheduler::new();
        let spy = Rc::new(Spy {
            id: 1,
            flushes: RefCell::new(0),
        });

        scheduler.enqueue_dirty(spy.clone());
        scheduler.enqueue_dirty(spy.clone());
        scheduler.run_until_idle();

        assert_eq!(*spy.flushes.borrow(), 1);
    }

    #[test]
    fn test_micro_before_deferred() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        scheduler.enqueue_deferred(move || o.borrow_mut().push("deferred"));
        let o = order.clone();
        scheduler.enqueue_micro(move || o.borrow_mut().push("micro"));

        scheduler.run_until_idle();
        assert_eq!(*order.borrow(), vec!["micro", "deferred"]);
    }

    #[test]
    fn test_flush_runs_after_microtasks_scheduled_same_turn() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let spy = {
            struct Recorder {
                id: u64,
                order: Rc<RefCell<Vec<&'static str>>>,
            }
            impl Flushable for Recorder {
                fn flushable_id(&self) -> u64 {
                    self.id
                }
                fn flush_dirty(&self) {
                    self.order.borrow_mut().push("flush");
                }
            }
            Rc::new(Recorder {
                id: 7,
                order: order.clone(),
            })
        };

        scheduler.enqueue_dirty(spy.clone());
        let o = order.clone();
        scheduler.enqueue_micro(move || o.borrow_mut().push("continuation"));

        scheduler.run_until_idle();
        assert_eq!(*order.borrow(), vec!["continuation", "flush"]);
        drop(spy);
    }

    #[test]
    fn test_delay_runs_after_flush() {
        let scheduler = Scheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let spy = {
            struct Recorder {
                order: Rc<RefCell<Vec<&'static str>>>,
            }
            impl Flushable for Recorder {
                fn flushable_id(&self) -> u64 {
                    9
                }
                fn flush_dirty(&self) {
                    self.order.borrow_mut().push("flush");
                }
            }
            Rc::new(Recorder {
                order: order.clone(),
            })
        };

        scheduler.enqueue_dirty(spy.clone());
        let o = order.clone();
        scheduler.delay(move || o.borrow_mut().push("delay"));

        scheduler.run_until_idle();
        assert_eq!(*order.borrow(), vec!["flush", "delay"]);
        drop(spy);
    }

    #[test]
    fn test_delay_fires_without_dirty_work() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(RefCell::new(false));
        let f = fired.clone();
        scheduler.delay(move || *f.borrow_mut() = true);
        scheduler.run_until_idle();
        assert!(*fired.borrow());
    }

    #[test]
    fn test_flush_now_is_synchronous() {
        let scheduler = Scheduler::new();
        let spy = Rc::new(Spy {
            id: 3,
            flushes: RefCell::new(0),
        });
        scheduler.enqueue_dirty(spy.clone());

        scheduler.flush_now();
        assert_eq!(*spy.flushes.borrow(), 1);
    }

    #[test]
    fn test_dropped_participant_is_skipped() {
        let scheduler = Scheduler::new();
        {
            let spy = Rc::new(Spy {
                id: 4,
                flushes: RefCell::new(0),
            });
            scheduler.enqueue_dirty(spy);
        }
        // Should not panic draining a dead weak reference.
        scheduler.run_until_idle();
    }
}
