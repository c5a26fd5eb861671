//! Single-threaded cooperative executor
//!
//! The executor is the sole driver of the stack: the embedder calls [`SingleThreadExecutor::spin_once`]
//! in a hot loop or after a short sleep, and every time-triggered callback (transport
//! ticks, publishers, application timers) runs from that spin context. Nothing here is
//! interrupt-driven and nothing blocks; slow operations surface `WouldBlock` at the
//! media boundary instead.
//!
//! Callbacks run exactly once per arming, in non-decreasing scheduled-time order with
//! ties broken by registration order. Re-arming a pending callback replaces the prior
//! arming (last write wins). A re-arming made during a spin, even to a time already in
//! the past, runs no earlier than the next spin, so a self-rescheduling callback cannot
//! starve the loop.
//!
//! A callback may call any executor API, including registering, scheduling, or
//! cancelling other callbacks (or itself).
//!
//! All state lives behind `Rc`; the executor is a cheap-to-clone handle. Driving it or
//! mutating it from another thread is undefined and prevented by `Rc` being `!Send`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;

use polycyphal_media::time::Instant;

/// Opaque identifier of a registered callback, for scheduling from inside closures
/// that cannot hold the [`Callback`] handle itself.
pub type CallbackId = u64;

type CallbackFn = Box<dyn FnMut(Instant)>;

/// Move-only handle of a registered callback. Dropping it cancels the callback.
pub struct Callback {
    id: CallbackId,
    executor: Weak<RefCell<ExecutorInner>>,
}

impl Callback {
    pub fn id(&self) -> CallbackId {
        self.id
    }
}

impl Drop for Callback {
    fn drop(&mut self) {
        if let Some(inner) = self.executor.upgrade() {
            inner.borrow_mut().callbacks.remove(&self.id);
        }
    }
}

/// Cooperative scheduler of time-triggered callbacks.
#[derive(Clone, Default)]
pub struct SingleThreadExecutor {
    inner: Rc<RefCell<ExecutorInner>>,
}

impl SingleThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current monotonic time.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Registers a callback. It stays dormant until scheduled.
    pub fn register(&self, function: impl FnMut(Instant) + 'static) -> Callback {
        self.register_impl(false, Box::new(function))
    }

    /// Registers a callback that is removed automatically after it fires once.
    pub fn register_once(&self, function: impl FnMut(Instant) + 'static) -> Callback {
        self.register_impl(true, Box::new(function))
    }

    fn register_impl(&self, auto_remove: bool, function: CallbackFn) -> Callback {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let spin_epoch = inner.spin_epoch;
        inner.callbacks.insert(
            id,
            CallbackEntry {
                function: Some(function),
                armed_at: None,
                armed_epoch: spin_epoch,
                auto_remove,
            },
        );
        Callback {
            id,
            executor: Rc::downgrade(&self.inner),
        }
    }

    /// (Re)arms a callback to fire no earlier than `at`. Last write wins.
    pub fn schedule_at(&self, callback: &Callback, at: Instant) -> bool {
        self.schedule_by_id(callback.id, at)
    }

    /// Same as [`Self::schedule_at`], addressing the callback by id.
    pub fn schedule_by_id(&self, id: CallbackId, at: Instant) -> bool {
        let mut inner = self.inner.borrow_mut();
        let epoch = inner.spin_epoch;
        match inner.callbacks.get_mut(&id) {
            Some(entry) => {
                entry.armed_at = Some(at);
                entry.armed_epoch = epoch;
                true
            }
            None => false,
        }
    }

    /// Removes a callback regardless of its arming state. The matching [`Callback`]
    /// handle becomes inert.
    pub fn cancel_by_id(&self, id: CallbackId) -> bool {
        self.inner.borrow_mut().callbacks.remove(&id).is_some()
    }

    /// Runs every callback whose scheduled time has come, exactly once per arming.
    ///
    /// Returns the earliest deadline still pending, which the embedder may sleep until.
    pub fn spin_once(&self) -> Option<Instant> {
        let now = Instant::now();
        let epoch = {
            let mut inner = self.inner.borrow_mut();
            inner.spin_epoch += 1;
            inner.spin_epoch
        };

        loop {
            // Pull the next due callback out of the registry; the function leaves its
            // slot while running so the callback may freely re-enter the executor.
            let due = self.inner.borrow_mut().take_due(now, epoch);
            let Some((id, mut function, auto_remove)) = due else {
                break;
            };

            function(now);

            if !auto_remove {
                let mut inner = self.inner.borrow_mut();
                // The callback may have cancelled itself while running; only a still
                // registered entry gets its function back.
                if let Some(entry) = inner.callbacks.get_mut(&id)
                    && entry.function.is_none()
                {
                    entry.function = Some(function);
                }
            }
        }

        let inner = self.inner.borrow();
        inner
            .callbacks
            .values()
            .filter_map(|entry| entry.armed_at)
            .min()
    }
}

#[derive(Default)]
struct ExecutorInner {
    callbacks: BTreeMap<CallbackId, CallbackEntry>,
    next_id: CallbackId,
    spin_epoch: u64,
}

impl ExecutorInner {
    // Selects the due callback with the smallest (scheduled time, id) pair, consuming
    // its arming. Armings made during the current spin are not due yet.
    fn take_due(&mut self, now: Instant, epoch: u64) -> Option<(CallbackId, CallbackFn, bool)> {
        let mut best: Option<(Instant, CallbackId)> = None;
        for (&id, entry) in self.callbacks.iter() {
            if entry.function.is_none() || entry.armed_epoch >= epoch {
                continue;
            }
            let Some(at) = entry.armed_at else {
                continue;
            };
            if at > now {
                continue;
            }
            if best.is_none_or(|(best_at, best_id)| (at, id) < (best_at, best_id)) {
                best = Some((at, id));
            }
        }

        let (_, id) = best?;
        let entry = unwrap!(self.callbacks.get_mut(&id));
        entry.armed_at = None;
        let function = unwrap!(entry.function.take());
        let auto_remove = entry.auto_remove;
        if auto_remove {
            self.callbacks.remove(&id);
        }
        Some((id, function, auto_remove))
    }
}

struct CallbackEntry {
    /// Absent while the function is executing.
    function: Option<CallbackFn>,
    armed_at: Option<Instant>,
    /// Spin epoch of the last arming; armings from the running spin are deferred.
    armed_epoch: u64,
    auto_remove: bool,
}
