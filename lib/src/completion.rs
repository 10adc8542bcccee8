//! One-shot completion for blocking a task until another context hands it a
//! value.
//!
//! A [`Completion`] is the waiting half, a [`Resumer`] the firing half. The
//! resumer is consumed by [`Resumer::resume`], so a completion is fulfilled
//! exactly once. Resuming is interrupt-safe: the slot is guarded by an
//! `IrqMutex` and the wake goes through the scheduler's `unblock_task`,
//! which remembers the wakeup if the waiter has not blocked yet.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (resumer, completion) = completion::oneshot_or(-1);
//! hand_to_other_context(resumer);
//! let result = completion.wait();
//! ```

use alloc::sync::Arc;
use core::hint::spin_loop;
use core::mem;

use crate::IrqMutex;
use crate::kernel_services::sched::{self, TaskHandle};

enum Slot<T> {
    Pending(Option<TaskHandle>),
    Ready(T),
}

struct Shared<T> {
    slot: IrqMutex<Slot<T>>,
}

/// Waiting half of a one-shot completion.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

/// Firing half of a one-shot completion.
///
/// Dropping an unfired resumer fulfills the completion with the abort value
/// given to [`oneshot_or`], so the waiter is never stranded.
pub struct Resumer<T> {
    shared: Arc<Shared<T>>,
    abort: Option<T>,
}

/// Create a connected resumer/completion pair. `abort` is delivered if the
/// resumer is dropped without firing.
pub fn oneshot_or<T>(abort: T) -> (Resumer<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: IrqMutex::new(Slot::Pending(None)),
    });
    (
        Resumer {
            shared: shared.clone(),
            abort: Some(abort),
        },
        Completion { shared },
    )
}

impl<T> Completion<T> {
    /// Block the calling task until the resumer fires.
    pub fn wait(self) -> T {
        let sched = sched::scheduler();
        let me = sched.map(|s| s.current_task());

        loop {
            {
                let mut slot = self.shared.slot.lock();
                if let Slot::Pending(waiter) = &mut *slot {
                    *waiter = me;
                } else if let Slot::Ready(value) = mem::replace(&mut *slot, Slot::Pending(None)) {
                    return value;
                }
            }

            // A resume landing between the unlock above and the block below is
            // kept as a pending wakeup by the scheduler, so no wake is lost.
            match sched {
                Some(s) => s.block_current_task(),
                None => spin_loop(),
            }
        }
    }

    /// Take the value if the resumer already fired, otherwise hand the
    /// completion back.
    pub fn try_wait(self) -> Result<T, Self> {
        {
            let mut slot = self.shared.slot.lock();
            if matches!(&*slot, Slot::Ready(_)) {
                if let Slot::Ready(value) = mem::replace(&mut *slot, Slot::Pending(None)) {
                    return Ok(value);
                }
            }
        }
        Err(self)
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.shared.slot.lock(), Slot::Ready(_))
    }
}

impl<T> Resumer<T> {
    /// Fulfill the completion and wake its waiter.
    ///
    /// Safe to call from the network stack's processing context and from
    /// interrupt context.
    pub fn resume(mut self, value: T) {
        self.abort = None;
        self.fire(value);
    }

    fn fire(&self, value: T) {
        let sched = sched::scheduler();
        {
            let mut slot = self.shared.slot.lock();
            let waiter = match &*slot {
                Slot::Pending(waiter) => *waiter,
                Slot::Ready(_) => return,
            };
            *slot = Slot::Ready(value);
            if let (Some(s), Some(task)) = (sched, waiter) {
                s.unblock_task(task);
            }
        }
        if let Some(s) = sched {
            s.wake_idle();
        }
    }
}

impl<T> Drop for Resumer<T> {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            self.fire(abort);
        }
    }
}

impl<T> core::fmt::Debug for Resumer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Resumer").finish_non_exhaustive()
    }
}
