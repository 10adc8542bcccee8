//! Scheduler service table.
//!
//! Blocking primitives in this crate never link against a scheduler; the
//! embedding kernel registers one implementation of [`TaskScheduler`] at
//! boot and every wait/wake goes through it. Before registration (early
//! boot, single task) waits degrade to a pause-hint spin loop.

use spin::Once;

/// Opaque identity of a schedulable task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(usize);

impl TaskHandle {
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

pub trait TaskScheduler: Sync {
    fn current_task(&self) -> TaskHandle;

    /// Block the calling task until [`TaskScheduler::unblock_task`] names it.
    /// Returns immediately if a wakeup for this task is already pending.
    fn block_current_task(&self);

    /// Make `task` runnable. Must be callable from interrupt context and
    /// must remember the wakeup if `task` has not blocked yet.
    fn unblock_task(&self, task: TaskHandle);

    /// Release a secondary idle-wait mechanism (idle loop semaphore, halted
    /// CPU) so a freshly readied task is noticed promptly.
    fn wake_idle(&self) {}
}

static SCHEDULER: Once<&'static dyn TaskScheduler> = Once::new();

/// Register the scheduler. The first registration wins.
pub fn register_scheduler(sched: &'static dyn TaskScheduler) {
    SCHEDULER.call_once(|| sched);
}

#[inline]
pub fn scheduler() -> Option<&'static dyn TaskScheduler> {
    SCHEDULER.get().copied()
}

pub fn is_registered() -> bool {
    SCHEDULER.is_completed()
}

#[cfg(feature = "std")]
pub mod host {
    //! Thread-backed scheduler for hosted builds.
    //!
    //! Every OS thread is a task. `block_current_task` parks the thread and
    //! `unblock_task` unparks it; the park token provides the pending-wakeup
    //! guarantee.

    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::thread::{self, Thread};

    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::{TaskHandle, TaskScheduler};

    static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

    std::thread_local! {
        static TASK_ID: usize = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    }

    pub struct HostScheduler {
        threads: Mutex<BTreeMap<usize, Thread>>,
    }

    impl HostScheduler {
        pub const fn new() -> Self {
            Self {
                threads: Mutex::new(BTreeMap::new()),
            }
        }
    }

    impl Default for HostScheduler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TaskScheduler for HostScheduler {
        fn current_task(&self) -> TaskHandle {
            let id = TASK_ID.with(|id| *id);
            if let Ok(mut threads) = self.threads.lock() {
                threads.entry(id).or_insert_with(thread::current);
            }
            TaskHandle::from_raw(id)
        }

        fn block_current_task(&self) {
            thread::park();
        }

        fn unblock_task(&self, task: TaskHandle) {
            let thread = match self.threads.lock() {
                Ok(threads) => threads.get(&task.as_raw()).cloned(),
                Err(_) => None,
            };
            if let Some(thread) = thread {
                thread.unpark();
            }
        }
    }

    pub static HOST_SCHEDULER: HostScheduler = HostScheduler::new();

    /// Register [`HOST_SCHEDULER`] as the global scheduler.
    pub fn install() {
        super::register_scheduler(&HOST_SCHEDULER);
    }
}
