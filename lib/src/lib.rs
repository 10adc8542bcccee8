#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod completion;
pub mod cpu;
pub mod kernel_services;
pub mod klog;
pub mod spinlock;
pub mod testing;


#[doc(hidden)]
pub use paste;

pub use completion::{Completion, Resumer, oneshot_or};
pub use kernel_services::sched::{TaskHandle, TaskScheduler, register_scheduler};
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use spinlock::{IrqMutex, IrqMutexGuard};
