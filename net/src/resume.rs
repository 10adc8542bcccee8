//! Resume primitives.
//!
//! A blocking caller is resumed by firing its [`Waiter`](crate::dispatch::Waiter),
//! which goes through the scheduler's interrupt-safe wake and also pokes
//! the idle-wait hook. A *polling* caller has no call in flight; it is
//! registered on the socket and woken here with a neutral "recheck"
//! signal, never with data.

use inetsock_lib::completion::Resumer;
use inetsock_lib::{IrqMutex, klog_trace};

use crate::state::SocketRef;

/// Shared poll registration. One waiter may be registered on several
/// sockets at once; the first wake wins and later wakes are no-ops.
pub(crate) struct PollWaiter {
    resumer: IrqMutex<Option<Resumer<()>>>,
}

impl PollWaiter {
    pub fn new(resumer: Resumer<()>) -> Self {
        Self {
            resumer: IrqMutex::new(Some(resumer)),
        }
    }

    pub fn wake(&self) {
        let resumer = self.resumer.lock().take();
        if let Some(resumer) = resumer {
            resumer.resume(());
        }
    }
}

/// Wake the thread polling `socket`, if any, and clear its registration.
/// Leaves the call state alone. Safe from interrupt context.
pub(crate) fn resume_if_polled(socket: &SocketRef) {
    if let Some(waiter) = socket.take_poller() {
        klog_trace!("inet: waking {} poller", socket.kind());
        waiter.wake();
    }
}
