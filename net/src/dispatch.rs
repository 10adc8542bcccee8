//! Call dispatcher: marshal a blocking operation into the stack's
//! processing context and suspend the caller until it is resumed.

use alloc::boxed::Box;
use core::ptr::NonNull;

use inetsock_lib::completion::{Completion, Resumer, oneshot_or};
use inetsock_lib::klog_trace;

use crate::stack::TcpIp;
use crate::state::SocketRef;
use crate::types::NetError;

/// Firing half of a suspended call. Dropping it unfired resumes the caller
/// with `ConnectionAborted`.
pub(crate) type Waiter<T> = Resumer<Result<T, NetError>>;

/// Run `op` inside the processing context and block until some handler
/// resumes the waiter it was given.
///
/// Must not be called from the processing context itself: the job could
/// never run and the caller would wait forever.
pub(crate) fn run_in_stack_context<T, F>(
    stack: &dyn TcpIp,
    core: &SocketRef,
    op: F,
) -> Result<T, NetError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TcpIp, &SocketRef, Waiter<T>) + Send + 'static,
{
    let result = post_call(stack, core, op)?.wait();
    klog_trace!("inet: {} call resumed ok={}", core.kind(), result.is_ok());
    result
}

/// Hand `op` to the processing context without waiting. `Err` means the
/// job was never queued and `op` will not run.
pub(crate) fn post_call<T, F>(
    stack: &dyn TcpIp,
    core: &SocketRef,
    op: F,
) -> Result<Completion<Result<T, NetError>>, NetError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TcpIp, &SocketRef, Waiter<T>) + Send + 'static,
{
    let (waiter, completion) = oneshot_or(Err(NetError::ConnectionAborted));
    let target = core.clone();
    stack.post(Box::new(move |stack: &dyn TcpIp| op(stack, &target, waiter)))?;
    Ok(completion)
}

// =============================================================================
// Caller buffers
// =============================================================================
//
// A caller's buffer crosses into the processing context as a raw cursor. The
// caller stays blocked in `run_in_stack_context` until the call's waiter
// fires (or is dropped), and every handler finishes touching the buffer
// before it resumes. That keeps the borrow alive for as long as the cursor
// is dereferenced.

/// Caller-owned source buffer of a send.
pub(crate) struct UserBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: only dereferenced in the processing context while the owning
// caller is suspended; see the section comment above.
unsafe impl Send for UserBuf {}

impl UserBuf {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            ptr: NonNull::from(buf).cast(),
            len: buf.len(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// The call this buffer belongs to must not have been resumed yet.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Caller-owned destination buffer of a receive.
pub(crate) struct UserBufMut {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: as for `UserBuf`.
unsafe impl Send for UserBufMut {}

impl UserBufMut {
    pub fn new(buf: &mut [u8]) -> Self {
        Self {
            len: buf.len(),
            ptr: NonNull::from(buf).cast(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// The call this buffer belongs to must not have been resumed yet.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
