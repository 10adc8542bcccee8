//! Blocking socket API.
//!
//! Every operation validates its arguments on the calling thread, then runs
//! the protocol handler inside the stack's processing context and blocks
//! until that handler (or a later stack event) resumes it.
//!
//! # Usage precondition
//!
//! At most one blocking call may be outstanding per socket. A second call
//! issued while one is suspended is resumed at once with
//! [`NetError::Busy`]; `close` is the exception and aborts the outstanding
//! call instead.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use inetsock_lib::completion::oneshot_or;
use inetsock_lib::{klog_debug, klog_warn};

use crate::counters::SocketCounters;
use crate::dispatch::{UserBuf, UserBufMut, Waiter, post_call, run_in_stack_context};
use crate::resume::PollWaiter;
use crate::stack::TcpIp;
use crate::state::{AcceptCall, CallKind, RecvCall, SendCall, SocketRef};
use crate::tcp::MAX_BACKLOG;
use crate::types::{IpProtocol, MsgFlags, NetError, SockAddr, SocketKind};
use crate::{raw, tcp, udp};

pub struct Socket {
    core: SocketRef,
    stack: Arc<dyn TcpIp>,
    closed: AtomicBool,
}

impl Socket {
    pub(crate) fn open(
        stack: Arc<dyn TcpIp>,
        counters: Arc<SocketCounters>,
        kind: SocketKind,
        proto: IpProtocol,
    ) -> Result<Self, NetError> {
        let core = SocketRef::new(kind, counters);
        run_in_stack_context(&*stack, &core, move |stack, socket, waiter| match kind {
            SocketKind::Stream => tcp::open(stack, socket, waiter),
            SocketKind::Datagram => udp::open(stack, socket, waiter),
            SocketKind::Raw => raw::open(stack, socket, waiter, proto),
        })?;
        klog_debug!("inet: opened {} socket", kind);
        Ok(Self::from_parts(core, stack))
    }

    fn from_parts(core: SocketRef, stack: Arc<dyn TcpIp>) -> Self {
        Self {
            core,
            stack,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn kind(&self) -> SocketKind {
        self.core.kind()
    }

    /// Stack-side record of this socket.
    pub fn target(&self) -> &SocketRef {
        &self.core
    }

    /// What the suspended caller of this socket, if any, is waiting for.
    pub fn pending_call(&self) -> CallKind {
        self.core.call_kind()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::InvalidArgument);
        }
        Ok(())
    }

    fn call<T, F>(&self, op: F) -> Result<T, NetError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TcpIp, &SocketRef, Waiter<T>) + Send + 'static,
    {
        run_in_stack_context(&*self.stack, &self.core, op)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Release the protocol handle and any parked data. A call blocked on
    /// this socket in another thread is resumed first (receives see
    /// end-of-stream, everything else `ConnectionAborted`).
    pub fn close(&self) -> Result<(), NetError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(NetError::InvalidArgument);
        }
        match post_call(&*self.stack, &self.core, close_handler) {
            Ok(completion) => completion.wait(),
            Err(err) => {
                // Nothing was queued; the handle is still ours to close.
                self.closed.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    pub fn bind(&self, local: SockAddr) -> Result<(), NetError> {
        self.check_open()?;
        match self.kind() {
            SocketKind::Stream => self.call(move |stack, s, w| tcp::bind(stack, s, w, local)),
            SocketKind::Datagram => self.call(move |stack, s, w| udp::bind(stack, s, w, local)),
            SocketKind::Raw => Err(NetError::OperationNotSupported),
        }
    }

    /// Start accepting connections; `backlog` above [`MAX_BACKLOG`] is clamped.
    pub fn listen(&self, backlog: i32) -> Result<(), NetError> {
        self.check_open()?;
        if backlog < 0 {
            return Err(NetError::InvalidArgument);
        }
        if self.kind() != SocketKind::Stream {
            return Err(NetError::OperationNotSupported);
        }
        let backlog = u8::try_from(backlog).unwrap_or(MAX_BACKLOG);
        self.call(move |stack, s, w| tcp::listen(stack, s, w, backlog))
    }

    /// Stream: block until the connection is established. Datagram: set the
    /// default peer.
    pub fn connect(&self, remote: SockAddr) -> Result<(), NetError> {
        self.check_open()?;
        match self.kind() {
            SocketKind::Stream => self.call(move |stack, s, w| tcp::connect(stack, s, w, remote)),
            SocketKind::Datagram => self.call(move |stack, s, w| udp::connect(stack, s, w, remote)),
            SocketKind::Raw => Err(NetError::OperationNotSupported),
        }
    }

    /// Name resolution is not available; always fails once the arguments
    /// are valid.
    pub fn connect_by_hostname(&self, host: &str, port: u16) -> Result<(), NetError> {
        self.check_open()?;
        if host.is_empty() {
            return Err(NetError::InvalidArgument);
        }
        if self.kind() == SocketKind::Raw {
            return Err(NetError::OperationNotSupported);
        }
        klog_debug!("inet: cannot resolve {}:{}", host, port);
        Err(NetError::OperationNotSupported)
    }

    pub fn accept(&self) -> Result<(Socket, SockAddr), NetError> {
        self.accept_with_flags(MsgFlags::empty())
    }

    /// Accept one connection. With `DONTWAIT`, fail with `WouldBlock`
    /// instead of waiting when none is parked.
    pub fn accept_with_flags(&self, flags: MsgFlags) -> Result<(Socket, SockAddr), NetError> {
        self.check_open()?;
        if self.kind() != SocketKind::Stream {
            return Err(NetError::OperationNotSupported);
        }
        let accepted = SocketRef::new(SocketKind::Stream, self.core.shared_counters());
        let target = accepted.clone();
        let peer = self.call(move |stack, s, waiter| {
            tcp::accept(stack, s, AcceptCall { accepted: target, waiter }, flags)
        })?;
        klog_debug!("inet: accepted connection from {}", peer);
        Ok((Socket::from_parts(accepted, self.stack.clone()), peer))
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Send all of `buf`.
    ///
    /// Datagram: to `dst`, or the connected peer when `None`. Raw: `dst` is
    /// required and only its address is used. Stream: `dst` is ignored and
    /// the call returns once every byte was written; a stack write failure
    /// returns `Ok(0)`.
    pub fn send_to(
        &self,
        buf: &[u8],
        _flags: MsgFlags,
        dst: Option<SockAddr>,
    ) -> Result<usize, NetError> {
        self.check_open()?;
        if buf.is_empty() {
            return Err(NetError::InvalidArgument);
        }
        let ubuf = UserBuf::new(buf);
        match self.kind() {
            SocketKind::Stream => {
                self.call(move |stack, s, waiter| tcp::send_to(stack, s, SendCall::new(ubuf, waiter)))
            }
            SocketKind::Datagram => {
                self.call(move |stack, s, waiter| udp::send_to(stack, s, waiter, ubuf, dst))
            }
            SocketKind::Raw => {
                let Some(dst) = dst else {
                    return Err(NetError::DestinationRequired);
                };
                self.call(move |stack, s, waiter| raw::send_to(stack, s, waiter, ubuf, dst.ip))
            }
        }
    }

    /// Receive into `buf`.
    ///
    /// Datagram/raw: one packet, truncated to `buf.len()`, plus its source.
    /// Stream: exactly `buf.len()` bytes, or `0` at end-of-stream.
    pub fn recv_from(
        &self,
        buf: &mut [u8],
        flags: MsgFlags,
    ) -> Result<(usize, Option<SockAddr>), NetError> {
        self.check_open()?;
        if buf.is_empty() {
            return Err(NetError::InvalidArgument);
        }
        let ubuf = UserBufMut::new(buf);
        self.call(move |stack, s, waiter| {
            let call = RecvCall::new(ubuf, waiter);
            match s.kind() {
                SocketKind::Stream => tcp::recv_from(stack, s, call, flags),
                SocketKind::Datagram => udp::recv_from(stack, s, call, flags),
                SocketKind::Raw => raw::recv_from(stack, s, call, flags),
            }
        })
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, NetError> {
        self.send_to(buf, MsgFlags::empty(), None)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.recv_from(buf, MsgFlags::empty()).map(|(n, _)| n)
    }

    /// `1` if data, a connection or end-of-stream is parked, else `0`.
    pub fn size(&self) -> usize {
        usize::from(self.core.is_readable())
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Block until the socket is readable: a receive or accept would not
    /// wait. Poll wakes are only hints; readiness is rechecked after each.
    pub fn poll(&self) -> Result<(), NetError> {
        select(&[self]).map(|_| ())
    }
}

fn close_handler(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    match socket.kind() {
        SocketKind::Stream => tcp::close(stack, socket, waiter),
        SocketKind::Datagram => udp::close(stack, socket, waiter),
        SocketKind::Raw => raw::close(stack, socket, waiter),
    }
}

/// Block until one of `sockets` is readable and return its index.
pub fn select(sockets: &[&Socket]) -> Result<usize, NetError> {
    if sockets.is_empty() {
        return Err(NetError::InvalidArgument);
    }
    loop {
        for socket in sockets {
            socket.check_open()?;
        }
        if let Some(i) = sockets.iter().position(|s| s.core.is_readable()) {
            return Ok(i);
        }

        let (resumer, completion) = oneshot_or(());
        let waiter = Arc::new(PollWaiter::new(resumer));
        for socket in sockets {
            socket.core.register_poller(waiter.clone());
        }
        // Recheck after registering: an arrival before registration saw no
        // poller to wake.
        let ready = sockets.iter().any(|s| s.core.is_readable() || s.is_closed());
        if !ready {
            completion.wait();
        }
        for socket in sockets {
            socket.core.unregister_poller(&waiter);
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Never closed explicitly: release the handle without waiting.
        if let Err(e) = post_call(&*self.stack, &self.core, close_handler) {
            klog_warn!("inet: dropping {} socket without close: {}", self.kind(), e);
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .field("readable", &self.core.is_readable())
            .finish()
    }
}
