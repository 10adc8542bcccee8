//! Per-socket state.
//!
//! The record is split along the two contexts that touch it:
//!
//! * [`SocketIo`]: protocol handle, call state and inbound buffering. Owned
//!   by the stack's processing context and only locked there. The lock
//!   never contends; it exists so the record can be shared by reference
//!   between the socket handle and the stack's event routing.
//! * poll registration and the readiness mirror: touched by caller threads
//!   and by the resume path, guarded by an `IrqMutex` / atomics.

use alloc::sync::Arc;
use core::fmt;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use inetsock_lib::IrqMutex;

use crate::counters::SocketCounters;
use crate::dispatch::{UserBuf, UserBufMut, Waiter};
use crate::packetbuf::PacketBuf;
use crate::resume::PollWaiter;
use crate::stack::Pcb;
use crate::types::{NetError, SockAddr, SocketKind};

// =============================================================================
// Calls in flight
// =============================================================================

/// A receive waiting for data.
pub(crate) struct RecvCall {
    pub buf: UserBufMut,
    /// Requested size.
    pub size: usize,
    /// Bytes still to deliver (stream only; datagrams complete in one step).
    pub left: usize,
    pub waiter: Waiter<(usize, Option<SockAddr>)>,
}

impl RecvCall {
    pub fn new(buf: UserBufMut, waiter: Waiter<(usize, Option<SockAddr>)>) -> Self {
        let size = buf.len();
        Self {
            buf,
            size,
            left: size,
            waiter,
        }
    }

    /// Bytes already delivered.
    #[inline]
    pub fn filled(&self) -> usize {
        self.size - self.left
    }
}

/// A stream send waiting for send-buffer space.
pub(crate) struct SendCall {
    pub buf: UserBuf,
    pub size: usize,
    pub left: usize,
    pub waiter: Waiter<usize>,
}

impl SendCall {
    pub fn new(buf: UserBuf, waiter: Waiter<usize>) -> Self {
        let size = buf.len();
        Self {
            buf,
            size,
            left: size,
            waiter,
        }
    }
}

/// An accept waiting for a connection. `accepted` is the pre-created socket
/// the connection is installed into.
pub(crate) struct AcceptCall {
    pub accepted: SocketRef,
    pub waiter: Waiter<SockAddr>,
}

/// What the suspended caller of this socket is waiting for.
#[derive(Default)]
pub(crate) enum CallState {
    #[default]
    Idle,
    AwaitingReceive(RecvCall),
    AwaitingAccept(AcceptCall),
    AwaitingSend(SendCall),
    AwaitingConnect(Waiter<()>),
}

/// Public, payload-free view of [`CallState`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Idle = 0,
    Receive = 1,
    Accept = 2,
    Send = 3,
    Connect = 4,
}

impl CallKind {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Receive,
            2 => Self::Accept,
            3 => Self::Send,
            4 => Self::Connect,
            _ => Self::Idle,
        }
    }
}

impl CallState {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Idle => CallKind::Idle,
            Self::AwaitingReceive(_) => CallKind::Receive,
            Self::AwaitingAccept(_) => CallKind::Accept,
            Self::AwaitingSend(_) => CallKind::Send,
            Self::AwaitingConnect(_) => CallKind::Connect,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn take_receive(&mut self) -> Option<RecvCall> {
        match mem::take(self) {
            Self::AwaitingReceive(call) => Some(call),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn take_accept(&mut self) -> Option<AcceptCall> {
        match mem::take(self) {
            Self::AwaitingAccept(call) => Some(call),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn take_send(&mut self) -> Option<SendCall> {
        match mem::take(self) {
            Self::AwaitingSend(call) => Some(call),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn take_connect(&mut self) -> Option<Waiter<()>> {
        match mem::take(self) {
            Self::AwaitingConnect(waiter) => Some(waiter),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Resume whoever is waiting with the result a vanished handle implies:
    /// end-of-stream for receives, `err` for everything else.
    pub fn abort(&mut self, err: NetError) {
        match mem::take(self) {
            Self::Idle => {}
            Self::AwaitingReceive(call) => call.waiter.resume(Ok((0, None))),
            Self::AwaitingAccept(call) => call.waiter.resume(Err(err)),
            Self::AwaitingSend(call) => call.waiter.resume(Err(err)),
            Self::AwaitingConnect(waiter) => waiter.resume(Err(err)),
        }
    }
}

// =============================================================================
// Inbound buffering
// =============================================================================

/// The single parked inbound unit.
#[derive(Default)]
pub(crate) enum Inbound {
    #[default]
    Empty,
    /// Data that arrived before a receiver. `left` counts unread bytes;
    /// only stream receives consume a unit partially.
    Parked { pbuf: PacketBuf, left: usize },
    /// Stream closed by the peer; every receive returns 0.
    Closed,
}

impl Inbound {
    #[inline]
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::Parked { .. })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn park(pbuf: PacketBuf) -> Self {
        let left = pbuf.tot_len();
        Self::Parked { pbuf, left }
    }
}

/// A connection that arrived before `accept`.
pub(crate) struct PendingConn {
    pub pcb: Pcb,
    pub peer: SockAddr,
}

/// Stack-context half of the socket record.
#[derive(Default)]
pub(crate) struct SocketIo {
    pub pcb: Option<Pcb>,
    pub call: CallState,
    pub inbound: Inbound,
    pub pending_accept: Option<PendingConn>,
    /// Source of the most recently parked datagram or raw packet.
    pub remote: SockAddr,
}

impl SocketIo {
    /// Install a fresh handle: new socket or accepted connection.
    pub fn init(&mut self, pcb: Pcb) {
        self.pcb = Some(pcb);
        self.call = CallState::Idle;
        self.inbound = Inbound::Empty;
        self.pending_accept = None;
        self.remote = SockAddr::UNSPECIFIED;
    }

    /// Would a receive or accept complete without waiting?
    pub fn is_readable(&self) -> bool {
        !matches!(self.inbound, Inbound::Empty) || self.pending_accept.is_some()
    }

    /// Take the parked datagram/raw unit together with its source.
    pub fn take_parked(&mut self) -> Option<(PacketBuf, SockAddr)> {
        match mem::take(&mut self.inbound) {
            Inbound::Parked { pbuf, .. } => Some((pbuf, self.remote)),
            other => {
                self.inbound = other;
                None
            }
        }
    }
}

// =============================================================================
// SocketCore / SocketRef
// =============================================================================

pub(crate) struct SocketCore {
    kind: SocketKind,
    counters: Arc<SocketCounters>,
    io: spin::Mutex<SocketIo>,
    /// Mirrors of `SocketIo::is_readable` and the call kind, refreshed
    /// whenever an `IoGuard` is released. Caller threads read only these.
    readable: AtomicBool,
    call: AtomicU8,
    poller: IrqMutex<Option<Arc<PollWaiter>>>,
}

/// Shared handle to a socket record, used by the stack to route events.
///
/// Cloning is cheap; the stack holds one per registered handle until the
/// socket deregisters on close.
#[derive(Clone)]
pub struct SocketRef(Arc<SocketCore>);

/// Lock guard over [`SocketIo`] that republishes readiness on release.
pub(crate) struct IoGuard<'a> {
    core: &'a SocketCore,
    io: spin::MutexGuard<'a, SocketIo>,
}

impl Deref for IoGuard<'_> {
    type Target = SocketIo;

    fn deref(&self) -> &SocketIo {
        &self.io
    }
}

impl DerefMut for IoGuard<'_> {
    fn deref_mut(&mut self) -> &mut SocketIo {
        &mut self.io
    }
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        self.core
            .readable
            .store(self.io.is_readable(), Ordering::Release);
        self.core
            .call
            .store(self.io.call.kind() as u8, Ordering::Release);
    }
}

impl SocketRef {
    pub(crate) fn new(kind: SocketKind, counters: Arc<SocketCounters>) -> Self {
        Self(Arc::new(SocketCore {
            kind,
            counters,
            io: spin::Mutex::new(SocketIo::default()),
            readable: AtomicBool::new(false),
            call: AtomicU8::new(CallKind::Idle as u8),
            poller: IrqMutex::new(None),
        }))
    }

    pub fn kind(&self) -> SocketKind {
        self.0.kind
    }

    /// Whether a receive or accept would complete without waiting.
    pub fn is_readable(&self) -> bool {
        self.0.readable.load(Ordering::Acquire)
    }

    /// Call currently suspended on this socket, as of the last time the
    /// processing context released the record.
    pub fn call_kind(&self) -> CallKind {
        CallKind::from_u8(self.0.call.load(Ordering::Acquire))
    }

    /// Identifier of the owned protocol handle, if open.
    #[cfg(test)]
    pub(crate) fn pcb_id(&self) -> Option<u32> {
        self.0.io.lock().pcb.as_ref().map(Pcb::id)
    }

    pub fn ptr_eq(&self, other: &SocketRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn io(&self) -> IoGuard<'_> {
        IoGuard {
            core: &self.0,
            io: self.0.io.lock(),
        }
    }

    pub(crate) fn counters(&self) -> &SocketCounters {
        &self.0.counters
    }

    pub(crate) fn shared_counters(&self) -> Arc<SocketCounters> {
        self.0.counters.clone()
    }

    pub(crate) fn register_poller(&self, waiter: Arc<PollWaiter>) {
        *self.0.poller.lock() = Some(waiter);
    }

    /// Clear the registration if it still belongs to `waiter`.
    pub(crate) fn unregister_poller(&self, waiter: &Arc<PollWaiter>) {
        let mut slot = self.0.poller.lock();
        if slot.as_ref().is_some_and(|w| Arc::ptr_eq(w, waiter)) {
            *slot = None;
        }
    }

    pub(crate) fn take_poller(&self) -> Option<Arc<PollWaiter>> {
        self.0.poller.lock().take()
    }
}

impl fmt::Debug for SocketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRef")
            .field("kind", &self.0.kind)
            .field("readable", &self.is_readable())
            .finish_non_exhaustive()
    }
}
