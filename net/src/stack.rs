//! Interface to the external network stack.
//!
//! The stack is single-threaded and callback driven: every method below
//! except [`TcpIp::post`] may only be called from its processing context,
//! and every inbound event (see [`crate::events`]) is delivered from that
//! same context. The socket layer never blocks inside it.
//!
//! # Architecture
//!
//! ```text
//!  caller thread                 stack processing context
//!  -------------                 ------------------------
//!  Socket::recv_from()
//!    post(job) ----------------> job(&dyn TcpIp)
//!    Completion::wait()            protocol handler
//!        ^                          |  tcp_*/udp_*/raw_* calls
//!        |                          v
//!        +------ Resumer::resume <- events::tcp_recv(..) etc.
//! ```

use alloc::boxed::Box;
use core::fmt;
use core::num::NonZeroU32;

use crate::packetbuf::PacketBuf;
use crate::state::SocketRef;
use crate::types::{IpProtocol, Ipv4Addr, NetError, SockAddr};

/// Work item run once inside the processing context.
pub type StackJob = Box<dyn FnOnce(&dyn TcpIp) + Send + 'static>;

/// Opaque protocol control block handle.
///
/// Exclusively owned by one socket (or parked on a listening socket); not
/// `Clone`. Handing it back to the stack (`*_remove`, `tcp_close`) consumes
/// it.
#[derive(PartialEq, Eq)]
pub struct Pcb(NonZeroU32);

impl Pcb {
    /// Wrap a stack-assigned identifier. Only stack bindings create these.
    #[inline]
    pub const fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn id(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pcb({})", self.0)
    }
}

pub trait TcpIp: Send + Sync {
    /// Queue `job` for the processing context without blocking. Callable
    /// from any thread, never waits for the job to run.
    fn post(&self, job: StackJob) -> Result<(), NetError>;

    /// Bring the stack up. Called once by module init.
    fn init(&self) {}

    /// Allocate an outbound buffer of `len` bytes.
    fn pbuf_alloc(&self, len: usize) -> Option<PacketBuf> {
        Some(PacketBuf::alloc(len))
    }

    // -- UDP ------------------------------------------------------------------

    fn udp_new(&self) -> Option<Pcb>;
    /// Route datagram events for `pcb` to `target`, or stop routing them.
    fn udp_set_target(&self, pcb: &Pcb, target: Option<SocketRef>);
    fn udp_bind(&self, pcb: &Pcb, local: SockAddr) -> Result<(), NetError>;
    fn udp_connect(&self, pcb: &Pcb, remote: SockAddr) -> Result<(), NetError>;
    /// Send to the connected peer.
    fn udp_send(&self, pcb: &Pcb, p: &PacketBuf) -> Result<(), NetError>;
    fn udp_sendto(&self, pcb: &Pcb, p: &PacketBuf, dst: SockAddr) -> Result<(), NetError>;
    fn udp_remove(&self, pcb: Pcb);

    // -- TCP ------------------------------------------------------------------

    fn tcp_new(&self) -> Option<Pcb>;
    /// Route stream events for `pcb` to `target`. With `None` the stack keeps
    /// inbound data queued until a target is set.
    fn tcp_set_target(&self, pcb: &Pcb, target: Option<SocketRef>);
    fn tcp_bind(&self, pcb: &Pcb, local: SockAddr) -> Result<(), NetError>;
    /// Start listening; incoming connections arrive as `events::tcp_accept`.
    fn tcp_listen(&self, pcb: &Pcb, backlog: u8) -> Result<(), NetError>;
    /// Start an active open; completion arrives as `events::tcp_connected`
    /// or `events::tcp_error`.
    fn tcp_connect(&self, pcb: &Pcb, remote: SockAddr) -> Result<(), NetError>;
    /// Bytes that `tcp_write` will currently accept.
    fn tcp_sndbuf(&self, pcb: &Pcb) -> usize;
    /// Queue `data` for transmission. The stack copies it.
    fn tcp_write(&self, pcb: &Pcb, data: &[u8]) -> Result<(), NetError>;
    /// Flush queued segments.
    fn tcp_output(&self, pcb: &Pcb) -> Result<(), NetError>;
    /// Acknowledge `len` consumed bytes, reopening the receive window.
    fn tcp_recved(&self, pcb: &Pcb, len: usize);
    /// Tell a listener one queued connection was taken.
    fn tcp_accepted(&self, listener: &Pcb);
    fn tcp_close(&self, pcb: Pcb);

    // -- RAW ------------------------------------------------------------------

    fn raw_new(&self, proto: IpProtocol) -> Option<Pcb>;
    fn raw_set_target(&self, pcb: &Pcb, target: Option<SocketRef>);
    fn raw_sendto(&self, pcb: &Pcb, p: &PacketBuf, dst: Ipv4Addr) -> Result<(), NetError>;
    fn raw_remove(&self, pcb: Pcb);
}
