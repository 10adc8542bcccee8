//! Blocking BSD-style sockets over a single-threaded, callback-driven
//! TCP/IP stack.
//!
//! Callers block in [`Socket`] operations; the work runs as jobs in the
//! stack's processing context ([`stack::TcpIp::post`]) and inbound stack
//! events ([`events`]) resume them.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod counters;
mod dispatch;
pub mod events;
pub mod module;
pub mod packetbuf;
mod raw;
mod resume;
pub mod socket;
pub mod stack;
mod state;
mod tcp;
pub mod types;
mod udp;

#[cfg(test)]
mod test_stack;


pub use counters::SocketCounters;
pub use module::{SocketModule, socket_module, socket_module_init};
pub use packetbuf::PacketBuf;
pub use raw::DEFAULT_RAW_PROTOCOL;
pub use socket::{Socket, select};
pub use stack::{Pcb, StackJob, TcpIp};
pub use state::{CallKind, SocketRef};
pub use tcp::MAX_BACKLOG;
pub use types::{IpProtocol, Ipv4Addr, MsgFlags, NetError, Port, SockAddr, SocketKind};
