//! Inbound events, called by the stack binding from its processing context.
//!
//! The `target` of every event is the [`SocketRef`] the binding was given
//! through `*_set_target`. Events for a target of the wrong kind are a
//! binding bug; they are logged and ignored.

use inetsock_lib::klog_error;

use crate::packetbuf::PacketBuf;
use crate::stack::{Pcb, TcpIp};
use crate::state::SocketRef;
use crate::types::{Ipv4Addr, NetError, SockAddr, SocketKind};
use crate::{raw, tcp, udp};

pub use crate::tcp::TcpRecv;

fn kind_is(target: &SocketRef, kind: SocketKind, event: &str) -> bool {
    if target.kind() == kind {
        return true;
    }
    klog_error!("inet: {} event routed to a {} socket", event, target.kind());
    false
}

/// A datagram arrived. Dropped if one is already parked on `target`.
pub fn udp_recv(target: &SocketRef, p: PacketBuf, from: SockAddr) {
    if kind_is(target, SocketKind::Datagram, "udp_recv") {
        udp::on_recv(target, p, from);
    }
}

/// A raw IP packet arrived. Dropped if one is already parked on `target`.
pub fn raw_recv(target: &SocketRef, p: PacketBuf, from: Ipv4Addr) {
    if kind_is(target, SocketKind::Raw, "raw_recv") {
        raw::on_recv(target, p, from);
    }
}

/// Stream data or FIN arrived. On `Err` the binding keeps the event and
/// redelivers it after the next `tcp_recved` on this connection.
pub fn tcp_recv(stack: &dyn TcpIp, target: &SocketRef, ev: TcpRecv) -> Result<(), TcpRecv> {
    if !kind_is(target, SocketKind::Stream, "tcp_recv") {
        return Ok(());
    }
    tcp::on_recv(stack, target, ev)
}

/// `len` more bytes of send buffer are free.
pub fn tcp_sent(stack: &dyn TcpIp, target: &SocketRef, len: usize) {
    if kind_is(target, SocketKind::Stream, "tcp_sent") {
        tcp::on_sent(stack, target, len);
    }
}

/// A connection completed on listener `target`. On `Err` the binding gets
/// the handle back and should hold or refuse the peer.
pub fn tcp_accept(
    stack: &dyn TcpIp,
    target: &SocketRef,
    pcb: Pcb,
    peer: SockAddr,
) -> Result<(), Pcb> {
    if !kind_is(target, SocketKind::Stream, "tcp_accept") {
        return Err(pcb);
    }
    tcp::on_accept(stack, target, pcb, peer)
}

/// Active open on `target` finished with `status`.
pub fn tcp_connected(target: &SocketRef, status: Result<(), NetError>) {
    if kind_is(target, SocketKind::Stream, "tcp_connected") {
        tcp::on_connected(target, status);
    }
}

/// Fatal error on `target`'s connection; its handle is already gone.
pub fn tcp_error(target: &SocketRef, err: NetError) {
    if kind_is(target, SocketKind::Stream, "tcp_error") {
        tcp::on_error(target, err);
    }
}
