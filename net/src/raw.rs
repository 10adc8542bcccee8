//! Raw IP handlers (processing context only).
//!
//! Same whole-packet semantics as datagrams, keyed by IP address alone:
//! sources are reported with port 0 and every send needs a destination.

use core::cmp;

use inetsock_lib::{klog_debug, klog_warn};

use crate::dispatch::{UserBuf, Waiter};
use crate::packetbuf::PacketBuf;
use crate::resume::resume_if_polled;
use crate::stack::TcpIp;
use crate::state::{CallState, Inbound, RecvCall, SocketRef};
use crate::types::{IpProtocol, Ipv4Addr, MsgFlags, NetError, SockAddr};

/// Protocol raw sockets are opened for unless another is requested.
pub const DEFAULT_RAW_PROTOCOL: IpProtocol = IpProtocol::Icmp;

pub(crate) fn open(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, proto: IpProtocol) {
    let Some(pcb) = stack.raw_new(proto) else {
        klog_warn!("inet: raw pcb allocation failed ({})", proto);
        waiter.resume(Err(NetError::OutOfMemory));
        return;
    };
    stack.raw_set_target(&pcb, Some(socket.clone()));
    socket.io().init(pcb);
    waiter.resume(Ok(()));
}

pub(crate) fn close(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    {
        let mut io = socket.io();
        io.call.abort(NetError::ConnectionAborted);
        if let Some(pcb) = io.pcb.take() {
            stack.raw_set_target(&pcb, None);
            stack.raw_remove(pcb);
        }
        io.inbound = Inbound::Empty;
    }
    resume_if_polled(socket);
    waiter.resume(Ok(()));
}

pub(crate) fn send_to(
    stack: &dyn TcpIp,
    socket: &SocketRef,
    waiter: Waiter<usize>,
    buf: UserBuf,
    dst: Ipv4Addr,
) {
    let io = socket.io();
    let Some(pcb) = io.pcb.as_ref() else {
        waiter.resume(Err(NetError::InvalidArgument));
        return;
    };

    let size = buf.len();
    let Some(mut p) = stack.pbuf_alloc(size) else {
        klog_warn!("inet: raw send of {} bytes: no packet buffer", size);
        waiter.resume(Err(NetError::NoBufferSpace));
        return;
    };
    // SAFETY: the caller is suspended until `waiter` fires below.
    if let Err(e) = p.take_from(unsafe { buf.as_slice() }) {
        waiter.resume(Err(e));
        return;
    }

    let result = stack.raw_sendto(pcb, &p, dst);
    drop(p);

    match result {
        Ok(()) => {
            socket.counters().raw_tx_bytes.add(size);
            waiter.resume(Ok(size));
        }
        Err(e) => {
            klog_debug!("inet: raw send to {} failed: {}", dst, e);
            waiter.resume(Err(e));
        }
    }
}

pub(crate) fn recv_from(_stack: &dyn TcpIp, socket: &SocketRef, call: RecvCall, flags: MsgFlags) {
    let mut io = socket.io();
    if !io.call.is_idle() {
        call.waiter.resume(Err(NetError::Busy));
        return;
    }
    if io.pcb.is_none() {
        call.waiter.resume(Err(NetError::InvalidArgument));
        return;
    }
    let parked = io.take_parked();
    match parked {
        Some((pbuf, from)) => deliver(socket, call, pbuf, from),
        None if flags.contains(MsgFlags::DONTWAIT) => call.waiter.resume(Err(NetError::WouldBlock)),
        None => io.call = CallState::AwaitingReceive(call),
    }
}

/// Raw packet arrived for `socket` from `from`.
pub(crate) fn on_recv(socket: &SocketRef, pbuf: PacketBuf, from: Ipv4Addr) {
    let from = SockAddr::ip_only(from);
    let mut io = socket.io();
    if io.inbound.is_parked() {
        klog_debug!("inet: raw dropping {} bytes from {}", pbuf.tot_len(), from.ip);
        return;
    }

    io.remote = from;
    let waiting = io.call.take_receive();
    match waiting {
        Some(call) => deliver(socket, call, pbuf, from),
        None => {
            io.inbound = Inbound::park(pbuf);
            drop(io);
            resume_if_polled(socket);
        }
    }
}

fn deliver(socket: &SocketRef, mut call: RecvCall, pbuf: PacketBuf, from: SockAddr) {
    let n = cmp::min(call.size, pbuf.tot_len());
    // SAFETY: `call` has not been resumed yet.
    let dst = unsafe { call.buf.as_mut_slice() };
    pbuf.copy_partial(&mut dst[..n], 0);
    drop(pbuf);
    socket.counters().raw_rx_bytes.add(n);
    call.waiter.resume(Ok((n, Some(from))));
}
