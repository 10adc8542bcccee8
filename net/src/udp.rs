//! Datagram handlers. Everything here runs in the stack's processing
//! context.
//!
//! One datagram is delivered per receive; an over-large datagram is
//! truncated to the receive size and the rest is discarded. At most one
//! datagram is parked per socket and later arrivals are dropped until it is
//! read.

use core::cmp;

use inetsock_lib::{klog_debug, klog_warn};

use crate::dispatch::{UserBuf, Waiter};
use crate::packetbuf::PacketBuf;
use crate::resume::resume_if_polled;
use crate::stack::TcpIp;
use crate::state::{CallState, Inbound, RecvCall, SocketRef};
use crate::types::{MsgFlags, NetError, SockAddr};

pub(crate) fn open(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    let Some(pcb) = stack.udp_new() else {
        klog_warn!("inet: udp pcb allocation failed");
        waiter.resume(Err(NetError::OutOfMemory));
        return;
    };
    stack.udp_set_target(&pcb, Some(socket.clone()));
    socket.io().init(pcb);
    waiter.resume(Ok(()));
}

pub(crate) fn close(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    {
        let mut io = socket.io();
        io.call.abort(NetError::ConnectionAborted);
        if let Some(pcb) = io.pcb.take() {
            stack.udp_set_target(&pcb, None);
            stack.udp_remove(pcb);
        }
        io.inbound = Inbound::Empty;
    }
    resume_if_polled(socket);
    waiter.resume(Ok(()));
}

pub(crate) fn bind(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, local: SockAddr) {
    let io = socket.io();
    let result = match io.pcb.as_ref() {
        Some(pcb) => stack.udp_bind(pcb, local),
        None => Err(NetError::InvalidArgument),
    };
    waiter.resume(result);
}

pub(crate) fn connect(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, remote: SockAddr) {
    let io = socket.io();
    let result = match io.pcb.as_ref() {
        Some(pcb) => stack.udp_connect(pcb, remote),
        None => Err(NetError::InvalidArgument),
    };
    waiter.resume(result);
}

pub(crate) fn send_to(
    stack: &dyn TcpIp,
    socket: &SocketRef,
    waiter: Waiter<usize>,
    buf: UserBuf,
    dst: Option<SockAddr>,
) {
    let io = socket.io();
    let Some(pcb) = io.pcb.as_ref() else {
        waiter.resume(Err(NetError::InvalidArgument));
        return;
    };

    let size = buf.len();
    let Some(mut p) = stack.pbuf_alloc(size) else {
        klog_warn!("inet: udp send of {} bytes: no packet buffer", size);
        waiter.resume(Err(NetError::NoBufferSpace));
        return;
    };
    // SAFETY: the caller is suspended until `waiter` fires below.
    if let Err(e) = p.take_from(unsafe { buf.as_slice() }) {
        waiter.resume(Err(e));
        return;
    }

    let result = match dst {
        Some(dst) => stack.udp_sendto(pcb, &p, dst),
        None => stack.udp_send(pcb, &p),
    };
    drop(p);

    match result {
        Ok(()) => {
            socket.counters().udp_tx_bytes.add(size);
            waiter.resume(Ok(size));
        }
        Err(e) => {
            klog_debug!("inet: udp send failed: {}", e);
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

/// Datagram arrived for `socket` from `from`.
pub(crate) fn on_recv(socket: &SocketRef, pbuf: PacketBuf, from: SockAddr) {
    let mut io = socket.io();
    if io.inbound.is_parked() {
        klog_debug!(
            "inet: udp dropping {} bytes from {}, one already parked",
            pbuf.tot_len(),
            from
        );
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

/// Copy one datagram into the waiting caller and resume it.
fn deliver(socket: &SocketRef, mut call: RecvCall, pbuf: PacketBuf, from: SockAddr) {
    let n = cmp::min(call.size, pbuf.tot_len());
    // SAFETY: `call` has not been resumed yet.
    let dst = unsafe { call.buf.as_mut_slice() };
    pbuf.copy_partial(&mut dst[..n], 0);
    drop(pbuf);
    socket.counters().udp_rx_bytes.add(n);
    call.waiter.resume(Ok((n, Some(from))));
}
