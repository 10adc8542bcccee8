//! Stream handlers (processing context only).
//!
//! # Receive
//!
//! A receive of N bytes completes only when N bytes were delivered or the
//! peer closed. A `DONTWAIT` receive instead takes what is parked and returns
//! short, or fails with `WouldBlock` when nothing is. Each parked inbound buffer is drained incrementally; the
//! stack is told about consumed bytes (`tcp_recved`) once per buffer, when
//! it is fully drained. While a buffer is parked the stack is refused
//! further data and keeps it queued, which is the flow control.
//!
//! # Send
//!
//! A send of N bytes is written in chunks no larger than the stack's free
//! send buffer. Remaining chunks go out from `on_sent` as the peer
//! acknowledges. The caller is resumed once, with N, after the last chunk.
//!
//! # Accept
//!
//! One incoming connection is parked per listener; the stack is refused
//! more until it is accepted.

use core::cmp;
use core::mem;

use inetsock_lib::{klog_debug, klog_trace, klog_warn};

use crate::dispatch::Waiter;
use crate::packetbuf::PacketBuf;
use crate::resume::resume_if_polled;
use crate::stack::{Pcb, TcpIp};
use crate::state::{
    AcceptCall, CallState, Inbound, PendingConn, RecvCall, SendCall, SocketIo, SocketRef,
};
use crate::types::{MsgFlags, NetError, SockAddr};

/// Largest backlog handed to the stack; larger requests are clamped.
pub const MAX_BACKLOG: u8 = u8::MAX;

/// Inbound stream event, handed back to the stack when refused.
#[derive(Debug)]
pub enum TcpRecv {
    Data(PacketBuf),
    /// Peer sent FIN.
    Closed,
}

// =============================================================================
// Calls
// =============================================================================

pub(crate) fn open(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    let Some(pcb) = stack.tcp_new() else {
        klog_warn!("inet: tcp pcb allocation failed");
        waiter.resume(Err(NetError::OutOfMemory));
        return;
    };
    stack.tcp_set_target(&pcb, Some(socket.clone()));
    socket.io().init(pcb);
    waiter.resume(Ok(()));
}

pub(crate) fn close(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>) {
    {
        let mut io = socket.io();
        io.call.abort(NetError::ConnectionAborted);
        if let Some(conn) = io.pending_accept.take() {
            klog_debug!("inet: closing unaccepted connection from {}", conn.peer);
            stack.tcp_close(conn.pcb);
        }
        if let Some(pcb) = io.pcb.take() {
            stack.tcp_set_target(&pcb, None);
            stack.tcp_close(pcb);
        }
        io.inbound = Inbound::Empty;
    }
    resume_if_polled(socket);
    waiter.resume(Ok(()));
}

pub(crate) fn bind(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, local: SockAddr) {
    let io = socket.io();
    let result = match io.pcb.as_ref() {
        Some(pcb) => stack.tcp_bind(pcb, local),
        None => Err(NetError::InvalidArgument),
    };
    waiter.resume(result);
}

pub(crate) fn listen(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, backlog: u8) {
    let io = socket.io();
    let result = match io.pcb.as_ref() {
        Some(pcb) => stack.tcp_listen(pcb, backlog),
        None => Err(NetError::InvalidArgument),
    };
    if let Err(e) = result {
        klog_debug!("inet: listen failed: {}", e);
    }
    waiter.resume(result);
}

pub(crate) fn connect(stack: &dyn TcpIp, socket: &SocketRef, waiter: Waiter<()>, remote: SockAddr) {
    let mut io = socket.io();
    if !io.call.is_idle() {
        waiter.resume(Err(NetError::Busy));
        return;
    }
    let Some(pcb) = io.pcb.as_ref() else {
        waiter.resume(Err(NetError::InvalidArgument));
        return;
    };
    match stack.tcp_connect(pcb, remote) {
        Ok(()) => io.call = CallState::AwaitingConnect(waiter),
        Err(e) => {
            klog_debug!("inet: connect to {} rejected: {}", remote, e);
            waiter.resume(Err(e));
        }
    }
}

pub(crate) fn accept(stack: &dyn TcpIp, socket: &SocketRef, call: AcceptCall, flags: MsgFlags) {
    let mut io = socket.io();
    if !io.call.is_idle() {
        call.waiter.resume(Err(NetError::Busy));
        return;
    }
    if io.pcb.is_none() {
        call.waiter.resume(Err(NetError::InvalidArgument));
        return;
    }
    let parked = io.pending_accept.take();
    match parked {
        Some(conn) => accept_resume(stack, socket, &mut io, conn, call),
        None if flags.contains(MsgFlags::DONTWAIT) => call.waiter.resume(Err(NetError::WouldBlock)),
        None => io.call = CallState::AwaitingAccept(call),
    }
}

pub(crate) fn send_to(stack: &dyn TcpIp, socket: &SocketRef, call: SendCall) {
    let mut io = socket.io();
    if !io.call.is_idle() {
        call.waiter.resume(Err(NetError::Busy));
        return;
    }
    send_chunk(stack, socket, &mut io, call);
}

pub(crate) fn recv_from(stack: &dyn TcpIp, socket: &SocketRef, call: RecvCall, flags: MsgFlags) {
    let mut io = socket.io();
    if !io.call.is_idle() {
        call.waiter.resume(Err(NetError::Busy));
        return;
    }
    if io.inbound.is_closed() {
        call.waiter.resume(Ok((0, None)));
    } else if io.pcb.is_none() {
        call.waiter.resume(Err(NetError::InvalidArgument));
    } else if io.inbound.is_parked() {
        drain(stack, socket, &mut io, call, flags);
    } else if flags.contains(MsgFlags::DONTWAIT) {
        call.waiter.resume(Err(NetError::WouldBlock));
    } else {
        io.call = CallState::AwaitingReceive(call);
    }
}

// =============================================================================
// Events
// =============================================================================

/// Data or FIN for `socket`. `Err` hands the event back: a buffer is still
/// parked and the stack must retry after the next `tcp_recved`.
pub(crate) fn on_recv(stack: &dyn TcpIp, socket: &SocketRef, ev: TcpRecv) -> Result<(), TcpRecv> {
    let mut io = socket.io();
    if io.inbound.is_parked() {
        return Err(ev);
    }
    if io.inbound.is_closed() {
        klog_debug!("inet: tcp event after close ignored");
        return Ok(());
    }

    match ev {
        TcpRecv::Data(pbuf) => {
            if pbuf.is_empty() {
                return Ok(());
            }
            io.inbound = Inbound::park(pbuf);
            let waiting = io.call.take_receive();
            match waiting {
                Some(call) => drain(stack, socket, &mut io, call, MsgFlags::empty()),
                None => {
                    drop(io);
                    resume_if_polled(socket);
                }
            }
        }
        TcpRecv::Closed => {
            io.inbound = Inbound::Closed;
            let waiting = io.call.take_receive();
            match waiting {
                Some(call) => call.waiter.resume(Ok((0, None))),
                None => {
                    drop(io);
                    resume_if_polled(socket);
                }
            }
        }
    }
    Ok(())
}

/// The peer acknowledged `len` bytes; send-buffer space is available again.
pub(crate) fn on_sent(stack: &dyn TcpIp, socket: &SocketRef, len: usize) {
    let mut io = socket.io();
    let waiting = io.call.take_send();
    match waiting {
        Some(call) => {
            klog_trace!("inet: tcp {} bytes acked, {} left to send", len, call.left);
            send_chunk(stack, socket, &mut io, call);
        }
        None => {
            drop(io);
            resume_if_polled(socket);
        }
    }
}

/// Incoming connection on listener `socket`. `Err` hands the handle back:
/// a connection is already parked.
pub(crate) fn on_accept(stack: &dyn TcpIp, socket: &SocketRef, pcb: Pcb, peer: SockAddr) -> Result<(), Pcb> {
    let mut io = socket.io();
    if io.pending_accept.is_some() {
        klog_debug!("inet: refusing {} ({:?}), accept backlog full", peer, pcb);
        return Err(pcb);
    }

    // Hold the connection's events until a socket owns it.
    stack.tcp_set_target(&pcb, None);
    let conn = PendingConn { pcb, peer };
    let waiting = io.call.take_accept();
    match waiting {
        Some(call) => accept_resume(stack, socket, &mut io, conn, call),
        None => {
            io.pending_accept = Some(conn);
            drop(io);
            resume_if_polled(socket);
        }
    }
    Ok(())
}

/// Active open finished.
pub(crate) fn on_connected(socket: &SocketRef, status: Result<(), NetError>) {
    let mut io = socket.io();
    match io.call.take_connect() {
        Some(waiter) => waiter.resume(status),
        None => klog_debug!("inet: connected event with no connect outstanding"),
    }
}

/// Fatal connection error. The stack has already freed the handle.
pub(crate) fn on_error(socket: &SocketRef, err: NetError) {
    let mut io = socket.io();
    klog_debug!("inet: tcp error: {}", err);
    // Already released by the stack: drop the handle without closing it.
    io.pcb = None;
    io.inbound = Inbound::Closed;
    let idle = io.call.is_idle();
    io.call.abort(err);
    drop(io);
    if idle {
        resume_if_polled(socket);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Install `conn` into the accepting caller's socket and resume it.
fn accept_resume(
    stack: &dyn TcpIp,
    listener: &SocketRef,
    io: &mut SocketIo,
    conn: PendingConn,
    call: AcceptCall,
) {
    listener.counters().tcp_accepts.add(1);
    let PendingConn { pcb, peer } = conn;
    {
        let accepted = &call.accepted;
        let mut aio = accepted.io();
        aio.init(pcb);
        if let Some(pcb) = aio.pcb.as_ref() {
            stack.tcp_set_target(pcb, Some(accepted.clone()));
        }
    }
    if let Some(listen_pcb) = io.pcb.as_ref() {
        stack.tcp_accepted(listen_pcb);
    }
    call.waiter.resume(Ok(peer));
}

/// Write the next chunk of `call`; finish it or park it as `AwaitingSend`.
fn send_chunk(stack: &dyn TcpIp, socket: &SocketRef, io: &mut SocketIo, mut call: SendCall) {
    let Some(pcb) = io.pcb.as_ref() else {
        call.waiter.resume(Err(NetError::NotConnected));
        return;
    };

    let chunk = cmp::min(call.left, stack.tcp_sndbuf(pcb));
    if chunk > 0 {
        let offset = call.size - call.left;
        // SAFETY: `call` has not been resumed yet.
        let data = unsafe { &call.buf.as_slice()[offset..offset + chunk] };
        if let Err(e) = stack.tcp_write(pcb, data) {
            klog_warn!("inet: tcp write of {} bytes failed: {}", chunk, e);
            call.waiter.resume(Ok(0));
            return;
        }
        call.left -= chunk;
    }

    if call.left == 0 {
        if let Err(e) = stack.tcp_output(pcb) {
            klog_debug!("inet: tcp output deferred: {}", e);
        }
        socket.counters().tcp_tx_bytes.add(call.size);
        call.waiter.resume(Ok(call.size));
    } else {
        io.call = CallState::AwaitingSend(call);
    }
}

/// Copy from the parked buffer into `call`; finish it or park it as
/// `AwaitingReceive`. A `DONTWAIT` call never parks: it finishes short with
/// whatever was copied.
fn drain(
    stack: &dyn TcpIp,
    socket: &SocketRef,
    io: &mut SocketIo,
    mut call: RecvCall,
    flags: MsgFlags,
) {
    let Inbound::Parked { pbuf, mut left } = mem::take(&mut io.inbound) else {
        io.call = CallState::AwaitingReceive(call);
        return;
    };

    let tot_len = pbuf.tot_len();
    let n = cmp::min(left, call.left);
    let filled = call.filled();
    // SAFETY: `call` has not been resumed yet.
    let dst = unsafe { call.buf.as_mut_slice() };
    pbuf.copy_partial(&mut dst[filled..filled + n], tot_len - left);
    left -= n;
    call.left -= n;

    if left == 0 {
        drop(pbuf);
        if let Some(pcb) = io.pcb.as_ref() {
            stack.tcp_recved(pcb, tot_len);
        }
    } else {
        io.inbound = Inbound::Parked { pbuf, left };
    }

    if call.left == 0 {
        socket.counters().tcp_rx_bytes.add(call.size);
        call.waiter.resume(Ok((call.size, None)));
    } else if flags.contains(MsgFlags::DONTWAIT) {
        let filled = call.filled();
        socket.counters().tcp_rx_bytes.add(filled);
        call.waiter.resume(Ok((filled, None)));
    } else {
        io.call = CallState::AwaitingReceive(call);
    }
}
