//! Loopback stack for hosted tests.
//!
//! # Architecture
//!
//! A dedicated thread plays the stack's processing context: it drains an
//! mpsc queue of [`StackJob`]s and runs each one to completion. Every
//! protocol call made by a socket handler only updates the in-memory PCB
//! table and posts follow-up jobs; inbound events are always delivered from
//! a later job, never from inside the call that caused them. That keeps the
//! socket record's lock free of re-entrancy, as with a real stack.
//!
//! Everything lives on `127.0.0.0/8`. UDP and TCP demultiplex by local port,
//! raw packets go to every other raw PCB of the same protocol.
//!
//! # Knobs
//!
//! * `set_sndbuf`: per-connection send buffer (bytes not yet acked).
//! * `set_auto_ack`: when off, writes stay unacked until [`LoopbackStack::ack_all`].
//! * `set_fail_alloc` / `set_fail_write` / `set_down`: failure injection.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::events::{self, TcpRecv};
use crate::module::SocketModule;
use crate::packetbuf::PacketBuf;
use crate::socket::Socket;
use crate::stack::{Pcb, StackJob, TcpIp};
use crate::state::{CallKind, SocketRef};
use crate::types::{IpProtocol, Ipv4Addr, NetError, Port, SockAddr};

const EPHEMERAL_BASE: u16 = 49152;
const DEFAULT_SNDBUF: usize = 8192;
/// Allocations larger than this come back as a two-segment chain.
const SEGMENT_SPLIT: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Proto {
    Udp,
    Tcp,
    Raw(IpProtocol),
}

struct PcbEntry {
    proto: Proto,
    target: Option<SocketRef>,
    local: SockAddr,
    remote: Option<SockAddr>,
    bound: bool,
    listening: bool,
    /// Other end of an established loopback connection.
    peer: Option<u32>,
    /// Stream events not yet accepted by the socket layer.
    rx_queue: VecDeque<TcpRecv>,
    /// Connections refused by the listener, offered again on `tcp_accepted`.
    accept_queue: VecDeque<(u32, SockAddr)>,
    in_flight: usize,
    unacked: usize,
}

impl PcbEntry {
    fn new(proto: Proto) -> Self {
        Self {
            proto,
            target: None,
            local: SockAddr::UNSPECIFIED,
            remote: None,
            bound: false,
            listening: false,
            peer: None,
            rx_queue: VecDeque::new(),
            accept_queue: VecDeque::new(),
            in_flight: 0,
            unacked: 0,
        }
    }
}

/// Calls observed by the stack, for assertions.
#[derive(Default)]
pub struct StackStats {
    pub init_calls: usize,
    pub outputs: usize,
    pub recved: usize,
    pub accepted: usize,
    pub writes: usize,
    pub last_backlog: Option<u8>,
    pub udp_sent: Vec<(SockAddr, Vec<u8>)>,
    pub raw_sent: Vec<(Ipv4Addr, Vec<u8>)>,
}

#[derive(Default)]
struct Net {
    next_id: u32,
    next_port: u16,
    pcbs: BTreeMap<u32, PcbEntry>,
    stats: StackStats,
}

impl Net {
    fn insert(&mut self, proto: Proto) -> Pcb {
        self.next_id += 1;
        let id = self.next_id;
        self.pcbs.insert(id, PcbEntry::new(proto));
        pcb_handle(id)
    }

    fn ephemeral_port(&mut self) -> Port {
        let port = EPHEMERAL_BASE + self.next_port;
        self.next_port += 1;
        Port(port)
    }

    /// Give `id` a local address if it has none yet.
    fn ensure_local(&mut self, id: u32) -> SockAddr {
        let port = self.ephemeral_port();
        let Some(entry) = self.pcbs.get_mut(&id) else {
            return SockAddr::UNSPECIFIED;
        };
        if entry.local.port == Port::ANY {
            entry.local.port = port;
        }
        if entry.local.ip.is_unspecified() {
            entry.local.ip = Ipv4Addr::LOCALHOST;
        }
        entry.local
    }

    fn find_port(&self, proto: Proto, dst: SockAddr, listening: bool) -> Option<u32> {
        self.pcbs.iter().find_map(|(id, e)| {
            let ip_ok = e.local.ip.is_unspecified() || e.local.ip == dst.ip;
            let matches = e.proto == proto
                && e.local.port == dst.port
                && ip_ok
                && e.bound
                && e.listening == listening;
            matches.then_some(*id)
        })
    }
}

fn pcb_handle(id: u32) -> Pcb {
    Pcb::from_raw(NonZeroU32::new(id).unwrap_or(NonZeroU32::MIN))
}

pub struct LoopbackStack {
    me: Weak<LoopbackStack>,
    jobs: Sender<StackJob>,
    /// Jobs posted but not yet started.
    queued: AtomicUsize,
    net: Mutex<Net>,
    sndbuf: AtomicUsize,
    auto_ack: AtomicBool,
    fail_alloc: AtomicBool,
    fail_write: AtomicBool,
    down: AtomicBool,
}

impl LoopbackStack {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<StackJob>();
        let stack = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            jobs: tx,
            queued: AtomicUsize::new(0),
            net: Mutex::new(Net::default()),
            sndbuf: AtomicUsize::new(DEFAULT_SNDBUF),
            auto_ack: AtomicBool::new(true),
            fail_alloc: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&stack);
        thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                let Some(stack) = weak.upgrade() else {
                    break;
                };
                stack.queued.fetch_sub(1, Ordering::AcqRel);
                job(&*stack);
            }
        });
        stack
    }

    /// Stack plus a socket module bound to it.
    pub fn with_module() -> (Arc<Self>, SocketModule) {
        let stack = Self::new();
        let module = SocketModule::new(stack.clone());
        (stack, module)
    }

    fn net(&self) -> MutexGuard<'_, Net> {
        self.net.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn defer<F>(&self, f: F)
    where
        F: FnOnce(&LoopbackStack) + Send + 'static,
    {
        let me = self.me.clone();
        let job: StackJob = Box::new(move |_: &dyn TcpIp| {
            if let Some(stack) = me.upgrade() {
                f(&stack);
            }
        });
        let _ = self.enqueue(job);
    }

    fn enqueue(&self, job: StackJob) -> Result<(), NetError> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.jobs.send(job).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            NetError::StackDown
        })
    }

    // =========================================================================
    // Test controls
    // =========================================================================

    pub fn set_sndbuf(&self, bytes: usize) {
        self.sndbuf.store(bytes, Ordering::Release);
    }

    pub fn set_auto_ack(&self, on: bool) {
        self.auto_ack.store(on, Ordering::Release);
    }

    pub fn set_fail_alloc(&self, on: bool) {
        self.fail_alloc.store(on, Ordering::Release);
    }

    pub fn set_fail_write(&self, on: bool) {
        self.fail_write.store(on, Ordering::Release);
    }

    /// Refuse every further job.
    pub fn set_down(&self, on: bool) {
        self.down.store(on, Ordering::Release);
    }

    /// Run `f` on the processing thread and wait for it.
    pub fn run_sync<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&LoopbackStack) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.defer(move |stack| {
            let _ = tx.send(f(stack));
        });
        match rx.recv() {
            Ok(value) => value,
            Err(_) => panic!("loopback stack thread is gone"),
        }
    }

    /// Wait until every queued job, including follow-ups they post, has run.
    pub fn settle(&self) {
        loop {
            let pending = self.run_sync(|stack| stack.queued.load(Ordering::Acquire));
            if pending == 0 {
                return;
            }
        }
    }

    pub fn with_stats<R>(&self, f: impl FnOnce(&StackStats) -> R) -> R {
        f(&self.net().stats)
    }

    pub fn pcb_count(&self) -> usize {
        self.net().pcbs.len()
    }

    /// Release every unacked write as if the peer acknowledged it.
    pub fn ack_all(&self) {
        let ids: Vec<u32> = self
            .net()
            .pcbs
            .iter()
            .filter(|(_, e)| e.unacked > 0)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.defer(move |stack| stack.deliver_ack(id, None));
        }
    }

    /// Deliver a stream event straight to the connection owning `pcb_id`.
    pub fn inject_tcp(&self, pcb_id: u32, ev: TcpRecv) {
        self.defer(move |stack| {
            if let Some(entry) = stack.net().pcbs.get_mut(&pcb_id) {
                entry.rx_queue.push_back(ev);
            }
            stack.pump(pcb_id);
        });
    }

    /// Fail the connection owning `pcb_id`; the stack frees it first.
    pub fn inject_tcp_error(&self, pcb_id: u32, err: NetError) {
        self.defer(move |stack| stack.fail_connection(pcb_id, err));
    }

    /// Deliver a datagram to `target` as if it came from `from`.
    pub fn inject_udp(&self, target: &SocketRef, data: &[u8], from: SockAddr) {
        let target = target.clone();
        let p = PacketBuf::from_slice(data);
        self.defer(move |_| events::udp_recv(&target, p, from));
    }

    /// Deliver a raw packet to `target` as if it came from `from`.
    pub fn inject_raw(&self, target: &SocketRef, data: &[u8], from: Ipv4Addr) {
        let target = target.clone();
        let p = PacketBuf::from_slice(data);
        self.defer(move |_| events::raw_recv(&target, p, from));
    }

    // =========================================================================
    // Delivery (processing thread only)
    // =========================================================================

    /// Feed queued stream events to the owner of `id` until it refuses one.
    fn pump(&self, id: u32) {
        loop {
            let (target, ev) = {
                let mut net = self.net();
                let Some(entry) = net.pcbs.get_mut(&id) else {
                    return;
                };
                let Some(target) = entry.target.clone() else {
                    return;
                };
                let Some(ev) = entry.rx_queue.pop_front() else {
                    return;
                };
                (target, ev)
            };
            if let Err(ev) = events::tcp_recv(self, &target, ev) {
                if let Some(entry) = self.net().pcbs.get_mut(&id) {
                    entry.rx_queue.push_front(ev);
                }
                return;
            }
        }
    }

    /// Offer connection `child` to `listener`, queueing it when refused.
    fn offer_accept(&self, listener: u32, child: u32, peer: SockAddr) {
        let target = match self.net().pcbs.get(&listener) {
            Some(entry) => entry.target.clone(),
            None => return,
        };
        let Some(target) = target else {
            return;
        };
        if let Err(pcb) = events::tcp_accept(self, &target, pcb_handle(child), peer) {
            if let Some(entry) = self.net().pcbs.get_mut(&listener) {
                entry.accept_queue.push_back((pcb.id(), peer));
            }
        }
    }

    /// Acknowledge unacked bytes of `id`: all of them, or `len`.
    fn deliver_ack(&self, id: u32, len: Option<usize>) {
        let (target, n) = {
            let mut net = self.net();
            let Some(entry) = net.pcbs.get_mut(&id) else {
                return;
            };
            let n = len.unwrap_or(entry.unacked).min(entry.unacked);
            entry.unacked -= n;
            entry.in_flight -= n;
            (entry.target.clone(), n)
        };
        if let Some(target) = target {
            if n > 0 {
                events::tcp_sent(self, &target, n);
            }
        }
    }

    fn fail_connection(&self, id: u32, err: NetError) {
        let target = match self.net().pcbs.remove(&id) {
            Some(entry) => entry.target,
            None => return,
        };
        if let Some(target) = target {
            events::tcp_error(&target, err);
        }
    }

    /// Queue FIN for the peer of a connection that is going away.
    fn hang_up(&self, net: &mut Net, peer: Option<u32>) {
        let Some(peer) = peer else {
            return;
        };
        if let Some(entry) = net.pcbs.get_mut(&peer) {
            entry.peer = None;
            entry.rx_queue.push_back(TcpRecv::Closed);
            self.defer(move |stack| stack.pump(peer));
        }
    }
}

// =============================================================================
// TcpIp
// =============================================================================

impl TcpIp for LoopbackStack {
    fn post(&self, job: StackJob) -> Result<(), NetError> {
        if self.down.load(Ordering::Acquire) {
            return Err(NetError::StackDown);
        }
        self.enqueue(job)
    }

    fn init(&self) {
        self.net().stats.init_calls += 1;
    }

    fn pbuf_alloc(&self, len: usize) -> Option<PacketBuf> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return None;
        }
        if len <= SEGMENT_SPLIT {
            return Some(PacketBuf::alloc(len));
        }
        let mut p = PacketBuf::alloc(SEGMENT_SPLIT);
        p.chain(PacketBuf::alloc(len - SEGMENT_SPLIT));
        Some(p)
    }

    // -- UDP ------------------------------------------------------------------

    fn udp_new(&self) -> Option<Pcb> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return None;
        }
        Some(self.net().insert(Proto::Udp))
    }

    fn udp_set_target(&self, pcb: &Pcb, target: Option<SocketRef>) {
        if let Some(entry) = self.net().pcbs.get_mut(&pcb.id()) {
            entry.target = target;
        }
    }

    fn udp_bind(&self, pcb: &Pcb, local: SockAddr) -> Result<(), NetError> {
        let mut net = self.net();
        if local.port != Port::ANY && net.find_port(Proto::Udp, local, false).is_some() {
            return Err(NetError::AddressInUse);
        }
        let port = match local.port {
            Port::ANY => net.ephemeral_port(),
            port => port,
        };
        let entry = net.pcbs.get_mut(&pcb.id()).ok_or(NetError::InvalidArgument)?;
        entry.local = SockAddr::new(local.ip, port);
        entry.bound = true;
        Ok(())
    }

    fn udp_connect(&self, pcb: &Pcb, remote: SockAddr) -> Result<(), NetError> {
        let mut net = self.net();
        net.ensure_local(pcb.id());
        let entry = net.pcbs.get_mut(&pcb.id()).ok_or(NetError::InvalidArgument)?;
        entry.bound = true;
        entry.remote = Some(remote);
        Ok(())
    }

    fn udp_send(&self, pcb: &Pcb, p: &PacketBuf) -> Result<(), NetError> {
        let remote = self
            .net()
            .pcbs
            .get(&pcb.id())
            .and_then(|e| e.remote)
            .ok_or(NetError::NotConnected)?;
        self.udp_sendto(pcb, p, remote)
    }

    fn udp_sendto(&self, pcb: &Pcb, p: &PacketBuf, dst: SockAddr) -> Result<(), NetError> {
        let data = p.to_vec();
        let mut net = self.net();
        if let Some(entry) = net.pcbs.get_mut(&pcb.id()) {
            entry.bound = true;
        }
        let src = net.ensure_local(pcb.id());
        net.stats.udp_sent.push((dst, data.clone()));

        let target = net
            .find_port(Proto::Udp, dst, false)
            .and_then(|id| net.pcbs.get(&id))
            .and_then(|e| e.target.clone());
        if let Some(target) = target {
            let pbuf = PacketBuf::from_slice(&data);
            self.defer(move |_| events::udp_recv(&target, pbuf, src));
        }
        Ok(())
    }

    fn udp_remove(&self, pcb: Pcb) {
        self.net().pcbs.remove(&pcb.id());
    }

    // -- TCP ------------------------------------------------------------------

    fn tcp_new(&self) -> Option<Pcb> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return None;
        }
        Some(self.net().insert(Proto::Tcp))
    }

    fn tcp_set_target(&self, pcb: &Pcb, target: Option<SocketRef>) {
        let id = pcb.id();
        let attached = target.is_some();
        if let Some(entry) = self.net().pcbs.get_mut(&id) {
            entry.target = target;
        }
        if attached {
            self.defer(move |stack| stack.pump(id));
        }
    }

    fn tcp_bind(&self, pcb: &Pcb, local: SockAddr) -> Result<(), NetError> {
        let mut net = self.net();
        let in_use = local.port != Port::ANY
            && net.pcbs.iter().any(|(id, e)| {
                *id != pcb.id() && e.proto == Proto::Tcp && e.bound && e.local.port == local.port
            });
        if in_use {
            return Err(NetError::AddressInUse);
        }
        let port = match local.port {
            Port::ANY => net.ephemeral_port(),
            port => port,
        };
        let entry = net.pcbs.get_mut(&pcb.id()).ok_or(NetError::InvalidArgument)?;
        entry.local = SockAddr::new(local.ip, port);
        entry.bound = true;
        Ok(())
    }

    fn tcp_listen(&self, pcb: &Pcb, backlog: u8) -> Result<(), NetError> {
        let mut net = self.net();
        net.stats.last_backlog = Some(backlog);
        let entry = net.pcbs.get_mut(&pcb.id()).ok_or(NetError::InvalidArgument)?;
        if !entry.bound {
            return Err(NetError::InvalidArgument);
        }
        entry.listening = true;
        Ok(())
    }

    fn tcp_connect(&self, pcb: &Pcb, remote: SockAddr) -> Result<(), NetError> {
        if !remote.ip.is_loopback() {
            return Err(NetError::HostUnreachable);
        }
        let client = pcb.id();
        let mut net = self.net();
        let Some(listener) = net.find_port(Proto::Tcp, remote, true) else {
            self.defer(move |stack| stack.fail_connection(client, NetError::ConnectionRefused));
            return Ok(());
        };

        let client_addr = net.ensure_local(client);
        let server = net.insert(Proto::Tcp).id();
        if let Some(entry) = net.pcbs.get_mut(&server) {
            entry.local = SockAddr::new(Ipv4Addr::LOCALHOST, remote.port);
            entry.remote = Some(client_addr);
            entry.peer = Some(client);
        }
        if let Some(entry) = net.pcbs.get_mut(&client) {
            entry.remote = Some(remote);
            entry.peer = Some(server);
            entry.bound = true;
        }
        drop(net);

        self.defer(move |stack| stack.offer_accept(listener, server, client_addr));
        self.defer(move |stack| {
            let target = stack.net().pcbs.get(&client).and_then(|e| e.target.clone());
            if let Some(target) = target {
                events::tcp_connected(&target, Ok(()));
            }
        });
        Ok(())
    }

    fn tcp_sndbuf(&self, pcb: &Pcb) -> usize {
        let limit = self.sndbuf.load(Ordering::Acquire);
        self.net()
            .pcbs
            .get(&pcb.id())
            .map_or(0, |e| limit.saturating_sub(e.in_flight))
    }

    fn tcp_write(&self, pcb: &Pcb, data: &[u8]) -> Result<(), NetError> {
        if self.fail_write.load(Ordering::Acquire) {
            return Err(NetError::OutOfMemory);
        }
        let id = pcb.id();
        let mut net = self.net();
        net.stats.writes += 1;
        let entry = net.pcbs.get_mut(&id).ok_or(NetError::NotConnected)?;
        let peer = entry.peer.ok_or(NetError::NotConnected)?;
        entry.in_flight += data.len();
        entry.unacked += data.len();

        if let Some(peer_entry) = net.pcbs.get_mut(&peer) {
            peer_entry
                .rx_queue
                .push_back(TcpRecv::Data(PacketBuf::from_slice(data)));
        }
        drop(net);

        self.defer(move |stack| stack.pump(peer));
        if self.auto_ack.load(Ordering::Acquire) {
            let len = data.len();
            self.defer(move |stack| stack.deliver_ack(id, Some(len)));
        }
        Ok(())
    }

    fn tcp_output(&self, _pcb: &Pcb) -> Result<(), NetError> {
        self.net().stats.outputs += 1;
        Ok(())
    }

    fn tcp_recved(&self, pcb: &Pcb, len: usize) {
        let id = pcb.id();
        self.net().stats.recved += len;
        self.defer(move |stack| stack.pump(id));
    }

    fn tcp_accepted(&self, listener: &Pcb) {
        let id = listener.id();
        let next = {
            let mut net = self.net();
            net.stats.accepted += 1;
            net.pcbs.get_mut(&id).and_then(|e| e.accept_queue.pop_front())
        };
        if let Some((child, peer)) = next {
            self.defer(move |stack| stack.offer_accept(id, child, peer));
        }
    }

    fn tcp_close(&self, pcb: Pcb) {
        let mut net = self.net();
        let Some(entry) = net.pcbs.remove(&pcb.id()) else {
            return;
        };
        self.hang_up(&mut net, entry.peer);
        for (child, _) in entry.accept_queue {
            if let Some(child_entry) = net.pcbs.remove(&child) {
                self.hang_up(&mut net, child_entry.peer);
            }
        }
    }

    // -- RAW ------------------------------------------------------------------

    fn raw_new(&self, proto: IpProtocol) -> Option<Pcb> {
        if self.fail_alloc.load(Ordering::Acquire) {
            return None;
        }
        Some(self.net().insert(Proto::Raw(proto)))
    }

    fn raw_set_target(&self, pcb: &Pcb, target: Option<SocketRef>) {
        if let Some(entry) = self.net().pcbs.get_mut(&pcb.id()) {
            entry.target = target;
        }
    }

    fn raw_sendto(&self, pcb: &Pcb, p: &PacketBuf, dst: Ipv4Addr) -> Result<(), NetError> {
        let data = p.to_vec();
        let mut net = self.net();
        let proto = net
            .pcbs
            .get(&pcb.id())
            .map(|e| e.proto)
            .ok_or(NetError::InvalidArgument)?;
        net.stats.raw_sent.push((dst, data.clone()));
        if !dst.is_loopback() {
            return Ok(());
        }

        let targets: Vec<SocketRef> = net
            .pcbs
            .iter()
            .filter(|(id, e)| **id != pcb.id() && e.proto == proto)
            .filter_map(|(_, e)| e.target.clone())
            .collect();
        drop(net);
        for target in targets {
            let pbuf = PacketBuf::from_slice(&data);
            self.defer(move |_| events::raw_recv(&target, pbuf, Ipv4Addr::LOCALHOST));
        }
        Ok(())
    }

    fn raw_remove(&self, pcb: Pcb) {
        self.net().pcbs.remove(&pcb.id());
    }
}

// =============================================================================
// Test helpers
// =============================================================================

/// Install the thread-backed scheduler so blocked callers park.
pub fn setup() {
    inetsock_lib::kernel_services::sched::host::install();
}

pub fn localhost(port: u16) -> SockAddr {
    SockAddr::new(Ipv4Addr::LOCALHOST, Port(port))
}

/// Spin until `socket` has a suspended call of `kind`, or give up after a
/// second.
pub fn wait_for_call(socket: &Socket, kind: CallKind) -> bool {
    wait_until(|| socket.pending_call() == kind)
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Connected stream pair: `(client, server side, listener)`.
pub fn tcp_pair(module: &SocketModule, port: u16) -> Result<(Socket, Socket, Socket), NetError> {
    let listener = module.open_tcp()?;
    listener.bind(localhost(port))?;
    listener.listen(4)?;
    let client = module.open_tcp()?;
    client.connect(localhost(port))?;
    let (server, _) = listener.accept()?;
    Ok((client, server, listener))
}
