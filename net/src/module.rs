//! Socket module: binds the socket layer to one stack instance and owns the
//! shared transfer counters.

use alloc::sync::Arc;

use inetsock_lib::klog_info;
use spin::Once;

use crate::counters::{COUNTER_COUNT, SocketCounters};
use crate::raw::DEFAULT_RAW_PROTOCOL;
use crate::socket::Socket;
use crate::stack::TcpIp;
use crate::types::{IpProtocol, NetError, SocketKind};

pub struct SocketModule {
    stack: Arc<dyn TcpIp>,
    counters: Arc<SocketCounters>,
}

impl SocketModule {
    /// Bring `stack` up and register the counters.
    pub fn new(stack: Arc<dyn TcpIp>) -> Self {
        stack.init();
        klog_info!("inet: socket module up, {} counters registered", COUNTER_COUNT);
        Self {
            stack,
            counters: Arc::new(SocketCounters::new()),
        }
    }

    pub fn counters(&self) -> &SocketCounters {
        &self.counters
    }

    pub fn stack(&self) -> &Arc<dyn TcpIp> {
        &self.stack
    }

    /// Open a socket of `kind`. Raw sockets use [`DEFAULT_RAW_PROTOCOL`].
    pub fn open(&self, kind: SocketKind) -> Result<Socket, NetError> {
        Socket::open(self.stack.clone(), self.counters.clone(), kind, DEFAULT_RAW_PROTOCOL)
    }

    pub fn open_tcp(&self) -> Result<Socket, NetError> {
        self.open(SocketKind::Stream)
    }

    pub fn open_udp(&self) -> Result<Socket, NetError> {
        self.open(SocketKind::Datagram)
    }

    pub fn open_raw(&self) -> Result<Socket, NetError> {
        self.open(SocketKind::Raw)
    }

    pub fn open_raw_proto(&self, proto: IpProtocol) -> Result<Socket, NetError> {
        Socket::open(self.stack.clone(), self.counters.clone(), SocketKind::Raw, proto)
    }
}

static MODULE: Once<SocketModule> = Once::new();

/// Initialize the global socket module. Later calls keep the first stack
/// and return the existing module.
pub fn socket_module_init(stack: Arc<dyn TcpIp>) -> &'static SocketModule {
    MODULE.call_once(|| SocketModule::new(stack))
}

/// The global socket module, once initialized.
pub fn socket_module() -> Option<&'static SocketModule> {
    MODULE.get()
}
