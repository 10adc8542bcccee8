//! Transfer counters.
//!
//! Incremented only after a logical transfer fully succeeds, by the size of
//! the whole transfer (chunked stream sends/receives count once). Nothing
//! in the socket layer reads them back.

use core::sync::atomic::{AtomicU64, Ordering};

pub const UDP_RX_BYTES: &str = "/inet/socket/udp/rx_bytes";
pub const UDP_TX_BYTES: &str = "/inet/socket/udp/tx_bytes";
pub const TCP_ACCEPTS: &str = "/inet/socket/tcp/accepts";
pub const TCP_RX_BYTES: &str = "/inet/socket/tcp/rx_bytes";
pub const TCP_TX_BYTES: &str = "/inet/socket/tcp/tx_bytes";
pub const RAW_RX_BYTES: &str = "/inet/socket/raw/rx_bytes";
pub const RAW_TX_BYTES: &str = "/inet/socket/raw/tx_bytes";

/// Number of registered counters.
pub const COUNTER_COUNT: usize = 7;

#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub(crate) fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct SocketCounters {
    pub udp_rx_bytes: Counter,
    pub udp_tx_bytes: Counter,
    pub tcp_accepts: Counter,
    pub tcp_rx_bytes: Counter,
    pub tcp_tx_bytes: Counter,
    pub raw_rx_bytes: Counter,
    pub raw_tx_bytes: Counter,
}

impl SocketCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(path, value)` for every counter, in registration order.
    pub fn snapshot(&self) -> [(&'static str, u64); COUNTER_COUNT] {
        [
            (UDP_RX_BYTES, self.udp_rx_bytes.get()),
            (UDP_TX_BYTES, self.udp_tx_bytes.get()),
            (TCP_ACCEPTS, self.tcp_accepts.get()),
            (TCP_RX_BYTES, self.tcp_rx_bytes.get()),
            (TCP_TX_BYTES, self.tcp_tx_bytes.get()),
            (RAW_RX_BYTES, self.raw_rx_bytes.get()),
            (RAW_TX_BYTES, self.raw_tx_bytes.get()),
        ]
    }

    /// Look a counter up by its path.
    pub fn get(&self, path: &str) -> Option<u64> {
        self.snapshot()
            .iter()
            .find(|(name, _)| *name == path)
            .map(|(_, value)| *value)
    }
}
