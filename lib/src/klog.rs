//! Leveled logging for the socket bridge.
//!
//! Lines are filtered against a global level and then handed to one sink.
//! A sink installed with [`klog_register_backend`] wins; otherwise lines go to
//! the early sink, which is the COM1 UART on bare-metal x86_64, stderr when
//! the `std` feature is on, and nowhere on anything else.
//!
//! A sink writes exactly one line per call and adds the newline itself.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    const ALL: [KlogLevel; 5] = [
        KlogLevel::Error,
        KlogLevel::Warn,
        KlogLevel::Info,
        KlogLevel::Debug,
        KlogLevel::Trace,
    ];

    /// Out-of-range values saturate to `Trace`.
    fn from_u8(raw: u8) -> Self {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(KlogLevel::Trace)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KlogLevel::Error => "error",
            KlogLevel::Warn => "warn",
            KlogLevel::Info => "info",
            KlogLevel::Debug => "debug",
            KlogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for KlogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_LEVEL: KlogLevel = KlogLevel::Info;

static LEVEL: AtomicU8 = AtomicU8::new(DEFAULT_LEVEL as u8);

/// One formatted line in, one written line out.
pub type KlogBackend = fn(fmt::Arguments<'_>);

// Null until a sink is registered.
static SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod early {
    use core::fmt::{self, Write};

    use x86_64::instructions::port::Port;

    const COM1_DATA: u16 = 0x3F8;
    const COM1_LINE_STATUS: u16 = COM1_DATA + 5;
    const TX_HOLDING_EMPTY: u8 = 0x20;

    struct Com1;

    impl Com1 {
        fn send(&mut self, byte: u8) {
            let mut status = Port::<u8>::new(COM1_LINE_STATUS);
            let mut data = Port::<u8>::new(COM1_DATA);
            // SAFETY: fixed legacy UART ports; reading the line status has
            // no side effect and the data write only transmits `byte`.
            unsafe {
                while status.read() & TX_HOLDING_EMPTY == 0 {
                    core::hint::spin_loop();
                }
                data.write(byte);
            }
        }
    }

    impl Write for Com1 {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(|b| self.send(b));
            Ok(())
        }
    }

    pub(super) fn write_line(args: fmt::Arguments<'_>) {
        let mut port = Com1;
        let _ = port.write_fmt(args);
        let _ = port.write_str("\r\n");
    }
}

#[cfg(all(not(all(target_arch = "x86_64", target_os = "none")), feature = "std"))]
mod early {
    use core::fmt;

    pub(super) fn write_line(args: fmt::Arguments<'_>) {
        std::eprintln!("{args}");
    }
}

#[cfg(all(not(all(target_arch = "x86_64", target_os = "none")), not(feature = "std")))]
mod early {
    use core::fmt;

    pub(super) fn write_line(_args: fmt::Arguments<'_>) {}
}

fn sink() -> KlogBackend {
    let raw = SINK.load(Ordering::Acquire);
    if raw.is_null() {
        return early::write_line;
    }
    // SAFETY: only `klog_register_backend` stores into SINK, and it stores a
    // `KlogBackend`, which has the same size and validity as `*mut ()`.
    unsafe { core::mem::transmute::<*mut (), KlogBackend>(raw) }
}

pub fn klog_register_backend(backend: KlogBackend) {
    SINK.store(backend as *mut (), Ordering::Release);
}

/// Put the level back to [`DEFAULT_LEVEL`].
pub fn klog_init() {
    klog_set_level(DEFAULT_LEVEL);
}

pub fn klog_set_level(level: KlogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

#[inline]
pub fn klog_is_enabled(level: KlogLevel) -> bool {
    level as u8 <= LEVEL.load(Ordering::Relaxed)
}

/// Filter and emit one line. Format strings carry no trailing newline.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if klog_is_enabled(level) {
        sink()(args);
    }
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)+) => {
        $crate::klog::log_args($level, ::core::format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)+) => { $crate::klog!($crate::klog::KlogLevel::Error, $($arg)+) };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)+) => { $crate::klog!($crate::klog::KlogLevel::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)+) => { $crate::klog!($crate::klog::KlogLevel::Info, $($arg)+) };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)+) => { $crate::klog!($crate::klog::KlogLevel::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)+) => { $crate::klog!($crate::klog::KlogLevel::Trace, $($arg)+) };
}
