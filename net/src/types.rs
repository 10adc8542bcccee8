//! Address, kind and error vocabulary shared by the socket layer and the
//! stack binding. IPv4 only.

use core::fmt;

use bitflags::bitflags;

pub use core::net::Ipv4Addr;

/// Host-order port.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Port(pub u16);

impl Port {
    /// Wildcard on bind; also the port reported for raw sources.
    pub const ANY: Self = Self(0);
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr {
    pub ip: Ipv4Addr,
    pub port: Port,
}

impl SockAddr {
    pub const UNSPECIFIED: Self = Self::new(Ipv4Addr::UNSPECIFIED, Port::ANY);

    pub const fn new(ip: Ipv4Addr, port: Port) -> Self {
        Self { ip, port }
    }

    /// Raw packets carry no port; the source is reported with port zero.
    pub const fn ip_only(ip: Ipv4Addr) -> Self {
        Self::new(ip, Port::ANY)
    }
}

impl Default for SockAddr {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Stream,
    Datagram,
    Raw,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::Datagram => "datagram",
            Self::Raw => "raw",
        })
    }
}

/// Protocol numbers a raw socket can be opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl IpProtocol {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

impl TryFrom<u8> for IpProtocol {
    type Error = NetError;

    fn try_from(raw: u8) -> Result<Self, NetError> {
        [Self::Icmp, Self::Tcp, Self::Udp]
            .into_iter()
            .find(|p| p.as_u8() == raw)
            .ok_or(NetError::OperationNotSupported)
    }
}

bitflags! {
    /// Per-call send/receive flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u32 {
        /// Fail with `WouldBlock` instead of waiting when nothing is parked.
        const DONTWAIT = 0x40;
    }
}

macro_rules! net_errors {
    ($($(#[$meta:meta])* $name:ident = $errno:literal, $text:literal;)+) => {
        /// Every failure the socket layer reports. [`NetError::to_errno`]
        /// gives the negative POSIX code for a syscall boundary.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum NetError {
            $($(#[$meta])* $name,)+
        }

        impl NetError {
            pub const fn to_errno(&self) -> i32 {
                match self {
                    $(Self::$name => -$errno,)+
                }
            }

            pub const fn message(&self) -> &'static str {
                match self {
                    $(Self::$name => $text,)+
                }
            }
        }
    };
}

net_errors! {
    WouldBlock = 11, "operation would block";
    ConnectionRefused = 111, "connection refused";
    ConnectionReset = 104, "connection reset by peer";
    /// Torn down locally, including by a close that raced the call.
    ConnectionAborted = 103, "connection aborted";
    TimedOut = 110, "operation timed out";
    AddressInUse = 98, "address already in use";
    NotConnected = 107, "socket not connected";
    AlreadyConnected = 106, "socket already connected";
    HostUnreachable = 113, "host unreachable";
    InvalidArgument = 22, "invalid argument";
    /// Packet buffer allocation failed.
    NoBufferSpace = 105, "no buffer space available";
    /// Protocol control block allocation failed.
    OutOfMemory = 12, "out of memory";
    OperationNotSupported = 95, "operation not supported";
    DestinationRequired = 89, "destination address required";
    /// Another blocking call is already outstanding on the socket.
    Busy = 16, "another call is outstanding";
    /// The stack context is not accepting work.
    StackDown = 108, "network stack not running";
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
