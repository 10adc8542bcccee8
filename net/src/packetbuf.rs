//! Move-only packet buffer exchanged between the network stack and sockets.
//!
//! A `PacketBuf` is one inbound or outbound payload, possibly made of
//! several chained segments the way the stack hands them over. Ownership
//! moves stack -> socket (parked) -> copy routine, and the buffer is freed
//! exactly once when the last owner drops it.
//!
//! # Ownership
//!
//! `PacketBuf` is not `Clone`.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp;
use core::fmt;

use crate::types::NetError;

pub struct PacketBuf {
    data: Vec<u8>,
    next: Option<Box<PacketBuf>>,
}

// -- Debug: metadata only, never dump raw buffer contents ---------------------

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PacketBuf {{ segments={}, tot_len={} }}",
            self.segments().count(),
            self.tot_len()
        )
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl PacketBuf {
    /// Allocate a zero-filled single-segment buffer of `len` bytes.
    pub fn alloc(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            next: None,
        }
    }

    /// Copy `data` into a fresh single-segment buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            next: None,
        }
    }

    /// Append `tail` after the last segment of `self`.
    pub fn chain(&mut self, tail: PacketBuf) {
        if let Some(next) = self.next.as_deref_mut() {
            next.chain(tail);
            return;
        }
        self.next = Some(Box::new(tail));
    }
}

// =============================================================================
// Access
// =============================================================================

impl PacketBuf {
    /// Total payload length across all segments.
    pub fn tot_len(&self) -> usize {
        self.segments().map(<[u8]>::len).sum()
    }

    /// Length of the first segment only.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tot_len() == 0
    }

    /// First segment payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        let mut cur = Some(self);
        core::iter::from_fn(move || {
            let seg = cur?;
            cur = seg.next.as_deref();
            Some(seg.data.as_slice())
        })
    }

    /// Copy up to `dst.len()` bytes starting `offset` bytes into the chain.
    /// Returns the number of bytes copied.
    pub fn copy_partial(&self, dst: &mut [u8], offset: usize) -> usize {
        let mut skip = offset;
        let mut copied = 0;
        for seg in self.segments() {
            if copied == dst.len() {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let src = &seg[skip..];
            skip = 0;
            let n = cmp::min(src.len(), dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&src[..n]);
            copied += n;
        }
        copied
    }

    /// Fill the chain from `src`, segment by segment. Fails if `src` is
    /// longer than the chain.
    pub fn take_from(&mut self, src: &[u8]) -> Result<(), NetError> {
        if src.len() > self.tot_len() {
            return Err(NetError::InvalidArgument);
        }
        let mut off = 0;
        let mut cur = Some(self);
        while let Some(seg) = cur {
            if off == src.len() {
                break;
            }
            let n = cmp::min(seg.data.len(), src.len() - off);
            seg.data[..n].copy_from_slice(&src[off..off + n]);
            off += n;
            cur = seg.next.as_deref_mut();
        }
        Ok(())
    }

    /// Flatten the chain into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tot_len());
        for seg in self.segments() {
            out.extend_from_slice(seg);
        }
        out
    }
}
