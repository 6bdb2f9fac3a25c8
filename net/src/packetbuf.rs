//! Fixed-capacity packet buffer with movable head/tail cursors. Grounded on
//! `drivers/src/net/packetbuf.rs`'s `PacketBuf`, with the pool/slot
//! indirection (`PacketBufInner::Pooled`/`Oversized`) dropped for a single
//! boxed-in-place `[u8; CAPACITY]` — there's no buffer pool subsystem here,
//! just one allocation per segment.

use crate::types::NetError;

/// Large enough for an Ethernet-MTU IPv4 datagram; the teacher uses the same
/// figure for its default packet pool slot size.
pub const CAPACITY: usize = 1500;

/// IPv4 header (20B) + TCP header (20B). The pseudo-header never touches the
/// backing array — [`crate::tcp::checksum_segment`] accumulates it from a
/// stack-local array, so it needs no headroom of its own.
pub const HEADROOM: usize = 40;

pub struct Buffer {
    data: [u8; CAPACITY],
    start: u16,
    end: u16,
}

impl Buffer {
    /// A fresh outbound buffer, headroom reserved, empty payload.
    pub fn alloc() -> Self {
        Buffer {
            data: [0; CAPACITY],
            start: HEADROOM as u16,
            end: HEADROOM as u16,
        }
    }

    /// Wrap bytes already assembled off the wire (inbound path / tests).
    /// No headroom: `start` sits at zero, mirroring a frame just handed up
    /// from a device.
    pub fn from_raw(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() > CAPACITY {
            return Err(NetError::NoBufferSpace);
        }
        let mut buf = Buffer {
            data: [0; CAPACITY],
            start: 0,
            end: bytes.len() as u16,
        };
        buf.data[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start as usize..self.end as usize]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start as usize..self.end as usize]
    }

    /// Decrement `start` by `len` and return the newly exposed bytes for the
    /// caller to fill with a header, network-order fields and all.
    ///
    /// Running out of headroom is a programmer error (every caller in this
    /// crate reserves [`HEADROOM`] up front via [`Buffer::alloc`]), so this
    /// asserts rather than returning a recoverable error.
    pub fn push_header(&mut self, len: usize) -> &mut [u8] {
        let new_start = self
            .start
            .checked_sub(len as u16)
            .expect("packet buffer headroom exhausted");
        self.start = new_start;
        let start = self.start as usize;
        &mut self.data[start..start + len]
    }

    /// Strip `len` bytes from the front, returning them, and advance `start`
    /// past them.
    pub fn pull_header(&mut self, len: usize) -> Result<&[u8], NetError> {
        if self.len() < len {
            return Err(NetError::InvalidArgument);
        }
        let start = self.start as usize;
        self.start += len as u16;
        Ok(&self.data[start..start + len])
    }

    /// Append `src` at the tail, growing `end`.
    pub fn append(&mut self, src: &[u8]) -> Result<(), NetError> {
        let new_end = self.end as usize + src.len();
        if new_end > CAPACITY {
            return Err(NetError::NoBufferSpace);
        }
        self.data[self.end as usize..new_end].copy_from_slice(src);
        self.end = new_end as u16;
        Ok(())
    }
}
