//! Raw byte chunks.

use super::traits::{Defaults, Element, ElementKind};
use crate::defaults;
use bytes::Bytes;
use std::fmt;

/// An immutable, cheaply sliceable chunk of bytes.
///
/// Splitting a chunk never copies: both halves reference the same
/// allocation.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Chunk {
    data: Bytes,
}

impl Chunk {
    /// Create a chunk from bytes.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Create a chunk by copying a slice.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Number of bytes in this chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this chunk holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The chunk's bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert into the underlying [`Bytes`].
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk").field("len", &self.len()).finish()
    }
}

impl From<Bytes> for Chunk {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

impl From<&'static str> for Chunk {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Defaults for Chunk {
    const MAX_BATCH_SIZE: u64 = defaults::BYTES_MAX_BATCH_SIZE;
    const MIN_BATCH_SIZE: u64 = defaults::BYTES_MIN_BATCH_SIZE;
    const MAX_BUFFERED: u64 = defaults::BYTES_MAX_BUFFERED;
}

impl Element for Chunk {
    const KIND: ElementKind = ElementKind::Bytes;

    #[inline]
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn split(self, at: u64) -> (Self, Self) {
        let mut head = self.data;
        if at >= head.len() as u64 {
            return (Self::new(head), Self::default());
        }
        let tail = head.split_off(at as usize);
        (Self::new(head), Self::new(tail))
    }
}
