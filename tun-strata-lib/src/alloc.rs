//! Buffer allocation for packets copied out of the native receive ring.
//!
//! The device requests exactly the received packet's size and never
//! revalidates what comes back; swapping in a pooling allocator is a caller
//! decision, not a device one.

/// Supplies owned buffers for read results.
pub trait BufferAllocator {
    /// Returns a zeroed buffer of exactly `len` bytes.
    fn allocate(&self, len: usize) -> Vec<u8>;
}

/// Plain heap allocator. One fresh allocation per packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    #[inline]
    fn allocate(&self, len: usize) -> Vec<u8> {
        vec![0; len]
    }
}
