//! # Byte Storage
//!
//! Backing block for component arenas. Components are plain-old-data, so a
//! slot is just `size` bytes at `slot * stride`, and resetting a slot is a
//! byte copy of the type's default instance.

use bytemuck::{Pod, Zeroable};

use super::SlotStorage;

/// Largest component alignment an arena supports.
pub const BLOCK_ALIGN: usize = 16;

/// One aligned storage unit. Slots start on a block boundary.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(16))]
struct Block([u8; BLOCK_ALIGN]);

/// Contiguous, 16-byte aligned storage for one component type.
pub struct ByteStorage {
    blocks: Vec<Block>,
    /// Bytes between consecutive slots (multiple of [`BLOCK_ALIGN`]).
    stride: usize,
    /// Instance size in bytes.
    size: usize,
    /// Default instance copied into fresh and recycled slots.
    default_instance: Box<[u8]>,
}

impl ByteStorage {
    /// Creates empty storage for instances shaped like `default_instance`.
    #[must_use]
    pub fn new(default_instance: &[u8]) -> Self {
        let size = default_instance.len();
        let stride = size.div_ceil(BLOCK_ALIGN).max(1) * BLOCK_ALIGN;
        Self {
            blocks: Vec::new(),
            stride,
            size,
            default_instance: default_instance.into(),
        }
    }

    /// Instance size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Distance in bytes between two slots.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes of one slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` lies beyond the reserved capacity.
    #[inline]
    #[must_use]
    pub fn bytes(&self, slot: usize) -> &[u8] {
        let start = slot * self.stride;
        &bytemuck::cast_slice::<Block, u8>(&self.blocks)[start..start + self.size]
    }

    /// Mutable bytes of one slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` lies beyond the reserved capacity.
    #[inline]
    pub fn bytes_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = slot * self.stride;
        &mut bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)[start..start + self.size]
    }

    /// Base address of the block, for column views that outlive one borrow.
    ///
    /// The pointer is invalidated by the next growth.
    #[inline]
    pub(crate) fn base_ptr(&mut self) -> *mut u8 {
        self.blocks.as_mut_ptr().cast::<u8>()
    }
}

impl SlotStorage for ByteStorage {
    fn reserve_slots(&mut self, capacity: usize) {
        let blocks = capacity * (self.stride / BLOCK_ALIGN);
        if blocks > self.blocks.len() {
            self.blocks.reserve_exact(blocks - self.blocks.len());
            self.blocks.resize(blocks, Block::zeroed());
        }
    }

    fn reset_slot(&mut self, slot: usize) {
        let start = slot * self.stride;
        let size = self.size;
        bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)[start..start + size]
            .copy_from_slice(&self.default_instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_rounds_to_block() {
        assert_eq!(ByteStorage::new(&[0; 8]).stride(), 16);
        assert_eq!(ByteStorage::new(&[0; 16]).stride(), 16);
        assert_eq!(ByteStorage::new(&[0; 20]).stride(), 32);
        assert_eq!(ByteStorage::new(&[]).stride(), 16);
    }

    #[test]
    fn test_reset_copies_default() {
        let mut storage = ByteStorage::new(&[7, 7, 7, 7]);
        storage.reserve_slots(4);
        assert_eq!(storage.bytes(2), &[0, 0, 0, 0]);

        storage.reset_slot(2);
        assert_eq!(storage.bytes(2), &[7, 7, 7, 7]);

        storage.bytes_mut(2)[0] = 1;
        storage.reset_slot(2);
        assert_eq!(storage.bytes(2), &[7, 7, 7, 7]);
    }

    #[test]
    fn test_slots_are_aligned() {
        let mut storage = ByteStorage::new(&[0; 12]);
        storage.reserve_slots(3);
        for slot in 0..3 {
            assert_eq!(storage.bytes(slot).as_ptr() as usize % BLOCK_ALIGN, 0);
        }
    }
}
