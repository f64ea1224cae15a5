//! Fixed-size block storage with free-list reuse.

use std::collections::VecDeque;

use tracing::trace;

/// Size of every data block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// The table of data blocks backing every file in the filesystem.
///
/// Freed block indices are recycled in FIFO order before the table grows.
/// Indexing a block that was never allocated is a programmer error and
/// panics.
#[derive(Default)]
pub(crate) struct BlockStore {
    blocks: Vec<Box<[u8; BLOCK_SIZE]>>,
    free: VecDeque<usize>,
}

impl BlockStore {
    /// Allocate a block and return its index, reusing the earliest freed
    /// block if any.
    pub(crate) fn alloc(&mut self) -> usize {
        if let Some(index) = self.free.pop_front() {
            return index;
        }
        self.blocks.push(Box::new([0u8; BLOCK_SIZE]));
        let index = self.blocks.len() - 1;
        trace!(target: "shoal::mem", index, "block table grown");
        index
    }

    /// Return block indices to the free list.
    ///
    /// Callers guarantee no index is freed twice or freed while still
    /// referenced by an inode.
    pub(crate) fn free(&mut self, indices: impl IntoIterator<Item = usize>) {
        self.free.extend(indices);
    }

    /// Copy bytes out of a block into `dst`, starting at `offset` and
    /// stopping at `limit`. Returns the number of bytes copied.
    pub(crate) fn read(&self, index: usize, offset: usize, limit: usize, dst: &mut [u8]) -> usize {
        let available = &self.blocks[index][offset..limit];
        let n = dst.len().min(available.len());
        dst[..n].copy_from_slice(&available[..n]);
        n
    }

    /// Copy bytes from `src` into a block starting at `offset`, up to the
    /// end of the block. Returns the number of bytes copied.
    pub(crate) fn write(&mut self, index: usize, offset: usize, src: &[u8]) -> usize {
        let n = (BLOCK_SIZE - offset).min(src.len());
        self.blocks[index][offset..offset + n].copy_from_slice(&src[..n]);
        n
    }

    /// Drop every block and the free list.
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.free.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub(crate) fn free_list(&self) -> impl Iterator<Item = usize> + '_ {
        self.free.iter().copied()
    }
}
