//! Inode records and block-addressed inode I/O.

use std::sync::Weak;
use std::time::SystemTime;

use parking_lot::Mutex;

use shoal_vfs::{Metadata, Mode};

use crate::Shared;
use crate::block::BLOCK_SIZE;

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// A filesystem object: regular file, directory, or symbolic link.
///
/// The attribute set is guarded by a per-inode lock; block data lives in the
/// shared block store and is reached through the filesystem-level lock, which
/// is always acquired after the inode lock.
pub(crate) struct Inode {
    num: usize,
    shared: Weak<Shared>,
    attrs: Mutex<Attrs>,
}

struct Attrs {
    parent: usize,
    size: u64,
    mode: Mode,
    modified: SystemTime,
    link: String,
    blocks: Vec<usize>,
}

impl Default for Attrs {
    fn default() -> Self {
        Self {
            parent: 0,
            size: 0,
            mode: Mode::default(),
            modified: SystemTime::UNIX_EPOCH,
            link: String::new(),
            blocks: Vec::new(),
        }
    }
}

impl Inode {
    pub(crate) fn new(num: usize, shared: Weak<Shared>) -> Self {
        Self {
            num,
            shared,
            attrs: Mutex::new(Attrs::default()),
        }
    }

    pub(crate) fn num(&self) -> usize {
        self.num
    }

    /// Prepare a fresh or recycled inode for use.
    pub(crate) fn init(&self, mode: Mode, parent: usize) {
        let mut attrs = self.attrs.lock();
        attrs.mode = mode;
        attrs.parent = parent;
    }

    pub(crate) fn touch(&self) {
        self.attrs.lock().modified = SystemTime::now();
    }

    pub(crate) fn size(&self) -> u64 {
        self.attrs.lock().size
    }

    pub(crate) fn mode(&self) -> Mode {
        self.attrs.lock().mode
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.attrs.lock().mode = mode;
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.mode().is_dir()
    }

    pub(crate) fn parent(&self) -> usize {
        self.attrs.lock().parent
    }

    pub(crate) fn set_parent(&self, parent: usize) {
        self.attrs.lock().parent = parent;
    }

    pub(crate) fn link(&self) -> String {
        self.attrs.lock().link.clone()
    }

    pub(crate) fn set_link(&self, target: &str) {
        self.attrs.lock().link = target.to_owned();
    }

    /// A metadata snapshot carrying `name` as the base name.
    pub(crate) fn metadata(&self, name: &str) -> Metadata {
        let attrs = self.attrs.lock();
        Metadata::new(name, attrs.size, attrs.mode, attrs.modified)
    }

    /// Shrink the inode to `size` bytes, freeing any blocks past the new
    /// end. Growing is done by writes, never by truncation.
    pub(crate) fn trunc(&self, size: u64) {
        let mut attrs = self.attrs.lock();
        let required = size.div_ceil(BLOCK_SIZE_U64) as usize;
        let freed = if required < attrs.blocks.len() {
            attrs.blocks.split_off(required)
        } else {
            Vec::new()
        };
        attrs.size = size;
        if !freed.is_empty() {
            if let Some(shared) = self.shared.upgrade() {
                shared.state.lock().blocks.free(freed);
            }
        }
    }

    /// Copy file content into `dst` starting at byte
    /// `ordinal * BLOCK_SIZE + offset`, stopping at the end of that block or
    /// the end of the file. Returns 0 at end of file.
    pub(crate) fn read_block(&self, ordinal: u64, offset: u64, dst: &mut [u8]) -> usize {
        let attrs = self.attrs.lock();
        if ordinal * BLOCK_SIZE_U64 + offset >= attrs.size {
            return 0;
        }
        let limit = (attrs.size - ordinal * BLOCK_SIZE_U64).min(BLOCK_SIZE_U64);
        let Some(shared) = self.shared.upgrade() else {
            return 0;
        };
        let state = shared.state.lock();
        state.blocks.read(
            attrs.blocks[ordinal as usize],
            offset as usize,
            limit as usize,
            dst,
        )
    }

    /// Copy bytes from `src` into the block at `ordinal` starting at
    /// `offset`, allocating blocks as needed, and grow the size by the
    /// number of bytes landed.
    pub(crate) fn write_block(&self, ordinal: u64, offset: u64, src: &[u8]) -> usize {
        let mut attrs = self.attrs.lock();
        let Some(shared) = self.shared.upgrade() else {
            return 0;
        };
        let mut state = shared.state.lock();
        while attrs.size >= BLOCK_SIZE_U64 * attrs.blocks.len() as u64
            || attrs.blocks.len() <= ordinal as usize
        {
            let index = state.blocks.alloc();
            attrs.blocks.push(index);
        }
        let copied = state.blocks.write(attrs.blocks[ordinal as usize], offset as usize, src);
        attrs.size += copied as u64;
        copied
    }

    /// Zero every attribute and hand back the block indices the inode
    /// held. Used when the inode is freed.
    pub(crate) fn reset(&self) -> Vec<usize> {
        let mut attrs = self.attrs.lock();
        let freed = std::mem::take(&mut attrs.blocks);
        *attrs = Attrs::default();
        freed
    }

    #[cfg(test)]
    pub(crate) fn block_count(&self) -> usize {
        self.attrs.lock().blocks.len()
    }
}
