//! Regular-file handles over an inode.

use std::io::SeekFrom;
use std::sync::Arc;

use parking_lot::Mutex;

use shoal_error::{ErrorKind, Result};
use shoal_vfs::{EventKind, File, Metadata, OpenFlag, path};

use crate::Shared;
use crate::block::BLOCK_SIZE;
use crate::inode::Inode;

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Per-open state for one inode: a byte offset, the access mode recorded at
/// open time, and a closed bit. Closing twice reports the handle already
/// closed; every other operation on a closed handle is rejected the same
/// way.
pub(crate) struct MemFile {
    shared: Arc<Shared>,
    inode: Arc<Inode>,
    name: String,
    handle: Mutex<HandleState>,
}

#[derive(Default)]
struct HandleState {
    offset: u64,
    read_only: bool,
    write_only: bool,
    closed: bool,
}

impl MemFile {
    pub(crate) fn new(shared: Arc<Shared>, inode: Arc<Inode>, name: String) -> Self {
        Self {
            shared,
            inode,
            name,
            handle: Mutex::new(HandleState::default()),
        }
    }

    /// An internal cursor over an inode, used for directory payload
    /// traversal. Carries no name and no access restrictions.
    pub(crate) fn cursor(shared: Arc<Shared>, inode: Arc<Inode>, offset: u64) -> Self {
        let file = Self::new(shared, inode, String::new());
        file.handle.lock().offset = offset;
        file
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub(crate) fn file_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn offset(&self) -> u64 {
        self.handle.lock().offset
    }

    /// Record the access mode and apply the open-time side effects
    /// (truncate, seek-to-end). Directories reject every writing flag.
    pub(crate) fn apply_flags(&self, flag: OpenFlag) -> Result<()> {
        if self.inode.is_dir() {
            if flag.has(OpenFlag::WRONLY)
                || flag.has(OpenFlag::RDWR)
                || flag.has(OpenFlag::APPEND)
                || flag.has(OpenFlag::CREATE)
                || flag.has(OpenFlag::TRUNC)
            {
                return Err(ErrorKind::IsDir.into());
            }
            return Ok(());
        }

        {
            let mut handle = self.handle.lock();
            if flag.has(OpenFlag::RDONLY) {
                handle.read_only = true;
            } else if flag.has(OpenFlag::WRONLY) {
                handle.write_only = true;
            }
        }
        if flag.has(OpenFlag::TRUNC) {
            self.inode.trunc(0);
        }
        if flag.has(OpenFlag::APPEND) {
            self.seek(SeekFrom::End(0))?;
        }
        Ok(())
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut handle = self.handle.lock();
        if handle.closed {
            return Err(ErrorKind::Closed.into());
        }
        if handle.write_only {
            return Err(ErrorKind::WriteOnly.into());
        }
        let mut filled = 0;
        while filled < buf.len() {
            let ordinal = handle.offset / BLOCK_SIZE_U64;
            let within = handle.offset % BLOCK_SIZE_U64;
            let copied = self.inode.read_block(ordinal, within, &mut buf[filled..]);
            if copied == 0 {
                break;
            }
            filled += copied;
            handle.offset += copied as u64;
        }
        Ok(filled)
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut handle = self.handle.lock();
        if handle.closed {
            return Err(ErrorKind::Closed.into());
        }
        if handle.read_only {
            return Err(ErrorKind::ReadOnly.into());
        }
        let mut written = 0;
        while written < buf.len() {
            let ordinal = handle.offset / BLOCK_SIZE_U64;
            let within = handle.offset % BLOCK_SIZE_U64;
            let copied = self.inode.write_block(ordinal, within, &buf[written..]);
            if copied == 0 {
                break;
            }
            written += copied;
            handle.offset += copied as u64;
        }
        if !self.inode.is_dir() {
            self.shared.notify(
                EventKind::MODIFY,
                self.inode.parent(),
                path::base(&self.name),
            );
        }
        Ok(written)
    }

    pub(crate) fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut handle = self.handle.lock();
        if handle.closed {
            return Err(ErrorKind::Closed.into());
        }
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(handle.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.inode.size()) + i128::from(delta),
        };
        if target < 0 {
            return Err(ErrorKind::InvalidSeek.into());
        }
        handle.offset = target as u64;
        Ok(handle.offset)
    }

    /// Shrink the file. Growing through truncation is rejected with
    /// `InvalidSize`.
    pub(crate) fn truncate(&self, size: u64) -> Result<()> {
        let handle = self.handle.lock();
        if handle.closed {
            return Err(ErrorKind::Closed.into());
        }
        if handle.read_only {
            return Err(ErrorKind::ReadOnly.into());
        }
        if size > self.inode.size() {
            return Err(ErrorKind::InvalidSize.into());
        }
        self.inode.trunc(size);
        Ok(())
    }

    pub(crate) fn close(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.closed {
            return Err(ErrorKind::Closed.into());
        }
        handle.closed = true;
        Ok(())
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Self::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Self::write(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Self::seek(self, pos)
    }

    fn readdir(&mut self, _n: isize) -> Result<Vec<Metadata>> {
        Err(ErrorKind::NotDir.into())
    }

    fn readdir_names(&mut self, _n: isize) -> Result<Vec<String>> {
        Err(ErrorKind::NotDir.into())
    }

    fn close(&mut self) -> Result<()> {
        Self::close(self)
    }
}
