//! Directory handles: entry iteration, lookup, link and unlink.
//!
//! A directory is a file whose payload is a sequence of serialized entries;
//! the handle provides an I/O cursor into that payload. File I/O through
//! the public trait is rejected, directory listing works.

use std::io::SeekFrom;
use std::sync::Arc;

use shoal_error::{ErrorKind, Result};
use shoal_vfs::{EventKind, File, Metadata};

use crate::Shared;
use crate::dirent::{Dirent, HEADER_LEN};
use crate::file::MemFile;
use crate::inode::Inode;

pub(crate) struct MemDir {
    file: MemFile,
}

impl MemDir {
    pub(crate) fn new(file: MemFile) -> Self {
        Self { file }
    }

    /// An internal cursor over a directory inode, starting at the first
    /// entry.
    pub(crate) fn over(shared: Arc<Shared>, inode: Arc<Inode>) -> Self {
        Self {
            file: MemFile::cursor(shared, inode, 0),
        }
    }

    /// Decode the entry under the cursor and advance past it. Returns
    /// `None` once the payload is exhausted.
    pub(crate) fn next(&mut self) -> Result<Option<Dirent>> {
        let mut header = [0u8; HEADER_LEN];
        let n = self.file.read(&mut header)?;
        if n < HEADER_LEN {
            return Ok(None);
        }
        let (inode, name_len) = Dirent::decode_header(&header);
        let Ok(name_len) = usize::try_from(name_len) else {
            return Ok(None);
        };
        let mut name = vec![0u8; name_len];
        let n = self.file.read(&mut name)?;
        if n < name_len {
            return Ok(None);
        }
        Ok(Some(Dirent {
            inode,
            name: String::from_utf8_lossy(&name).into_owned(),
        }))
    }

    /// Scan forward from the cursor for the first entry named `name`,
    /// leaving the cursor just past it.
    fn find_entry(&mut self, name: &str) -> Result<Option<Dirent>> {
        while let Some(ent) = self.next()? {
            if ent.name == name {
                return Ok(Some(ent));
            }
        }
        Ok(None)
    }

    /// The inode number linked under `name`.
    pub(crate) fn find(&mut self, name: &str) -> Result<Option<u64>> {
        Ok(self.find_entry(name)?.map(|ent| ent.inode))
    }

    /// Append an entry at the end of the payload, restoring the prior
    /// cursor position afterwards. Emits a create event.
    pub(crate) fn append(&mut self, inode: u64, name: &str) -> Result<()> {
        let prior = self.file.offset();
        self.file.seek(SeekFrom::End(0))?;
        let ent = Dirent {
            inode,
            name: name.to_owned(),
        };
        self.write_all(&ent.encode())?;
        self.file.seek(SeekFrom::Start(prior))?;
        self.file
            .shared()
            .notify(EventKind::CREATE, self.file.inode().num(), name);
        Ok(())
    }

    /// Drop the entry named `name` by sliding the remaining payload over it
    /// and truncating. Emits no event; remove and rename emit their own.
    pub(crate) fn unlink(&mut self, name: &str) -> Result<Dirent> {
        let Some(ent) = self.find_entry(name)? else {
            return Err(ErrorKind::NotExist.into());
        };
        let tail_start = self.file.offset();
        let entry_start = tail_start - ent.encoded_len();
        let size = self.file.inode().size();

        let mut tail = vec![0u8; (size - tail_start) as usize];
        let reader = MemFile::cursor(
            Arc::clone(self.file.shared()),
            Arc::clone(self.file.inode()),
            tail_start,
        );
        let mut filled = 0;
        while filled < tail.len() {
            let n = reader.read(&mut tail[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        self.file.seek(SeekFrom::Start(entry_start))?;
        self.write_all(&tail[..filled])?;
        self.file.truncate(size - ent.encoded_len())?;
        Ok(ent)
    }

    /// Unlink `name` and emit a remove event.
    pub(crate) fn remove(&mut self, name: &str) -> Result<Dirent> {
        let ent = self.unlink(name)?;
        self.file
            .shared()
            .notify(EventKind::REMOVE, self.file.inode().num(), name);
        Ok(ent)
    }

    /// Rename an entry in place: unlink `old`, append its inode under
    /// `new`. Emits a create event for the new name followed by a rename
    /// event carrying the old one.
    pub(crate) fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let ent = self.unlink(old)?;
        self.append(ent.inode, new)?;
        self.file
            .shared()
            .notify(EventKind::RENAME, self.file.inode().num(), old);
        Ok(())
    }

    pub(crate) fn readdir(&mut self, n: isize) -> Result<Vec<Metadata>> {
        let mut entries = Vec::new();
        while n <= 0 || entries.len() < n as usize {
            match self.next()? {
                Some(ent) => {
                    let inode = self.file.shared().inode(ent.inode as usize)?;
                    entries.push(inode.metadata(&ent.name));
                }
                None => break,
            }
        }
        Ok(entries)
    }

    pub(crate) fn readdir_names(&mut self, n: isize) -> Result<Vec<String>> {
        let mut names = Vec::new();
        while n <= 0 || names.len() < n as usize {
            match self.next()? {
                Some(ent) => names.push(ent.name),
                None => break,
            }
        }
        Ok(names)
    }

    fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.file.write(buf)?;
            if n == 0 {
                return Err(ErrorKind::ShortWrite.into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl File for MemDir {
    fn name(&self) -> &str {
        self.file.file_name()
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(ErrorKind::IsDir.into())
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(ErrorKind::IsDir.into())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ErrorKind::IsDir.into())
    }

    fn readdir(&mut self, n: isize) -> Result<Vec<Metadata>> {
        Self::readdir(self, n)
    }

    fn readdir_names(&mut self, n: isize) -> Result<Vec<String>> {
        Self::readdir_names(self, n)
    }

    fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}
