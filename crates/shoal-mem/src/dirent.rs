//! Directory entry wire format.
//!
//! A directory's payload is a concatenation of entries with no padding or
//! terminator, each serialized big-endian as:
//!
//! ```text
//! 8 bytes  inode number
//! 8 bytes  name length N
//! N bytes  UTF-8 name
//! ```

/// Serialized size of the fixed entry header.
pub(crate) const HEADER_LEN: usize = 16;

/// One directory entry: an inode number paired with a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dirent {
    pub(crate) inode: u64,
    pub(crate) name: String,
}

impl Dirent {
    /// The number of bytes this entry occupies in the directory payload.
    pub(crate) fn encoded_len(&self) -> u64 {
        (HEADER_LEN + self.name.len()) as u64
    }

    /// Serialize the entry.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut buf = Vec::with_capacity(HEADER_LEN + name.len());
        buf.extend_from_slice(&self.inode.to_be_bytes());
        buf.extend_from_slice(&(name.len() as u64).to_be_bytes());
        buf.extend_from_slice(name);
        buf
    }

    /// Split a serialized header into `(inode, name_length)`.
    pub(crate) fn decode_header(header: &[u8; HEADER_LEN]) -> (u64, u64) {
        let mut inode = [0u8; 8];
        let mut len = [0u8; 8];
        inode.copy_from_slice(&header[..8]);
        len.copy_from_slice(&header[8..]);
        (u64::from_be_bytes(inode), u64::from_be_bytes(len))
    }
}
