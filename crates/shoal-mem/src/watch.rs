//! Watcher subscriptions for the in-memory backend.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::Sender;

use shoal_error::{ErrorKind, Result};
use shoal_vfs::{Event, Watcher};

use crate::Shared;

/// A watcher registration held in the filesystem's per-inode table.
pub(crate) struct WatchEntry {
    /// The path string the watcher subscribed with; event paths are built
    /// by joining the entry name onto it.
    pub(crate) path: String,
    pub(crate) sender: Sender<Event>,
}

/// A subscription bound to one event channel.
///
/// Closing removes every registration the watcher created and drops its
/// side of the channel; once the registrations are gone the channel
/// disconnects.
pub struct MemWatcher {
    shared: Arc<Shared>,
    id: u64,
    paths: HashSet<String>,
    sender: Option<Sender<Event>>,
}

impl MemWatcher {
    pub(crate) fn new(shared: Arc<Shared>, id: u64, sender: Sender<Event>) -> Self {
        Self {
            shared,
            id,
            paths: HashSet::new(),
            sender: Some(sender),
        }
    }

    fn unregister(&self, path: &str) -> Result<()> {
        let inode = self.shared.resolve(path)?;
        let mut state = self.shared.state.lock();
        if let Some(entries) = state.watchers.get_mut(&inode.num()) {
            entries.remove(&self.id);
        }
        Ok(())
    }
}

impl Watcher for MemWatcher {
    fn watch(&mut self, path: &str) -> Result<()> {
        let Some(sender) = self.sender.clone() else {
            return Err(ErrorKind::Closed.into());
        };
        let inode = self.shared.resolve(path)?;
        let mut state = self.shared.state.lock();
        state.watchers.entry(inode.num()).or_default().insert(
            self.id,
            WatchEntry {
                path: path.to_owned(),
                sender,
            },
        );
        drop(state);
        self.paths.insert(path.to_owned());
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.paths.remove(path);
        self.unregister(path)
    }

    fn close(&mut self) -> Result<()> {
        self.paths.clear();
        // Sweep the whole table rather than re-resolving recorded paths: a
        // watched directory may have been removed since it was subscribed,
        // and its registration must still be dropped for the channel to
        // disconnect.
        let mut state = self.shared.state.lock();
        for entries in state.watchers.values_mut() {
            entries.remove(&self.id);
        }
        drop(state);
        self.sender = None;
        Ok(())
    }
}
