use super::StoreState;
use crate::error::StorageError;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// Changes arriving within this window share one rewrite of `state.json`.
pub const PERSIST_DELAY: Duration = Duration::from_millis(250);

/// Debounced writer for the store metadata file.
///
/// Mutations only mark the state dirty. A background task coalesces them and
/// writes a snapshot from a blocking thread, so neither the store lock nor a
/// runtime worker is held during file I/O. Without a runtime the write
/// happens inline.
pub struct StateFile {
    path: PathBuf,
    dirty: AtomicBool,
    wake: Notify,
    // serializes writers so an older snapshot never lands after a newer one
    writing: Mutex<()>,
    background: AtomicBool,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            path,
            dirty: AtomicBool::new(false),
            wake: Notify::new(),
            writing: Mutex::new(()),
            background: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts the background writer on the current runtime, if there is one.
    /// It exits once `state` is dropped.
    pub fn start(self: &Arc<Self>, state: &Arc<Mutex<StoreState>>) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime, {} is written synchronously", self.path.display());
            return;
        };
        self.background.store(true, Ordering::SeqCst);
        runtime.spawn(run_writer(self.clone(), Arc::downgrade(state)));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self, state: &Mutex<StoreState>) {
        self.dirty.store(true, Ordering::SeqCst);
        if self.background.load(Ordering::SeqCst) {
            self.wake.notify_one();
        } else if let Err(e) = self.write_if_dirty(state) {
            warn!("Failed to persist store state: {}", e);
        }
    }

    /// Writes a snapshot if anything changed since the last successful write.
    /// A failed write leaves the state dirty for the next attempt.
    pub fn write_if_dirty(&self, state: &Mutex<StoreState>) -> Result<(), StorageError> {
        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot = state.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(StorageError::from)
            .and_then(|bytes| self.replace(&bytes));
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    fn replace(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Unblocks the background writer so it can notice the store is gone.
    pub fn shutdown(&self) {
        self.wake.notify_one();
    }
}

async fn run_writer(file: Arc<StateFile>, state: Weak<Mutex<StoreState>>) {
    loop {
        file.wake.notified().await;
        tokio::time::sleep(PERSIST_DELAY).await;
        let Some(state) = state.upgrade() else {
            break;
        };
        let writer = file.clone();
        let written = tokio::task::spawn_blocking(move || writer.write_if_dirty(&state)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist {}: {}", file.path.display(), e),
            Err(e) => warn!("State writer task failed: {}", e),
        }
    }
    debug!("State writer for {} stopped", file.path.display());
}
