//! Bounded admission for inbound file uploads.
//!
//! Uploads never touch the audio peripheral. They are limited only by a fixed number of pool
//! slots, taken without waiting, and by the storage guard on every chunk.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::flash::{FlashError, FlashFile, FlashFs, FlashPath, StorageGuard};

pub const DEFAULT_UPLOAD_SLOTS: usize = 3;

#[derive(Debug, Clone)]
pub struct UploadPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<Mutex<HashSet<FlashPath>>>,
}

impl UploadPool {
    pub fn new(slots: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(slots)),
            capacity: slots,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Take a slot if one is free. Never waits.
    pub fn try_admit(&self) -> Option<UploadPermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| UploadPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim `path` as the target of one upload. `None` if another upload is writing it or
    /// `busy` reports it in use elsewhere. `busy` runs under the same lock as the claim, so a
    /// job admitted through [`UploadPool::admit_unclaimed`] cannot slip in between.
    pub fn reserve_unless(
        &self,
        path: &FlashPath,
        busy: impl FnOnce(&FlashPath) -> bool,
    ) -> Option<Reservation> {
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains(path) || busy(path) {
            return None;
        }
        in_flight.insert(path.clone());
        Some(Reservation {
            path: path.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run `admit` only while no upload holds `path`, keeping uploads out until it returns.
    pub fn admit_unclaimed<R>(&self, path: &FlashPath, admit: impl FnOnce() -> R) -> Option<R> {
        let in_flight = self.lock_in_flight();
        if in_flight.contains(path) {
            return None;
        }
        Some(admit())
    }

    pub fn is_uploading(&self, path: &FlashPath) -> bool {
        self.lock_in_flight().contains(path)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<FlashPath>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One pool slot. Returned to the pool when dropped, on every exit path.
#[derive(Debug)]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Exclusive claim on an upload target path.
#[derive(Debug)]
pub struct Reservation {
    path: FlashPath,
    in_flight: Arc<Mutex<HashSet<FlashPath>>>,
}

impl Reservation {
    pub fn path(&self) -> &FlashPath {
        &self.path
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
    }
}

/// A file being written by one upload. Holds its pool slot for its whole lifetime.
pub struct UploadStream {
    file: FlashFile,
    guard: StorageGuard,
    bytes_written: u64,
    _permit: UploadPermit,
    reservation: Reservation,
}

impl UploadStream {
    /// Create (or truncate) the target file.
    pub async fn begin(
        flash: &FlashFs,
        permit: UploadPermit,
        reservation: Reservation,
    ) -> Result<Self, FlashError> {
        let file = flash.create(reservation.path()).await?;
        tracing::info!(path = %reservation.path(), "upload started");
        Ok(Self {
            file,
            guard: StorageGuard::new(flash.clone()),
            bytes_written: 0,
            _permit: permit,
            reservation,
        })
    }

    pub fn path(&self) -> &FlashPath {
        self.reservation.path()
    }

    /// Append one chunk. Refused whole if it does not fit in the free space.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        self.guard.write(&mut self.file, chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<u64, FlashError> {
        self.file.flush().await?;
        tracing::info!(path = %self.path(), bytes = self.bytes_written, "upload complete");
        Ok(self.bytes_written)
    }

    /// Stop writing. The partial file stays on flash; the slot and the path are released.
    pub fn abort(self, reason: impl std::fmt::Display) -> u64 {
        tracing::warn!(
            path = %self.path(),
            bytes = self.bytes_written,
            error = %reason,
            "upload aborted"
        );
        self.bytes_written
    }
}
