//! Exclusive ownership of the audio peripheral.
//!
//! Two pieces cooperate:
//!
//! - the job slot, a `watch` channel holding the active [`JobInfo`] (or nothing). Admission fills
//!   it atomically, so "is a job active" is a single read and a second job is rejected instead of
//!   queued;
//! - the arbitration lock, held by the admitted job for its whole active lifetime. Acquisition has
//!   no timeout and only ever happens inside the job task.
//!
//! On release the lock is dropped before the slot is cleared, so a job admitted right after the
//! slot empties never waits on a stale holder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aurec_pcm::StreamParams;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

use crate::flash::FlashPath;
use crate::job::{JobError, JobInfo, JobKind, JobState};

#[derive(Debug, Clone)]
pub struct Arbiter {
    slot: Arc<watch::Sender<Option<JobInfo>>>,
    lock: Arc<Mutex<()>>,
    next_id: Arc<AtomicU64>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            lock: Arc::new(Mutex::new(())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn current(&self) -> Option<JobInfo> {
        self.slot.borrow().clone()
    }

    /// Whether the active job reads or writes `path`.
    pub fn holds_target(&self, path: &FlashPath) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|info| &info.target == path)
    }

    /// Claim the job slot. Never blocks.
    pub fn try_admit(
        &self,
        kind: JobKind,
        target: FlashPath,
        params: Option<StreamParams>,
    ) -> Result<JobTicket, JobError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let admitted = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(JobInfo {
                id,
                kind,
                state: JobState::Requested,
                target: target.clone(),
                params,
                bytes_transferred: 0,
            });
            true
        });

        if !admitted {
            tracing::debug!(kind = %kind, target = %target, "job rejected: slot occupied");
            return Err(JobError::ConcurrencyConflict);
        }

        Ok(JobTicket {
            id,
            slot: Arc::clone(&self.slot),
            lock: Arc::clone(&self.lock),
        })
    }

    /// Wait until no job is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.slot.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(Option::is_none).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<JobInfo>> {
        self.slot.subscribe()
    }
}

/// An occupied job slot. Dropping it empties the slot if the slot still names this job.
#[derive(Debug)]
pub struct JobTicket {
    id: u64,
    slot: Arc<watch::Sender<Option<JobInfo>>>,
    lock: Arc<Mutex<()>>,
}

impl JobTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the arbitration lock is ours.
    pub async fn acquire(self) -> PeripheralLease {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let lease = PeripheralLease {
            _guard: guard,
            ticket: self,
        };
        lease.set_state(JobState::Admitted);
        lease
    }

    pub fn update(&self, f: impl FnOnce(&mut JobInfo)) {
        self.slot.send_if_modified(|slot| match slot {
            Some(info) if info.id == self.id => {
                f(info);
                true
            }
            _ => false,
        });
    }

    pub fn set_state(&self, state: JobState) {
        tracing::debug!(job_id = self.id, ?state, "job state");
        self.update(|info| info.state = state);
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        let id = self.id;
        self.slot.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|info| info.id == id) {
                *slot = None;
                true
            } else {
                false
            }
        });
    }
}

/// Ownership of the peripheral for one job.
///
/// Fields drop in declaration order: the lock guard goes first, then the ticket clears the slot.
#[derive(Debug)]
pub struct PeripheralLease {
    _guard: OwnedMutexGuard<()>,
    ticket: JobTicket,
}

impl PeripheralLease {
    pub fn id(&self) -> u64 {
        self.ticket.id
    }

    pub fn set_state(&self, state: JobState) {
        self.ticket.set_state(state);
    }

    pub fn update(&self, f: impl FnOnce(&mut JobInfo)) {
        self.ticket.update(f);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.update(|info| info.bytes_transferred += bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::FlashFs;
    use std::time::Duration;

    fn path(raw: &str) -> FlashPath {
        FlashFs::new("unused", 0).resolve(raw).unwrap()
    }

    #[tokio::test]
    async fn second_admission_is_rejected() {
        let arbiter = Arbiter::new();
        assert!(!arbiter.is_busy());

        let ticket = arbiter
            .try_admit(JobKind::Recording, path("/r.wav"), None)
            .unwrap();
        assert!(arbiter.is_busy());
        assert!(arbiter.holds_target(&path("/r.wav")));
        assert!(!arbiter.holds_target(&path("/x.wav")));
        assert!(matches!(
            arbiter.try_admit(JobKind::Playback, path("/x.wav"), None),
            Err(JobError::ConcurrencyConflict)
        ));

        drop(ticket);
        assert!(!arbiter.is_busy());
        assert!(arbiter
            .try_admit(JobKind::Playback, path("/x.wav"), None)
            .is_ok());
    }

    #[tokio::test]
    async fn lease_publishes_progress_and_releases() {
        let arbiter = Arbiter::new();
        let ticket = arbiter
            .try_admit(JobKind::Recording, path("/r.wav"), None)
            .unwrap();
        let id = ticket.id();
        assert_eq!(arbiter.current().unwrap().state, JobState::Requested);

        let lease = ticket.acquire().await;
        assert_eq!(lease.id(), id);
        assert_eq!(arbiter.current().unwrap().state, JobState::Admitted);

        lease.set_state(JobState::Streaming);
        lease.add_bytes(100);
        lease.add_bytes(28);
        let info = arbiter.current().unwrap();
        assert_eq!(info.state, JobState::Streaming);
        assert_eq!(info.bytes_transferred, 128);

        drop(lease);
        assert!(arbiter.current().is_none());
        // The lock was released along with the slot.
        assert!(arbiter.lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn wait_idle_returns_when_slot_clears() {
        let arbiter = Arbiter::new();
        arbiter.wait_idle().await;

        let ticket = arbiter
            .try_admit(JobKind::Playback, path("/p.wav"), None)
            .unwrap();
        let waiter = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move { arbiter.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(ticket);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_admissions_yield_exactly_one_ticket() {
        let arbiter = Arbiter::new();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let arbiter = arbiter.clone();
            tasks.push(tokio::spawn(async move {
                arbiter
                    .try_admit(JobKind::Recording, path(&format!("/{i}.wav")), None)
                    .ok()
            }));
        }

        let mut tickets = Vec::new();
        for task in tasks {
            if let Some(ticket) = task.await.unwrap() {
                tickets.push(ticket);
            }
        }
        assert_eq!(tickets.len(), 1);
    }
}
