//! Admission control for task execution.
//!
//! Tasks for the same session run one at a time, in dispatch order. Tasks for
//! different sessions run concurrently, up to a global limit. Both rules
//! exist because every task drives the same screen.
//!
//! A place in a session's line is taken synchronously with [`SessionGate::ticket`]
//! while the router is still handling the frame, so arrival order is fixed
//! before any task is spawned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

type Lanes = Arc<Mutex<HashMap<String, (u64, oneshot::Receiver<()>)>>>;

#[derive(Debug, Clone)]
pub struct SessionGate {
    /// Per session: the id of the last place in line and the signal it
    /// fires on release.
    lanes: Lanes,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    slots: Arc<Semaphore>,
}

impl SessionGate {
    /// `max_concurrent` of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Reserves the next place in `session_id`'s line.
    pub fn ticket(&self, session_id: &str) -> Ticket {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (release, released) = oneshot::channel();

        let ahead = lock(&self.lanes)
            .insert(session_id.to_string(), (id, released))
            .map(|(_, rx)| rx);

        Ticket {
            place: Some(Place {
                lanes: Arc::clone(&self.lanes),
                session_id: session_id.to_string(),
                id,
                _release: release,
            }),
            ahead,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Sessions with a task running or queued.
    pub fn active_sessions(&self) -> usize {
        lock(&self.lanes).len()
    }
}

fn lock(lanes: &Lanes) -> MutexGuard<'_, HashMap<String, (u64, oneshot::Receiver<()>)>> {
    lanes.lock().unwrap_or_else(|poisoned| {
        tracing::error!("session gate lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// A reserved place in a session's line.
#[derive(Debug)]
pub struct Ticket {
    place: Option<Place>,
    ahead: Option<oneshot::Receiver<()>>,
    slots: Arc<Semaphore>,
}

impl Ticket {
    /// Waits for the previous task of the session to finish, then for a
    /// global slot.
    pub async fn enter(mut self) -> GatePass {
        if let Some(ahead) = self.ahead.as_mut() {
            // Resolves with an error once the sender is dropped, which is the signal.
            let _ = ahead.await;
        }
        self.ahead = None;
        // The semaphore is never closed.
        let slot = Arc::clone(&self.slots).acquire_owned().await.ok();
        GatePass {
            _place: self.place.take(),
            _slot: slot,
        }
    }
}

impl Drop for Ticket {
    /// An abandoned place still waits for the task ahead of it before
    /// letting the next one in.
    fn drop(&mut self) {
        let (Some(ahead), Some(place)) = (self.ahead.take(), self.place.take()) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = ahead.await;
                drop(place);
            });
        }
    }
}

/// Held while a task runs. Dropping it lets the session's next task in.
#[derive(Debug)]
pub struct GatePass {
    _place: Option<Place>,
    _slot: Option<OwnedSemaphorePermit>,
}

#[derive(Debug)]
struct Place {
    lanes: Lanes,
    session_id: String,
    id: u64,
    _release: oneshot::Sender<()>,
}

impl Drop for Place {
    fn drop(&mut self) {
        let mut lanes = lock(&self.lanes);
        // Only the last place in line owns the map entry.
        if lanes.get(&self.session_id).map(|(id, _)| *id) == Some(self.id) {
            lanes.remove(&self.session_id);
        }
    }
}
