// dashboard/tracker.rs
//! Bookkeeping for the dashboard's outstanding requests: one cancellable
//! background poll slot, and any number of foreground requests.
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(u64),
    AlreadyRunning(u64),
}

struct BackgroundPoll {
    id: u64,
    handle: JoinHandle<()>,
    cancellable: bool,
    done: watch::Receiver<bool>,
}

/// Holds at most one running background poll.
#[derive(Clone, Default)]
pub struct BackgroundSlot {
    slot: Arc<Mutex<Option<BackgroundPoll>>>,
    next_id: Arc<AtomicU64>,
}

/// Handed to the poll task. Dropping it marks the poll as done.
pub struct PollTicket {
    id: u64,
    slot: Arc<Mutex<Option<BackgroundPoll>>>,
    done: watch::Sender<bool>,
}

impl PollTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ends the cancellable phase. Returns `false` if the poll no longer owns
    /// the slot, in which case its result must be thrown away.
    pub async fn commit(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(poll) if poll.id == self.id => {
                poll.cancellable = false;
                true
            }
            _ => false,
        }
    }
}

impl Drop for PollTicket {
    fn drop(&mut self) {
        let _ = self.done.send(true);
    }
}

impl BackgroundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `make(ticket)` unless a poll is still running.
    pub async fn start<F, Fut>(&self, make: F) -> StartOutcome
    where
        F: FnOnce(PollTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        if let Some(poll) = slot.as_ref() {
            if !poll.handle.is_finished() {
                return StartOutcome::AlreadyRunning(poll.id);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (done_tx, done) = watch::channel(false);
        let ticket = PollTicket {
            id,
            slot: Arc::clone(&self.slot),
            done: done_tx,
        };
        let handle = tokio::spawn(make(ticket));
        *slot = Some(BackgroundPoll {
            id,
            handle,
            cancellable: true,
            done,
        });
        debug!(poll = id, "Background poll started");
        StartOutcome::Started(id)
    }

    /// Aborts the running poll if it is still cancellable, and waits until
    /// its task has been torn down.
    pub async fn cancel(&self) -> bool {
        let mut done = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(poll) if poll.cancellable && !poll.handle.is_finished() => {
                    poll.handle.abort();
                    debug!(poll = poll.id, "Background poll cancelled");
                    let done = poll.done.clone();
                    *slot = None;
                    done
                }
                _ => return false,
            }
        };
        let _ = done.wait_for(|finished| *finished).await;
        true
    }

    pub async fn is_running(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|poll| !poll.handle.is_finished())
    }

    /// Waits until the current poll, if any, has finished or been dropped.
    pub async fn join(&self) {
        let done = self.slot.lock().await.as_ref().map(|poll| poll.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

/// Unordered set of in-flight foreground requests.
#[derive(Clone)]
pub struct ForegroundSet {
    inflight: Arc<DashMap<Uuid, &'static str>>,
    count: Arc<watch::Sender<usize>>,
}

/// Removes its request from the set when dropped.
pub struct ForegroundGuard {
    id: Uuid,
    set: ForegroundSet,
}

impl ForegroundSet {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inflight: Arc::new(DashMap::new()),
            count: Arc::new(count),
        }
    }

    pub fn begin(&self, label: &'static str) -> ForegroundGuard {
        let id = Uuid::new_v4();
        self.inflight.insert(id, label);
        self.count.send_modify(|n| *n += 1);
        ForegroundGuard {
            id,
            set: self.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        *self.count.borrow()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.inflight.iter().map(|entry| *entry.value()).collect()
    }

    pub async fn wait_idle(&self) {
        let mut count = self.count.subscribe();
        let _ = count.wait_for(|n| *n == 0).await;
    }
}

impl Default for ForegroundSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if self.set.inflight.remove(&self.id).is_some() {
            self.set.count.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn second_start_joins_running_poll() {
        let slot = BackgroundSlot::new();
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let start = |slot: BackgroundSlot| {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            async move {
                slot.start(move |_ticket| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                })
                .await
            }
        };

        let first = start(slot.clone()).await;
        let second = start(slot.clone()).await;
        assert_eq!(first, StartOutcome::Started(1));
        assert_eq!(second, StartOutcome::AlreadyRunning(1));

        gate.notify_one();
        slot.join().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(start(slot.clone()).await, StartOutcome::Started(2)));
    }

    #[tokio::test]
    async fn cancel_aborts_only_while_cancellable() {
        let slot = BackgroundSlot::new();
        slot.start(|_ticket| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await;
        assert!(slot.is_running().await);
        assert!(slot.cancel().await);
        assert!(!slot.is_running().await);
        assert!(!slot.cancel().await);

        let committed = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        slot.start({
            let committed = Arc::clone(&committed);
            let release = Arc::clone(&release);
            move |ticket| async move {
                assert!(ticket.commit().await);
                committed.notify_one();
                release.notified().await;
            }
        })
        .await;
        committed.notified().await;
        assert!(!slot.cancel().await);
        assert!(slot.is_running().await);
        release.notify_one();
        slot.join().await;
    }

    #[tokio::test]
    async fn foreground_guards_count_and_release() {
        let set = ForegroundSet::new();
        let a = set.begin("setstate");
        let b = set.begin("setmode");
        assert_eq!(set.pending(), 2);
        let mut labels = set.labels();
        labels.sort_unstable();
        assert_eq!(labels, vec!["setmode", "setstate"]);

        drop(a);
        assert_eq!(set.pending(), 1);
        let waiting = tokio::spawn({
            let set = set.clone();
            async move { set.wait_idle().await }
        });
        drop(b);
        waiting.await.unwrap();
        assert_eq!(set.pending(), 0);
    }
}
