use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const RESYNC_DEBOUNCE: Duration = Duration::from_millis(250);
pub const RESYNC_COOLDOWN: Duration = Duration::from_millis(1500);
/// Echo-suppression window opened around a user-initiated mutation.
pub const MUTATION_MUTE: Duration = Duration::from_millis(800);
/// Shorter tail kept after the muted refetch completes.
pub const MUTE_TAIL: Duration = Duration::from_millis(200);

struct Inner {
    timer: Option<JoinHandle<()>>,
    /// Single authoritative gate: no refetch fires before this instant.
    next_allowed_at: Instant,
    mute_until: Instant,
}

/// Coalesces ambiguous-event bursts into one debounced full refetch and
/// carries the mute window that keeps the engine from reacting to the
/// realtime echo of its own mutations.
pub struct ResyncScheduler {
    inner: Mutex<Inner>,
    tx: mpsc::Sender<()>,
}

impl ResyncScheduler {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(4);
        let now = Instant::now();
        (
            Arc::new(Self {
                inner: Mutex::new(Inner {
                    timer: None,
                    next_allowed_at: now,
                    mute_until: now,
                }),
                tx,
            }),
            rx,
        )
    }

    /// Ask for a refetch. Requests landing within the debounce window
    /// collapse into one; requests within the cooldown after a fired refetch
    /// are dropped.
    pub async fn request(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if Instant::now() < inner.next_allowed_at {
            return;
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        let scheduler = Arc::clone(self);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(RESYNC_DEBOUNCE).await;
            {
                let mut inner = scheduler.inner.lock().await;
                inner.next_allowed_at = Instant::now() + RESYNC_COOLDOWN;
                inner.timer = None;
            }
            let _ = scheduler.tx.send(()).await;
        }));
    }

    /// Replace the mute deadline. Called with [`MUTATION_MUTE`] before a
    /// user-initiated refetch and [`MUTE_TAIL`] once it lands.
    pub async fn mute_for(&self, window: Duration) {
        self.inner.lock().await.mute_until = Instant::now() + window;
    }

    pub async fn is_muted(&self) -> bool {
        self.inner.lock().await.mute_until > Instant::now()
    }

    pub async fn shutdown(&self) {
        if let Some(timer) = self.inner.lock().await.timer.take() {
            timer.abort();
        }
    }
}
