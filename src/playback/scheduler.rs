use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Instant};
use crate::localization::replies::{Replies, Reply};
use crate::playback::driver::{PlaybackHandle, Transport};
use crate::playback::queue::RequestQueue;
use crate::playback::session::{PlaybackSession, PlaybackStatus};
use crate::playback::{QueueError, ReplyTo, Request, TransportError};
use crate::supervisor::guard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Connecting,
    Starting,
    Playing,
    Paused,
    Finished,
    Stopped,
}

impl Display for SchedulerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Connecting => "connecting",
            SchedulerState::Starting => "starting",
            SchedulerState::Playing => "playing",
            SchedulerState::Paused => "paused",
            SchedulerState::Finished => "finished",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    pub leave_when_idle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            connect_attempts: 3,
            leave_when_idle: false,
        }
    }
}

/// Snapshot of the item on air, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub requester: String,
    pub status: PlaybackStatus,
    pub elapsed: Duration,
    pub duration: Option<Duration>,
}

struct ActiveSession {
    session: PlaybackSession,
    handle: Box<dyn PlaybackHandle>,
    clip_length: Option<Duration>,
}

struct Shared {
    queue: RequestQueue,
    current: Mutex<Option<ActiveSession>>,
    transport: Arc<dyn Transport>,
    replies: Arc<Replies>,
    /// Request waiting for voice to come back; retried on the next pass.
    held: StdMutex<Option<Pending>>,
    /// Bumped by every clear so retries of older requests are dropped.
    generation: AtomicU64,
    shutdown: AtomicBool,
    state: watch::Sender<SchedulerState>,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Scheduler {} -> {}", previous, state);
        }
    }

    fn held(&self) -> MutexGuard<'_, Option<Pending>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Keeps `pending` for another attempt unless a clear happened since it was taken.
    fn hold(&self, pending: Pending) {
        let mut held = self.held();
        if pending.generation != self.generation() {
            tracing::debug!("Not retrying {}: cleared while connecting", pending.request.url);
            return;
        }
        *held = Some(pending);
    }

    async fn reply(&self, reply_to: ReplyTo, reply: Reply<'_>) {
        let text = self.replies.text(reply);
        if let Err(err) = self.transport.send_reply(reply_to, &text).await {
            tracing::warn!("Failed to reply to {}: {}", reply_to, err);
        }
    }
}

/// A request the scheduler holds on to while voice is unavailable.
struct Pending {
    request: Request,
    failed_connects: u32,
    generation: u64,
}

/// The long-lived playback loop. Owns the single session slot; everything
/// else talks to it through a [`SchedulerHandle`].
pub struct Scheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        replies: Arc<Replies>,
        capacity: usize,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (state, _) = watch::channel(SchedulerState::Idle);

        let shared = Arc::new(Shared {
            queue: RequestQueue::new(capacity),
            current: Mutex::new(None),
            transport,
            replies,
            held: StdMutex::new(None),
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            state,
        });

        let scheduler = Self {
            shared: shared.clone(),
            config,
        };

        (scheduler, SchedulerHandle { shared })
    }

    pub async fn run(self) {
        tracing::info!("Scheduler started");

        loop {
            let pending = if self.shared.held().is_some() {
                sleep(self.config.poll_interval).await;
                if self.is_shutting_down() {
                    break;
                }
                // a clear during the wait leaves nothing to retry
                let held = self.shared.held().take();
                match held {
                    Some(pending) => pending,
                    None => continue,
                }
            } else {
                match self.next_request().await {
                    Some(pending) => pending,
                    None => break,
                }
            };

            match guard("scheduler iteration", self.play(pending)).await {
                Ok(Some(retry)) => self.shared.hold(retry),
                Ok(None) => {}
                Err(failure) => {
                    tracing::error!("Scheduler iteration failed: {}", failure);
                    self.discard_session().await;
                    self.shared.set_state(SchedulerState::Idle);
                }
            }
        }

        self.discard_session().await;
        self.shared.set_state(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");
    }

    fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Polls the queue until a request shows up. `None` once shutdown is requested.
    async fn next_request(&self) -> Option<Pending> {
        loop {
            if self.is_shutting_down() {
                return None;
            }

            let generation = self.shared.generation();
            if let Some(request) = self.shared.queue.try_dequeue() {
                return Some(Pending { request, failed_connects: 0, generation });
            }

            sleep(self.config.poll_interval).await;
        }
    }

    /// One pass through connect, resolve, play and wait. Returns the request
    /// again when it should be retried on the next pass.
    async fn play(&self, pending: Pending) -> anyhow::Result<Option<Pending>> {
        let Pending { request, failed_connects, generation } = pending;

        self.shared.set_state(SchedulerState::Connecting);
        if let Err(err) = self.connect().await {
            let failed_connects = failed_connects + 1;
            self.shared.set_state(SchedulerState::Idle);

            // requesters only hear about voice trouble when they enqueue
            if failed_connects >= self.config.connect_attempts {
                tracing::error!(
                    "Dropping {} from {} after {} connection attempts: {}",
                    request.url, request.requester, failed_connects, err
                );
                return Ok(None);
            }

            tracing::warn!("Voice connection failed (attempt {}): {}", failed_connects, err);
            return Ok(Some(Pending { request, failed_connects, generation }));
        }

        self.shared.set_state(SchedulerState::Starting);
        let media = match self.shared.transport.resolve(&request.url).await {
            Ok(media) => media,
            Err(err) => {
                tracing::warn!("Discarding request from {}: {}", request.requester, err);
                self.shared.reply(request.reply_to, Reply::Unresolvable).await;
                self.shared.set_state(SchedulerState::Idle);
                return Ok(None);
            }
        };

        if let Err(err) = media.handle.start(request.clip.start).await {
            tracing::warn!("Failed to start {}: {}", request.url, err);
            // the stream may already be audible even though positioning failed
            if let Err(err) = media.handle.stop().await {
                tracing::debug!("Failed to stop {} after a failed start: {}", request.url, err);
            }
            self.shared.reply(request.reply_to, Reply::Unresolvable).await;
            self.shared.set_state(SchedulerState::Idle);
            return Ok(None);
        }

        tracing::info!("Now playing '{}' requested by {}", media.info.title, request.requester);

        *self.shared.current.lock().await = Some(ActiveSession {
            session: PlaybackSession::start(media.info.title, media.info.duration, request.requester, Instant::now()),
            handle: media.handle,
            clip_length: request.clip.length(),
        });
        self.shared.set_state(SchedulerState::Playing);

        self.wait_until_finished().await;

        self.shared.set_state(SchedulerState::Finished);

        if self.config.leave_when_idle && self.shared.queue.is_empty() && !self.is_shutting_down() {
            if let Err(err) = self.shared.transport.disconnect().await {
                tracing::warn!("Failed to leave voice: {}", err);
            } else {
                tracing::debug!("Disconnected because playback finished");
            }
        }

        self.shared.set_state(SchedulerState::Idle);
        Ok(None)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.shared.transport.is_connected().await {
            return Ok(());
        }
        self.shared.transport.connect().await
    }

    async fn wait_until_finished(&self) {
        loop {
            sleep(self.config.poll_interval).await;

            let mut current = self.shared.current.lock().await;
            let Some(active) = current.as_mut() else {
                tracing::debug!("Session ended from outside");
                return;
            };

            let now = Instant::now();
            let clip_over = active.clip_length
                .is_some_and(|length| active.session.elapsed(now) >= length);

            if self.is_shutting_down() || clip_over {
                if let Err(err) = active.handle.stop().await {
                    tracing::warn!("Failed to stop '{}': {}", active.session.title(), err);
                }
            } else if !active.handle.is_done().await {
                continue;
            }

            active.session.finish(now);
            tracing::info!(
                "Finished '{}' after {:?}",
                active.session.title(),
                active.session.elapsed(now)
            );
            *current = None;
            return;
        }
    }

    async fn discard_session(&self) {
        if let Some(active) = self.shared.current.lock().await.take() {
            if let Err(err) = active.handle.stop().await {
                tracing::warn!("Failed to stop '{}': {}", active.session.title(), err);
            }
        }
    }
}

impl SchedulerHandle {
    pub fn enqueue(&self, request: Request) -> Result<(), QueueError> {
        self.shared.queue.enqueue(request)
    }

    /// Requests still to play, in order; one held for a voice retry comes first.
    pub fn pending(&self) -> Vec<Request> {
        let mut pending: Vec<Request> = self.shared.held().iter()
            .map(|held| held.request.clone())
            .collect();
        pending.extend(self.shared.queue.snapshot());
        pending
    }

    pub fn remaining_slots(&self) -> Option<usize> {
        self.shared.queue.remaining()
    }

    pub async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.shared.transport.is_connected().await {
            return Ok(());
        }
        self.shared.transport.connect().await
    }

    /// Returns whether anything was paused.
    pub async fn pause(&self) -> Result<bool, TransportError> {
        let mut current = self.shared.current.lock().await;
        let Some(active) = current.as_mut().filter(|a| a.session.is_playing()) else {
            return Ok(false);
        };

        active.handle.pause().await?;
        active.session.pause(Instant::now());
        self.shared.set_state(SchedulerState::Paused);
        Ok(true)
    }

    /// Returns whether anything was resumed.
    pub async fn resume(&self) -> Result<bool, TransportError> {
        let mut current = self.shared.current.lock().await;
        let Some(active) = current.as_mut().filter(|a| a.session.is_paused()) else {
            return Ok(false);
        };

        active.handle.resume().await?;
        active.session.resume(Instant::now());
        self.shared.set_state(SchedulerState::Playing);
        Ok(true)
    }

    /// Ends the current session; the scheduler moves on to the next request.
    pub async fn skip(&self) -> Result<bool, TransportError> {
        let Some(active) = self.shared.current.lock().await.take() else {
            return Ok(false);
        };

        tracing::info!("Skipping '{}'", active.session.title());
        active.handle.stop().await?;
        Ok(true)
    }

    /// Discards every pending request, including one waiting for voice, then
    /// skips. Returns how many were dropped.
    pub async fn stop_and_clear(&self) -> Result<usize, TransportError> {
        let held = {
            let mut held = self.shared.held();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            held.take()
        };
        let dropped = self.shared.queue.drain_all().len() + usize::from(held.is_some());
        tracing::info!("Cleared {} pending requests", dropped);
        self.skip().await?;
        Ok(dropped)
    }

    pub async fn now_playing(&self) -> Option<NowPlaying> {
        let current = self.shared.current.lock().await;
        current.as_ref().map(|active| NowPlaying {
            title: active.session.title().to_owned(),
            requester: active.session.requester().to_owned(),
            status: active.session.status(),
            elapsed: active.session.elapsed(Instant::now()),
            duration: active.session.duration(),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.shared.state.subscribe()
    }

    /// Observed by the scheduler within one poll interval.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}
