use std::sync::{Arc, Mutex as StdMutex};

use anyhow::anyhow;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::camera::{Camera, CameraError};
use crate::decode::QrDecoder;
use crate::settings::ScannerSettings;

use super::loop_worker::{scan_loop, LoopContext};
use super::state::{ScanOutcome, ScanSnapshot, ScanState};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Consumer of a successful decode. Runs after the session is torn down.
pub type DecodedCallback = Box<dyn FnMut(&str) -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("a scan session is already active")]
    AlreadyActive,
    #[error("decode consumer failed: {0:#}")]
    Consumer(anyhow::Error),
    #[error("scan worker failed to join: {0}")]
    Join(String),
    #[error("scan session ended without reporting an outcome")]
    OutcomeLost,
}

/// Per-session outcome. Resolved once, by whichever path ends the session.
pub(crate) type OutcomeSender = Arc<watch::Sender<Option<ScanOutcome>>>;

pub(crate) fn resolve_outcome(tx: &watch::Sender<Option<ScanOutcome>>, outcome: &ScanOutcome) {
    tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(outcome.clone());
        true
    });
}

pub(crate) struct SessionSlot {
    pub(crate) snapshot: ScanSnapshot,
    /// Bumped on every start; a pending acquisition compares against it.
    pub(crate) generation: u64,
    pub(crate) worker: Option<JoinHandle<Result<ScanOutcome, ScanError>>>,
    pub(crate) cancel_token: Option<CancellationToken>,
    /// Outcome channel of the latest session; outlives the worker handle.
    pub(crate) outcome: Option<OutcomeSender>,
}

pub(crate) struct Shared {
    pub(crate) slot: Mutex<SessionSlot>,
    state_tx: watch::Sender<ScanSnapshot>,
    on_decoded: StdMutex<Option<DecodedCallback>>,
}

impl Shared {
    pub(crate) fn publish(&self, snapshot: &ScanSnapshot) {
        self.state_tx.send_replace(snapshot.clone());
    }

    /// Hand `text` to the consumer on the blocking pool; a slow consumer must
    /// not hold up a runtime thread.
    pub(crate) async fn deliver_decoded(&self, text: &str) -> Result<(), ScanError> {
        let callback = self
            .on_decoded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(mut callback) = callback else {
            log_warn!("decoded a code but no consumer is registered");
            return Ok(());
        };

        // Called without the lock held so the consumer may register a replacement.
        let text = text.to_string();
        let (callback, result) = tokio::task::spawn_blocking(move || {
            let result = callback(&text);
            (callback, result)
        })
        .await
        .map_err(|err| ScanError::Consumer(anyhow!("decode consumer panicked: {err}")))?;

        let mut guard = self
            .on_decoded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(callback);
        }

        result.map_err(ScanError::Consumer)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(token) = self.slot.get_mut().cancel_token.take() {
            token.cancel();
        }
    }
}

/// Owns the QR capture loop: camera acquisition, the sampling worker and the
/// single decode consumer.
///
/// Cloning yields another handle onto the same session. When the last handle
/// is dropped any running session is cancelled and its stream released.
#[derive(Clone)]
pub struct ScanController {
    shared: Arc<Shared>,
    camera: Arc<dyn Camera>,
    decoder: Arc<dyn QrDecoder>,
    settings: ScannerSettings,
}

impl ScanController {
    pub fn new(
        camera: Arc<dyn Camera>,
        decoder: Arc<dyn QrDecoder>,
        settings: ScannerSettings,
    ) -> Self {
        let snapshot = ScanSnapshot::new();
        let (state_tx, _) = watch::channel(snapshot.clone());

        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(SessionSlot {
                    snapshot,
                    generation: 0,
                    worker: None,
                    cancel_token: None,
                    outcome: None,
                }),
                state_tx,
                on_decoded: StdMutex::new(None),
            }),
            camera,
            decoder,
            settings,
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Register the sole consumer of decode events, replacing any previous one.
    pub fn on_decoded<F>(&self, callback: F)
    where
        F: FnMut(&str) -> anyhow::Result<()> + Send + 'static,
    {
        *self
            .shared
            .on_decoded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(callback));
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    /// True while a sampling worker is alive.
    pub async fn is_ticking(&self) -> bool {
        self.shared
            .slot
            .lock()
            .await
            .worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Request the camera and begin sampling.
    ///
    /// Fails with [`ScanError::AlreadyActive`] while another session is
    /// requesting or streaming. Camera refusal moves the session to
    /// [`ScanState::Error`] and is returned; nothing is retried. If [`stop`]
    /// runs while the camera request is pending, the granted stream is
    /// released as soon as it arrives and `Ok(())` is returned.
    ///
    /// [`stop`]: ScanController::stop
    pub async fn start(&self) -> Result<(), ScanError> {
        self.reap_finished().await?;

        let (generation, session_id, outcome_tx) = {
            let mut slot = self.shared.slot.lock().await;
            if slot.snapshot.state.is_active() {
                return Err(ScanError::AlreadyActive);
            }
            slot.generation += 1;
            let session_id = Uuid::new_v4().to_string();
            let outcome_tx: OutcomeSender = Arc::new(watch::channel(None).0);
            slot.outcome = Some(Arc::clone(&outcome_tx));
            slot.snapshot.begin_session(session_id.clone(), Utc::now());
            self.shared.publish(&slot.snapshot);
            (slot.generation, session_id, outcome_tx)
        };

        log_info!(
            "requesting {} camera for scan session {}",
            self.settings.facing_mode.as_str(),
            session_id
        );

        let acquired = self.camera.acquire(self.settings.facing_mode).await;

        let mut slot = self.shared.slot.lock().await;
        let still_requested =
            slot.generation == generation && slot.snapshot.state == ScanState::Requesting;

        if !still_requested {
            if let Ok(mut stream) = acquired {
                stream.stop();
                log_info!(
                    "scan session {} stopped during camera request; released granted stream",
                    session_id
                );
            }
            resolve_outcome(&outcome_tx, &ScanOutcome::Cancelled);
            return Ok(());
        }

        let stream = match acquired {
            Ok(stream) => stream,
            Err(err) => {
                log_warn!("camera request failed for session {}: {err}", session_id);
                slot.snapshot.fail(err.to_string());
                self.shared.publish(&slot.snapshot);
                resolve_outcome(&outcome_tx, &ScanOutcome::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        let cancel_token = CancellationToken::new();
        let ctx = LoopContext {
            shared: Arc::downgrade(&self.shared),
            decoder: Arc::clone(&self.decoder),
            options: self.settings.decode_options(),
            poll_interval: self.settings.poll_interval(),
            decode_timeout: self.settings.decode_timeout(),
            generation,
            session_id,
            outcome_tx,
        };

        slot.snapshot.state = ScanState::Streaming;
        self.shared.publish(&slot.snapshot);

        slot.worker = Some(tokio::spawn(scan_loop(ctx, stream, cancel_token.clone())));
        slot.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Release the stream and the worker, from any state. Idempotent.
    ///
    /// Returns the consumer's error if a decode callback failed and nobody
    /// collected it through [`wait`](ScanController::wait) yet.
    pub async fn stop(&self) -> Result<(), ScanError> {
        let (generation, worker, token) = {
            let mut slot = self.shared.slot.lock().await;
            let worker = slot.worker.take();
            let token = slot.cancel_token.take();

            // A streaming session is moved to Idle by its worker once the
            // stream is released; every other state can go straight there.
            if slot.snapshot.state != ScanState::Idle && slot.snapshot.state != ScanState::Streaming
            {
                if slot.snapshot.state == ScanState::Requesting {
                    if let Some(outcome_tx) = &slot.outcome {
                        resolve_outcome(outcome_tx, &ScanOutcome::Cancelled);
                    }
                }
                slot.snapshot.reset();
                self.shared.publish(&slot.snapshot);
            }
            (slot.generation, worker, token)
        };

        if let Some(token) = token {
            token.cancel();
        }

        let joined = match worker {
            Some(handle) => join_worker(handle).await.map(|_| ()),
            None => Ok(()),
        };

        let mut slot = self.shared.slot.lock().await;
        if slot.generation == generation && slot.snapshot.state == ScanState::Streaming {
            slot.snapshot.reset();
            self.shared.publish(&slot.snapshot);
        }

        joined
    }

    /// Wait for the current session to end and return how it ended.
    ///
    /// The outcome is kept per session, so it is still reported after
    /// [`stop`](ScanController::stop) or a later `start` collected the worker.
    /// If this call is the one that joins the worker, a failing decode
    /// consumer is returned as [`ScanError::Consumer`].
    pub async fn wait(&self) -> Result<ScanOutcome, ScanError> {
        let (generation, mut rx) = {
            let slot = self.shared.slot.lock().await;
            match &slot.outcome {
                Some(outcome_tx) => (slot.generation, outcome_tx.subscribe()),
                None => return Ok(ScanOutcome::Cancelled),
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ScanError::OutcomeLost)?
            .clone()
            .ok_or(ScanError::OutcomeLost)?;

        let worker = {
            let mut slot = self.shared.slot.lock().await;
            if slot.generation == generation {
                slot.worker.take()
            } else {
                None
            }
        };

        match worker {
            Some(handle) => join_worker(handle).await,
            None => Ok(outcome),
        }
    }

    /// Collect a worker that already finished so its result is not lost.
    async fn reap_finished(&self) -> Result<(), ScanError> {
        let worker = {
            let mut slot = self.shared.slot.lock().await;
            if slot.snapshot.state.is_active() {
                return Err(ScanError::AlreadyActive);
            }
            slot.worker.take()
        };

        match worker {
            Some(handle) => join_worker(handle).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

async fn join_worker(
    handle: JoinHandle<Result<ScanOutcome, ScanError>>,
) -> Result<ScanOutcome, ScanError> {
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(ScanError::Join(err.to_string())),
    }
}
