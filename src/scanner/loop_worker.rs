use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::VideoStream;
use crate::decode::{DecodeOptions, QrDecoder};

use super::controller::{resolve_outcome, OutcomeSender, ScanError, Shared};
use super::state::{ScanOutcome, ScanState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type PendingDecode = JoinHandle<Result<Option<String>>>;

/// Everything one streaming run needs. Holds the controller weakly so that
/// dropping every controller handle tears the session down.
pub(crate) struct LoopContext {
    pub(crate) shared: Weak<Shared>,
    pub(crate) decoder: Arc<dyn QrDecoder>,
    pub(crate) options: DecodeOptions,
    pub(crate) poll_interval: Duration,
    pub(crate) decode_timeout: Duration,
    pub(crate) generation: u64,
    pub(crate) session_id: String,
    pub(crate) outcome_tx: OutcomeSender,
}

enum TickResult {
    Miss,
    Skipped,
    Found(String),
}

pub(crate) async fn scan_loop(
    ctx: LoopContext,
    mut stream: Box<dyn VideoStream>,
    cancel_token: CancellationToken,
) -> Result<ScanOutcome, ScanError> {
    let mut ticker = tokio::time::interval(ctx.poll_interval);
    // Ticks that fall due while a decode is still running are dropped, never queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<PendingDecode> = None;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("scan loop cancelled for session {}", ctx.session_id);
                break ScanOutcome::Cancelled;
            }
            _ = ticker.tick() => {
                match run_tick(&ctx, stream.as_mut(), &mut in_flight).await {
                    Ok(TickResult::Miss) => ctx.record_tick().await,
                    Ok(TickResult::Skipped) => {}
                    Ok(TickResult::Found(text)) => {
                        log_info!("session {} decoded a code", ctx.session_id);
                        break ScanOutcome::Decoded(text);
                    }
                    Err(err) => {
                        log_error!("scan tick failed for session {}: {err:#}", ctx.session_id);
                        break ScanOutcome::Failed(format!("{err:#}"));
                    }
                }
            }
        }
    };

    // Release the camera and the timer before anyone can observe the outcome.
    stream.stop();
    drop(stream);
    drop(ticker);
    if let Some(pending) = in_flight.take() {
        pending.abort();
    }

    let Some(shared) = ctx.shared.upgrade() else {
        log_debug!("controller dropped; session {} torn down", ctx.session_id);
        resolve_outcome(&ctx.outcome_tx, &outcome);
        return Ok(outcome);
    };

    ctx.finish(&shared, &outcome).await;
    resolve_outcome(&ctx.outcome_tx, &outcome);

    if let ScanOutcome::Decoded(text) = &outcome {
        shared.deliver_decoded(text).await?;
    }

    Ok(outcome)
}

async fn run_tick(
    ctx: &LoopContext,
    stream: &mut dyn VideoStream,
    in_flight: &mut Option<PendingDecode>,
) -> Result<TickResult> {
    let mut pending = match in_flight.take() {
        Some(handle) if !handle.is_finished() => {
            log_debug!("previous decode still running; skipping tick");
            *in_flight = Some(handle);
            return Ok(TickResult::Skipped);
        }
        // A decode that outlived its tick finished in the meantime; use its answer.
        Some(handle) => handle,
        None => {
            let Some(frame) = stream
                .read_frame()
                .context("failed to read camera frame")?
            else {
                return Ok(TickResult::Miss);
            };

            let decoder = Arc::clone(&ctx.decoder);
            let options = ctx.options;
            tokio::task::spawn_blocking(move || decoder.decode(&frame, &options))
        }
    };

    let started = Instant::now();
    match tokio::time::timeout(ctx.decode_timeout, &mut pending).await {
        Ok(joined) => {
            let decoded = joined.map_err(|err| anyhow!("decoder panicked: {err}"))??;
            log_debug!("decode attempt took {}ms", started.elapsed().as_millis());
            Ok(classify(decoded))
        }
        Err(_) => {
            log_warn!(
                "decode exceeded {}ms for session {}; holding further ticks",
                ctx.decode_timeout.as_millis(),
                ctx.session_id
            );
            *in_flight = Some(pending);
            Ok(TickResult::Skipped)
        }
    }
}

fn classify(decoded: Option<String>) -> TickResult {
    match decoded.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => TickResult::Found(text.to_string()),
        _ => TickResult::Miss,
    }
}

impl LoopContext {
    async fn record_tick(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut slot = shared.slot.lock().await;
        if slot.generation == self.generation && slot.snapshot.state == ScanState::Streaming {
            slot.snapshot.ticks += 1;
            shared.publish(&slot.snapshot);
        }
    }

    async fn finish(&self, shared: &Shared, outcome: &ScanOutcome) {
        let mut slot = shared.slot.lock().await;
        if slot.generation != self.generation {
            return;
        }
        slot.cancel_token = None;

        match outcome {
            ScanOutcome::Decoded(text) => {
                slot.snapshot.state = ScanState::Decoded;
                slot.snapshot.last_decoded_text = Some(text.clone());
                shared.publish(&slot.snapshot);
                slot.snapshot.reset();
                shared.publish(&slot.snapshot);
            }
            ScanOutcome::Cancelled => {
                if slot.snapshot.state == ScanState::Streaming {
                    slot.snapshot.reset();
                    shared.publish(&slot.snapshot);
                }
            }
            ScanOutcome::Failed(message) => {
                slot.snapshot.fail(message.clone());
                shared.publish(&slot.snapshot);
            }
        }
    }
}
