use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use crate::camera::{Frame, StillCamera};
use crate::decode::{DecodeOptions, InversionAttempts, QrDecoder, RqrrDecoder};
use crate::followup::{scan_and_follow, OtpChallengeStep, PostDecodeStep, RecordLookupStep, StepOutcome};
use crate::records::{render_record, RealtimeDbStore, RecordStore};
use crate::scanner::ScanController;
use crate::settings::{RecordsSettings, ScannerSettings, SettingsStore, VerificationSettings};
use crate::verification::{HttpOtpVerifier, OtpChallenge, OtpVerifier};

#[derive(Debug, Parser)]
#[command(name = "medscan", version, about = "Scan patient QR cards and open their records")]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "MEDSCAN_SETTINGS", default_value = "medscan-settings.json", global = true)]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Feed image files to the scanner as a camera and wait for a code
    Scan {
        /// Frames to replay, in order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Override the sampling period
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        #[arg(long, value_enum)]
        inversion: Option<InversionArg>,
        /// Open the patient record after the scan
        #[arg(long)]
        lookup: bool,
        /// Confirm with a one-time password after the scan
        #[arg(long)]
        otp: bool,
    },
    /// Decode a single image once
    Decode {
        image: PathBuf,
        #[arg(long, value_enum, default_value_t = InversionArg::Both)]
        inversion: InversionArg,
    },
    /// Print the record stored for an HID
    Lookup { hid: String },
    /// Show or change persisted settings
    Config {
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        #[arg(long)]
        decode_timeout_ms: Option<u64>,
        #[arg(long)]
        records_url: Option<String>,
        #[arg(long, env = "MEDSCAN_RECORDS_TOKEN", hide_env_values = true)]
        records_token: Option<String>,
        #[arg(long)]
        verification_url: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum InversionArg {
    Normal,
    Inverted,
    Both,
}

impl From<InversionArg> for InversionAttempts {
    fn from(arg: InversionArg) -> Self {
        match arg {
            InversionArg::Normal => InversionAttempts::DontInvert,
            InversionArg::Inverted => InversionAttempts::OnlyInvert,
            InversionArg::Both => InversionAttempts::AttemptBoth,
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let store = SettingsStore::new(cli.settings.clone())?;

    match cli.command {
        Command::Scan {
            frames,
            interval_ms,
            timeout_secs,
            inversion,
            lookup,
            otp,
        } => {
            let mut settings = store.scanner();
            if let Some(interval_ms) = interval_ms {
                settings.poll_interval_ms = interval_ms;
            }
            if let Some(inversion) = inversion {
                settings.inversion = inversion.into();
            }
            settings.validate()?;
            scan(settings, frames, Duration::from_secs(timeout_secs), lookup, otp).await
        }
        Command::Decode { image, inversion } => decode_once(image, inversion.into()).await,
        Command::Lookup { hid } => {
            let records = record_store(&store.scanner())?;
            print_record(records.as_ref(), &hid).await
        }
        Command::Config {
            poll_interval_ms,
            decode_timeout_ms,
            records_url,
            records_token,
            verification_url,
        } => {
            let mut settings = store.scanner();
            if let Some(value) = poll_interval_ms {
                settings.poll_interval_ms = value;
            }
            if let Some(value) = decode_timeout_ms {
                settings.decode_timeout_ms = value;
            }
            if let Some(base_url) = records_url {
                settings.records = Some(RecordsSettings {
                    base_url,
                    auth_token: records_token,
                });
            }
            if let Some(base_url) = verification_url {
                settings.verification = Some(VerificationSettings { base_url });
            }
            store.update_scanner(settings.clone())?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn scan(
    settings: ScannerSettings,
    frames: Vec<PathBuf>,
    timeout: Duration,
    lookup: bool,
    otp: bool,
) -> Result<()> {
    let mut steps: Vec<Arc<dyn PostDecodeStep>> = Vec::new();
    if lookup {
        steps.push(Arc::new(RecordLookupStep::new(record_store(&settings)?)));
    }
    let verifier = if otp {
        let verifier = otp_verifier(&settings)?;
        steps.push(Arc::new(OtpChallengeStep::new(Arc::clone(&verifier))));
        Some(verifier)
    } else {
        None
    };

    let controller = ScanController::new(
        Arc::new(StillCamera::new(frames)),
        Arc::new(RqrrDecoder::new()),
        settings,
    );
    controller.on_decoded(|hid| {
        println!("Scanned HID: {hid}");
        Ok(())
    });

    let watchdog = {
        let controller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("no code read within {}s; stopping scanner", timeout.as_secs());
            controller.stop().await
        })
    };

    let result = scan_and_follow(&controller, &steps).await;
    watchdog.abort();
    controller.stop().await?;

    let Some(flow) = result? else {
        bail!("no QR code found");
    };

    for outcome in flow.steps {
        match outcome {
            StepOutcome::Record(record) => {
                for line in render_record(&record) {
                    println!("{line}");
                }
            }
            StepOutcome::RecordMissing => println!("No data found for HID {}.", flow.hid),
            StepOutcome::Challenge(challenge) => {
                let verifier = verifier
                    .as_ref()
                    .ok_or_else(|| anyhow!("challenge issued without a verifier"))?;
                confirm_otp(verifier.as_ref(), &challenge).await?;
            }
        }
    }
    Ok(())
}

async fn decode_once(image: PathBuf, inversion: InversionAttempts) -> Result<()> {
    let frame = tokio::task::spawn_blocking(move || -> Result<Frame> {
        let rgba = image::open(&image)
            .with_context(|| format!("cannot read {}", image.display()))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Frame::new(width, height, rgba.into_raw())?)
    })
    .await
    .context("image loader failed to join")??;

    let options = DecodeOptions { inversion };
    match RqrrDecoder::new().decode(&frame, &options)? {
        Some(text) if !text.trim().is_empty() => {
            println!("{}", text.trim());
            Ok(())
        }
        _ => bail!("no QR code found"),
    }
}

async fn print_record(records: &dyn RecordStore, hid: &str) -> Result<()> {
    match records.fetch_patient(hid).await? {
        Some(record) => {
            for line in render_record(&record) {
                println!("{line}");
            }
            Ok(())
        }
        None => bail!("No data found for HID {hid}."),
    }
}

async fn confirm_otp(verifier: &dyn OtpVerifier, challenge: &OtpChallenge) -> Result<()> {
    print!("Enter the code sent for HID {}: ", challenge.hid);
    io::stdout().flush()?;

    let code = tokio::task::spawn_blocking(|| -> io::Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .context("stdin reader failed to join")??;

    if verifier.verify(challenge, &code).await? {
        info!("otp confirmed for HID {}", challenge.hid);
        println!("OTP verified.");
        Ok(())
    } else {
        bail!("OTP rejected")
    }
}

fn record_store(settings: &ScannerSettings) -> Result<Arc<dyn RecordStore>> {
    let records = settings
        .records
        .as_ref()
        .ok_or_else(|| anyhow!("no records service configured; run `medscan config --records-url ...`"))?;
    Ok(Arc::new(RealtimeDbStore::new(
        &records.base_url,
        records.auth_token.clone(),
    )))
}

fn otp_verifier(settings: &ScannerSettings) -> Result<Arc<dyn OtpVerifier>> {
    let verification = settings.verification.as_ref().ok_or_else(|| {
        anyhow!("no verification service configured; run `medscan config --verification-url ...`")
    })?;
    Ok(Arc::new(HttpOtpVerifier::new(&verification.base_url)))
}
