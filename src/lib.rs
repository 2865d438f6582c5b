pub mod camera;
pub mod cli;
pub mod decode;
pub mod followup;
pub mod records;
pub mod scanner;
pub mod settings;
pub mod utils;
pub mod verification;

use clap::Parser;

pub use camera::{Camera, CameraError, FacingMode, Frame, StillCamera, VideoStream};
pub use decode::{DecodeOptions, InversionAttempts, QrDecoder, RqrrDecoder};
pub use scanner::{ScanController, ScanError, ScanOutcome, ScanSnapshot, ScanState};
pub use settings::{ScannerSettings, SettingsStore};

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    utils::init_logging();

    log::info!("medscan starting up...");

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(cli::execute(cli)) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
