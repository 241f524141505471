mod config;
mod discovery;
mod error;
mod firmware;
mod protocol;
mod status;
mod transport;
mod transport_btleplug;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use tracing::{error, info, warn};

use config::OtaConfig;
use discovery::{DeviceHint, Discovery, Selection};
use error::{Error, Result};
use firmware::FirmwareImage;
use protocol::{OtaEngine, Outcome};
use transport_btleplug::{BtleplugDiscovery, BtleplugTransport};

/// Flash SmartLamp firmware over BLE
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Firmware image path (.bin)
    firmware: PathBuf,

    /// Device name fragment or BLE address (AA:BB:CC:DD:EE:FF)
    device: Option<String>,

    /// Advertised name prefix of lamps
    #[arg(long, default_value = config::DEFAULT_NAME_PREFIX)]
    name_prefix: String,

    /// Scan window in seconds
    #[arg(long, default_value_t = config::DEFAULT_SCAN_TIMEOUT.as_secs())]
    scan_timeout: u64,

    /// Bytes per data write
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    chunk_size: usize,

    /// Seconds to wait for the device to accept START
    #[arg(long, default_value_t = config::DEFAULT_START_TIMEOUT.as_secs())]
    start_timeout: u64,

    /// Seconds to wait for the device to confirm END
    #[arg(long, default_value_t = config::DEFAULT_FINISH_TIMEOUT.as_secs())]
    finish_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn ota_config(&self) -> OtaConfig {
        OtaConfig {
            start_timeout: Duration::from_secs(self.start_timeout),
            finish_timeout: Duration::from_secs(self.finish_timeout),
            ..OtaConfig::default()
        }
        .with_chunk_size(self.chunk_size)
    }
}

fn parse_chunk_size(s: &str) -> std::result::Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("{e}"))?;
    if size == 0 || size > config::MAX_CHUNK_SIZE {
        return Err(format!("must be between 1 and {}", config::MAX_CHUNK_SIZE));
    }
    Ok(size)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lamp_ota_ble=debug" } else { "lamp_ota_ble=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match &err {
                Error::Ota(ota) => match ota.phase() {
                    Some(phase) => error!(%phase, "{}", err),
                    None => error!("{}", err),
                },
                _ => error!("{}", err),
            }
            if let Error::DeviceNotFound = err {
                warn!("Make sure the lamp is advertising: hold the touch pad for 3 seconds.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let image = FirmwareImage::load(&args.firmware).await?;
    info!("Firmware: {} ({} bytes)", args.firmware.display(), image.len());
    if image.is_empty() {
        warn!("firmware image is empty");
    }

    let hint = DeviceHint::parse(args.device.as_deref());
    let scanner = BtleplugDiscovery::new(args.name_prefix.clone(), Duration::from_secs(args.scan_timeout)).await?;
    let device = match scanner.discover(&hint).await? {
        Selection::Found(device) => device,
        Selection::NotFound => return Err(Error::DeviceNotFound),
        Selection::Ambiguous(devices) => discovery::choose(devices, std::io::stdin().lock(), std::io::stdout())?,
    };
    info!("Found: {}", device.label());

    let transport = BtleplugTransport::connect(device.peripheral).await?;
    let outcome = flash(&transport, &image, args.ota_config()).await;
    transport.disconnect().await;

    outcome.into_result()?;
    info!("OTA complete! Board will reboot into new firmware.");
    Ok(())
}

async fn flash(transport: &BtleplugTransport, image: &FirmwareImage, config: OtaConfig) -> Outcome {
    let chunk_size = config.chunk_size;
    let mut engine = match OtaEngine::new(transport, config).await {
        Ok(engine) => engine,
        Err(err) => return Outcome::Failed(err),
    };

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler, never cancel.
            std::future::pending::<()>().await;
        }
        warn!("Interrupted, aborting OTA");
    };

    info!(
        "Sending firmware in {} writes of up to {} bytes",
        image.chunk_count(chunk_size),
        chunk_size
    );
    let bar = ProgressBar::new(image.len() as u64);
    let outcome = engine
        .run(image, cancel, |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.sent as u64);
        })
        .await;
    match outcome {
        Outcome::Succeeded => bar.finish(),
        _ => bar.abandon(),
    }
    let session = engine.session();
    info!(
        "{} of {} bytes sent, {}, last status {:?}",
        session.sent, session.total, session.phase, session.last_status
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["lamp-ota-ble", "build/smart_lamp.bin"]);
        assert_eq!(args.device, None);
        assert_eq!(args.name_prefix, "SmartLamp");
        assert_eq!(args.scan_timeout, 15);

        let config = args.ota_config();
        assert_eq!(config.chunk_size, 490);
        assert_eq!(config.start_timeout, Duration::from_secs(10));
        assert_eq!(config.finish_timeout, Duration::from_secs(30));
    }

    #[test]
    fn cli_overrides() {
        let args = Args::parse_from([
            "lamp-ota-ble",
            "fw.bin",
            "SmartLamp-AA01",
            "--chunk-size",
            "244",
            "--finish-timeout",
            "60",
        ]);
        assert_eq!(args.device.as_deref(), Some("SmartLamp-AA01"));
        let config = args.ota_config();
        assert_eq!(config.chunk_size, 244);
        assert_eq!(config.finish_timeout, Duration::from_secs(60));
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(Args::try_parse_from(["lamp-ota-ble", "fw.bin", "--chunk-size", "0"]).is_err());
        assert!(Args::try_parse_from(["lamp-ota-ble", "fw.bin", "--chunk-size", "513"]).is_err());
        assert!(Args::try_parse_from(["lamp-ota-ble", "fw.bin", "--chunk-size", "512"]).is_ok());
    }
}
