use anyhow::{bail, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use live_client::{
    ApiClient, ClientConfig, ConfigManager, EnvConfigOverride, SessionEvent, SessionService,
    SessionStatus,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "live-viewer.toml";
const SOCKET_WAIT: Duration = Duration::from_secs(10);

struct WatchOptions {
    camera_id: u32,
    output_dir: Option<PathBuf>,
    max_frames: Option<u64>,
    auto_reconnect: bool,
}

fn cli() -> Command {
    Command::new("live-viewer")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Video Streaming Team")
        .about("Live camera viewer")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("TOML configuration file")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG)
                .global(true),
        )
        .subcommand(Command::new("cameras").about("List cameras available on the backend"))
        .subcommand(
            Command::new("watch")
                .about("Stream a camera until Ctrl+C")
                .arg(
                    Arg::new("camera")
                        .long("camera")
                        .value_name("ID")
                        .help("Camera id to stream")
                        .value_parser(value_parser!(u32))
                        .required(true),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Write received frames as JPEG files")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("max-frames")
                        .long("max-frames")
                        .value_name("COUNT")
                        .help("Stop after this many frames")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("no-auto-reconnect")
                        .long("no-auto-reconnect")
                        .help("Do not retry after transport errors")
                        .action(ArgAction::SetTrue),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    // 加载配置
    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut manager = ConfigManager::new(config_path.clone());
    manager.load().await?;
    EnvConfigOverride::apply_overrides(manager.get_config_mut());
    manager.validate()?;
    let config = manager.get_config().clone();

    // 初始化日志 - RUST_LOG 优先于配置文件
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("✓ Configuration loaded from {:?}", config_path);

    match matches.subcommand() {
        Some(("cameras", _)) => list_cameras(&config).await,
        Some(("watch", args)) => watch(&config, watch_options(args)).await,
        Some((other, _)) => bail!("Unknown command: {}", other),
        None => bail!("No command given"),
    }
}

fn watch_options(args: &ArgMatches) -> WatchOptions {
    WatchOptions {
        camera_id: args.get_one::<u32>("camera").copied().unwrap_or_default(),
        output_dir: args.get_one::<PathBuf>("output-dir").cloned(),
        max_frames: args.get_one::<u64>("max-frames").copied(),
        auto_reconnect: !args.get_flag("no-auto-reconnect"),
    }
}

async fn list_cameras(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(&config.server.api_url, config.server.request_timeout)?;
    let cameras = api.available_cameras().await?;

    if cameras.is_empty() {
        info!("⚠️  No cameras available on {}", config.server.api_url);
        return Ok(());
    }

    info!("✓ {} camera(s) available:", cameras.len());
    for camera in &cameras {
        info!(
            "  [{}] {} ({}x{})",
            camera.id, camera.name, camera.width, camera.height
        );
    }
    Ok(())
}

async fn watch(config: &ClientConfig, options: WatchOptions) -> Result<()> {
    if let Some(dir) = &options.output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut session_options = config.session_options();
    session_options.auto_reconnect &= options.auto_reconnect;

    let service = SessionService::connect(
        &config.server.socket_url,
        config.transport_options(),
        session_options,
    );
    let handle = service.handle();
    let mut events = handle.subscribe();

    match tokio::time::timeout(SOCKET_WAIT, handle.wait_connected()).await {
        Ok(true) => {}
        _ => {
            service.shutdown().await;
            bail!("Could not connect to {}", config.server.socket_url);
        }
    }

    info!("🎥 Starting camera {}", options.camera_id);
    handle.start(options.camera_id).await?;
    info!("   Press Ctrl+C to stop");

    let mut received = 0u64;
    let mut failure: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping...");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged(status)) => {
                    info!("📷 Camera {} {}", options.camera_id, status);
                    if status == SessionStatus::Error {
                        let snapshot = handle.snapshot().await?;
                        if !snapshot.retry_pending {
                            failure = snapshot.last_error.map(|e| e.message);
                            break;
                        }
                    }
                }
                Ok(SessionEvent::Frame(frame)) => {
                    received += 1;
                    if let Some(dir) = &options.output_dir {
                        let path = dir.join(format!("camera{}_{:06}.jpg", frame.camera_id, frame.seq));
                        tokio::fs::write(&path, &frame.data).await?;
                    }
                    if received % 30 == 0 {
                        info!("Received {} frames", received);
                    }
                    if options.max_frames.is_some_and(|max| received >= max) {
                        info!("✓ Reached {} frames", received);
                        break;
                    }
                }
                Ok(SessionEvent::Error { message, category }) => {
                    warn!("❌ {} error: {}", category, message);
                }
                Ok(SessionEvent::Detection(detection)) => {
                    info!(
                        "🐾 {} ({:.0}%) at {}",
                        detection.class_name,
                        detection.confidence * 100.0,
                        detection.timestamp
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let snapshot = handle.snapshot().await?;
    service.shutdown().await;

    info!(
        "Session summary: {} frames, {} rejected, {} detections, {} errors, {} retries",
        snapshot.stats.frames_received,
        snapshot.stats.frames_rejected,
        snapshot.stats.detections,
        snapshot.stats.errors_reported,
        snapshot.stats.retries_scheduled
    );

    if let Some(message) = failure {
        error!("Giving up: {}", message);
        bail!(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_arguments() {
        let matches = cli()
            .try_get_matches_from([
                "live-viewer",
                "watch",
                "--camera",
                "2",
                "--output-dir",
                "frames",
                "--max-frames",
                "90",
                "--no-auto-reconnect",
            ])
            .unwrap();

        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "watch");
        let options = watch_options(args);
        assert_eq!(options.camera_id, 2);
        assert_eq!(options.output_dir, Some(PathBuf::from("frames")));
        assert_eq!(options.max_frames, Some(90));
        assert!(!options.auto_reconnect);
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from(DEFAULT_CONFIG))
        );
    }

    #[test]
    fn test_watch_defaults() {
        let matches = cli()
            .try_get_matches_from(["live-viewer", "-c", "custom.toml", "watch", "--camera", "0"])
            .unwrap();

        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("custom.toml"))
        );
        let (_, args) = matches.subcommand().unwrap();
        let options = watch_options(args);
        assert_eq!(options.output_dir, None);
        assert_eq!(options.max_frames, None);
        assert!(options.auto_reconnect);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        // 缺少 --camera
        assert!(cli().try_get_matches_from(["live-viewer", "watch"]).is_err());
        assert!(cli()
            .try_get_matches_from(["live-viewer", "watch", "--camera", "front"])
            .is_err());
        // 必须给出子命令
        assert!(cli().try_get_matches_from(["live-viewer"]).is_err());
        assert!(cli().try_get_matches_from(["live-viewer", "cameras"]).is_ok());
    }

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }
}
