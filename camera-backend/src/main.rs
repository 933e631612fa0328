use anyhow::Result;
use camera_backend::{BackendServer, ConfigManager, EnvConfigOverride};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（CAMERA_BACKEND_CONFIG 指定路径）
    let config_path = std::env::var("CAMERA_BACKEND_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("camera-backend.toml"));
    let mut manager = ConfigManager::new(config_path.clone());
    manager.load().await?;
    EnvConfigOverride::apply_overrides(manager.get_config_mut());
    let config = manager.into_config();

    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("🚀 Camera backend starting...");
    info!("✓ Configuration loaded ({:?})", config_path);
    for camera in &config.cameras {
        info!(
            "  Camera {}: {} ({}x{})",
            camera.id, camera.name, camera.width, camera.height
        );
    }

    let server = BackendServer::new(&config)?;
    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl+C received, shutting down...");
        })
        .await?;

    info!("✅ Camera backend stopped");
    Ok(())
}
