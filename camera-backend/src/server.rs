use crate::config::BackendConfig;
use crate::error::Result;
use crate::state::AppState;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Clone)]
pub struct BackendServer {
    addr: SocketAddr,
    state: AppState,
}

impl BackendServer {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            addr: config.bind_addr()?,
            state: AppState::new(config),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("✓ Camera backend listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Binds to the configured address (port 0 picks a free one) and serves
    /// in the background.
    pub async fn spawn(self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.addr).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = self.serve(listener, std::future::pending()).await {
                error!("Camera backend stopped: {}", e);
            }
        });
        Ok((addr, task))
    }

    async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = crate::routes::create_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
