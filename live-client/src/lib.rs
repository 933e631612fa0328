pub mod api;
pub mod config;
pub mod errors;
pub mod retry;
pub mod scheduler;
pub mod serde_helpers;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;

pub use api::{ApiClient, HealthStatus};
pub use config::{ClientConfig, ConfigManager, EnvConfigOverride};
pub use errors::{ClientError, SessionError, TransportError};
pub use retry::{RetryPolicy, RetryStrategy};
pub use scheduler::{DelayQueueScheduler, ManualScheduler, Scheduler, Timer, TimerKind};
pub use service::{SessionHandle, SessionService};
pub use session::{LiveStreamSession, SessionOptions};
pub use transport::{ControlChannel, TransportEvent, TransportOptions, WsTransport};
pub use types::*;
