use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// One running camera stream.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub stream_id: Uuid,
    pub camera_id: u32,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Active streams keyed by socket connection; at most one per connection.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<Uuid, ActiveStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新流，同一连接上的旧流会被取消
    pub fn begin(&self, connection_id: Uuid, camera_id: u32) -> (Uuid, CancellationToken) {
        let cancel = CancellationToken::new();
        let stream = ActiveStream {
            stream_id: Uuid::new_v4(),
            camera_id,
            started_at: Utc::now(),
            cancel: cancel.clone(),
        };
        let stream_id = stream.stream_id;

        if let Some(previous) = self.streams.insert(connection_id, stream) {
            info!(
                "Replacing camera {} stream on connection {}",
                previous.camera_id, connection_id
            );
            previous.cancel.cancel();
        }
        (stream_id, cancel)
    }

    /// 停止连接上的流，返回被停止的摄像头
    pub fn stop(&self, connection_id: Uuid) -> Option<u32> {
        let (_, stream) = self.streams.remove(&connection_id)?;
        stream.cancel.cancel();
        Some(stream.camera_id)
    }

    /// Called by a stream task when it ends on its own. A newer stream on the
    /// same connection is left alone.
    pub fn finish(&self, connection_id: Uuid, stream_id: Uuid) {
        self.streams
            .remove_if(&connection_id, |_, stream| stream.stream_id == stream_id);
    }

    pub fn get(&self, connection_id: Uuid) -> Option<ActiveStream> {
        self.streams.get(&connection_id).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_replaces_previous_stream() {
        let registry = StreamRegistry::new();
        let connection = Uuid::new_v4();

        let (first_id, first) = registry.begin(connection, 0);
        let (second_id, second) = registry.begin(connection, 1);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.get(connection).map(|s| s.camera_id), Some(1));

        // 旧流结束时不能移除新流
        registry.finish(connection, first_id);
        assert_eq!(registry.active_count(), 1);
        registry.finish(connection, second_id);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_stop() {
        let registry = StreamRegistry::new();
        let connection = Uuid::new_v4();
        let (_, cancel) = registry.begin(connection, 3);

        assert_eq!(registry.stop(connection), Some(3));
        assert!(cancel.is_cancelled());
        assert_eq!(registry.stop(connection), None);
    }
}
