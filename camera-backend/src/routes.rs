use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use common::AvailableCameras;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 摄像头发现
        .route("/api/available-cameras", get(available_cameras))
        // 健康检查
        .route("/api/health", get(health_check))
        // 实时流 socket
        .route("/socket", get(crate::socket::socket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // CORS中间件
        .layer(CorsLayer::permissive())
}

async fn available_cameras(State(state): State<AppState>) -> Json<AvailableCameras> {
    Json(AvailableCameras {
        cameras: state.camera_infos(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_streams": state.registry().active_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_available_cameras() {
        let router = create_router(AppState::new(&BackendConfig::default()));
        let (status, body) = get_json(router, "/api/available-cameras").await;

        assert_eq!(status, StatusCode::OK);
        let cameras: AvailableCameras = serde_json::from_value(body).unwrap();
        assert_eq!(cameras.cameras.len(), 2);
        assert_eq!(cameras.cameras[0].id, 0);
        assert_eq!(cameras.cameras[1].width, 320);
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(AppState::new(&BackendConfig::default()));
        let (status, body) = get_json(router, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_streams"], 0);
    }
}
