use axum::Json;
use serde_json::{Value, json};

/// GET /api/health: liveness probe with the current server time.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_ok_with_rfc3339_timestamp() {
        let Json(value) = health_handler().await;
        assert_eq!(value["status"], "ok");
        let timestamp = value["timestamp"].as_str().expect("timestamp");
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
