use std::time::Duration;

use crate::error::{Result, WiretapsError};
use crate::notification::{AlertPayload, Notifier};

/// POSTs alert payloads as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url, client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &AlertPayload) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WiretapsError::Notification(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(WiretapsError::Notification(format!(
                "webhook returned {}",
                resp.status()
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    type Received = Arc<Mutex<Vec<AlertPayload>>>;

    async fn receiver(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(store): State<Received>, Json(body): Json<AlertPayload>| async move {
                        store.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), received)
    }

    fn payload() -> AlertPayload {
        AlertPayload {
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            endpoint: "/v1/messages".to_string(),
            pii_types: vec!["email".to_string()],
            redacted: false,
        }
    }

    #[tokio::test]
    async fn posts_payload_as_json() {
        let (url, received) = receiver(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url);
        notifier.notify(&payload()).await.unwrap();
        assert_eq!(received.lock().unwrap().as_slice(), &[payload()]);
        assert_eq!(notifier.name(), "webhook");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _received) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let err = WebhookNotifier::new(url).notify(&payload()).await.unwrap_err();
        assert!(matches!(err, WiretapsError::Notification(_)));
    }

    #[tokio::test]
    async fn unreachable_receiver_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let notifier = WebhookNotifier::new(format!("http://{}/hook", addr));
        assert!(notifier.notify(&payload()).await.is_err());
    }
}
