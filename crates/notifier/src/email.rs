//! Transactional email delivery via the Resend HTTP API.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keepla_common::types::EmailMessage;

/// Failure delivering a single email.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Email provider rate limited the request")]
    RateLimited,

    #[error("Email provider rejected the request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Unexpected email provider response: {0}")]
    Decode(String),
}

impl EmailError {
    /// Transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmailError::Transport(_) | EmailError::RateLimited => true,
            EmailError::Rejected { status, .. } => status.is_server_error(),
            EmailError::Decode(_) => false,
        }
    }
}

/// Anything that can deliver an [`EmailMessage`] and return the provider message id.
pub trait EmailSender: Send + Sync {
    fn send(&self, message: &EmailMessage)
    -> impl Future<Output = Result<String, EmailError>> + Send;
}

/// Default retry policy for retryable send failures.
pub fn default_retry_policy(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .with_factor(2.0)
        .with_max_times(max_retries)
        .with_jitter()
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl<'a> From<&'a EmailMessage> for SendEmailRequest<'a> {
    fn from(message: &'a EmailMessage) -> Self {
        Self {
            from: &message.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

/// Resend REST client.
#[derive(Debug, Clone)]
pub struct ResendClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    retry_policy: ExponentialBuilder,
}

impl ResendClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        retry_policy: ExponentialBuilder,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint: format!("{}/emails", base_url.trim_end_matches('/')),
            retry_policy,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, message: &EmailMessage) -> Result<String, EmailError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendEmailRequest::from(message))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmailError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmailError::Rejected { status, body });
        }

        let body: SendEmailResponse = resp
            .json()
            .await
            .map_err(|e| EmailError::Decode(e.to_string()))?;
        Ok(body.id)
    }
}

impl EmailSender for ResendClient {
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
        (|| self.send_once(message))
            .retry(self.retry_policy.clone())
            .when(EmailError::is_retryable)
            .notify(|err, dur: Duration| {
                tracing::warn!(
                    to = %message.to,
                    error = %err,
                    retry_in_ms = dur.as_millis() as u64,
                    "Email send failed, retrying"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::routing::post;

    use super::*;

    /// Local Resend stand-in answering with a fixed sequence of statuses, then 200.
    #[derive(Clone)]
    struct StubProvider {
        hits: Arc<AtomicUsize>,
        statuses: Arc<Vec<StatusCode>>,
    }

    async fn stub_send(State(stub): State<StubProvider>) -> (StatusCode, Json<serde_json::Value>) {
        let n = stub.hits.fetch_add(1, Ordering::SeqCst);
        match stub.statuses.get(n) {
            Some(status) => (*status, Json(serde_json::json!({ "message": "stubbed failure" }))),
            None => (StatusCode::OK, Json(serde_json::json!({ "id": format!("msg-{}", n) }))),
        }
    }

    async fn spawn_stub(statuses: Vec<StatusCode>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let stub = StubProvider {
            hits: hits.clone(),
            statuses: Arc::new(statuses),
        };
        let app = Router::new().route("/emails", post(stub_send)).with_state(stub);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), hits)
    }

    fn fast_retry_policy(max_retries: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50))
            .with_max_times(max_retries)
    }

    fn message() -> EmailMessage {
        EmailMessage {
            from: "Keepla <no-reply@keepla.app>".to_string(),
            to: "bo@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: "Hi".to_string(),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let msg = message();
        let body = serde_json::to_value(SendEmailRequest::from(&msg)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "from": "Keepla <no-reply@keepla.app>",
                "to": ["bo@example.com"],
                "subject": "Hello",
                "html": "<p>Hi</p>",
                "text": "Hi"
            })
        );
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client =
            ResendClient::new("key", "https://api.resend.com/", default_retry_policy(0)).unwrap();
        assert_eq!(client.endpoint(), "https://api.resend.com/emails");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EmailError::RateLimited.is_retryable());
        assert!(
            EmailError::Rejected {
                status: StatusCode::BAD_GATEWAY,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !EmailError::Rejected {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: "invalid `to` field".to_string()
            }
            .is_retryable()
        );
        assert!(!EmailError::Decode("missing id".to_string()).is_retryable());
    }

    #[test]
    fn test_response_decode() {
        let resp: SendEmailResponse =
            serde_json::from_str(r#"{"id":"49a3999c-0ce1-4ea6-ab68-afcd6dc2e794"}"#).unwrap();
        assert_eq!(resp.id, "49a3999c-0ce1-4ea6-ab68-afcd6dc2e794");
    }

    #[tokio::test]
    async fn test_server_error_is_retried_once_then_succeeds() {
        let (base_url, hits) = spawn_stub(vec![StatusCode::SERVICE_UNAVAILABLE]).await;
        let client = ResendClient::new("key", &base_url, fast_retry_policy(3)).unwrap();

        let id = client.send(&message()).await.unwrap();

        assert_eq!(id, "msg-1");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let (base_url, hits) = spawn_stub(vec![StatusCode::TOO_MANY_REQUESTS]).await;
        let client = ResendClient::new("key", &base_url, fast_retry_policy(3)).unwrap();

        assert!(client.send(&message()).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (base_url, hits) = spawn_stub(vec![StatusCode::UNPROCESSABLE_ENTITY]).await;
        let client = ResendClient::new("key", &base_url, fast_retry_policy(3)).unwrap();

        let err = client.send(&message()).await.unwrap_err();

        assert!(matches!(
            err,
            EmailError::Rejected { status, .. } if status == StatusCode::UNPROCESSABLE_ENTITY
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_limit() {
        let (base_url, hits) = spawn_stub(vec![StatusCode::BAD_GATEWAY; 5]).await;
        let client = ResendClient::new("key", &base_url, fast_retry_policy(2)).unwrap();

        let err = client.send(&message()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
