//! Single outbound revalidation request
//!
//! One call, one outcome. Retrying is left to the next deploy.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::debug;

use crate::types::RevalidationError;

/// Maximum response body kept in an attempt record
const MAX_BODY_SIZE: usize = 1024;

/// HTTP sender with a fixed per-request timeout
#[derive(Clone)]
pub struct RevalidationSender {
    client: Client,
    timeout: Duration,
}

impl RevalidationSender {
    pub fn new(timeout_seconds: u64) -> Result<Self, RevalidationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| RevalidationError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send a prepared request; any non-2xx status is an error
    pub async fn send(&self, request: RequestBuilder) -> Result<String, RevalidationError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RevalidationError::Timeout(self.timeout.as_secs())
            } else if e.is_connect() {
                RevalidationError::Request(format!("Failed to connect: {}", e))
            } else {
                RevalidationError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        // A body that cannot be read still leaves the status meaningful
        let body = response.text().await.unwrap_or_default();
        let body = truncate_body(body);

        debug!(status = status.as_u16(), body_len = body.len(), "Revalidation response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(RevalidationError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_BODY_SIZE {
        let mut end = MAX_BODY_SIZE;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_creation() {
        assert!(RevalidationSender::new(5).is_ok());
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("ok".to_string()), "ok");

        let long = "y".repeat(MAX_BODY_SIZE * 2);
        let truncated = truncate_body(long);
        assert_eq!(truncated.len(), MAX_BODY_SIZE + 3);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender = RevalidationSender::new(2).unwrap();
        let result = sender
            .send(sender.post(&format!("http://{}/api/revalidate", addr)))
            .await;

        assert!(matches!(result, Err(RevalidationError::Request(_))));
    }
}
