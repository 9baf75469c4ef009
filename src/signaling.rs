//! HTTP offer/answer exchange for video sessions

use crate::media::{MediaError, SessionDescription, Signaling};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs the local offer as `{sdp, type}` and reads the answer back in the
/// same shape. One request per negotiation, no retries.
pub struct HttpSignaling {
    http: HttpClient,
    url: String,
}

impl HttpSignaling {
    pub fn new(url: impl Into<String>) -> Result<Self, MediaError> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MediaError::Signaling(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn exchange(&self, offer: &SessionDescription) -> Result<SessionDescription, MediaError> {
        debug!("Posting {} byte offer to {}", offer.sdp.len(), self.url);
        let response = self
            .http
            .post(&self.url)
            .json(offer)
            .send()
            .await
            .map_err(|e| MediaError::Signaling(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Signaling(format!(
                "signaling endpoint returned {}",
                status
            )));
        }

        let answer: SessionDescription = response
            .json()
            .await
            .map_err(|e| MediaError::Signaling(format!("invalid answer: {e}")))?;
        info!("Received {} from signaling endpoint", answer.kind);
        Ok(answer)
    }
}
