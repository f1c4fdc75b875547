//! REST client for the ICQ bot API.
//!
//! Wraps the two endpoints the dumper needs (`POST /rapi` with the
//! `getHistory` method, and `GET /getBuddyList`) using [`reqwest`]. The
//! API expects browser-like request headers, so every request carries them.

use std::time::Duration;

use chatdump_core::types::MessageId;
use reqwest::header::{self, HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::types::{
    Buddy, BuddyListResponse, HistoryParams, HistoryRequest, HistoryResponse, HistoryResults,
    HISTORY_PATCH_VERSION,
};

/// Public endpoint of the bot API.
pub const DEFAULT_API_URL: &str = "https://botapi.icq.net";

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Ubuntu Chromium/62.0.3202.89 Chrome/62.0.3202.89 Safari/537.36";

/// Errors from the ICQ REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum IcqApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("ICQ API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("Malformed ICQ API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A `getHistory` response carried no `results` object.
    #[error("ICQ API response for {method} has no results")]
    MissingResults { method: &'static str },
}

/// HTTP client bound to one session id (`aimsid`).
#[derive(Debug, Clone)]
pub struct IcqApi {
    client: reqwest::Client,
    api_url: String,
    aimsid: String,
}

impl IcqApi {
    /// Create a client for the public endpoint.
    pub fn new(aimsid: impl Into<String>) -> Result<Self, IcqApiError> {
        Self::with_base_url(aimsid, DEFAULT_API_URL)
    }

    /// Create a client for a custom endpoint, e.g. a local proxy.
    ///
    /// * `api_url` - Base HTTP URL without a trailing slash.
    pub fn with_base_url(
        aimsid: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Result<Self, IcqApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(default_headers())
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            aimsid: aimsid.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Build the `getHistory` request body for one page.
    pub fn history_request(&self, chat_id: &str, from_msg_id: MessageId, count: u32) -> HistoryRequest {
        HistoryRequest {
            method: "getHistory",
            req_id: Uuid::new_v4().to_string(),
            aimsid: self.aimsid.clone(),
            params: HistoryParams {
                sn: chat_id.to_string(),
                from_msg_id,
                count,
                patch_version: HISTORY_PATCH_VERSION,
            },
        }
    }

    /// Fetch up to `count` messages of `chat_id`, starting at `from_msg_id`.
    ///
    /// Sends a `POST /rapi` request with the `getHistory` method.
    pub async fn get_history(
        &self,
        chat_id: &str,
        from_msg_id: MessageId,
        count: u32,
    ) -> Result<HistoryResults, IcqApiError> {
        tracing::debug!(chat_id, from_msg_id, count, "Requesting chat history page");

        let url = format!("{}/rapi", self.api_url);
        let response = self
            .client
            .post(&url)
            .header(header::ORIGIN, url.as_str())
            .json(&self.history_request(chat_id, from_msg_id, count))
            .send()
            .await?;

        let parsed: HistoryResponse = Self::parse_response(response).await?;
        parsed.results.ok_or(IcqApiError::MissingResults {
            method: "getHistory",
        })
    }

    /// Fetch every buddy (contact or group chat) across all groups.
    ///
    /// Sends a `GET /getBuddyList` request.
    pub async fn get_buddy_list(&self) -> Result<Vec<Buddy>, IcqApiError> {
        tracing::debug!("Requesting buddy list");

        let url = format!("{}/getBuddyList", self.api_url);
        let request_id = Uuid::new_v4().to_string();
        let response = self
            .client
            .get(&url)
            .header(header::ORIGIN, url.as_str())
            .query(&[("aimsid", self.aimsid.as_str()), ("r", request_id.as_str())])
            .send()
            .await?;

        let parsed: BuddyListResponse = Self::parse_response(response).await?;
        tracing::info!(
            status_code = parsed.response.status_code,
            "Buddy list fetched",
        );
        Ok(parsed.into_buddies())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`IcqApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, IcqApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(IcqApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// The body is read as bytes first so decode failures surface as
    /// [`IcqApiError::Decode`] rather than a transport error.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, IcqApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
    headers
}
