//! HTTP transport for the poller
//!
//! Talks to the gateway with the caller's bearer token, so every request is
//! subject to the same ownership and paywall checks as a browser client.

use async_trait::async_trait;
use nexora_common::{
    errors::{AppError, ErrorResponse, Result},
    pipeline::{JobDriver, JobProgress},
};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedEbook {
    pub job_id: Uuid,
    pub title: Option<String>,
    pub total_chapters: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Finalized {
    final_markdown: String,
}

pub struct HttpDriver {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpDriver {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start a new ebook. Title and outline are generated before this
    /// returns.
    pub async fn start_ebook(&self, topic: &str, length: Option<&str>) -> Result<StartedEbook> {
        let response = self
            .client
            .post(self.url("/generate-ebook"))
            .bearer_auth(&self.token)
            .json(&json!({ "topic": topic, "length": length }))
            .send()
            .await?;
        read_json(response).await
    }
}

/// Decode a 2xx body, or turn the gateway's error envelope back into an
/// [`AppError`]
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| format!("{:?}: {}", e.error.code, e.error.message))
        .unwrap_or(body);

    Err(match status {
        StatusCode::UNAUTHORIZED => AppError::Unauthorized { message },
        StatusCode::NOT_FOUND => AppError::NotFound {
            resource_type: "gateway resource".to_string(),
            id: message,
        },
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited { limit: 0 },
        _ => AppError::Internal {
            message: format!("gateway returned {}: {}", status, message),
        },
    })
}

#[async_trait]
impl JobDriver for HttpDriver {
    async fn fetch_status(&self, job_id: Uuid) -> Result<JobProgress> {
        let response = self
            .client
            .get(self.url("/ebook-status"))
            .query(&[("jobId", job_id.to_string())])
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response).await
    }

    async fn trigger_chapter(&self, job_id: Uuid, index: u32) -> Result<()> {
        let response = self
            .client
            .post(self.url("/generate-chapter"))
            .bearer_auth(&self.token)
            .json(&json!({ "jobId": job_id, "chapterIndex": index }))
            .send()
            .await?;
        read_json::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn finalize(&self, job_id: Uuid) -> Result<String> {
        let response = self
            .client
            .post(self.url("/finalize-ebook"))
            .bearer_auth(&self.token)
            .json(&json!({ "jobId": job_id }))
            .send()
            .await?;
        read_json::<Finalized>(response)
            .await
            .map(|f| f.final_markdown)
    }
}
