use anyhow::{Context, Result};
use tracing::debug;

use super::types::{Meeting, Speaker, TranscriptRecord};

/// Client for the backend's meeting history REST API.
///
/// Plain request/response plumbing around the persisted side of a
/// meeting; the live streaming path never goes through here.
pub struct MeetingApi {
    http: reqwest::Client,
    base_url: String,
}

impl MeetingApi {
    /// `base_url` is the API root, e.g. `http://host:8080/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn create_meeting(&self, title: &str) -> Result<Meeting> {
        let url = format!("{}/meetings", self.base_url);
        debug!("POST {url}");

        let meeting = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .context("Failed to create meeting")?
            .error_for_status()
            .context("Backend rejected meeting creation")?
            .json()
            .await
            .context("Failed to parse meeting")?;

        Ok(meeting)
    }

    /// Mark a meeting finished; the backend generates its summary.
    pub async fn complete_meeting(&self, meeting_id: u64) -> Result<Meeting> {
        let url = format!("{}/meetings/{}/complete", self.base_url, meeting_id);
        debug!("POST {url}");

        let meeting = self
            .http
            .post(&url)
            .send()
            .await
            .context("Failed to complete meeting")?
            .error_for_status()
            .context("Backend rejected meeting completion")?
            .json()
            .await
            .context("Failed to parse meeting")?;

        Ok(meeting)
    }

    pub async fn get_meeting(&self, meeting_id: u64) -> Result<Meeting> {
        let url = format!("{}/meetings/{}", self.base_url, meeting_id);
        self.get_json(&url).await
    }

    pub async fn list_meetings(&self) -> Result<Vec<Meeting>> {
        let url = format!("{}/meetings", self.base_url);
        self.get_json(&url).await
    }

    pub async fn delete_meeting(&self, meeting_id: u64) -> Result<()> {
        let url = format!("{}/meetings/{}", self.base_url, meeting_id);
        debug!("DELETE {url}");

        self.http
            .delete(&url)
            .send()
            .await
            .context("Failed to delete meeting")?
            .error_for_status()
            .context("Backend rejected meeting deletion")?;

        Ok(())
    }

    /// All persisted transcript lines of a meeting, in sequence order.
    pub async fn transcripts(&self, meeting_id: u64) -> Result<Vec<TranscriptRecord>> {
        let url = format!("{}/meetings/{}/transcripts", self.base_url, meeting_id);
        self.get_json(&url).await
    }

    pub async fn speakers(&self, meeting_id: u64) -> Result<Vec<Speaker>> {
        let url = format!("{}/meetings/{}/speakers", self.base_url, meeting_id);
        self.get_json(&url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {url}");

        let value = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("Backend returned an error: {url}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response: {url}"))?;

        Ok(value)
    }
}
