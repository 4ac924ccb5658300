use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::JSearchConfig;
use crate::error::{check_status, Error, Result};
use crate::models::{detail_from_value, summary_from_value, JobDetail, JobSummary};
use crate::pager::SearchQuery;

pub const DEFAULT_COUNTRY: &str = "us";

/// One fetched result page after boundary validation.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub jobs: Vec<JobSummary>,
    /// Records the source returned, including ones rejected as invalid.
    pub received: usize,
}

impl SearchPage {
    pub fn from_records(records: Vec<serde_json::Value>) -> Self {
        let received = records.len();
        let mut jobs = Vec::with_capacity(received);
        for record in records {
            match summary_from_value(record) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping invalid search record: {}", e),
            }
        }
        Self { jobs, received }
    }
}

// --- Source trait ---

#[async_trait]
pub trait JobSource: Send + Sync {
    async fn search(&self, query: &SearchQuery, page: u32) -> Result<SearchPage>;
    async fn job_details(&self, job_id: &str, country: &str) -> Result<JobDetail>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Vec<serde_json::Value>>,
}

impl Envelope {
    fn into_data(self) -> Result<Vec<serde_json::Value>> {
        self.data
            .ok_or_else(|| Error::Decode("response has no data field".to_string()))
    }
}

// --- JSearch (RapidAPI) client ---

#[derive(Debug, Clone)]
pub struct JSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_host: String,
}

impl JSearchClient {
    pub fn new(config: &JSearchConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_host: config.api_host.clone(),
        }
    }

    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, ?params, "GET");

        let resp = self
            .http
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.api_host)
            .query(params)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| Error::Decode(format!("{} response: {}", endpoint, e)))?;
        envelope.into_data()
    }
}

#[async_trait]
impl JobSource for JSearchClient {
    async fn search(&self, query: &SearchQuery, page: u32) -> Result<SearchPage> {
        let records = self.get("search", &query.params(page)).await?;
        let page = SearchPage::from_records(records);
        debug!(received = page.received, accepted = page.jobs.len(), "search page");
        Ok(page)
    }

    async fn job_details(&self, job_id: &str, country: &str) -> Result<JobDetail> {
        let params = [("job_id", job_id.to_string()), ("country", country.to_string())];
        let record = self
            .get("job-details", &params)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound)?;
        detail_from_value(record)
    }
}
