use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jsearch::JobSource;
use crate::models::{DatePosted, EmploymentType, ExperienceLevel, JobSummary};

/// Results per page; fixed by the upstream source.
pub const PAGE_SIZE: usize = 10;

/// The upstream API rejects an empty term, so blank searches ask for everything.
pub const ALL_JOBS_QUERY: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub employment_type: Option<EmploymentType>,
    pub experience: Option<ExperienceLevel>,
    pub date_posted: DatePosted,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_date_posted(mut self, date_posted: DatePosted) -> Self {
        self.date_posted = date_posted;
        self
    }

    pub fn normalized_text(&self) -> &str {
        let text = self.text.trim();
        if text.is_empty() { ALL_JOBS_QUERY } else { text }
    }

    /// Selecting the active type clears it; selecting another replaces it.
    pub fn toggle_employment_type(&mut self, employment_type: EmploymentType) {
        self.employment_type = if self.employment_type == Some(employment_type) {
            None
        } else {
            Some(employment_type)
        };
    }

    pub fn toggle_experience(&mut self, experience: ExperienceLevel) {
        self.experience = if self.experience == Some(experience) {
            None
        } else {
            Some(experience)
        };
    }

    /// Query-string parameters for one page of this search.
    pub fn params(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", self.normalized_text().to_string()),
            ("page", page.to_string()),
            ("num_pages", "1".to_string()),
            ("date_posted", self.date_posted.as_str().to_string()),
        ];
        if let Some(employment_type) = self.employment_type {
            params.push(("employment_types", employment_type.as_str().to_string()));
        }
        if let Some(experience) = self.experience {
            params.push(("job_requirements", experience.as_str().to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagerState {
    pub items: Vec<JobSummary>,
    pub page: u32,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub error: Option<String>,
    pub query: Option<SearchQuery>,
    generation: u64,
}

impl Default for PagerState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            has_more: true,
            is_loading: false,
            is_loading_more: false,
            error: None,
            query: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The response was applied to the state.
    Applied { fetched: usize },
    /// Nothing was dispatched.
    Skipped,
    /// A newer search started while this request was in flight; its
    /// response was dropped.
    Superseded,
}

/// Paged search over a [`JobSource`], accumulating results across
/// `load_more` calls.
///
/// Every `search` bumps a generation counter. Responses are applied only if
/// the generation they were issued under is still current, so a slow stale
/// response can never overwrite a newer search. Busy flags are set under the
/// state lock before the request is awaited, which makes `load_more`
/// re-entrancy-safe.
pub struct SearchPager {
    source: Arc<dyn JobSource>,
    state: Mutex<PagerState>,
}

impl SearchPager {
    pub fn new(source: Arc<dyn JobSource>) -> Self {
        Self {
            source,
            state: Mutex::new(PagerState::default()),
        }
    }

    pub async fn state(&self) -> PagerState {
        self.state.lock().await.clone()
    }

    pub async fn search(&self, query: SearchQuery) -> Result<FetchOutcome> {
        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.generation + 1;
            *state = PagerState {
                query: Some(query.clone()),
                is_loading: true,
                generation,
                ..PagerState::default()
            };
            generation
        };
        info!(query = query.normalized_text(), generation, "search");

        let result = self.source.search(&query, 1).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, current = state.generation, "dropping stale search response");
            return Ok(FetchOutcome::Superseded);
        }
        state.is_loading = false;
        match result {
            Ok(page) => {
                let fetched = page.jobs.len();
                state.has_more = page.received >= PAGE_SIZE;
                state.items = page.jobs;
                state.page = 1;
                Ok(FetchOutcome::Applied { fetched })
            }
            Err(e) => {
                warn!("Search failed: {}", e);
                state.items.clear();
                state.has_more = false;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn load_more(&self) -> Result<FetchOutcome> {
        let (query, next_page, generation) = {
            let mut state = self.state.lock().await;
            if !state.has_more || state.is_loading || state.is_loading_more {
                return Ok(FetchOutcome::Skipped);
            }
            let Some(query) = state.query.clone() else {
                return Ok(FetchOutcome::Skipped);
            };
            state.is_loading_more = true;
            (query, state.page + 1, state.generation)
        };
        debug!(page = next_page, generation, "load more");

        let result = self.source.search(&query, next_page).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, current = state.generation, "dropping stale page response");
            return Ok(FetchOutcome::Superseded);
        }
        state.is_loading_more = false;
        match result {
            Ok(page) => {
                let fetched = page.jobs.len();
                state.has_more = page.received >= PAGE_SIZE;
                state.items.extend(page.jobs);
                state.page = next_page;
                state.error = None;
                Ok(FetchOutcome::Applied { fetched })
            }
            Err(e) => {
                // Already loaded pages stay visible; the caller can retry.
                warn!("Loading page {} failed: {}", next_page, e);
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Re-run the last search from page 1. No-op before the first search.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        let query = self.state.lock().await.query.clone();
        match query {
            Some(query) => self.search(query).await,
            None => Ok(FetchOutcome::Skipped),
        }
    }
}
