use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::models::DatePosted;

pub const DEFAULT_JSEARCH_HOST: &str = "jsearch.p.rapidapi.com";

#[derive(Debug, Clone)]
pub struct JSearchConfig {
    pub api_key: String,
    pub api_host: String,
    pub base_url: String,
}

impl JSearchConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("JSEARCH_API_KEY")
            .context("JSEARCH_API_KEY environment variable not set. Set it with: export JSEARCH_API_KEY=your-rapidapi-key")?;
        let api_host = env::var("JSEARCH_API_HOST").unwrap_or_else(|_| DEFAULT_JSEARCH_HOST.to_string());
        let base_url = env::var("JSEARCH_BASE_URL").unwrap_or_else(|_| format!("https://{}", api_host));
        Ok(Self { api_key, api_host, base_url })
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl SupabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = env::var("SUPABASE_URL")
            .context("SUPABASE_URL environment variable not set. Set it with: export SUPABASE_URL=https://<project>.supabase.co")?;
        let anon_key = env::var("SUPABASE_ANON_KEY")
            .context("SUPABASE_ANON_KEY environment variable not set. Set it with: export SUPABASE_ANON_KEY=your-anon-key")?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }
}

/// The date scope applied to every search, `JOBIFY_DATE_POSTED` or `all`.
pub fn date_posted() -> Result<DatePosted> {
    match env::var("JOBIFY_DATE_POSTED") {
        Ok(value) => value.parse().map_err(anyhow::Error::msg),
        Err(_) => Ok(DatePosted::default()),
    }
}

pub fn session_path() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobify") {
        proj_dirs.data_dir().join("session.json")
    } else {
        PathBuf::from("jobify-session.json")
    }
}
