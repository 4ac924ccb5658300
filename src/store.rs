use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::SessionHandle;
use crate::config::SupabaseConfig;
use crate::error::{Error, Result};
use crate::models::{saved_from_value, JobSummary, SavedJob};

const TABLE: &str = "saved_jobs";

/// PostgREST code for "`.single()` matched no rows".
const NO_ROWS: &str = "PGRST116";
/// Postgres unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Remote table of saved jobs, scoped per user.
#[async_trait]
pub trait SavedJobStore: Send + Sync {
    /// Every row for `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<SavedJob>>;
    /// The single row for (user, job), or `Error::NotFound`.
    async fn find(&self, user_id: &str, job_id: &str) -> Result<SavedJob>;
    /// Insert a row; a duplicate (user, job) yields `Error::Conflict`.
    async fn insert(&self, user_id: &str, job: &JobSummary) -> Result<SavedJob>;
    /// Delete matching rows. Deleting nothing is not an error.
    async fn delete(&self, user_id: &str, job_id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct NewSavedJob<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    job: &'a JobSummary,
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

/// `saved_jobs` over the Supabase REST interface.
pub struct SupabaseStore {
    http: reqwest::Client,
    table_url: String,
    anon_key: String,
    session: SessionHandle,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig, session: SessionHandle) -> Self {
        Self {
            http: reqwest::Client::new(),
            table_url: format!("{}/rest/v1/{}", config.url.trim_end_matches('/'), TABLE),
            anon_key: config.anon_key.clone(),
            session,
        }
    }

    fn request(&self, method: reqwest::Method) -> Result<reqwest::RequestBuilder> {
        let session = self.session.require()?;
        debug!(%method, url = %self.table_url, "store request");
        Ok(self
            .http
            .request(method, &self.table_url)
            .header("apikey", &self.anon_key)
            .bearer_auth(session.access_token))
    }

    fn row_filter(user_id: &str, job_id: &str) -> [(&'static str, String); 2] {
        [
            ("user_id", format!("eq.{}", user_id)),
            ("job_id", format!("eq.{}", job_id)),
        ]
    }

    /// Map a failed response onto the store's error taxonomy.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let parsed: PostgrestError = serde_json::from_str(&body).unwrap_or_default();
        match parsed.code.as_deref() {
            Some(NO_ROWS) => Err(Error::NotFound),
            // Expired or revoked access token.
            _ if status == reqwest::StatusCode::UNAUTHORIZED => Err(Error::Unauthenticated),
            Some(UNIQUE_VIOLATION) => Err(Error::Conflict(parsed.message.unwrap_or(body))),
            _ if status == reqwest::StatusCode::CONFLICT => Err(Error::Conflict(body)),
            _ => Err(Error::Http {
                status: status.as_u16(),
                message: parsed.message.unwrap_or(body),
            }),
        }
    }

    async fn single(resp: reqwest::Response) -> Result<SavedJob> {
        let resp = Self::check(resp).await?;
        let row: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Decode(format!("saved job row: {}", e)))?;
        saved_from_value(row).map_err(|e| Error::Decode(format!("saved job row: {}", e)))
    }
}

#[async_trait]
impl SavedJobStore for SupabaseStore {
    async fn list(&self, user_id: &str) -> Result<Vec<SavedJob>> {
        let resp = self
            .request(reqwest::Method::GET)?
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let rows: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| Error::Decode(format!("saved job rows: {}", e)))?;

        let mut saved = Vec::with_capacity(rows.len());
        for row in rows {
            match saved_from_value(row) {
                Ok(job) => saved.push(job),
                Err(e) => warn!("Skipping invalid saved job row: {}", e),
            }
        }
        Ok(saved)
    }

    async fn find(&self, user_id: &str, job_id: &str) -> Result<SavedJob> {
        let resp = self
            .request(reqwest::Method::GET)?
            .query(&[("select", "*")])
            .query(&Self::row_filter(user_id, job_id))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;
        Self::single(resp).await
    }

    async fn insert(&self, user_id: &str, job: &JobSummary) -> Result<SavedJob> {
        let resp = self
            .request(reqwest::Method::POST)?
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&NewSavedJob { user_id, job })
            .send()
            .await?;
        Self::single(resp).await
    }

    async fn delete(&self, user_id: &str, job_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE)?
            .query(&Self::row_filter(user_id, job_id))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fixtures::session;
    use crate::models::fixtures::{job, raw_job};
    use mockito::Matcher;

    fn row(id: i64, job_id: &str) -> serde_json::Value {
        let mut row = raw_job(job_id);
        row["id"] = serde_json::json!(id);
        row["user_id"] = serde_json::json!("u1");
        row["created_at"] = serde_json::json!("2024-03-02T08:00:00+00:00");
        row
    }

    fn store(server: &mockito::Server) -> SupabaseStore {
        let config = SupabaseConfig {
            url: server.url(),
            anon_key: "anon".to_string(),
        };
        SupabaseStore::new(&config, SessionHandle::new(Some(session("u1"))))
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_for_user() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/saved_jobs")
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer token-u1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".into(), "eq.u1".into()),
                Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
            ]))
            .with_status(200)
            .with_body(serde_json::json!([row(2, "b"), row(1, "a")]).to_string())
            .create_async()
            .await;

        let rows = store(&server).list("u1").await.unwrap();
        mock.assert_async().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "2");
        assert_eq!(rows[0].job.id, "b");
    }

    #[tokio::test]
    async fn test_list_skips_invalid_rows() {
        let mut server = mockito::Server::new_async().await;
        let mut legacy = row(1, "old");
        legacy["job_posted_at_datetime_utc"] = serde_json::Value::Null;
        let mut relabeled = row(3, "relabeled");
        relabeled["job_employment_type"] = serde_json::json!("Full-time");
        let _mock = server
            .mock("GET", "/rest/v1/saved_jobs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(serde_json::json!([relabeled, row(2, "good"), legacy]).to_string())
            .create_async()
            .await;

        let rows = store(&server).list("u1").await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.job.id.as_str()).collect();
        assert_eq!(ids, vec!["relabeled", "good"]);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthenticated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/saved_jobs")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":"PGRST301","message":"JWT expired"}"#)
            .create_async()
            .await;

        let err = store(&server).list("u1").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn test_find_no_rows_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/saved_jobs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".into(), "eq.u1".into()),
                Matcher::UrlEncoded("job_id".into(), "eq.abc".into()),
            ]))
            .match_header("accept", "application/vnd.pgrst.object+json")
            .with_status(406)
            .with_body(r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned"}"#)
            .create_async()
            .await;

        let err = store(&server).find("u1", "abc").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn test_insert_sends_denormalized_row() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/saved_jobs")
            .match_header("prefer", "return=representation")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "user_id": "u1",
                "job_id": "abc",
                "job_title": "Engineer abc",
                "employer_name": "Acme",
                "job_employment_type": "FULLTIME",
                "job_city": "Austin"
            })))
            .with_status(201)
            .with_body(row(7, "abc").to_string())
            .create_async()
            .await;

        let saved = store(&server).insert("u1", &job("abc")).await.unwrap();
        mock.assert_async().await;
        assert_eq!(saved.id, "7");
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_conflict() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rest/v1/saved_jobs")
            .with_status(409)
            .with_body(r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#)
            .create_async()
            .await;

        let err = store(&server).insert("u1", &job("abc")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m.contains("duplicate")));
    }

    #[tokio::test]
    async fn test_delete_filters_by_user_and_job() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/rest/v1/saved_jobs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".into(), "eq.u1".into()),
                Matcher::UrlEncoded("job_id".into(), "eq.abc".into()),
            ]))
            .with_status(204)
            .create_async()
            .await;

        store(&server).delete("u1", "abc").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_http() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/saved_jobs")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(r#"{"code":"XX000","message":"boom"}"#)
            .create_async()
            .await;

        let err = store(&server).list("u1").await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 500, ref message } if message == "boom"));
    }

    #[tokio::test]
    async fn test_signed_out_store_refuses_requests() {
        let server = mockito::Server::new_async().await;
        let config = SupabaseConfig {
            url: server.url(),
            anon_key: "anon".to_string(),
        };
        let store = SupabaseStore::new(&config, SessionHandle::default());
        assert!(matches!(store.list("u1").await, Err(Error::Unauthenticated)));
    }
}
