use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::SessionHandle;
use crate::error::{Error, Result};
use crate::models::{JobSummary, SavedJob};
use crate::store::SavedJobStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedSetState {
    /// Most recently saved first.
    pub items: Vec<SavedJob>,
    /// Saved flag per job id, filled lazily by `is_saved` and by mutations.
    pub flags: HashMap<String, bool>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct Inner {
    state: SavedSetState,
    /// Ticket of the check in flight per job; a check whose ticket was
    /// replaced or withdrawn is ignored. Removed once the check completes.
    tickets: HashMap<String, u64>,
    list_ticket: u64,
    next_ticket: u64,
}

impl Inner {
    fn issue(&mut self, job_id: &str) -> u64 {
        self.next_ticket += 1;
        self.tickets.insert(job_id.to_string(), self.next_ticket);
        self.next_ticket
    }

    /// Record a confirmed flag and withdraw any check still in flight.
    fn mark(&mut self, job_id: &str, saved: bool) {
        self.tickets.remove(job_id);
        self.state.flags.insert(job_id.to_string(), saved);
    }
}

/// Saved/unsaved status of jobs for the signed-in user.
///
/// Local state changes only after the remote store confirms an operation.
pub struct SavedJobs {
    store: Arc<dyn SavedJobStore>,
    session: SessionHandle,
    inner: Mutex<Inner>,
}

impl SavedJobs {
    pub fn new(store: Arc<dyn SavedJobStore>, session: SessionHandle) -> Self {
        Self {
            store,
            session,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn state(&self) -> SavedSetState {
        self.inner.lock().await.state.clone()
    }

    pub async fn cached_flag(&self, job_id: &str) -> Option<bool> {
        self.inner.lock().await.state.flags.get(job_id).copied()
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.session.require()?.user_id)
    }

    pub async fn is_saved(&self, job_id: &str) -> Result<bool> {
        let user_id = self.user_id()?;
        let ticket = self.inner.lock().await.issue(job_id);

        let result = match self.store.find(&user_id, job_id).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        };

        let mut inner = self.inner.lock().await;
        let current = inner.tickets.get(job_id) == Some(&ticket);
        if current {
            inner.tickets.remove(job_id);
        }
        let saved = result?;
        if current {
            inner.state.flags.insert(job_id.to_string(), saved);
        } else {
            debug!(job_id, ticket, "dropping stale saved check");
        }
        Ok(saved)
    }

    /// Check each job in turn, one round trip per job. Per-job failures are
    /// logged and skipped; returns how many checks succeeded.
    pub async fn check_all(&self, jobs: &[JobSummary]) -> Result<usize> {
        self.user_id()?;
        let mut checked = 0;
        for job in jobs {
            match self.is_saved(&job.id).await {
                Ok(_) => checked += 1,
                Err(Error::Unauthenticated) => return Err(Error::Unauthenticated),
                Err(e) => warn!("Checking saved state of {} failed: {}", job.id, e),
            }
        }
        Ok(checked)
    }

    /// Save `job` for the current user. Saving an already-saved job returns
    /// the existing row instead of inserting another.
    pub async fn save(&self, job: &JobSummary) -> Result<SavedJob> {
        let user_id = self.user_id()?;

        let saved = match self.store.find(&user_id, &job.id).await {
            Ok(existing) => {
                debug!(job_id = %job.id, row = %existing.id, "already saved");
                existing
            }
            Err(Error::NotFound) => match self.store.insert(&user_id, job).await {
                Ok(row) => {
                    info!(job_id = %job.id, row = %row.id, "saved");
                    row
                }
                // Saved concurrently elsewhere; the unique index kept one row.
                Err(Error::Conflict(_)) => self.store.find(&user_id, &job.id).await?,
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        };

        let mut inner = self.inner.lock().await;
        if !inner.state.items.iter().any(|s| s.job.id == saved.job.id) {
            inner.state.items.insert(0, saved.clone());
        }
        inner.mark(&job.id, true);
        Ok(saved)
    }

    /// Remove the saved row for `job_id`. Unsaving a job that was never saved
    /// succeeds and leaves the list untouched.
    pub async fn unsave(&self, job_id: &str) -> Result<()> {
        let user_id = self.user_id()?;
        self.store.delete(&user_id, job_id).await?;
        info!(job_id, "unsaved");

        let mut inner = self.inner.lock().await;
        inner.state.items.retain(|s| s.job.id != job_id);
        inner.mark(job_id, false);
        Ok(())
    }

    /// Replace the local list with every saved row, newest first.
    pub async fn fetch_all(&self) -> Result<Vec<SavedJob>> {
        let user_id = self.user_id()?;
        let ticket = {
            let mut inner = self.inner.lock().await;
            inner.next_ticket += 1;
            inner.list_ticket = inner.next_ticket;
            inner.state.is_loading = true;
            inner.state.error = None;
            inner.list_ticket
        };

        let result = self.store.list(&user_id).await;

        let mut inner = self.inner.lock().await;
        if inner.list_ticket != ticket {
            debug!(ticket, "dropping stale saved list");
            return result;
        }
        inner.state.is_loading = false;
        match result {
            Ok(rows) => {
                for saved in inner.state.flags.values_mut() {
                    *saved = false;
                }
                for row in &rows {
                    inner.state.flags.insert(row.job.id.clone(), true);
                }
                inner.state.items = rows.clone();
                Ok(rows)
            }
            Err(e) => {
                inner.state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Forget everything; called when the session ends.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = SavedSetState::default();
        inner.tickets.clear();
        inner.list_ticket = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fixtures::session;
    use crate::models::fixtures::job;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// In-memory `saved_jobs` with a unique (user, job) index.
    #[derive(Default)]
    struct FakeStore {
        rows: std::sync::Mutex<Vec<SavedJob>>,
        inserts: AtomicUsize,
        finds: AtomicUsize,
        deletes: AtomicUsize,
        /// Next `find` reports no row even if one exists.
        blind_find: AtomicBool,
        fail_finds: AtomicBool,
        fail_writes: AtomicBool,
        fail_lists: AtomicBool,
        find_gate: std::sync::Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl FakeStore {
        fn seed(&self, user_id: &str, job_id: &str) {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() + 100;
            rows.insert(0, SavedJob {
                id: id.to_string(),
                user_id: Some(user_id.to_string()),
                job: job(job_id),
                created_at: None,
            });
        }

        fn count(&self, user_id: &str, job_id: &str) -> usize {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.user_id.as_deref() == Some(user_id) && r.job.id == job_id)
                .count()
        }
    }

    #[async_trait]
    impl SavedJobStore for FakeStore {
        async fn list(&self, user_id: &str) -> Result<Vec<SavedJob>> {
            if self.fail_lists.load(Ordering::SeqCst) {
                return Err(Error::Http { status: 503, message: "unavailable".into() });
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.user_id.as_deref() == Some(user_id))
                .cloned()
                .collect())
        }

        async fn find(&self, user_id: &str, job_id: &str) -> Result<SavedJob> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            if self.fail_finds.load(Ordering::SeqCst) {
                return Err(Error::Http { status: 500, message: "boom".into() });
            }
            let result = if self.blind_find.swap(false, Ordering::SeqCst) {
                Err(Error::NotFound)
            } else {
                self.rows
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|r| r.user_id.as_deref() == Some(user_id) && r.job.id == job_id)
                    .cloned()
                    .ok_or(Error::NotFound)
            };
            let gate = self.find_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }

        async fn insert(&self, user_id: &str, job: &JobSummary) -> Result<SavedJob> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Http { status: 500, message: "insert failed".into() });
            }
            if self.count(user_id, &job.id) > 0 {
                return Err(Error::Conflict("duplicate key".into()));
            }
            self.inserts.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            let row = SavedJob {
                id: format!("row-{}", rows.len() + 1),
                user_id: Some(user_id.to_string()),
                job: job.clone(),
                created_at: None,
            };
            rows.insert(0, row.clone());
            Ok(row)
        }

        async fn delete(&self, user_id: &str, job_id: &str) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Http { status: 500, message: "delete failed".into() });
            }
            self.rows
                .lock()
                .unwrap()
                .retain(|r| !(r.user_id.as_deref() == Some(user_id) && r.job.id == job_id));
            Ok(())
        }
    }

    fn signed_in(store: Arc<FakeStore>) -> SavedJobs {
        SavedJobs::new(store, SessionHandle::new(Some(session("u1"))))
    }

    #[tokio::test]
    async fn test_save_inserts_and_prepends() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());
        saved.save(&job("old")).await.unwrap();

        let row = saved.save(&job("abc")).await.unwrap();

        assert_eq!(row.job.id, "abc");
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
        let state = saved.state().await;
        assert_eq!(state.items[0].job.id, "abc");
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.flags.get("abc"), Some(&true));
    }

    #[tokio::test]
    async fn test_save_twice_keeps_one_row() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());

        let first = saved.save(&job("abc")).await.unwrap();
        let second = saved.save(&job("abc")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(store.count("u1", "abc"), 1);
        let state = saved.state().await;
        assert_eq!(state.items.iter().filter(|s| s.job.id == "abc").count(), 1);
    }

    #[tokio::test]
    async fn test_save_conflict_returns_existing_row() {
        let store = Arc::new(FakeStore::default());
        store.seed("u1", "abc");
        store.blind_find.store(true, Ordering::SeqCst);
        let saved = signed_in(store.clone());

        let row = saved.save(&job("abc")).await.unwrap();

        assert_eq!(row.id, "100");
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(store.count("u1", "abc"), 1);
        assert_eq!(saved.state().await.items.len(), 1);
    }

    #[tokio::test]
    async fn test_unsave_never_saved_is_ok() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());
        saved.save(&job("keep")).await.unwrap();
        let before = saved.state().await.items;

        saved.unsave("ghost").await.unwrap();

        assert_eq!(saved.state().await.items, before);
        assert_eq!(saved.cached_flag("ghost").await, Some(false));
    }

    #[tokio::test]
    async fn test_unsave_removes_local_entry() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());
        saved.save(&job("abc")).await.unwrap();

        saved.unsave("abc").await.unwrap();

        assert!(saved.state().await.items.is_empty());
        assert_eq!(store.count("u1", "abc"), 0);
        assert!(!saved.is_saved("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_saved_maps_not_found_to_false() {
        let store = Arc::new(FakeStore::default());
        store.seed("u1", "yes");
        store.seed("u2", "other-user");
        let saved = signed_in(store.clone());

        assert!(saved.is_saved("yes").await.unwrap());
        assert!(!saved.is_saved("no").await.unwrap());
        assert!(!saved.is_saved("other-user").await.unwrap());
        assert_eq!(saved.cached_flag("no").await, Some(false));
    }

    #[tokio::test]
    async fn test_is_saved_propagates_other_errors() {
        let store = Arc::new(FakeStore::default());
        store.fail_finds.store(true, Ordering::SeqCst);
        let saved = signed_in(store);

        let err = saved.is_saved("abc").await.unwrap_err();
        assert!(err.is_network_failure());
        assert_eq!(saved.cached_flag("abc").await, None);
    }

    #[tokio::test]
    async fn test_check_all_runs_serially_and_skips_failures() {
        let store = Arc::new(FakeStore::default());
        store.seed("u1", "b");
        let saved = signed_in(store.clone());

        let checked = saved.check_all(&[job("a"), job("b"), job("c")]).await.unwrap();

        assert_eq!(checked, 3);
        assert_eq!(store.finds.load(Ordering::SeqCst), 3);
        let flags = saved.state().await.flags;
        assert_eq!(flags.get("a"), Some(&false));
        assert_eq!(flags.get("b"), Some(&true));
        assert!(saved.inner.lock().await.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_replaces_items_newest_first() {
        let store = Arc::new(FakeStore::default());
        store.seed("u1", "first");
        store.seed("u1", "second");
        let saved = signed_in(store.clone());
        saved.unsave("stale").await.unwrap();

        let rows = saved.fetch_all().await.unwrap();

        assert_eq!(rows.len(), 2);
        let state = saved.state().await;
        assert_eq!(state.items[0].job.id, "second");
        assert_eq!(state.flags.get("first"), Some(&true));
        assert_eq!(state.flags.get("stale"), Some(&false));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_clear_drops_local_state() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store);
        saved.save(&job("abc")).await.unwrap();

        saved.clear().await;

        assert_eq!(saved.state().await, SavedSetState::default());
    }

    #[tokio::test]
    async fn test_signed_out_operations_fail_without_store_calls() {
        let store = Arc::new(FakeStore::default());
        let session = SessionHandle::new(Some(session("u1")));
        let saved = SavedJobs::new(store.clone(), session.clone());
        session.clear();

        assert!(matches!(saved.is_saved("abc").await, Err(Error::Unauthenticated)));
        assert!(matches!(saved.save(&job("abc")).await, Err(Error::Unauthenticated)));
        assert!(matches!(saved.unsave("abc").await, Err(Error::Unauthenticated)));
        assert!(matches!(saved.fetch_all().await, Err(Error::Unauthenticated)));
        assert!(matches!(saved.check_all(&[job("abc")]).await, Err(Error::Unauthenticated)));
        assert_eq!(store.finds.load(Ordering::SeqCst), 0);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_check_does_not_override_save() {
        let store = Arc::new(FakeStore::default());
        let (release, gate) = oneshot::channel();
        *store.find_gate.lock().unwrap() = Some(gate);
        let saved = Arc::new(signed_in(store.clone()));

        let check = tokio::spawn({
            let saved = saved.clone();
            async move { saved.is_saved("abc").await }
        });
        for _ in 0..1000 {
            if store.finds.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        saved.save(&job("abc")).await.unwrap();
        release.send(()).unwrap();

        assert!(!check.await.unwrap().unwrap());
        assert_eq!(saved.cached_flag("abc").await, Some(true));
        assert!(saved.inner.lock().await.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_failed_check_releases_ticket() {
        let store = Arc::new(FakeStore::default());
        store.fail_finds.store(true, Ordering::SeqCst);
        let saved = signed_in(store);

        assert!(saved.is_saved("abc").await.is_err());
        assert!(saved.inner.lock().await.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state_unchanged() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());
        saved.save(&job("keep")).await.unwrap();
        assert!(!saved.is_saved("abc").await.unwrap());
        let before = saved.state().await;

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = saved.save(&job("abc")).await.unwrap_err();

        assert!(err.is_network_failure());
        assert_eq!(saved.state().await, before);
        assert_eq!(store.count("u1", "abc"), 0);
    }

    #[tokio::test]
    async fn test_failed_unsave_keeps_entry() {
        let store = Arc::new(FakeStore::default());
        let saved = signed_in(store.clone());
        saved.save(&job("abc")).await.unwrap();
        let before = saved.state().await;

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(saved.unsave("abc").await.is_err());

        assert_eq!(saved.state().await, before);
        assert_eq!(saved.cached_flag("abc").await, Some(true));
        assert_eq!(store.count("u1", "abc"), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_all_keeps_previous_items() {
        let store = Arc::new(FakeStore::default());
        store.seed("u1", "first");
        let saved = signed_in(store.clone());
        saved.fetch_all().await.unwrap();
        let before = saved.state().await;

        store.fail_lists.store(true, Ordering::SeqCst);
        assert!(saved.fetch_all().await.is_err());

        let state = saved.state().await;
        assert_eq!(state.items, before.items);
        assert_eq!(state.flags, before.flags);
        assert!(!state.is_loading);
        assert!(state.error.as_deref().unwrap().contains("503"));
    }
}
