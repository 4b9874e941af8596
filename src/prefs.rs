//! Server-synced user preferences with optimistic local writes.
//!
//! `update` merges a patch into whatever the cache holds right now, shows the
//! result immediately, then PUTs the whole object. A failed PUT puts back the
//! snapshot taken just before the merge. Nothing serializes overlapping
//! updates beyond that read-merge-write: a slow earlier PUT that fails after
//! a later one succeeded rolls the cache back past the later write.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiError};
use crate::filters::{ColumnFilter, Sort};
use crate::models::{Theme, UserPreferences};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferencesPatch {
    pub theme: Option<Theme>,
    pub sidebar_open: Option<bool>,
    pub search: Option<String>,
    pub column_filters: Option<Vec<ColumnFilter>>,
    pub sorts: Option<Vec<Sort>>,
    pub column_order: Option<Vec<Uuid>>,
    pub hidden_columns: Option<Vec<Uuid>>,
}

impl PreferencesPatch {
    pub fn theme(theme: Theme) -> Self {
        Self {
            theme: Some(theme),
            ..Self::default()
        }
    }

    pub fn sidebar_open(open: bool) -> Self {
        Self {
            sidebar_open: Some(open),
            ..Self::default()
        }
    }

    pub fn search(search: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            ..Self::default()
        }
    }

    pub fn column_filters(filters: Vec<ColumnFilter>) -> Self {
        Self {
            column_filters: Some(filters),
            ..Self::default()
        }
    }

    pub fn sorts(sorts: Vec<Sort>) -> Self {
        Self {
            sorts: Some(sorts),
            ..Self::default()
        }
    }

    pub fn columns(order: Vec<Uuid>, hidden: Vec<Uuid>) -> Self {
        Self {
            column_order: Some(order),
            hidden_columns: Some(hidden),
            ..Self::default()
        }
    }

    pub fn apply(&self, prefs: &mut UserPreferences) {
        if let Some(theme) = self.theme {
            prefs.theme = theme;
        }
        if let Some(open) = self.sidebar_open {
            prefs.sidebar_open = open;
        }
        if let Some(search) = &self.search {
            prefs.jobs.search = search.clone();
        }
        if let Some(filters) = &self.column_filters {
            prefs.jobs.column_filters = filters.clone();
        }
        if let Some(sorts) = &self.sorts {
            prefs.jobs.sorts = sorts.clone();
        }
        if let Some(order) = &self.column_order {
            prefs.jobs.column_order = order.clone();
        }
        if let Some(hidden) = &self.hidden_columns {
            prefs.jobs.hidden_columns = hidden.clone();
        }
    }
}

#[derive(Clone)]
pub struct PreferencesStore {
    api: ApiClient,
    cache: Arc<Mutex<Option<UserPreferences>>>,
    mirror: Option<PathBuf>,
}

impl PreferencesStore {
    /// Seeds the cache from the local mirror of the last confirmed snapshot, if any.
    pub fn new(api: ApiClient, mirror: Option<PathBuf>) -> Self {
        let seeded = mirror.as_deref().and_then(read_mirror);
        Self {
            api,
            cache: Arc::new(Mutex::new(seeded)),
            mirror,
        }
    }

    /// Last known snapshot; may be stale while a fetch is in flight.
    pub fn read(&self) -> UserPreferences {
        self.cache.lock().clone().unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.lock().is_some()
    }

    pub async fn load(&self) -> Result<UserPreferences, ApiError> {
        let prefs = self.api.get_preferences().await?;
        *self.cache.lock() = Some(prefs.clone());
        self.write_mirror(&prefs);
        Ok(prefs)
    }

    pub async fn update(&self, patch: PreferencesPatch) -> Result<UserPreferences, ApiError> {
        let (previous, next) = {
            let mut cache = self.cache.lock();
            let previous = cache.clone();
            let mut next = previous.clone().unwrap_or_default();
            patch.apply(&mut next);
            *cache = Some(next.clone());
            (previous, next)
        };

        match self.api.put_preferences(&next).await {
            Ok(saved) => {
                let mut cache = self.cache.lock();
                // a newer optimistic write is already showing; keep it and its mirror
                if cache.as_ref() == Some(&next) {
                    *cache = Some(saved.clone());
                    self.write_mirror(&saved);
                }
                drop(cache);
                debug!("preferences saved");
                Ok(saved)
            }
            Err(e) => {
                warn!(error = %e, "preferences update failed, rolling back");
                *self.cache.lock() = previous;
                Err(e)
            }
        }
    }

    /// Forgets the signed-in user's preferences, including the copy on disk.
    pub fn clear(&self) {
        *self.cache.lock() = None;
        let Some(path) = &self.mirror else { return };
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove preferences mirror");
            }
        }
    }

    fn write_mirror(&self, prefs: &UserPreferences) {
        let Some(path) = &self.mirror else { return };
        if let Err(e) = write_mirror(path, prefs) {
            warn!(error = %e, "failed to write preferences mirror");
        }
    }
}

fn read_mirror(path: &Path) -> Option<UserPreferences> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_mirror(path: &Path, prefs: &UserPreferences) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(prefs)?;
    std::fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{client, ok_json, status, FakeTransport};
    use crate::api::Method;
    use futures::FutureExt;
    use reqwest::StatusCode;
    use tokio::sync::Semaphore;

    const PATH: &str = "/users/me/preferences";

    fn echo_after_gate(gate: Arc<Semaphore>) -> Arc<FakeTransport> {
        FakeTransport::new(move |req| {
            let gate = gate.clone();
            let body = req.body.clone();
            let is_put = req.method == Method::Put;
            async move {
                if !is_put {
                    return ok_json(serde_json::to_value(UserPreferences::default()).unwrap());
                }
                gate.acquire().await.unwrap().forget();
                ok_json(body.unwrap_or_default())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_second_update_composes_on_first() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = echo_after_gate(gate.clone());
        let store = PreferencesStore::new(client(&transport), None);

        let first = store.update(PreferencesPatch::theme(Theme::Dark));
        let second = async {
            while transport.count(Method::Put, PATH) < 1 {
                tokio::task::yield_now().await;
            }
            store.update(PreferencesPatch::search("rust")).await
        };
        let release = async {
            while transport.count(Method::Put, PATH) < 2 {
                tokio::task::yield_now().await;
            }
            let optimistic = store.read();
            assert_eq!(optimistic.theme, Theme::Dark);
            assert_eq!(optimistic.jobs.search, "rust");
            gate.add_permits(2);
        };
        let (a, b, ()) = tokio::join!(first, second, release);
        a.unwrap();
        b.unwrap();

        let prefs = store.read();
        assert_eq!(prefs.theme, Theme::Dark);
        assert_eq!(prefs.jobs.search, "rust");

        let sent = transport.requests();
        assert_eq!(sent[1].body.as_ref().unwrap()["theme"], "dark");
        assert_eq!(sent[1].body.as_ref().unwrap()["jobs"]["search"], "rust");
    }

    #[tokio::test]
    async fn test_failed_put_rolls_back() {
        let transport = FakeTransport::new(|req| {
            let method = req.method;
            async move {
                match method {
                    Method::Get => ok_json(serde_json::json!({"theme": "light", "sidebarOpen": false})),
                    _ => status(StatusCode::INTERNAL_SERVER_ERROR),
                }
            }
            .boxed()
        });
        let store = PreferencesStore::new(client(&transport), None);
        store.load().await.unwrap();

        let err = store.update(PreferencesPatch::sidebar_open(true)).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { .. }));

        let prefs = store.read();
        assert_eq!(prefs.theme, Theme::Light);
        assert!(!prefs.sidebar_open);
    }

    #[tokio::test]
    async fn test_mirror_seeds_next_start() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("preferences.json");
        let gate = Arc::new(Semaphore::new(1));
        let transport = echo_after_gate(gate);

        let store = PreferencesStore::new(client(&transport), Some(mirror.clone()));
        assert!(!store.is_loaded());
        store.update(PreferencesPatch::theme(Theme::Dark)).await.unwrap();

        let restarted = PreferencesStore::new(client(&transport), Some(mirror));
        assert!(restarted.is_loaded());
        assert_eq!(restarted.read().theme, Theme::Dark);
    }

    #[tokio::test]
    async fn test_late_echo_leaves_newer_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("preferences.json");
        let gates = [Arc::new(Semaphore::new(0)), Arc::new(Semaphore::new(0))];
        let puts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let transport = {
            let gates = gates.clone();
            FakeTransport::new(move |req| {
                let n = puts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let gate = gates[n.min(1)].clone();
                let body = req.body.clone();
                async move {
                    gate.acquire().await.unwrap().forget();
                    ok_json(body.unwrap_or_default())
                }
                .boxed()
            })
        };
        let store = PreferencesStore::new(client(&transport), Some(mirror.clone()));

        let first = store.update(PreferencesPatch::theme(Theme::Dark));
        let second = async {
            while transport.count(Method::Put, PATH) < 1 {
                tokio::task::yield_now().await;
            }
            store.update(PreferencesPatch::search("rust")).await
        };
        let release = async {
            while transport.count(Method::Put, PATH) < 2 {
                tokio::task::yield_now().await;
            }
            gates[1].add_permits(1);
            while read_mirror(&mirror).is_none() {
                tokio::task::yield_now().await;
            }
            gates[0].add_permits(1);
        };
        let (a, b, ()) = tokio::join!(first, second, release);
        a.unwrap();
        b.unwrap();

        let on_disk = read_mirror(&mirror).unwrap();
        assert_eq!(on_disk.jobs.search, "rust");
        assert_eq!(on_disk, store.read());
    }

    #[tokio::test]
    async fn test_clear_forgets_cache_and_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("preferences.json");
        let transport = echo_after_gate(Arc::new(Semaphore::new(1)));
        let store = PreferencesStore::new(client(&transport), Some(mirror.clone()));
        store.update(PreferencesPatch::search("initech")).await.unwrap();
        assert!(mirror.exists());

        store.clear();
        assert!(!store.is_loaded());
        assert_eq!(store.read().jobs.search, "");
        assert!(!mirror.exists());
        store.clear();
    }
}
