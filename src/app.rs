//! The single application-state container passed to every flow and view.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::jobs::JobsStore;
use crate::modal::ModalStack;
use crate::prefs::PreferencesStore;
use crate::routes::{guard, AuthState, Navigation, Route};
use crate::session::SessionStore;

pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";
const TOAST_TTL: Duration = Duration::from_secs(4);
const MAX_REDIRECTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub shown_at: Instant,
}

#[derive(Debug, Default)]
pub struct Toasts {
    items: VecDeque<Toast>,
}

impl Toasts {
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(ToastKind::Info, message.into());
    }

    /// Failed mutations all surface the same way; the detail goes to the log.
    pub fn error(&mut self, error: &ApiError) {
        warn!(error = %error, "request failed");
        let message = match error {
            ApiError::SessionExpired => error.to_string(),
            _ => GENERIC_ERROR.to_string(),
        };
        self.push(ToastKind::Error, message);
    }

    fn push(&mut self, kind: ToastKind, message: String) {
        self.items.push_back(Toast {
            kind,
            message,
            shown_at: Instant::now(),
        });
        while self.items.len() > 3 {
            self.items.pop_front();
        }
    }

    pub fn expire(&mut self, now: Instant) {
        self.items.retain(|t| now.duration_since(t.shown_at) < TOAST_TTL);
    }

    pub fn visible(&self) -> impl Iterator<Item = &Toast> {
        self.items.iter()
    }
}

pub struct AppState {
    pub api: ApiClient,
    pub auth: AuthState,
    pub prefs: PreferencesStore,
    pub jobs: JobsStore,
    pub modals: ModalStack,
    pub toasts: Toasts,
    pub route: Route,
    pub page_size: u32,
    session: Option<SessionStore>,
}

impl AppState {
    pub fn new(api: ApiClient, config: &Config, session: Option<SessionStore>) -> Self {
        Self {
            prefs: PreferencesStore::new(api.clone(), Some(config.preferences_path())),
            jobs: JobsStore::new(api.clone(), config.stale_after),
            api,
            auth: AuthState::default(),
            modals: ModalStack::default(),
            toasts: Toasts::default(),
            route: Route::Login,
            page_size: config.page_size,
            session,
        }
    }

    /// Resolves a path through the route guard, following redirects.
    pub async fn navigate(&mut self, path: &str) -> Route {
        let mut route = Route::parse(path).unwrap_or(Route::Home);
        for _ in 0..MAX_REDIRECTS {
            let was_authenticated = self.auth.is_authenticated();
            let nav = guard(&mut self.auth, &self.api, route).await;
            if self.auth.is_authenticated() && !was_authenticated {
                self.on_signed_in().await;
            }
            match nav {
                Navigation::Render(r) => {
                    route = r;
                    break;
                }
                Navigation::Redirect(r) => route = r,
            }
        }
        self.modals.close_all();
        self.route = route.clone();
        route
    }

    /// Hydrates preferences and persists the session after any sign in.
    pub async fn on_signed_in(&mut self) {
        if let Err(e) = self.prefs.load().await {
            if self.prefs.is_loaded() {
                warn!(error = %e, "could not load preferences, using last known");
            } else {
                warn!(error = %e, "could not load preferences, using defaults");
            }
        }
        self.persist_session();
    }

    pub fn persist_session(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.save() {
                warn!(error = %e, "failed to save session");
            }
        }
    }

    pub fn forget_session(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.clear() {
                warn!(error = %e, "failed to clear session");
            }
        }
    }

    /// Forgets the last user's preferences and rows so the next sign in
    /// starts from nothing.
    pub fn drop_user_data(&self) {
        self.prefs.clear();
        self.jobs.clear();
    }

    /// Any request that comes back with an expired session drops the auth flag
    /// so the next navigation lands on the login page.
    pub fn report(&mut self, error: &ApiError) {
        if error.is_session_expired() {
            self.auth.signed_out();
            self.drop_user_data();
        }
        self.toasts.error(error);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::fake::{client, ok_json, FakeTransport};
    use futures::FutureExt;
    use std::path::PathBuf;
    use std::sync::Arc;

    pub(crate) fn app(transport: &Arc<FakeTransport>, dir: &std::path::Path) -> AppState {
        let config = Config {
            api_url: "http://test.local/api".into(),
            page_size: 50,
            stale_after: Duration::from_secs(30),
            data_dir: PathBuf::from(dir),
            log_filter: None,
        };
        AppState::new(client(transport), &config, None)
    }

    #[test]
    fn test_toasts_cap_and_expire() {
        let mut toasts = Toasts::default();
        for i in 0..5 {
            toasts.info(format!("saved {}", i));
        }
        assert_eq!(toasts.visible().count(), 3);
        assert_eq!(toasts.visible().next().unwrap().message, "saved 2");

        toasts.error(&ApiError::Transport("connection reset".into()));
        assert_eq!(toasts.visible().last().unwrap().message, GENERIC_ERROR);

        toasts.expire(Instant::now() + TOAST_TTL);
        assert_eq!(toasts.visible().count(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_drops_user_data() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|_| async { ok_json(serde_json::json!({"theme": "dark"})) }.boxed());
        let mut app = app(&transport, dir.path());
        app.prefs.load().await.unwrap();
        assert!(dir.path().join("preferences.json").exists());

        app.report(&ApiError::SessionExpired);
        assert!(!app.prefs.is_loaded());
        assert!(!dir.path().join("preferences.json").exists());
        assert_eq!(app.toasts.visible().count(), 1);
    }
}
