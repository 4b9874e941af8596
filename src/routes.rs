use reqwest::Url;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::models::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Jobs,
    Resume,
    Knowledge,
    Analytics,
    Login,
    SignUp,
    Callback { error: Option<String> },
    AuthError { message: Option<String> },
}

impl Route {
    /// Parses a path with an optional query string, e.g. `/auth/callback?error=denied`.
    pub fn parse(path: &str) -> Option<Self> {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        // form-urlencoded, so both `+` and `%20` come back as spaces
        let params = Url::parse(&format!("http://localhost/?{}", query)).ok();
        let param = |name: &str| {
            params
                .as_ref()?
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let path = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        match path {
            "/" => Some(Self::Home),
            "/jobs" => Some(Self::Jobs),
            "/resume" => Some(Self::Resume),
            "/knowledge" => Some(Self::Knowledge),
            "/analytics" => Some(Self::Analytics),
            "/auth/login" => Some(Self::Login),
            "/auth/sign-up" => Some(Self::SignUp),
            "/auth/callback" => Some(Self::Callback {
                error: param("error"),
            }),
            "/auth/error" => Some(Self::AuthError {
                message: param("message"),
            }),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Jobs => "/jobs",
            Self::Resume => "/resume",
            Self::Knowledge => "/knowledge",
            Self::Analytics => "/analytics",
            Self::Login => "/auth/login",
            Self::SignUp => "/auth/sign-up",
            Self::Callback { .. } => "/auth/callback",
            Self::AuthError { .. } => "/auth/error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Home | Self::Jobs => "Jobs",
            Self::Resume => "Resume",
            Self::Knowledge => "Knowledge base",
            Self::Analytics => "Analytics",
            Self::Login => "Sign in",
            Self::SignUp => "Sign up",
            Self::Callback { .. } => "Signing in",
            Self::AuthError { .. } => "Sign in failed",
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            Self::Home | Self::Jobs | Self::Resume | Self::Knowledge | Self::Analytics
        )
    }

    fn is_guest_only(&self) -> bool {
        matches!(self, Self::Login | Self::SignUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStatus {
    #[default]
    Unknown,
    Checking,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Default)]
pub struct AuthState {
    status: AuthStatus,
    user: Option<User>,
}

impl AuthState {
    #[cfg(test)]
    pub fn status(&self) -> AuthStatus {
        self.status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn signed_in(&mut self, user: User) {
        info!(email = %user.email, "signed in");
        self.status = AuthStatus::Authenticated;
        self.user = Some(user);
    }

    pub fn signed_out(&mut self) {
        if self.status == AuthStatus::Authenticated {
            info!("signed out");
        }
        self.status = AuthStatus::Unauthenticated;
        self.user = None;
    }

    /// Asks the server who we are. Any failure counts as signed out.
    pub async fn check(&mut self, api: &ApiClient) -> bool {
        self.status = AuthStatus::Checking;
        match api.me().await {
            Ok(user) => {
                self.signed_in(user);
                true
            }
            Err(e) => {
                debug!(error = %e, "session check failed");
                self.signed_out();
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render(Route),
    Redirect(Route),
}

/// Decides whether `route` may render for the current auth state.
pub async fn guard(auth: &mut AuthState, api: &ApiClient, route: Route) -> Navigation {
    match route {
        Route::Callback { error: Some(message) } => Navigation::Redirect(Route::AuthError {
            message: Some(message),
        }),
        Route::Callback { error: None } => {
            if auth.check(api).await {
                Navigation::Redirect(Route::Home)
            } else {
                Navigation::Redirect(Route::AuthError { message: None })
            }
        }
        r if r.is_guest_only() && auth.is_authenticated() => Navigation::Redirect(Route::Home),
        r if r.is_protected() && !auth.is_authenticated() => {
            if auth.check(api).await {
                Navigation::Render(r)
            } else {
                Navigation::Redirect(Route::Login)
            }
        }
        r => Navigation::Render(r),
    }
}
