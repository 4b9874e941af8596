use tracing::{info, warn};

use crate::api::ApiError;
use crate::app::AppState;
use crate::forms::{validate_login, validate_sign_up, FieldErrors, Form};

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("{0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn,
    /// The account exists but the server wants the email confirmed first.
    ConfirmEmail,
}

pub async fn sign_in(app: &mut AppState, form: &Form) -> Result<(), AuthFailure> {
    let request = validate_login(form).map_err(AuthFailure::Invalid)?;
    app.api.sign_in(&request).await?;
    let user = app.api.me().await?;
    app.auth.signed_in(user);
    app.on_signed_in().await;
    Ok(())
}

/// Nothing is sent unless the form validates.
pub async fn sign_up(app: &mut AppState, form: &Form) -> Result<SignUpOutcome, AuthFailure> {
    let request = validate_sign_up(form).map_err(AuthFailure::Invalid)?;
    app.api.sign_up(&request).await?;
    info!(email = %request.email, "account created");

    match app.api.me().await {
        Ok(user) => {
            app.auth.signed_in(user);
            app.on_signed_in().await;
            Ok(SignUpOutcome::SignedIn)
        }
        Err(ApiError::SessionExpired) => Ok(SignUpOutcome::ConfirmEmail),
        Err(e) => Err(e.into()),
    }
}

/// Signs out locally even if the server call fails, dropping every cached
/// trace of the user.
pub async fn logout(app: &mut AppState) {
    if let Err(e) = app.api.logout().await {
        warn!(error = %e, "logout request failed");
    }
    app.auth.signed_out();
    app.modals.close_all();
    app.drop_user_data();
    app.forget_session();
}

/// URL that starts an OAuth sign in; the provider sends the user back to `/auth/callback`.
pub fn oauth_start(app: &AppState, provider: &str) -> Result<String, ApiError> {
    app.api.oauth_url(provider, "/auth/callback")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{ok_json, status, FakeTransport};
    use crate::api::{ApiRequest, Method};
    use crate::app::tests::app;
    use crate::routes::Route;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use std::sync::Arc;

    /// A tiny session server: `/users/me` answers only after a good sign in.
    fn server() -> Arc<FakeTransport> {
        let signed_in = Arc::new(Mutex::new(false));
        FakeTransport::new(move |req: &ApiRequest| {
            let signed_in = signed_in.clone();
            let req = req.clone();
            async move {
                match (req.method, req.path.as_str()) {
                    (Method::Post, "/auth/sign-in") => {
                        let body = req.body.unwrap_or_default();
                        if body["password"] == "hunter22" {
                            *signed_in.lock() = true;
                            status(StatusCode::NO_CONTENT)
                        } else {
                            status(StatusCode::UNAUTHORIZED)
                        }
                    }
                    (Method::Post, "/auth/logout") => {
                        *signed_in.lock() = false;
                        status(StatusCode::NO_CONTENT)
                    }
                    (Method::Post, "/auth/refresh") => status(StatusCode::UNAUTHORIZED),
                    (Method::Get, "/users/me") if *signed_in.lock() => ok_json(serde_json::json!({
                        "id": "6f1c1e3e-3f57-4d0c-9c36-8a1d1f2b3c4d",
                        "email": "sam@example.com",
                        "full_name": "Sam"
                    })),
                    (Method::Get, "/users/me/preferences") if *signed_in.lock() => {
                        ok_json(serde_json::json!({"theme": "dark"}))
                    }
                    (Method::Put, "/users/me/preferences") if *signed_in.lock() => {
                        ok_json(req.body.unwrap_or_default())
                    }
                    (Method::Post, "/jobs/query") if *signed_in.lock() => ok_json(serde_json::json!({
                        "items": [crate::jobs::tests::job("SecretCo")],
                        "next_cursor": null
                    })),
                    _ => status(StatusCode::UNAUTHORIZED),
                }
            }
            .boxed()
        })
    }

    fn login_form(password: &str) -> Form {
        let mut form = Form::login();
        form.set("email", "sam@example.com");
        form.set("password", password);
        form
    }

    #[tokio::test]
    async fn test_login_then_jobs_renders_without_recheck() {
        let dir = tempfile::tempdir().unwrap();
        let transport = server();
        let mut app = app(&transport, dir.path());

        assert_eq!(app.navigate("/jobs").await, Route::Login);

        let err = sign_in(&mut app, &login_form("wrong")).await.unwrap_err();
        assert!(matches!(err, AuthFailure::Api(ApiError::Status { .. })));

        sign_in(&mut app, &login_form("hunter22")).await.unwrap();
        assert_eq!(app.prefs.read().theme, crate::models::Theme::Dark);

        let checks = transport.count(Method::Get, "/users/me");
        assert_eq!(app.navigate("/jobs").await, Route::Jobs);
        assert_eq!(app.navigate("/auth/login").await, Route::Home);
        assert_eq!(transport.count(Method::Get, "/users/me"), checks);

        let view = crate::api::JobsQuery::default();
        app.prefs.update(crate::prefs::PreferencesPatch::search("initech")).await.unwrap();
        app.jobs.rows(&view).await.unwrap();
        assert!(dir.path().join("preferences.json").exists());

        logout(&mut app).await;
        assert!(!app.prefs.is_loaded());
        assert_eq!(app.prefs.read().jobs.search, "");
        assert!(app.jobs.cached_rows(&view).is_none());
        assert!(!dir.path().join("preferences.json").exists());
        assert_eq!(app.navigate("/analytics").await, Route::Login);
    }

    #[tokio::test]
    async fn test_sign_up_mismatch_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = server();
        let mut app = app(&transport, dir.path());

        let mut form = Form::sign_up();
        form.set("email", "sam@example.com");
        form.set("password", "hunter2222");
        form.set("confirmation_password", "hunter2223");

        let err = sign_up(&mut app, &form).await.unwrap_err();
        match err {
            AuthFailure::Invalid(errors) => {
                assert_eq!(errors.get("confirmation_password"), Some("Passwords do not match"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(|req| {
            let created = req.path == "/auth/sign-up";
            async move {
                if created {
                    status(StatusCode::CREATED)
                } else {
                    status(StatusCode::UNAUTHORIZED)
                }
            }
            .boxed()
        });
        let mut app = app(&transport, dir.path());

        let mut form = Form::sign_up();
        form.set("email", "sam@example.com");
        form.set("password", "hunter2222");
        form.set("confirmation_password", "hunter2222");
        assert_eq!(sign_up(&mut app, &form).await.unwrap(), SignUpOutcome::ConfirmEmail);
        assert!(!app.auth.is_authenticated());
    }
}
