//! Typed client for the job tracking REST API.
//!
//! Every request goes through [`ApiClient::fetch`], which transparently
//! refreshes the session once when a non-auth endpoint answers 401. Callers
//! that hit 401 while a refresh is already running wait on that same
//! refresh instead of starting their own.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::filters::{ApiFilter, ApiSort};
use crate::models::{
    ColumnPatch, CursorPage, InterviewPatch, JobApplication, JobColumn, JobCount, JobInterview, JobStage,
    NewColumn, NewInterview, NewJob, NewStage, SignInRequest, SignUpRequest, StagePatch, User,
    UserPreferences,
};

pub(crate) const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("Your session has expired. Please sign in again.")]
    SessionExpired,
    #[error("{message} (HTTP {status})")]
    Status { status: StatusCode, message: String },
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Unexpected response from server: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_json<B: Serialize>(method: Method, path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(Self {
            method,
            path: path.into(),
            body: Some(body),
        })
    }

    /// Auth endpoints never trigger a refresh; a 401 there is a real answer.
    pub fn is_auth_endpoint(&self) -> bool {
        self.path.starts_with("/auth/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn check(self, auth_endpoint: bool) -> Result<Self, ApiError> {
        if self.status.is_success() {
            return Ok(self);
        }
        if self.status == StatusCode::UNAUTHORIZED && !auth_endpoint {
            return Err(ApiError::SessionExpired);
        }
        Err(ApiError::Status {
            status: self.status,
            message: error_message(&self.body, self.status),
        })
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
    message: Option<String>,
}

fn error_message(body: &str, status: StatusCode) -> String {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let from_body = parsed.and_then(|b| match (b.message, b.detail) {
        (Some(m), _) => Some(m),
        (None, Some(serde_json::Value::String(d))) => Some(d),
        (None, Some(other)) => Some(other.to_string()),
        (None, None) => None,
    });
    from_body.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    })
}

/// The wire. The real one is reqwest; tests script their own.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, jar: Arc<Jar>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>> {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, request.path);
        async move {
            debug!(method = ?request.method, %url, "sending request");
            let mut builder = client.request(request.method.into(), &url);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?;
            Ok(ApiResponse { status, body })
        }
        .boxed()
    }
}

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

struct Inner {
    transport: Arc<dyn Transport>,
    base_url: String,
    refresh: Mutex<Option<RefreshFlight>>,
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                base_url: base_url.trim_end_matches('/').to_string(),
                refresh: Mutex::new(None),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Sends a request, refreshing the session and retrying once on 401.
    /// If the refresh fails the original 401 response is returned.
    pub async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.inner.transport.send(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED || request.is_auth_endpoint() {
            return Ok(response);
        }

        debug!(path = %request.path, "got 401, refreshing session");
        if self.refresh_session().await {
            self.inner.transport.send(request).await
        } else {
            Ok(response)
        }
    }

    async fn refresh_session(&self) -> bool {
        let flight = {
            let mut slot = self.inner.refresh.lock();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let transport = Arc::clone(&self.inner.transport);
                    let flight = async move {
                        match transport.send(ApiRequest::new(Method::Post, REFRESH_PATH)).await {
                            Ok(r) if r.status.is_success() => {
                                info!("session refreshed");
                                true
                            }
                            Ok(r) => {
                                warn!(status = %r.status, "session refresh rejected");
                                false
                            }
                            Err(e) => {
                                warn!(error = %e, "session refresh failed");
                                false
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let refreshed = flight.clone().await;

        let mut slot = self.inner.refresh.lock();
        if slot.as_ref().is_some_and(|f| f.ptr_eq(&flight)) {
            *slot = None;
        }
        refreshed
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let auth = request.is_auth_endpoint();
        self.fetch(request).await?.check(auth)?.json()
    }

    async fn call_empty(&self, request: ApiRequest) -> Result<(), ApiError> {
        let auth = request.is_auth_endpoint();
        self.fetch(request).await?.check(auth).map(|_| ())
    }

    // --- Auth ---

    pub async fn sign_in(&self, body: &SignInRequest) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::with_json(Method::Post, "/auth/sign-in", body)?)
            .await
    }

    pub async fn sign_up(&self, body: &SignUpRequest) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::with_json(Method::Post, "/auth/sign-up", body)?)
            .await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::new(Method::Post, "/auth/logout"))
            .await
    }

    /// Where to send the user to start an OAuth sign in.
    pub fn oauth_url(&self, provider: &str, redirect_to: &str) -> Result<String, ApiError> {
        let base = format!("{}/auth/oauth/{}", self.inner.base_url, provider);
        reqwest::Url::parse_with_params(&base, &[("redirect_to", redirect_to)])
            .map(String::from)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.call(ApiRequest::get("/users/me")).await
    }

    // --- Preferences ---

    pub async fn get_preferences(&self) -> Result<UserPreferences, ApiError> {
        self.call(ApiRequest::get("/users/me/preferences")).await
    }

    pub async fn put_preferences(&self, prefs: &UserPreferences) -> Result<UserPreferences, ApiError> {
        self.call(ApiRequest::with_json(Method::Put, "/users/me/preferences", prefs)?)
            .await
    }

    // --- Jobs ---

    pub async fn query_jobs(&self, query: &JobsQuery) -> Result<CursorPage<JobApplication>, ApiError> {
        self.call(ApiRequest::with_json(Method::Post, "/jobs/query", query)?)
            .await
    }

    pub async fn count_jobs(&self, query: &JobsQuery) -> Result<JobCount, ApiError> {
        self.call(ApiRequest::with_json(Method::Post, "/jobs/count", query)?)
            .await
    }

    pub async fn create_job(&self, job: &NewJob) -> Result<JobApplication, ApiError> {
        self.call(ApiRequest::with_json(Method::Post, "/jobs", job)?)
            .await
    }

    pub async fn update_job(&self, id: Uuid, patch: &serde_json::Value) -> Result<JobApplication, ApiError> {
        self.call(ApiRequest::with_json(Method::Patch, format!("/jobs/{}", id), patch)?)
            .await
    }

    pub async fn delete_job(&self, id: Uuid) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::delete(format!("/jobs/{}", id)))
            .await
    }

    pub async fn upsert_column_value(
        &self,
        job_id: Uuid,
        column_id: Uuid,
        value: &serde_json::Value,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({ "value": value });
        let path = format!("/jobs/{}/column-values/{}", job_id, column_id);
        self.call_empty(ApiRequest::with_json(Method::Put, path, &body)?)
            .await
    }

    // --- Stages ---

    pub async fn list_stages(&self) -> Result<Vec<JobStage>, ApiError> {
        self.call(ApiRequest::get("/job-stages")).await
    }

    pub async fn create_stage(&self, stage: &NewStage) -> Result<JobStage, ApiError> {
        self.call(ApiRequest::with_json(Method::Post, "/job-stages", stage)?)
            .await
    }

    pub async fn update_stage(&self, id: Uuid, patch: &StagePatch) -> Result<JobStage, ApiError> {
        self.call(ApiRequest::with_json(Method::Patch, format!("/job-stages/{}", id), patch)?)
            .await
    }

    pub async fn delete_stage(&self, id: Uuid) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::delete(format!("/job-stages/{}", id)))
            .await
    }

    // --- Columns ---

    pub async fn list_columns(&self) -> Result<Vec<JobColumn>, ApiError> {
        self.call(ApiRequest::get("/job-columns")).await
    }

    pub async fn create_column(&self, column: &NewColumn) -> Result<JobColumn, ApiError> {
        self.call(ApiRequest::with_json(Method::Post, "/job-columns", column)?)
            .await
    }

    pub async fn update_column(&self, id: Uuid, patch: &ColumnPatch) -> Result<JobColumn, ApiError> {
        self.call(ApiRequest::with_json(Method::Patch, format!("/job-columns/{}", id), patch)?)
            .await
    }

    pub async fn delete_column(&self, id: Uuid) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::delete(format!("/job-columns/{}", id)))
            .await
    }

    // --- Interviews ---

    pub async fn list_interviews(&self, job_id: Uuid) -> Result<Vec<JobInterview>, ApiError> {
        self.call(ApiRequest::get(format!("/jobs/{}/interviews", job_id)))
            .await
    }

    pub async fn create_interview(&self, job_id: Uuid, interview: &NewInterview) -> Result<JobInterview, ApiError> {
        let path = format!("/jobs/{}/interviews", job_id);
        self.call(ApiRequest::with_json(Method::Post, path, interview)?)
            .await
    }

    pub async fn update_interview(
        &self,
        job_id: Uuid,
        id: Uuid,
        patch: &InterviewPatch,
    ) -> Result<JobInterview, ApiError> {
        let path = format!("/jobs/{}/interviews/{}", job_id, id);
        self.call(ApiRequest::with_json(Method::Patch, path, patch)?)
            .await
    }

    pub async fn delete_interview(&self, job_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        self.call_empty(ApiRequest::delete(format!("/jobs/{}/interviews/{}", job_id, id)))
            .await
    }
}

/// Body of `/jobs/query` and `/jobs/count`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct JobsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub filters: Vec<ApiFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<ApiSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: u32,
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    type Handler = dyn Fn(&ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>> + Send + Sync;

    /// Scripted transport that records every request it sees.
    pub(crate) struct FakeTransport {
        handler: Box<Handler>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl FakeTransport {
        pub(crate) fn new<F>(handler: F) -> Arc<Self>
        where
            F: Fn(&ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>> + Send + Sync + 'static,
        {
            Arc::new(Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().clone()
        }

        pub(crate) fn count(&self, method: Method, path: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.method == method && r.path == path)
                .count()
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>> {
            self.requests.lock().push(request.clone());
            (self.handler)(&request)
        }
    }

    pub(crate) fn ok_json(value: serde_json::Value) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse::new(StatusCode::OK, value.to_string()))
    }

    pub(crate) fn status(code: StatusCode) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse::new(code, ""))
    }

    pub(crate) fn client(transport: &Arc<FakeTransport>) -> ApiClient {
        ApiClient::new(transport.clone(), "http://test.local/api")
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let logged_in = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(Semaphore::new(0));

        let transport = {
            let logged_in = logged_in.clone();
            let gate = gate.clone();
            FakeTransport::new(move |req| {
                let logged_in = logged_in.clone();
                let gate = gate.clone();
                let path = req.path.clone();
                async move {
                    if path == REFRESH_PATH {
                        gate.acquire().await.map_err(|e| ApiError::Transport(e.to_string()))?.forget();
                        logged_in.store(true, Ordering::SeqCst);
                        return status(StatusCode::NO_CONTENT);
                    }
                    if logged_in.load(Ordering::SeqCst) {
                        ok_json(serde_json::json!({"count": 3}))
                    } else {
                        status(StatusCode::UNAUTHORIZED)
                    }
                }
                .boxed()
            })
        };
        let api = client(&transport);

        const N: usize = 5;
        let requests = (0..N).map(|_| api.fetch(ApiRequest::get("/jobs/count")));
        let release = async {
            while transport.count(Method::Get, "/jobs/count") < N {
                tokio::task::yield_now().await;
            }
            gate.add_permits(1);
        };
        let (responses, ()) = tokio::join!(futures::future::join_all(requests), release);

        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 1);
        assert_eq!(transport.count(Method::Get, "/jobs/count"), 2 * N);
        for response in responses {
            assert_eq!(response.unwrap().status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_401() {
        let transport = FakeTransport::new(|req| {
            let code = if req.path == REFRESH_PATH {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::UNAUTHORIZED
            };
            async move { status(code) }.boxed()
        });
        let api = client(&transport);

        let response = api.fetch(ApiRequest::get("/users/me")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count(Method::Get, "/users/me"), 1);

        let err = api.me().await.unwrap_err();
        assert!(err.is_session_expired());
        // the slot is cleared, so a later 401 gets a fresh refresh attempt
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 2);
    }

    #[tokio::test]
    async fn test_auth_endpoints_do_not_refresh() {
        let transport = FakeTransport::new(|_| {
            async { Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid email or password"}"#)) }
                .boxed()
        });
        let api = client(&transport);

        let err = api
            .sign_in(&SignInRequest {
                email: "a@b.co".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                message: "Invalid email or password".into()
            }
        );
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_error_message_falls_back_to_reason() {
        let transport = FakeTransport::new(|_| async { Ok(ApiResponse::new(StatusCode::BAD_GATEWAY, "<html>")) }.boxed());
        let api = client(&transport);
        let err = api.list_stages().await.unwrap_err();
        assert_eq!(err.to_string(), "Bad Gateway (HTTP 502 Bad Gateway)");
    }

    #[test]
    fn test_oauth_url_encodes_redirect() {
        let transport = FakeTransport::new(|_| async { status(StatusCode::OK) }.boxed());
        let api = client(&transport);
        let url = api.oauth_url("google", "jobtrack://auth/callback").unwrap();
        assert_eq!(
            url,
            "http://test.local/api/auth/oauth/google?redirect_to=jobtrack%3A%2F%2Fauth%2Fcallback"
        );
    }
}
