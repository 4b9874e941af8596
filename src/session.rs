use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::REFRESH_PATH;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    cookies: Vec<String>,
    /// Cookies scoped to the refresh endpoint only, e.g. `Path=/api/auth/refresh`.
    #[serde(default)]
    refresh_cookies: Vec<String>,
}

/// Keeps the API's session cookies between runs.
pub struct SessionStore {
    path: PathBuf,
    url: Url,
    refresh_url: Url,
    jar: Arc<Jar>,
}

impl SessionStore {
    pub fn load(path: &Path, base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("Invalid API url: {}", base_url))?;
        let refresh_url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH))
            .with_context(|| format!("Invalid API url: {}", base_url))?;
        let jar = Arc::new(Jar::default());

        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read session file: {}", path.display()))?;
            // A corrupt session file just means signing in again.
            let file: SessionFile = serde_json::from_str(&raw).unwrap_or_default();
            for cookie in &file.cookies {
                jar.add_cookie_str(&format!("{}; Path=/", cookie), &url);
            }
            for cookie in &file.refresh_cookies {
                jar.add_cookie_str(&format!("{}; Path={}", cookie, refresh_url.path()), &refresh_url);
            }
            tracing::debug!(
                count = file.cookies.len() + file.refresh_cookies.len(),
                "restored session cookies"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            url,
            refresh_url,
            jar,
        })
    }

    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    pub fn save(&self) -> Result<()> {
        let cookies = self.cookie_pairs(&self.url);
        let refresh_cookies = self
            .cookie_pairs(&self.refresh_url)
            .into_iter()
            .filter(|c| !cookies.contains(c))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&SessionFile {
            cookies,
            refresh_cookies,
        })?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove session file: {}", self.path.display()))?;
        }
        Ok(())
    }

    /// `name=value` pairs the jar would send to `url`.
    fn cookie_pairs(&self, url: &Url) -> Vec<String> {
        self.jar
            .cookies(url)
            .and_then(|header| header.to_str().ok().map(String::from))
            .map(|header| header.split("; ").map(String::from).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookies_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let base = "http://localhost:8000/api";

        let first = SessionStore::load(&path, base).unwrap();
        let url = Url::parse(base).unwrap();
        first.jar().add_cookie_str("access_token=abc; Path=/", &url);
        first.save().unwrap();

        let second = SessionStore::load(&path, base).unwrap();
        let header = second.jar().cookies(&url).unwrap();
        assert_eq!(header.to_str().unwrap(), "access_token=abc");

        second.clear().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_refresh_scoped_cookie_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let base = "http://localhost:8000/api";
        let url = Url::parse(base).unwrap();
        let refresh = Url::parse("http://localhost:8000/api/auth/refresh").unwrap();

        let first = SessionStore::load(&path, base).unwrap();
        first.jar().add_cookie_str("access_token=abc; Path=/", &url);
        first
            .jar()
            .add_cookie_str("refresh_token=xyz; Path=/api/auth/refresh", &refresh);
        first.save().unwrap();

        let second = SessionStore::load(&path, base).unwrap();
        let sent = second.jar().cookies(&refresh).unwrap();
        let sent = sent.to_str().unwrap();
        assert!(sent.contains("refresh_token=xyz"));
        assert!(sent.contains("access_token=abc"));
        let base_only = second.jar().cookies(&url).unwrap();
        assert_eq!(base_only.to_str().unwrap(), "access_token=abc");
    }

    #[test]
    fn test_corrupt_file_starts_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        let store = SessionStore::load(&path, "http://localhost/api").unwrap();
        assert!(store.jar().cookies(&Url::parse("http://localhost/api").unwrap()).is_none());
    }
}
