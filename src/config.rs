use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Runtime settings, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub page_size: u32,
    pub stale_after: Duration,
    pub data_dir: PathBuf,
    pub log_filter: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = env_nonempty("JOBTRACK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let page_size = env_nonempty("JOBTRACK_PAGE_SIZE")
            .and_then(|s| s.parse().ok())
            .filter(|n| (1..=500).contains(n))
            .unwrap_or(50);

        let stale_after = env_nonempty("JOBTRACK_STALE_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let data_dir = match env_nonempty("JOBTRACK_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        Ok(Self {
            api_url,
            page_size,
            stale_after,
            data_dir,
            log_filter: env_nonempty("JOBTRACK_LOG"),
        })
    }

    pub fn with_api_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
        self
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "jobtrack")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine a data directory; set JOBTRACK_DATA_DIR"))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}
