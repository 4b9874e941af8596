//! Table data layer: cursor-paged job queries behind a small TTL cache, and
//! the optimistic mutations that patch that cache before the server answers.
//!
//! Every mutation follows the same pipeline: apply the change locally while
//! recording how to undo it, call the API, then either invalidate and refetch
//! (success) or run the undo (failure). The undo only puts back what the
//! change touched, so anything loaded while the request was out survives.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiError, JobsQuery};
use crate::filters::{parse_day, to_api_filters, to_api_sort};
use crate::models::{
    ColumnPatch, ColumnType, CursorPage, InterviewPatch, JobApplication, JobColumn, JobColumnValue, JobInterview,
    JobStage, JobsPagePreferences, NewColumn, NewInterview, NewJob, NewStage, StagePatch,
};

/// Builds the first-page query for the jobs table from its persisted view state.
pub fn build_query(view: &JobsPagePreferences, columns: &[JobColumn], limit: u32) -> JobsQuery {
    let search = view.search.trim();
    JobsQuery {
        search: (!search.is_empty()).then(|| search.to_string()),
        filters: to_api_filters(&view.column_filters, columns),
        sort: to_api_sort(&view.sorts, columns),
        cursor: None,
        limit,
    }
}

/// A single-field edit made from a table cell or the detail modal.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEdit {
    CompanyName(String),
    JobTitle(String),
    Stage(Option<Uuid>),
    AppliedAt(Option<DateTime<Utc>>),
    Notes(Option<String>),
    SalaryMin(Option<i64>),
    SalaryMax(Option<i64>),
    JobUrl(Option<String>),
    Location(Option<String>),
}

impl JobEdit {
    pub const FIELDS: [&'static str; 9] = [
        "company_name",
        "job_title",
        "stage_id",
        "applied_at",
        "notes",
        "salary_min",
        "salary_max",
        "job_url",
        "location",
    ];

    pub fn field_key(&self) -> &'static str {
        match self {
            Self::CompanyName(_) => "company_name",
            Self::JobTitle(_) => "job_title",
            Self::Stage(_) => "stage_id",
            Self::AppliedAt(_) => "applied_at",
            Self::Notes(_) => "notes",
            Self::SalaryMin(_) => "salary_min",
            Self::SalaryMax(_) => "salary_max",
            Self::JobUrl(_) => "job_url",
            Self::Location(_) => "location",
        }
    }

    pub fn apply(&self, job: &mut JobApplication) {
        match self {
            Self::CompanyName(v) => job.company_name = v.clone(),
            Self::JobTitle(v) => job.job_title = v.clone(),
            Self::Stage(v) => job.stage_id = *v,
            Self::AppliedAt(v) => job.applied_at = *v,
            Self::Notes(v) => job.notes = v.clone(),
            Self::SalaryMin(v) => job.salary_min = *v,
            Self::SalaryMax(v) => job.salary_max = *v,
            Self::JobUrl(v) => job.job_url = v.clone(),
            Self::Location(v) => job.location = v.clone(),
        }
    }

    /// The same field, holding the value `job` has now.
    pub fn current(&self, job: &JobApplication) -> Self {
        match self {
            Self::CompanyName(_) => Self::CompanyName(job.company_name.clone()),
            Self::JobTitle(_) => Self::JobTitle(job.job_title.clone()),
            Self::Stage(_) => Self::Stage(job.stage_id),
            Self::AppliedAt(_) => Self::AppliedAt(job.applied_at),
            Self::Notes(_) => Self::Notes(job.notes.clone()),
            Self::SalaryMin(_) => Self::SalaryMin(job.salary_min),
            Self::SalaryMax(_) => Self::SalaryMax(job.salary_max),
            Self::JobUrl(_) => Self::JobUrl(job.job_url.clone()),
            Self::Location(_) => Self::Location(job.location.clone()),
        }
    }

    /// `{"<field>": value}` for the PATCH body.
    pub fn to_patch(&self) -> serde_json::Value {
        let value = match self {
            Self::CompanyName(v) | Self::JobTitle(v) => serde_json::json!(v),
            Self::Stage(v) => serde_json::json!(v),
            Self::AppliedAt(v) => serde_json::json!(v),
            Self::Notes(v) | Self::JobUrl(v) | Self::Location(v) => serde_json::json!(v),
            Self::SalaryMin(v) | Self::SalaryMax(v) => serde_json::json!(v),
        };
        let mut body = serde_json::Map::new();
        body.insert(self.field_key().to_string(), value);
        serde_json::Value::Object(body)
    }

    /// Parses user input for a field. Empty input clears optional fields.
    pub fn parse(field: &str, raw: &str, stages: &[JobStage]) -> Result<Self> {
        let raw = raw.trim();
        let opt = || (!raw.is_empty()).then(|| raw.to_string());
        let required = |name: &str| {
            if raw.is_empty() {
                Err(anyhow!("{} cannot be empty", name))
            } else {
                Ok(raw.to_string())
            }
        };
        let money = || -> Result<Option<i64>> {
            if raw.is_empty() {
                return Ok(None);
            }
            raw.replace([',', '$'], "")
                .parse::<i64>()
                .map(Some)
                .map_err(|_| anyhow!("'{}' is not a whole number", raw))
        };

        match field {
            "company_name" | "company" => Ok(Self::CompanyName(required("Company")?)),
            "job_title" | "title" => Ok(Self::JobTitle(required("Job title")?)),
            "stage_id" | "stage" => {
                if raw.is_empty() {
                    return Ok(Self::Stage(None));
                }
                let stage = stages
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(raw) || s.id.to_string() == raw)
                    .ok_or_else(|| anyhow!("Unknown stage '{}'", raw))?;
                Ok(Self::Stage(Some(stage.id)))
            }
            "applied_at" | "applied" => {
                if raw.is_empty() {
                    return Ok(Self::AppliedAt(None));
                }
                let ts = DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
                    .or_else(|| parse_day(raw).map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN))))
                    .ok_or_else(|| anyhow!("'{}' is not a date (use YYYY-MM-DD)", raw))?;
                Ok(Self::AppliedAt(Some(ts)))
            }
            "notes" => Ok(Self::Notes(opt())),
            "salary_min" => Ok(Self::SalaryMin(money()?)),
            "salary_max" => Ok(Self::SalaryMax(money()?)),
            "job_url" | "url" => Ok(Self::JobUrl(opt())),
            "location" => Ok(Self::Location(opt())),
            _ => Err(anyhow!(
                "Unknown field '{}'. Editable fields: {}",
                field,
                Self::FIELDS.join(", ")
            )),
        }
    }
}

/// Turns typed input into the JSON stored for a custom column. Empty clears it.
pub fn parse_column_value(column: &JobColumn, raw: &str) -> Result<serde_json::Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    let check_option = |value: &str| -> Result<String> {
        column
            .options
            .iter()
            .find(|o| o.eq_ignore_ascii_case(value))
            .cloned()
            .ok_or_else(|| anyhow!("'{}' is not one of: {}", value, column.options.join(", ")))
    };

    match column.column_type {
        ColumnType::Checkbox => match raw.to_lowercase().as_str() {
            "true" | "yes" | "x" | "1" => Ok(serde_json::json!(true)),
            "false" | "no" | "0" => Ok(serde_json::json!(false)),
            _ => Err(anyhow!("Checkbox values are true or false")),
        },
        ColumnType::Number => raw
            .replace(',', "")
            .parse::<f64>()
            .map(|n| serde_json::json!(n))
            .map_err(|_| anyhow!("'{}' is not a number", raw)),
        ColumnType::Date => parse_day(raw)
            .map(|d| serde_json::json!(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| anyhow!("'{}' is not a date (use YYYY-MM-DD)", raw)),
        ColumnType::Select => Ok(serde_json::json!(check_option(raw)?)),
        ColumnType::MultiSelect => {
            let values = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(check_option)
                .collect::<Result<Vec<_>>>()?;
            Ok(serde_json::json!(values))
        }
        ColumnType::Text | ColumnType::Url => Ok(serde_json::json!(raw)),
    }
}

/// Display text for one table cell. It parses back through `JobEdit::parse`
/// or `parse_column_value`, so it doubles as the seed for inline edits.
pub fn cell_text(job: &JobApplication, column: &JobColumn, stages: &[JobStage]) -> String {
    if let (true, Some(key)) = (column.is_core, column.field_key.as_deref()) {
        let text = match key {
            "company_name" => Some(job.company_name.clone()),
            "job_title" => Some(job.job_title.clone()),
            "stage_id" => job
                .stage_id
                .map(|id| {
                    stages
                        .iter()
                        .find(|s| s.id == id)
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| "?".to_string())
                }),
            "applied_at" => job.applied_at.map(|d| d.format("%Y-%m-%d").to_string()),
            "notes" => job.notes.clone(),
            "salary_min" => job.salary_min.map(|v| v.to_string()),
            "salary_max" => job.salary_max.map(|v| v.to_string()),
            "salary" => Some(job.salary_label()),
            "job_url" => job.job_url.clone(),
            "location" => job.location.clone(),
            "created_at" => Some(job.created_at.format("%Y-%m-%d").to_string()),
            _ => None,
        };
        return text.unwrap_or_default();
    }

    match job.column_value(column.id) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::Bool(true)) => "yes".to_string(),
        Some(serde_json::Value::Bool(false)) => "no".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// Searches and filter changes each leave a query behind; only this many are kept.
const MAX_CACHED_QUERIES: usize = 8;

#[derive(Debug, Clone)]
struct CachedQuery {
    key: JobsQuery,
    pages: Vec<CursorPage<JobApplication>>,
    fetched_at: Instant,
    stale: bool,
    last_used: u64,
}

impl CachedQuery {
    fn rows(&self) -> Vec<JobApplication> {
        self.pages.iter().flat_map(|p| p.items.iter().cloned()).collect()
    }

    fn rows_mut(&mut self) -> impl Iterator<Item = &mut JobApplication> {
        self.pages.iter_mut().flat_map(|p| p.items.iter_mut())
    }
}

#[derive(Debug, Default)]
struct CacheState {
    queries: Vec<CachedQuery>,
    /// Bumped on every read so the most recent query is the one in view.
    clock: u64,
    columns: Option<Vec<JobColumn>>,
    stages: Option<Vec<JobStage>>,
    interviews: HashMap<Uuid, Vec<JobInterview>>,
    lists_stale: bool,
    /// Client-generated ids of rows not yet confirmed by a refetch.
    pending: HashSet<Uuid>,
}

impl CacheState {
    fn query(&self, key: &JobsQuery) -> Option<&CachedQuery> {
        self.queries.iter().find(|q| &q.key == key)
    }

    fn query_mut(&mut self, key: &JobsQuery) -> Option<&mut CachedQuery> {
        self.queries.iter_mut().find(|q| &q.key == key)
    }

    fn touch(&mut self, key: &JobsQuery) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(q) = self.query_mut(key) {
            q.last_used = clock;
        }
    }

    /// The most recently read query, i.e. the one on screen.
    fn active(&self) -> Option<&CachedQuery> {
        self.queries.iter().max_by_key(|q| q.last_used)
    }

    fn store(&mut self, entry: CachedQuery) {
        let key = entry.key.clone();
        match self.query_mut(&key) {
            Some(existing) => *existing = entry,
            None => self.queries.push(entry),
        }
        self.touch(&key);
        while self.queries.len() > MAX_CACHED_QUERIES {
            let Some(oldest) = self
                .queries
                .iter()
                .enumerate()
                .min_by_key(|(_, q)| q.last_used)
                .map(|(i, _)| i)
            else {
                break;
            };
            let evicted = self.queries.remove(oldest);
            debug!(search = ?evicted.key.search, "evicted cached job query");
        }
    }

    fn rows_with_id(&mut self, id: Uuid) -> impl Iterator<Item = &mut JobApplication> {
        self.queries
            .iter_mut()
            .flat_map(|q| q.rows_mut())
            .filter(move |row| row.id == id)
    }
}

fn cache_key(query: &JobsQuery) -> JobsQuery {
    JobsQuery {
        cursor: None,
        ..query.clone()
    }
}

#[derive(Clone)]
pub struct JobsStore {
    api: ApiClient,
    state: Arc<Mutex<CacheState>>,
    stale_after: Duration,
}

impl JobsStore {
    pub fn new(api: ApiClient, stale_after: Duration) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(CacheState::default())),
            stale_after,
        }
    }

    // --- Reads ---

    /// Cached rows for a query, without touching the network.
    pub fn cached_rows(&self, query: &JobsQuery) -> Option<Vec<JobApplication>> {
        self.state.lock().query(&cache_key(query)).map(CachedQuery::rows)
    }

    pub fn has_more(&self, query: &JobsQuery) -> bool {
        self.state
            .lock()
            .query(&cache_key(query))
            .and_then(|q| q.pages.last())
            .is_some_and(|p| p.next_cursor.is_some())
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.state.lock().pending.contains(&id)
    }

    /// Rows for a query, fetched when missing, stale, or older than the TTL.
    /// A stale query is refetched with as many pages as were loaded.
    pub async fn rows(&self, query: &JobsQuery) -> Result<Vec<JobApplication>, ApiError> {
        let key = cache_key(query);
        let wanted = {
            let mut state = self.state.lock();
            state.touch(&key);
            match state.query(&key) {
                Some(q) if !q.stale && q.fetched_at.elapsed() < self.stale_after => {
                    return Ok(q.rows());
                }
                Some(q) => q.pages.len().max(1),
                None => 1,
            }
        };

        let pages = self.fetch_pages(&key, wanted).await?;
        let entry = CachedQuery {
            key,
            pages,
            fetched_at: Instant::now(),
            stale: false,
            last_used: 0,
        };
        let rows = entry.rows();
        self.state.lock().store(entry);
        Ok(rows)
    }

    async fn fetch_pages(&self, key: &JobsQuery, wanted: usize) -> Result<Vec<CursorPage<JobApplication>>, ApiError> {
        let mut pages = Vec::with_capacity(wanted);
        let mut cursor = None;
        for _ in 0..wanted {
            let query = JobsQuery {
                cursor: cursor.clone(),
                ..key.clone()
            };
            let page = self.api.query_jobs(&query).await?;
            cursor = page.next_cursor.clone();
            pages.push(page);
            if cursor.is_none() {
                break;
            }
        }
        debug!(pages = pages.len(), "fetched job pages");
        Ok(pages)
    }

    /// Appends the next page to a loaded query. Returns false at the end.
    pub async fn load_more(&self, query: &JobsQuery) -> Result<bool, ApiError> {
        let key = cache_key(query);
        let cursor = {
            let mut state = self.state.lock();
            state.touch(&key);
            state
                .query(&key)
                .and_then(|q| q.pages.last())
                .and_then(|p| p.next_cursor.clone())
        };
        let Some(cursor) = cursor else {
            return Ok(false);
        };

        let page = self
            .api
            .query_jobs(&JobsQuery {
                cursor: Some(cursor.clone()),
                ..key.clone()
            })
            .await?;

        let mut state = self.state.lock();
        if let Some(entry) = state.query_mut(&key) {
            // a refetch may have replaced the pages meanwhile
            if entry.pages.last().and_then(|p| p.next_cursor.as_ref()) == Some(&cursor) {
                entry.pages.push(page);
            }
        }
        Ok(true)
    }

    pub async fn count(&self, query: &JobsQuery) -> Result<u64, ApiError> {
        Ok(self.api.count_jobs(&cache_key(query)).await?.count)
    }

    pub async fn columns(&self) -> Result<Vec<JobColumn>, ApiError> {
        {
            let state = self.state.lock();
            if let (Some(columns), false) = (&state.columns, state.lists_stale) {
                return Ok(columns.clone());
            }
        }
        let mut columns = self.api.list_columns().await?;
        columns.sort_by_key(|c| c.position);
        self.state.lock().columns = Some(columns.clone());
        Ok(columns)
    }

    pub async fn stages(&self) -> Result<Vec<JobStage>, ApiError> {
        {
            let state = self.state.lock();
            if let (Some(stages), false) = (&state.stages, state.lists_stale) {
                return Ok(stages.clone());
            }
        }
        let mut stages = self.api.list_stages().await?;
        stages.sort_by_key(|s| s.position);
        self.state.lock().stages = Some(stages.clone());
        Ok(stages)
    }

    pub fn cached_stages(&self) -> Vec<JobStage> {
        self.state.lock().stages.clone().unwrap_or_default()
    }

    pub fn cached_columns(&self) -> Vec<JobColumn> {
        self.state.lock().columns.clone().unwrap_or_default()
    }

    pub fn cached_interviews(&self, job_id: Uuid) -> Vec<JobInterview> {
        self.state
            .lock()
            .interviews
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn interviews(&self, job_id: Uuid) -> Result<Vec<JobInterview>, ApiError> {
        {
            let state = self.state.lock();
            if let (Some(list), false) = (state.interviews.get(&job_id), state.lists_stale) {
                return Ok(list.clone());
            }
        }
        let mut list = self.api.list_interviews(job_id).await?;
        list.sort_by_key(|i| i.scheduled_at);
        self.state.lock().interviews.insert(job_id, list.clone());
        Ok(list)
    }

    // --- Invalidation ---

    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        for q in &mut state.queries {
            q.stale = true;
        }
        state.lists_stale = true;
    }

    /// Drops everything cached, e.g. when the user signs out.
    pub fn clear(&self) {
        *self.state.lock() = CacheState::default();
    }

    /// Refetches the query in view and the stale lists. Other stale queries
    /// wait until they are read again. Failures leave data marked stale.
    pub async fn refetch_stale(&self) {
        let (active, columns, stages, interview_jobs) = {
            let state = self.state.lock();
            (
                state.active().filter(|q| q.stale).map(|q| q.key.clone()),
                state.columns.is_some(),
                state.stages.is_some(),
                state.interviews.keys().copied().collect::<Vec<_>>(),
            )
        };

        let mut rows_ok = true;
        if let Some(key) = active {
            if let Err(e) = self.rows(&key).await {
                warn!(error = %e, "refetch of job rows failed");
                rows_ok = false;
            }
        }

        let was_stale = self.state.lock().lists_stale;
        if !was_stale {
            if rows_ok {
                self.state.lock().pending.clear();
            }
            return;
        }
        let mut ok = rows_ok;
        if columns {
            ok &= self.columns().await.is_ok();
        }
        if stages {
            ok &= self.stages().await.is_ok();
        }
        for job_id in interview_jobs {
            ok &= self.interviews(job_id).await.is_ok();
        }
        if ok {
            let mut state = self.state.lock();
            state.lists_stale = false;
            state.pending.clear();
        }
    }

    // --- Mutations ---

    async fn mutate<T, F>(&self, apply: impl FnOnce(&mut CacheState) -> Undo, remote: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let undo = {
            let mut state = self.state.lock();
            apply(&mut *state)
        };

        match remote.await {
            Ok(value) => {
                self.invalidate();
                self.refetch_stale().await;
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "mutation failed, restoring cache");
                undo(&mut *self.state.lock());
                Err(e)
            }
        }
    }

    pub async fn update_field(&self, job_id: Uuid, edit: JobEdit) -> Result<JobApplication, ApiError> {
        let patch = edit.to_patch();
        self.mutate(
            |state| {
                let before = state.rows_with_id(job_id).next().map(|row| edit.current(row));
                for row in state.rows_with_id(job_id) {
                    edit.apply(row);
                }
                undo(move |state| {
                    let Some(before) = before else { return };
                    for row in state.rows_with_id(job_id) {
                        before.apply(row);
                    }
                })
            },
            self.api.update_job(job_id, &patch),
        )
        .await
    }

    pub async fn set_column_value(
        &self,
        job_id: Uuid,
        column_id: Uuid,
        value: serde_json::Value,
    ) -> Result<(), ApiError> {
        let remote_value = value.clone();
        self.mutate(
            |state| {
                let before = state
                    .rows_with_id(job_id)
                    .next()
                    .map(|row| row.column_value(column_id).cloned());
                for row in state.rows_with_id(job_id) {
                    put_column_value(row, column_id, Some(value.clone()));
                }
                undo(move |state| {
                    let Some(before) = before else { return };
                    for row in state.rows_with_id(job_id) {
                        put_column_value(row, column_id, before.clone());
                    }
                })
            },
            async move { self.api.upsert_column_value(job_id, column_id, &remote_value).await },
        )
        .await
    }

    /// Shows the new job at the top of every loaded table under a temporary id.
    pub async fn create_job(&self, job: NewJob) -> Result<JobApplication, ApiError> {
        let temp_id = Uuid::new_v4();
        let now = Utc::now();
        let row = JobApplication {
            id: temp_id,
            company_name: job.company_name.clone(),
            job_title: job.job_title.clone(),
            stage_id: job.stage_id,
            applied_at: job.applied_at,
            notes: job.notes.clone(),
            salary_min: job.salary_min,
            salary_max: job.salary_max,
            salary_currency: None,
            job_url: job.job_url.clone(),
            location: job.location.clone(),
            column_values: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.mutate(
            |state| {
                state.pending.insert(temp_id);
                for q in &mut state.queries {
                    match q.pages.first_mut() {
                        Some(page) => page.items.insert(0, row.clone()),
                        None => q.pages.push(CursorPage {
                            items: vec![row.clone()],
                            next_cursor: None,
                        }),
                    }
                }
                undo(move |state| {
                    state.pending.remove(&temp_id);
                    for q in &mut state.queries {
                        for page in &mut q.pages {
                            page.items.retain(|row| row.id != temp_id);
                        }
                    }
                })
            },
            self.api.create_job(&job),
        )
        .await
    }

    pub async fn delete_job(&self, job_id: Uuid) -> Result<(), ApiError> {
        self.mutate(
            |state| {
                // (query, page, index, row) of every cached copy
                let mut removed = Vec::new();
                for q in &mut state.queries {
                    for (p, page) in q.pages.iter_mut().enumerate() {
                        if let Some(i) = page.items.iter().position(|row| row.id == job_id) {
                            removed.push((q.key.clone(), p, i, page.items.remove(i)));
                        }
                    }
                }
                let interviews = state.interviews.remove(&job_id);
                undo(move |state| {
                    for (key, p, i, row) in removed {
                        let Some(q) = state.query_mut(&key) else { continue };
                        if q.rows_mut().any(|r| r.id == job_id) {
                            continue;
                        }
                        if let Some(page) = q.pages.get_mut(p) {
                            let i = i.min(page.items.len());
                            page.items.insert(i, row);
                        }
                    }
                    if let Some(list) = interviews {
                        state.interviews.entry(job_id).or_insert(list);
                    }
                })
            },
            self.api.delete_job(job_id),
        )
        .await
    }

    pub async fn create_column(&self, column: NewColumn) -> Result<JobColumn, ApiError> {
        let temp_id = Uuid::new_v4();
        self.mutate(
            |state| {
                state.pending.insert(temp_id);
                let columns = state.columns.get_or_insert_with(Vec::new);
                let position = columns.iter().map(|c| c.position + 1).max().unwrap_or(0);
                columns.push(JobColumn {
                    id: temp_id,
                    name: column.name.clone(),
                    column_type: column.column_type,
                    is_core: false,
                    field_key: None,
                    options: column.options.clone(),
                    position,
                });
                undo(move |state| {
                    state.pending.remove(&temp_id);
                    if let Some(columns) = &mut state.columns {
                        columns.retain(|c| c.id != temp_id);
                    }
                })
            },
            self.api.create_column(&column),
        )
        .await
    }

    pub async fn update_column(&self, column_id: Uuid, patch: ColumnPatch) -> Result<JobColumn, ApiError> {
        self.mutate(
            |state| {
                let column = state
                    .columns
                    .as_mut()
                    .and_then(|columns| columns.iter_mut().find(|c| c.id == column_id));
                let Some(column) = column else { return undo(|_| {}) };
                let before = (column.name.clone(), column.options.clone());
                if let Some(name) = &patch.name {
                    column.name = name.clone();
                }
                if let Some(options) = &patch.options {
                    column.options = options.clone();
                }
                undo(move |state| {
                    let Some(columns) = &mut state.columns else { return };
                    if let Some(column) = columns.iter_mut().find(|c| c.id == column_id) {
                        (column.name, column.options) = before;
                    }
                })
            },
            self.api.update_column(column_id, &patch),
        )
        .await
    }

    pub async fn delete_column(&self, column_id: Uuid) -> Result<(), ApiError> {
        self.mutate(
            |state| {
                let removed = state.columns.as_mut().and_then(|columns| {
                    let i = columns.iter().position(|c| c.id == column_id)?;
                    Some((i, columns.remove(i)))
                });
                let mut values = HashMap::new();
                for q in &mut state.queries {
                    for row in q.rows_mut() {
                        if let Some(i) = row.column_values.iter().position(|v| v.column_id == column_id) {
                            values.insert(row.id, row.column_values.remove(i));
                        }
                    }
                }
                undo(move |state| {
                    if let (Some((i, column)), Some(columns)) = (removed, &mut state.columns) {
                        if !columns.iter().any(|c| c.id == column_id) {
                            let i = i.min(columns.len());
                            columns.insert(i, column);
                        }
                    }
                    for q in &mut state.queries {
                        for row in q.rows_mut() {
                            let Some(value) = values.get(&row.id) else { continue };
                            if row.column_value(column_id).is_none() {
                                row.column_values.push(value.clone());
                            }
                        }
                    }
                })
            },
            self.api.delete_column(column_id),
        )
        .await
    }

    pub async fn create_stage(&self, stage: NewStage) -> Result<JobStage, ApiError> {
        let temp_id = Uuid::new_v4();
        self.mutate(
            |state| {
                state.pending.insert(temp_id);
                let stages = state.stages.get_or_insert_with(Vec::new);
                stages.push(JobStage {
                    id: temp_id,
                    name: stage.name.clone(),
                    color: stage.color.clone(),
                    category: stage.category,
                    position: stage.position,
                });
                stages.sort_by_key(|s| s.position);
                undo(move |state| {
                    state.pending.remove(&temp_id);
                    if let Some(stages) = &mut state.stages {
                        stages.retain(|s| s.id != temp_id);
                    }
                })
            },
            self.api.create_stage(&stage),
        )
        .await
    }

    pub async fn update_stage(&self, stage_id: Uuid, patch: StagePatch) -> Result<JobStage, ApiError> {
        self.mutate(
            |state| {
                let Some(stages) = &mut state.stages else { return undo(|_| {}) };
                let Some(stage) = stages.iter_mut().find(|s| s.id == stage_id) else {
                    return undo(|_| {});
                };
                let before = stage.clone();
                if let Some(name) = &patch.name {
                    stage.name = name.clone();
                }
                if let Some(color) = &patch.color {
                    stage.color = color.clone();
                }
                if let Some(category) = patch.category {
                    stage.category = category;
                }
                if let Some(position) = patch.position {
                    stage.position = position;
                }
                stages.sort_by_key(|s| s.position);
                undo(move |state| {
                    let Some(stages) = &mut state.stages else { return };
                    if let Some(stage) = stages.iter_mut().find(|s| s.id == stage_id) {
                        *stage = before;
                    }
                    stages.sort_by_key(|s| s.position);
                })
            },
            self.api.update_stage(stage_id, &patch),
        )
        .await
    }

    pub async fn delete_stage(&self, stage_id: Uuid) -> Result<(), ApiError> {
        self.mutate(
            |state| {
                let removed = state.stages.as_mut().and_then(|stages| {
                    let i = stages.iter().position(|s| s.id == stage_id)?;
                    Some(stages.remove(i))
                });
                undo(move |state| {
                    let (Some(stage), Some(stages)) = (removed, &mut state.stages) else { return };
                    if !stages.iter().any(|s| s.id == stage_id) {
                        stages.push(stage);
                        stages.sort_by_key(|s| s.position);
                    }
                })
            },
            self.api.delete_stage(stage_id),
        )
        .await
    }

    pub async fn create_interview(&self, job_id: Uuid, interview: NewInterview) -> Result<JobInterview, ApiError> {
        let temp_id = Uuid::new_v4();
        self.mutate(
            |state| {
                state.pending.insert(temp_id);
                let list = state.interviews.entry(job_id).or_default();
                list.push(JobInterview {
                    id: temp_id,
                    job_id,
                    interview_type: interview.interview_type,
                    scheduled_at: interview.scheduled_at,
                    duration_mins: interview.duration_mins,
                    location: interview.location.clone(),
                    meeting_url: interview.meeting_url.clone(),
                    notes: interview.notes.clone(),
                    outcome: crate::models::InterviewOutcome::Pending,
                });
                list.sort_by_key(|i| i.scheduled_at);
                undo(move |state| {
                    state.pending.remove(&temp_id);
                    if let Some(list) = state.interviews.get_mut(&job_id) {
                        list.retain(|i| i.id != temp_id);
                    }
                })
            },
            self.api.create_interview(job_id, &interview),
        )
        .await
    }

    pub async fn update_interview(
        &self,
        job_id: Uuid,
        interview_id: Uuid,
        patch: InterviewPatch,
    ) -> Result<JobInterview, ApiError> {
        self.mutate(
            |state| {
                let interview = state
                    .interviews
                    .get_mut(&job_id)
                    .and_then(|list| list.iter_mut().find(|i| i.id == interview_id));
                let Some(interview) = interview else { return undo(|_| {}) };
                let before = interview.clone();
                if let Some(at) = patch.scheduled_at {
                    interview.scheduled_at = at;
                }
                if let Some(mins) = patch.duration_mins {
                    interview.duration_mins = mins;
                }
                if let Some(notes) = &patch.notes {
                    interview.notes = Some(notes.clone());
                }
                if let Some(outcome) = patch.outcome {
                    interview.outcome = outcome;
                }
                undo(move |state| {
                    let Some(list) = state.interviews.get_mut(&job_id) else { return };
                    if let Some(interview) = list.iter_mut().find(|i| i.id == interview_id) {
                        *interview = before;
                    }
                })
            },
            self.api.update_interview(job_id, interview_id, &patch),
        )
        .await
    }

    pub async fn delete_interview(&self, job_id: Uuid, interview_id: Uuid) -> Result<(), ApiError> {
        self.mutate(
            |state| {
                let removed = state.interviews.get_mut(&job_id).and_then(|list| {
                    let i = list.iter().position(|i| i.id == interview_id)?;
                    Some(list.remove(i))
                });
                undo(move |state| {
                    let Some(interview) = removed else { return };
                    let Some(list) = state.interviews.get_mut(&job_id) else { return };
                    if !list.iter().any(|i| i.id == interview_id) {
                        list.push(interview);
                        list.sort_by_key(|i| i.scheduled_at);
                    }
                })
            },
            self.api.delete_interview(job_id, interview_id),
        )
        .await
    }
}

/// Reverts one optimistic change, touching only what that change touched.
type Undo = Box<dyn FnOnce(&mut CacheState) + Send>;

fn undo(f: impl FnOnce(&mut CacheState) + Send + 'static) -> Undo {
    Box::new(f)
}

/// Sets, replaces or (with `None`) removes one custom value on a row.
fn put_column_value(row: &mut JobApplication, column_id: Uuid, value: Option<serde_json::Value>) {
    let job_id = row.id;
    let existing = row.column_values.iter().position(|v| v.column_id == column_id);
    match (existing, value) {
        (Some(i), Some(value)) => row.column_values[i].value = value,
        (Some(i), None) => {
            row.column_values.remove(i);
        }
        (None, Some(value)) => row.column_values.push(JobColumnValue {
            job_id,
            column_id,
            value,
        }),
        (None, None) => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::fake::{client, ok_json, status, FakeTransport};
    use crate::api::{ApiRequest, Method};
    use crate::models::ColumnType;
    use futures::FutureExt;
    use reqwest::StatusCode;
    use tokio::sync::Semaphore;

    pub(crate) fn job(company: &str) -> JobApplication {
        JobApplication {
            id: Uuid::new_v4(),
            company_name: company.to_string(),
            job_title: "Engineer".to_string(),
            stage_id: None,
            applied_at: None,
            notes: None,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            job_url: None,
            location: None,
            column_values: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn page(items: &[JobApplication], next: Option<&str>) -> serde_json::Value {
        serde_json::json!({ "items": items, "next_cursor": next })
    }

    fn query() -> JobsQuery {
        JobsQuery {
            limit: 2,
            ..JobsQuery::default()
        }
    }

    fn cursor_of(req: &ApiRequest) -> Option<String> {
        req.body
            .as_ref()
            .and_then(|b| b["cursor"].as_str().map(String::from))
    }

    #[tokio::test]
    async fn test_failed_edit_restores_previous_value() {
        let row = job("Acme");
        let gate = Arc::new(Semaphore::new(0));
        let transport = {
            let row = row.clone();
            let gate = gate.clone();
            FakeTransport::new(move |req| {
                let rows = vec![row.clone()];
                let gate = gate.clone();
                let method = req.method;
                async move {
                    match method {
                        Method::Post => ok_json(page(&rows, None)),
                        _ => {
                            gate.acquire().await.unwrap().forget();
                            status(StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    }
                }
                .boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        store.rows(&query()).await.unwrap();

        let edit = store.update_field(row.id, JobEdit::CompanyName("Globex".into()));
        let check = async {
            while transport.count(Method::Patch, &format!("/jobs/{}", row.id)) == 0 {
                tokio::task::yield_now().await;
            }
            let optimistic = store.cached_rows(&query()).unwrap();
            assert_eq!(optimistic[0].company_name, "Globex");
            gate.add_permits(1);
        };
        let (result, ()) = tokio::join!(edit, check);

        assert!(result.is_err());
        let rows = store.cached_rows(&query()).unwrap();
        assert_eq!(rows[0].company_name, "Acme");
        assert_eq!(transport.count(Method::Post, "/jobs/query"), 1);
    }

    #[tokio::test]
    async fn test_failed_edit_keeps_lists_loaded_meanwhile() {
        let row = job("Acme");
        let referral = crate::filters::tests::column("Referral", ColumnType::Checkbox, None);
        let gate = Arc::new(Semaphore::new(0));
        let transport = {
            let row = row.clone();
            let gate = gate.clone();
            FakeTransport::new(move |req| {
                let rows = vec![row.clone()];
                let columns = serde_json::json!([referral.clone()]);
                let gate = gate.clone();
                let method = req.method;
                async move {
                    match method {
                        Method::Post => ok_json(page(&rows, None)),
                        Method::Get => ok_json(columns),
                        _ => {
                            gate.acquire().await.unwrap().forget();
                            status(StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    }
                }
                .boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        store.rows(&query()).await.unwrap();

        let edit = store.update_field(row.id, JobEdit::CompanyName("Globex".into()));
        let meanwhile = async {
            while transport.count(Method::Patch, &format!("/jobs/{}", row.id)) == 0 {
                tokio::task::yield_now().await;
            }
            assert_eq!(store.columns().await.unwrap().len(), 1);
            gate.add_permits(1);
        };
        let (result, ()) = tokio::join!(edit, meanwhile);

        assert!(result.is_err());
        assert_eq!(store.cached_rows(&query()).unwrap()[0].company_name, "Acme");
        assert_eq!(store.cached_columns().len(), 1);
        assert_eq!(transport.count(Method::Get, "/job-columns"), 1);
    }

    #[tokio::test]
    async fn test_edit_refetches_only_the_query_in_view() {
        let row = job("Acme");
        let transport = {
            let row = row.clone();
            FakeTransport::new(move |req| {
                let body = match req.method {
                    Method::Post => page(std::slice::from_ref(&row), None),
                    _ => serde_json::to_value(&row).unwrap(),
                };
                async move { ok_json(body) }.boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        let searching = |text: &str| JobsQuery {
            search: Some(text.to_string()),
            ..query()
        };
        let queries = || transport.count(Method::Post, "/jobs/query");

        for text in ["a", "ac", "acm", "acme", "acme "] {
            store.rows(&searching(text)).await.unwrap();
        }
        assert_eq!(queries(), 5);

        store
            .update_field(row.id, JobEdit::Notes(Some("call back".into())))
            .await
            .unwrap();
        assert_eq!(queries(), 6);

        // older searches are stale and refetch once read again
        store.rows(&searching("a")).await.unwrap();
        assert_eq!(queries(), 7);
        store.rows(&searching("a")).await.unwrap();
        assert_eq!(queries(), 7);

        for i in 0..MAX_CACHED_QUERIES {
            store.rows(&searching(&format!("q{}", i))).await.unwrap();
        }
        assert!(store.cached_rows(&searching("a")).is_none());
        assert!(store.cached_rows(&searching("q0")).is_some());
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let transport = FakeTransport::new(|req| {
            let body = match req.method {
                Method::Post => page(&[job("Acme")], None),
                _ => serde_json::json!([]),
            };
            async move { ok_json(body) }.boxed()
        });
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        store.rows(&query()).await.unwrap();
        store.stages().await.unwrap();

        store.clear();
        assert!(store.cached_rows(&query()).is_none());
        assert!(store.cached_stages().is_empty());
        store.rows(&query()).await.unwrap();
        assert_eq!(transport.count(Method::Post, "/jobs/query"), 2);
    }

    #[tokio::test]
    async fn test_successful_edit_refetches_canonical_rows() {
        let server = Arc::new(Mutex::new(vec![job("Acme")]));
        let transport = {
            let server = server.clone();
            FakeTransport::new(move |req| {
                let server = server.clone();
                let req = req.clone();
                async move {
                    match req.method {
                        Method::Patch => {
                            let mut rows = server.lock();
                            let title = req.body.as_ref().unwrap()["job_title"].as_str().unwrap().to_string();
                            rows[0].job_title = format!("{} (canonical)", title);
                            ok_json(serde_json::to_value(&rows[0]).unwrap())
                        }
                        _ => ok_json(page(&server.lock(), None)),
                    }
                }
                .boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        let rows = store.rows(&query()).await.unwrap();

        store
            .update_field(rows[0].id, JobEdit::JobTitle("Staff Engineer".into()))
            .await
            .unwrap();

        assert_eq!(transport.count(Method::Post, "/jobs/query"), 2);
        let rows = store.cached_rows(&query()).unwrap();
        assert_eq!(rows[0].job_title, "Staff Engineer (canonical)");
    }

    #[tokio::test]
    async fn test_pages_follow_cursor_and_refetch_together() {
        let all: Vec<JobApplication> = ["A", "B", "C"].iter().map(|c| job(c)).collect();
        let transport = {
            let all = all.clone();
            FakeTransport::new(move |req| {
                let body = match cursor_of(req).as_deref() {
                    None => page(&all[..2], Some("p2")),
                    Some(_) => page(&all[2..], None),
                };
                async move { ok_json(body) }.boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));

        assert_eq!(store.rows(&query()).await.unwrap().len(), 2);
        assert!(store.has_more(&query()));
        assert!(store.load_more(&query()).await.unwrap());
        assert!(!store.has_more(&query()));
        assert!(!store.load_more(&query()).await.unwrap());
        assert_eq!(store.cached_rows(&query()).unwrap().len(), 3);

        // fresh reads come from the cache
        store.rows(&query()).await.unwrap();
        assert_eq!(transport.count(Method::Post, "/jobs/query"), 2);

        store.invalidate();
        let rows = store.rows(&query()).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(transport.count(Method::Post, "/jobs/query"), 4);
    }

    #[tokio::test]
    async fn test_created_column_gets_server_id_after_refetch() {
        let server_id = Uuid::new_v4();
        let created = Arc::new(Mutex::new(false));
        let transport = {
            let created = created.clone();
            FakeTransport::new(move |req| {
                let created = created.clone();
                let method = req.method;
                async move {
                    let column = serde_json::json!({
                        "id": server_id, "name": "Referral", "column_type": "checkbox",
                        "is_core": false, "field_key": null, "options": [], "position": 0
                    });
                    match method {
                        Method::Post => {
                            *created.lock() = true;
                            ok_json(column)
                        }
                        _ if *created.lock() => ok_json(serde_json::json!([column])),
                        _ => ok_json(serde_json::json!([])),
                    }
                }
                .boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        assert!(store.columns().await.unwrap().is_empty());

        let column = store
            .create_column(NewColumn {
                name: "Referral".into(),
                column_type: ColumnType::Checkbox,
                options: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(column.id, server_id);
        let columns = store.cached_columns();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].id, server_id);
    }

    #[tokio::test]
    async fn test_failed_column_delete_keeps_values() {
        let column_id = Uuid::new_v4();
        let mut row = job("Acme");
        row.column_values.push(JobColumnValue {
            job_id: row.id,
            column_id,
            value: serde_json::json!(true),
        });
        let transport = {
            let row = row.clone();
            FakeTransport::new(move |req| {
                let body = page(std::slice::from_ref(&row), None);
                let method = req.method;
                async move {
                    match method {
                        Method::Delete => status(StatusCode::CONFLICT),
                        _ => ok_json(body),
                    }
                }
                .boxed()
            })
        };
        let store = JobsStore::new(client(&transport), Duration::from_secs(30));
        store.rows(&query()).await.unwrap();

        assert!(store.delete_column(column_id).await.is_err());
        let rows = store.cached_rows(&query()).unwrap();
        assert_eq!(rows[0].column_value(column_id), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_parse_custom_column_input() {
        use crate::filters::tests::column;

        let mut select = column("Source", ColumnType::Select, None);
        select.options = vec!["Referral".into(), "LinkedIn".into()];
        assert_eq!(parse_column_value(&select, "referral").unwrap(), serde_json::json!("Referral"));
        assert!(parse_column_value(&select, "Indeed").is_err());

        let mut tags = column("Tags", ColumnType::MultiSelect, None);
        tags.options = vec!["remote".into(), "equity".into()];
        assert_eq!(
            parse_column_value(&tags, "remote, equity").unwrap(),
            serde_json::json!(["remote", "equity"])
        );

        let check = column("Referral", ColumnType::Checkbox, None);
        assert_eq!(parse_column_value(&check, "x").unwrap(), serde_json::json!(true));
        assert_eq!(parse_column_value(&check, "").unwrap(), serde_json::Value::Null);

        let mut row = job("Acme");
        row.column_values.push(JobColumnValue {
            job_id: row.id,
            column_id: tags.id,
            value: serde_json::json!(["remote", "equity"]),
        });
        assert_eq!(cell_text(&row, &tags, &[]), "remote, equity");
        assert_eq!(cell_text(&row, &check, &[]), "");

        let company = column("Company", ColumnType::Text, Some("company_name"));
        assert_eq!(cell_text(&row, &company, &[]), "Acme");
    }

    #[test]
    fn test_parse_edit_input() {
        let stages = vec![JobStage {
            id: Uuid::new_v4(),
            name: "Applied".into(),
            color: "#00f".into(),
            category: crate::models::StageCategory::Active,
            position: 0,
        }];
        assert_eq!(
            JobEdit::parse("stage", "applied", &stages).unwrap(),
            JobEdit::Stage(Some(stages[0].id))
        );
        assert_eq!(
            JobEdit::parse("salary_min", "$120,000", &stages).unwrap(),
            JobEdit::SalaryMin(Some(120_000))
        );
        assert_eq!(JobEdit::parse("notes", "  ", &stages).unwrap(), JobEdit::Notes(None));
        assert!(JobEdit::parse("company", "", &stages).is_err());
        assert!(JobEdit::parse("applied", "yesterday", &stages).is_err());
        assert!(JobEdit::parse("rating", "5", &stages).is_err());

        let patch = JobEdit::parse("applied", "2024-02-01", &stages).unwrap().to_patch();
        assert_eq!(patch["applied_at"], "2024-02-01T00:00:00Z");
    }
}
