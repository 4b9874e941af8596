//! Editable forms and the checks that run before anything is sent.
//!
//! A form is a list of text fields; each `validate_*` turns one into a typed
//! request body or a set of per-field messages to show inline.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::filters::parse_day;
use crate::models::{
    ColumnType, InterviewType, JobStage, NewColumn, NewInterview, NewJob, NewStage, SignInRequest,
    SignUpRequest, StageCategory,
};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid color regex"));

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, FieldErrors> {
        if self.0.is_empty() { Ok(value()) } else { Err(self) }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    SignUp,
    Job,
    Interview,
    Stage,
    Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: &'static str,
    pub label: &'static str,
    pub value: String,
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub fields: Vec<Field>,
    pub focus: usize,
    pub errors: FieldErrors,
}

impl Form {
    fn build(kind: FormKind, fields: &[(&'static str, &'static str, bool)]) -> Self {
        Self {
            kind,
            fields: fields
                .iter()
                .map(|&(key, label, secret)| Field {
                    key,
                    label,
                    value: String::new(),
                    secret,
                })
                .collect(),
            focus: 0,
            errors: FieldErrors::default(),
        }
    }

    pub fn login() -> Self {
        Self::build(FormKind::Login, &[("email", "Email", false), ("password", "Password", true)])
    }

    pub fn sign_up() -> Self {
        Self::build(
            FormKind::SignUp,
            &[
                ("full_name", "Full name", false),
                ("email", "Email", false),
                ("password", "Password", true),
                ("confirmation_password", "Confirm password", true),
            ],
        )
    }

    pub fn job() -> Self {
        Self::build(
            FormKind::Job,
            &[
                ("company_name", "Company", false),
                ("job_title", "Job title", false),
                ("stage", "Stage", false),
                ("applied_at", "Applied (YYYY-MM-DD)", false),
                ("salary_min", "Salary min", false),
                ("salary_max", "Salary max", false),
                ("job_url", "Posting URL", false),
                ("location", "Location", false),
                ("notes", "Notes", false),
            ],
        )
    }

    pub fn interview() -> Self {
        let mut form = Self::build(
            FormKind::Interview,
            &[
                ("type", "Type (phone/video/onsite/technical/behavioral/other)", false),
                ("scheduled_at", "When (YYYY-MM-DD HH:MM, UTC)", false),
                ("duration_mins", "Duration (minutes)", false),
                ("location", "Location", false),
                ("meeting_url", "Meeting URL", false),
                ("notes", "Notes", false),
            ],
        );
        form.set("type", "video");
        form.set("duration_mins", "60");
        form
    }

    pub fn stage() -> Self {
        let mut form = Self::build(
            FormKind::Stage,
            &[
                ("name", "Name", false),
                ("color", "Color (#rrggbb)", false),
                ("category", "Category (active/offer/closed)", false),
            ],
        );
        form.set("color", "#6b7280");
        form.set("category", "active");
        form
    }

    pub fn column() -> Self {
        let mut form = Self::build(
            FormKind::Column,
            &[
                ("name", "Name", false),
                ("column_type", "Type (text/number/date/url/checkbox/select/multi_select)", false),
                ("options", "Options (comma separated)", false),
            ],
        );
        form.set("column_type", "text");
        form
    }

    pub fn get(&self, key: &str) -> &str {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
            .unwrap_or("")
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(field) = self.fields.iter_mut().find(|f| f.key == key) {
            field.value = value.to_string();
        }
    }

    pub fn focused(&self) -> Option<&Field> {
        self.fields.get(self.focus)
    }

    pub fn input(&mut self, c: char) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            field.value.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            field.value.pop();
        }
    }

    pub fn next_field(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn prev_field(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }
}

fn opt(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn check_url(errors: &mut FieldErrors, field: &'static str, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => errors.add(field, "Enter a valid http(s) URL"),
    }
}

fn check_email(errors: &mut FieldErrors, raw: &str) {
    if raw.trim().is_empty() {
        errors.add("email", "Email is required");
    } else if !EMAIL.is_match(raw.trim()) {
        errors.add("email", "Enter a valid email address");
    }
}

pub fn validate_login(form: &Form) -> Result<SignInRequest, FieldErrors> {
    let mut errors = FieldErrors::default();
    check_email(&mut errors, form.get("email"));
    if form.get("password").is_empty() {
        errors.add("password", "Password is required");
    }
    errors.into_result(|| SignInRequest {
        email: form.get("email").trim().to_string(),
        password: form.get("password").to_string(),
    })
}

pub fn validate_sign_up(form: &Form) -> Result<SignUpRequest, FieldErrors> {
    let mut errors = FieldErrors::default();
    check_email(&mut errors, form.get("email"));
    let password = form.get("password");
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }
    if password != form.get("confirmation_password") {
        errors.add("confirmation_password", "Passwords do not match");
    }
    errors.into_result(|| SignUpRequest {
        email: form.get("email").trim().to_string(),
        password: password.to_string(),
        full_name: opt(form.get("full_name")),
    })
}

fn parse_money(errors: &mut FieldErrors, field: &'static str, raw: &str) -> Option<i64> {
    let cleaned = raw.trim().replace([',', '$'], "");
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.parse::<i64>() {
        Ok(v) if v >= 0 => Some(v),
        _ => {
            errors.add(field, "Enter a whole, non-negative amount");
            None
        }
    }
}

pub fn validate_job(form: &Form, stages: &[JobStage]) -> Result<NewJob, FieldErrors> {
    let mut errors = FieldErrors::default();
    let company = form.get("company_name").trim();
    let title = form.get("job_title").trim();
    if company.is_empty() {
        errors.add("company_name", "Company is required");
    }
    if title.is_empty() {
        errors.add("job_title", "Job title is required");
    }

    let stage_raw = form.get("stage").trim();
    let stage_id = if stage_raw.is_empty() {
        None
    } else {
        let found = stages.iter().find(|s| s.name.eq_ignore_ascii_case(stage_raw));
        if found.is_none() {
            errors.add("stage", format!("Unknown stage '{}'", stage_raw));
        }
        found.map(|s| s.id)
    };

    let applied_raw = form.get("applied_at").trim();
    let applied_at = if applied_raw.is_empty() {
        None
    } else {
        let day = parse_day(applied_raw);
        if day.is_none() {
            errors.add("applied_at", "Use YYYY-MM-DD");
        }
        day.map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
    };

    let salary_min = parse_money(&mut errors, "salary_min", form.get("salary_min"));
    let salary_max = parse_money(&mut errors, "salary_max", form.get("salary_max"));
    if let (Some(min), Some(max)) = (salary_min, salary_max) {
        if min > max {
            errors.add("salary_max", "Maximum must be at least the minimum");
        }
    }
    check_url(&mut errors, "job_url", form.get("job_url"));

    errors.into_result(|| NewJob {
        company_name: company.to_string(),
        job_title: title.to_string(),
        stage_id,
        applied_at,
        notes: opt(form.get("notes")),
        salary_min,
        salary_max,
        job_url: opt(form.get("job_url")),
        location: opt(form.get("location")),
    })
}

fn parse_when(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
                .ok()
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
}

pub fn validate_interview(form: &Form) -> Result<NewInterview, FieldErrors> {
    let mut errors = FieldErrors::default();
    let interview_type = InterviewType::parse(form.get("type").trim());
    if interview_type.is_none() {
        errors.add("type", "Choose phone, video, onsite, technical, behavioral or other");
    }
    let scheduled_at = parse_when(form.get("scheduled_at"));
    if scheduled_at.is_none() {
        errors.add("scheduled_at", "Use YYYY-MM-DD HH:MM");
    }
    let duration_mins = match form.get("duration_mins").trim().parse::<u32>() {
        Ok(m) if (1..=1440).contains(&m) => m,
        _ => {
            errors.add("duration_mins", "Duration must be between 1 and 1440 minutes");
            0
        }
    };
    check_url(&mut errors, "meeting_url", form.get("meeting_url"));

    match (interview_type, scheduled_at) {
        (Some(interview_type), Some(scheduled_at)) if errors.is_empty() => Ok(NewInterview {
            interview_type,
            scheduled_at,
            duration_mins,
            location: opt(form.get("location")),
            meeting_url: opt(form.get("meeting_url")),
            notes: opt(form.get("notes")),
        }),
        _ => Err(errors),
    }
}

pub fn validate_stage(form: &Form, next_position: i32) -> Result<NewStage, FieldErrors> {
    let mut errors = FieldErrors::default();
    let name = form.get("name").trim();
    if name.is_empty() {
        errors.add("name", "Name is required");
    }
    let color = form.get("color").trim();
    if !HEX_COLOR.is_match(color) {
        errors.add("color", "Use a hex color like #22c55e");
    }
    let category = match form.get("category").trim() {
        "active" => Some(StageCategory::Active),
        "offer" => Some(StageCategory::Offer),
        "closed" => Some(StageCategory::Closed),
        _ => {
            errors.add("category", "Choose active, offer or closed");
            None
        }
    };
    match category {
        Some(category) if errors.is_empty() => Ok(NewStage {
            name: name.to_string(),
            color: color.to_lowercase(),
            category,
            position: next_position,
        }),
        _ => Err(errors),
    }
}

pub fn validate_column(form: &Form) -> Result<NewColumn, FieldErrors> {
    let mut errors = FieldErrors::default();
    let name = form.get("name").trim();
    if name.is_empty() {
        errors.add("name", "Name is required");
    }
    let column_type = ColumnType::parse(form.get("column_type").trim());
    if column_type.is_none() {
        errors.add("column_type", "Unknown column type");
    }

    let mut options: Vec<String> = Vec::new();
    for option in form.get("options").split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if options.iter().any(|o| o.eq_ignore_ascii_case(option)) {
            errors.add("options", format!("Duplicate option '{}'", option));
        } else {
            options.push(option.to_string());
        }
    }
    if column_type.is_some_and(|t| t.has_options()) && options.is_empty() {
        errors.add("options", "Select columns need at least one option");
    }

    match column_type {
        Some(column_type) if errors.is_empty() => Ok(NewColumn {
            name: name.to_string(),
            column_type,
            options: if column_type.has_options() { options } else { Vec::new() },
        }),
        _ => Err(errors),
    }
}
