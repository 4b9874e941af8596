use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filters::{ColumnFilter, Sort};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobApplication {
    pub id: Uuid,
    pub company_name: String,
    pub job_title: String,
    pub stage_id: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub job_url: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub column_values: Vec<JobColumnValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobApplication {
    pub fn column_value(&self, column_id: Uuid) -> Option<&serde_json::Value> {
        self.column_values
            .iter()
            .find(|v| v.column_id == column_id)
            .map(|v| &v.value)
    }

    pub fn salary_label(&self) -> String {
        let currency = self.salary_currency.as_deref().unwrap_or("$");
        match (self.salary_min, self.salary_max) {
            (Some(min), Some(max)) => format!("{}{}k-{}k", currency, min / 1000, max / 1000),
            (Some(min), None) => format!("{}{}k+", currency, min / 1000),
            (None, Some(max)) => format!("<{}{}k", currency, max / 1000),
            (None, None) => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    Active,
    Offer,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStage {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub category: StageCategory,
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Url,
    Checkbox,
    Select,
    MultiSelect,
}

impl ColumnType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "url" => Some(Self::Url),
            "checkbox" => Some(Self::Checkbox),
            "select" => Some(Self::Select),
            "multi_select" | "multi-select" => Some(Self::MultiSelect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Url => "url",
            Self::Checkbox => "checkbox",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
        }
    }

    pub fn has_options(&self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobColumn {
    pub id: Uuid,
    pub name: String,
    pub column_type: ColumnType,
    pub is_core: bool,
    pub field_key: Option<String>, // set for core columns, e.g. "company_name"
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobColumnValue {
    pub job_id: Uuid,
    pub column_id: Uuid,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    Phone,
    Video,
    Onsite,
    Technical,
    Behavioral,
    Other,
}

impl InterviewType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "phone" => Some(Self::Phone),
            "video" => Some(Self::Video),
            "onsite" => Some(Self::Onsite),
            "technical" => Some(Self::Technical),
            "behavioral" => Some(Self::Behavioral),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewOutcome {
    Pending,
    Passed,
    Failed,
    Canceled,
}

impl InterviewOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInterview {
    pub id: Uuid,
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub interview_type: InterviewType,
    pub scheduled_at: DateTime<Utc>,
    pub duration_mins: u32,
    pub location: Option<String>,
    pub meeting_url: Option<String>,
    pub notes: Option<String>,
    pub outcome: InterviewOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobsPagePreferences {
    pub search: String,
    pub column_filters: Vec<ColumnFilter>,
    pub sorts: Vec<Sort>,
    pub column_order: Vec<Uuid>,
    pub hidden_columns: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPreferences {
    pub theme: Theme,
    pub sidebar_open: bool,
    pub jobs: JobsPagePreferences,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            sidebar_open: true,
            jobs: JobsPagePreferences::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCount {
    pub count: u64,
}

// --- Request bodies ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewJob {
    pub company_name: String,
    pub job_title: String,
    pub stage_id: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub job_url: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStage {
    pub name: String,
    pub color: String,
    pub category: StageCategory,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<StageCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ColumnPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInterview {
    #[serde(rename = "type")]
    pub interview_type: InterviewType,
    pub scheduled_at: DateTime<Utc>,
    pub duration_mins: u32,
    pub location: Option<String>,
    pub meeting_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct InterviewPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_mins: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InterviewOutcome>,
}
