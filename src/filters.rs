//! Column filters and sorts, and their mapping into the API's query shapes.
//!
//! Filters live in the UI as `ColumnFilter` values addressed by column id.
//! Before a query is sent they are narrowed to the active ones and rewritten
//! into `ApiFilter`s: custom columns keep their id, core columns switch to
//! their fixed field key, and comparisons on date columns are widened to
//! whole-day boundaries.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ColumnType, JobColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    IsAnyOf,
    IsNoneOf,
    IsBefore,
    IsAfter,
}

/// Shape of the value an operator carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Nothing,
    Single,
    List,
    Pair,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 17] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::IsEmpty,
        Self::IsNotEmpty,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Between,
        Self::IsAnyOf,
        Self::IsNoneOf,
        Self::IsBefore,
        Self::IsAfter,
    ];

    pub fn value_class(&self) -> ValueClass {
        match self {
            Self::IsEmpty | Self::IsNotEmpty => ValueClass::Nothing,
            Self::IsAnyOf | Self::IsNoneOf => ValueClass::List,
            Self::Between => ValueClass::Pair,
            _ => ValueClass::Single,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::IsAnyOf => "is_any_of",
            Self::IsNoneOf => "is_none_of",
            Self::IsBefore => "is_before",
            Self::IsAfter => "is_after",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == s)
    }

    /// Short label used on filter chips.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Equals => "is",
            Self::NotEquals => "is not",
            Self::Contains => "contains",
            Self::NotContains => "does not contain",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::IsEmpty => "is empty",
            Self::IsNotEmpty => "is not empty",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Between => "between",
            Self::IsAnyOf => "is any of",
            Self::IsNoneOf => "is none of",
            Self::IsBefore => "is before",
            Self::IsAfter => "is after",
        }
    }

    /// Operators offered in the filter popover for a column type.
    pub fn for_column_type(column_type: ColumnType) -> &'static [FilterOperator] {
        use FilterOperator::*;
        match column_type {
            ColumnType::Text | ColumnType::Url => &[
                Equals, NotEquals, Contains, NotContains, StartsWith, EndsWith, IsEmpty, IsNotEmpty,
            ],
            ColumnType::Number => &[
                Equals, NotEquals, Gt, Gte, Lt, Lte, Between, IsEmpty, IsNotEmpty,
            ],
            ColumnType::Date => &[
                Equals, IsBefore, IsAfter, Gt, Gte, Lt, Lte, Between, IsEmpty, IsNotEmpty,
            ],
            ColumnType::Checkbox => &[Equals],
            ColumnType::Select | ColumnType::MultiSelect => {
                &[Equals, NotEquals, IsAnyOf, IsNoneOf, IsEmpty, IsNotEmpty]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFilter {
    pub column_id: Uuid,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

impl ColumnFilter {
    /// Builds a filter whose value matches the operator's value class.
    pub fn new(column_id: Uuid, operator: FilterOperator, value: Option<FilterValue>) -> Self {
        let value = match (operator.value_class(), value) {
            (ValueClass::Nothing, _) => None,
            (ValueClass::List, Some(FilterValue::Text(s))) => Some(FilterValue::List(split_list(&s))),
            (ValueClass::List, Some(FilterValue::Bool(b))) => {
                Some(FilterValue::List(vec![b.to_string()]))
            }
            (ValueClass::Pair, Some(FilterValue::Text(s))) => {
                let mut parts = split_list(&s);
                parts.resize(2, String::new());
                Some(FilterValue::List(parts))
            }
            (ValueClass::Pair, Some(FilterValue::List(mut parts))) => {
                parts.resize(2, String::new());
                Some(FilterValue::List(parts))
            }
            (_, value) => value,
        };
        Self {
            column_id,
            operator,
            value,
        }
    }

    pub fn is_active(&self) -> bool {
        is_filter_active(self)
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Whether a filter is complete enough to be sent to the server.
pub fn is_filter_active(filter: &ColumnFilter) -> bool {
    if filter.operator.value_class() == ValueClass::Nothing {
        return true;
    }
    match &filter.value {
        None => false,
        Some(FilterValue::List(items)) if filter.operator == FilterOperator::Between => {
            items.len() >= 2 && items.iter().take(2).all(|v| !v.trim().is_empty())
        }
        Some(FilterValue::List(items)) => !items.is_empty(),
        Some(FilterValue::Bool(_)) => true,
        Some(FilterValue::Text(s)) => !s.trim().is_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub column_id: Uuid,
    pub direction: SortDirection,
}

/// Cycles a column through asc -> desc -> unsorted.
pub fn toggle_sort(sorts: &mut Vec<Sort>, column_id: Uuid) {
    match sorts.iter().position(|s| s.column_id == column_id) {
        Some(idx) if sorts[idx].direction == SortDirection::Asc => {
            sorts[idx].direction = SortDirection::Desc;
        }
        Some(idx) => {
            sorts.remove(idx);
        }
        None => sorts.push(Sort {
            column_id,
            direction: SortDirection::Asc,
        }),
    }
}

/// Moves a secondary sort chip to the front, making it the one the server sees.
pub fn promote_sort(sorts: &mut Vec<Sort>, index: usize) {
    if index < sorts.len() {
        let sort = sorts.remove(index);
        sorts.insert(0, sort);
    }
}

// --- API shapes ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_id: Option<Uuid>,
    pub operator: FilterOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiSort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_id: Option<Uuid>,
    pub direction: SortDirection,
}

fn address(column: &JobColumn) -> (Option<String>, Option<Uuid>) {
    match (&column.is_core, &column.field_key) {
        (true, Some(key)) => (Some(key.clone()), None),
        _ => (None, Some(column.id)),
    }
}

/// Maps the active UI filters to API filters. Filters on unknown columns are dropped.
pub fn to_api_filters(filters: &[ColumnFilter], columns: &[JobColumn]) -> Vec<ApiFilter> {
    filters
        .iter()
        .filter(|f| is_filter_active(f))
        .filter_map(|f| {
            let Some(column) = columns.iter().find(|c| c.id == f.column_id) else {
                tracing::debug!(column_id = %f.column_id, "dropping filter on unknown column");
                return None;
            };
            let (operator, value) = if column.column_type == ColumnType::Date {
                widen_date_filter(f.operator, f.value.clone())
            } else {
                (f.operator, f.value.clone())
            };
            let (field, column_id) = address(column);
            Some(ApiFilter {
                field,
                column_id,
                operator,
                value,
            })
        })
        .collect()
}

/// Only the primary sort goes to the server.
pub fn to_api_sort(sorts: &[Sort], columns: &[JobColumn]) -> Option<ApiSort> {
    let primary = sorts.first()?;
    let column = columns.iter().find(|c| c.id == primary.column_id)?;
    let (field, column_id) = address(column);
    Some(ApiSort {
        field,
        column_id,
        direction: primary.direction,
    })
}

// --- Date widening ---

/// Parses `YYYY-MM-DD` or an RFC 3339 timestamp into a UTC calendar day.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc).date_naive()))
}

pub fn start_of_day(day: NaiveDate) -> String {
    format_ts(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)))
}

pub fn end_of_day(day: NaiveDate) -> String {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    format_ts(Utc.from_utc_datetime(&day.and_time(last)))
}

fn format_ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Rewrites a comparison on a date column so a calendar day matches the
/// full range of timestamps inside it. Values that do not parse as a day
/// pass through untouched.
pub fn widen_date_filter(
    operator: FilterOperator,
    value: Option<FilterValue>,
) -> (FilterOperator, Option<FilterValue>) {
    use FilterOperator::*;

    if let (Between, Some(FilterValue::List(items))) = (operator, &value) {
        if let [from, to, ..] = items.as_slice() {
            if let (Some(a), Some(b)) = (parse_day(from), parse_day(to)) {
                let pair = vec![start_of_day(a), end_of_day(b)];
                return (Between, Some(FilterValue::List(pair)));
            }
        }
        return (operator, value);
    }

    let Some(FilterValue::Text(raw)) = &value else {
        return (operator, value);
    };
    let Some(day) = parse_day(raw) else {
        return (operator, value);
    };

    match operator {
        Equals => (
            Between,
            Some(FilterValue::List(vec![start_of_day(day), end_of_day(day)])),
        ),
        Lt | IsBefore => (Lt, Some(FilterValue::Text(start_of_day(day)))),
        Lte => (Lte, Some(FilterValue::Text(end_of_day(day)))),
        Gt | IsAfter => (Gt, Some(FilterValue::Text(end_of_day(day)))),
        Gte => (Gte, Some(FilterValue::Text(start_of_day(day)))),
        _ => (operator, value),
    }
}

// --- Column lookup and command-line syntax ---

/// Finds a column by name, field key, or id (case-insensitive).
pub fn resolve_column<'a>(columns: &'a [JobColumn], name: &str) -> Result<&'a JobColumn> {
    let needle = name.trim().to_lowercase();
    let found = columns.iter().find(|c| {
        c.name.to_lowercase() == needle
            || c.field_key.as_deref().map(str::to_lowercase).as_deref() == Some(needle.as_str())
            || c.id.to_string() == needle
    });
    if let Some(column) = found {
        return Ok(column);
    }

    let suggestion = columns
        .iter()
        .map(|c| (strsim::jaro_winkler(&needle, &c.name.to_lowercase()), c))
        .filter(|(score, _)| *score > 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| format!(" Did you mean '{}'?", c.name))
        .unwrap_or_default();
    Err(anyhow!("Unknown column '{}'.{}", name, suggestion))
}

/// Parses `column:operator[:value]`. List values are comma separated.
pub fn parse_filter_spec(spec: &str, columns: &[JobColumn]) -> Result<ColumnFilter> {
    let mut parts = spec.splitn(3, ':');
    let column = parts.next().unwrap_or_default();
    let operator = parts
        .next()
        .ok_or_else(|| anyhow!("Filter '{}' must look like column:operator[:value]", spec))?;
    let value = parts.next();

    let column = resolve_column(columns, column)?;
    let operator = FilterOperator::parse(operator)
        .ok_or_else(|| anyhow!("Unknown filter operator '{}'", operator))?;

    let value = value.map(|v| match (column.column_type, v) {
        (ColumnType::Checkbox, "true") => FilterValue::Bool(true),
        (ColumnType::Checkbox, "false") => FilterValue::Bool(false),
        _ => FilterValue::Text(v.to_string()),
    });
    Ok(ColumnFilter::new(column.id, operator, value))
}

/// Parses `column[:asc|desc]`.
pub fn parse_sort_spec(spec: &str, columns: &[JobColumn]) -> Result<Sort> {
    let (column, direction) = match spec.rsplit_once(':') {
        Some((c, d)) => (
            c,
            SortDirection::parse(d).ok_or_else(|| anyhow!("Sort direction must be asc or desc"))?,
        ),
        None => (spec, SortDirection::Asc),
    };
    let column = resolve_column(columns, column)?;
    Ok(Sort {
        column_id: column.id,
        direction,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn column(name: &str, column_type: ColumnType, field_key: Option<&str>) -> JobColumn {
        JobColumn {
            id: Uuid::new_v4(),
            name: name.to_string(),
            column_type,
            is_core: field_key.is_some(),
            field_key: field_key.map(String::from),
            options: Vec::new(),
            position: 0,
        }
    }

    fn filter(operator: FilterOperator, value: Option<FilterValue>) -> ColumnFilter {
        ColumnFilter {
            column_id: Uuid::new_v4(),
            operator,
            value,
        }
    }

    fn text(s: &str) -> Option<FilterValue> {
        Some(FilterValue::Text(s.to_string()))
    }

    fn list(items: &[&str]) -> Option<FilterValue> {
        Some(FilterValue::List(items.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn test_active_decision_table() {
        use FilterOperator::*;
        assert!(is_filter_active(&filter(IsEmpty, None)));
        assert!(is_filter_active(&filter(IsNotEmpty, text(""))));
        assert!(!is_filter_active(&filter(Between, list(&["", "2024-01-01"]))));
        assert!(!is_filter_active(&filter(Between, list(&["2024-01-01"]))));
        assert!(is_filter_active(&filter(Between, list(&["2024-01-01", "2024-02-01"]))));
        assert!(!is_filter_active(&filter(IsAnyOf, list(&[]))));
        assert!(is_filter_active(&filter(IsAnyOf, list(&["Remote"]))));
        assert!(is_filter_active(&filter(Equals, Some(FilterValue::Bool(false)))));
        assert!(!is_filter_active(&filter(Contains, text("   "))));
        assert!(is_filter_active(&filter(Contains, text(" acme "))));
        assert!(!is_filter_active(&filter(Contains, None)));
    }

    #[test]
    fn test_new_normalizes_value_class() {
        let id = Uuid::new_v4();
        let f = ColumnFilter::new(id, FilterOperator::IsEmpty, text("ignored"));
        assert_eq!(f.value, None);

        let f = ColumnFilter::new(id, FilterOperator::IsAnyOf, text("a, b,,c"));
        assert_eq!(f.value, list(&["a", "b", "c"]));

        let f = ColumnFilter::new(id, FilterOperator::Between, text("10"));
        assert_eq!(f.value, list(&["10", ""]));
        assert!(!f.is_active());
    }

    #[test]
    fn test_date_equals_becomes_day_range() {
        let (op, value) = widen_date_filter(FilterOperator::Equals, text("2024-03-05"));
        assert_eq!(op, FilterOperator::Between);
        assert_eq!(
            value,
            list(&["2024-03-05T00:00:00.000Z", "2024-03-05T23:59:59.999Z"])
        );
    }

    #[test]
    fn test_date_comparisons_widen_to_boundaries() {
        use FilterOperator::*;
        let day = "2024-03-05";
        assert_eq!(
            widen_date_filter(Lt, text(day)),
            (Lt, text("2024-03-05T00:00:00.000Z"))
        );
        assert_eq!(
            widen_date_filter(Lte, text(day)),
            (Lte, text("2024-03-05T23:59:59.999Z"))
        );
        assert_eq!(
            widen_date_filter(IsAfter, text(day)),
            (Gt, text("2024-03-05T23:59:59.999Z"))
        );
        assert_eq!(
            widen_date_filter(Gte, text(day)),
            (Gte, text("2024-03-05T00:00:00.000Z"))
        );
        assert_eq!(
            widen_date_filter(Contains, text(day)),
            (Contains, text(day))
        );
        assert_eq!(
            widen_date_filter(Equals, text("next week")),
            (Equals, text("next week"))
        );
    }

    #[test]
    fn test_core_columns_use_field_key() {
        let company = column("Company", ColumnType::Text, Some("company_name"));
        let referral = column("Referral", ColumnType::Checkbox, None);
        let applied = column("Applied", ColumnType::Date, Some("applied_at"));
        let columns = vec![company.clone(), referral.clone(), applied.clone()];

        let filters = vec![
            ColumnFilter::new(company.id, FilterOperator::Contains, text("acme")),
            ColumnFilter::new(referral.id, FilterOperator::Equals, Some(FilterValue::Bool(true))),
            ColumnFilter::new(applied.id, FilterOperator::Equals, text("2024-01-01")),
            ColumnFilter::new(company.id, FilterOperator::Contains, text("")),
            ColumnFilter::new(Uuid::new_v4(), FilterOperator::IsEmpty, None),
        ];
        let api = to_api_filters(&filters, &columns);
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].field.as_deref(), Some("company_name"));
        assert_eq!(api[0].column_id, None);
        assert_eq!(api[1].field, None);
        assert_eq!(api[1].column_id, Some(referral.id));
        assert_eq!(api[2].operator, FilterOperator::Between);

        let json = serde_json::to_value(&api[1]).unwrap();
        assert_eq!(json["operator"], "equals");
        assert_eq!(json["value"], true);
    }

    #[test]
    fn test_only_primary_sort_is_sent() {
        let company = column("Company", ColumnType::Text, Some("company_name"));
        let salary = column("Salary", ColumnType::Number, None);
        let columns = vec![company.clone(), salary.clone()];
        let mut sorts = Vec::new();
        toggle_sort(&mut sorts, company.id);
        toggle_sort(&mut sorts, salary.id);
        toggle_sort(&mut sorts, salary.id);

        let api = to_api_sort(&sorts, &columns).unwrap();
        assert_eq!(api.field.as_deref(), Some("company_name"));
        assert_eq!(api.direction, SortDirection::Asc);

        promote_sort(&mut sorts, 1);
        let api = to_api_sort(&sorts, &columns).unwrap();
        assert_eq!(api.column_id, Some(salary.id));
        assert_eq!(api.direction, SortDirection::Desc);

        toggle_sort(&mut sorts, salary.id);
        assert_eq!(sorts.len(), 1);
        assert!(to_api_sort(&[], &columns).is_none());
    }

    #[test]
    fn test_parse_filter_spec() {
        let columns = vec![
            column("Company", ColumnType::Text, Some("company_name")),
            column("Remote", ColumnType::Checkbox, None),
        ];
        let f = parse_filter_spec("company:contains:acme:labs", &columns).unwrap();
        assert_eq!(f.operator, FilterOperator::Contains);
        assert_eq!(f.value, text("acme:labs"));

        let f = parse_filter_spec("Remote:equals:true", &columns).unwrap();
        assert_eq!(f.value, Some(FilterValue::Bool(true)));

        let f = parse_filter_spec("company_name:is_empty", &columns).unwrap();
        assert_eq!(f.value, None);

        let err = parse_filter_spec("compny:contains:x", &columns).unwrap_err();
        assert!(err.to_string().contains("Did you mean 'Company'"));
        assert!(parse_filter_spec("company:resembles:x", &columns).is_err());
    }

    #[test]
    fn test_filter_round_trips_through_preferences_json() {
        let f = ColumnFilter::new(Uuid::nil(), FilterOperator::IsAnyOf, list(&["a"]));
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["columnId"], Uuid::nil().to_string());
        assert_eq!(json["operator"], "is_any_of");
        let back: ColumnFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, f);
    }

    fn any_operator() -> impl Strategy<Value = FilterOperator> {
        proptest::sample::select(FilterOperator::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_date_widening_is_idempotent(
            op in any_operator(),
            y in 1990i32..2100,
            m in 1u32..=12,
            d in 1u32..=28,
            d2 in 1u32..=28,
        ) {
            let day = format!("{:04}-{:02}-{:02}", y, m, d);
            let other = format!("{:04}-{:02}-{:02}", y, m, d2);
            let value = match op.value_class() {
                ValueClass::Pair => Some(FilterValue::List(vec![day, other])),
                ValueClass::List => Some(FilterValue::List(vec![day])),
                ValueClass::Nothing => None,
                ValueClass::Single => Some(FilterValue::Text(day)),
            };
            let once = widen_date_filter(op, value);
            let twice = widen_date_filter(once.0, once.1.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
