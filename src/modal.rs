use uuid::Uuid;

use crate::filters::{FilterOperator, FilterValue};
use crate::forms::Form;

/// Every overlay the jobs page can show, with the props it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Modal {
    AddJob(Form),
    JobDetail { job_id: Uuid },
    ConfirmDeleteJob { job_id: Uuid, label: String },
    EditCell { job_id: Uuid, column_id: Uuid, input: String },
    AddInterview { job_id: Uuid, form: Form },
    ConfirmDeleteInterview { job_id: Uuid, interview_id: Uuid },
    Stages,
    AddStage(Form),
    ConfirmDeleteStage { stage_id: Uuid, name: String },
    Columns,
    AddColumn(Form),
    ConfirmDeleteColumn { column_id: Uuid, name: String },
    Filter(FilterDraft),
}

impl Modal {
    pub fn title(&self) -> &'static str {
        match self {
            Self::AddJob(_) => "Add job",
            Self::JobDetail { .. } => "Job",
            Self::ConfirmDeleteJob { .. } => "Delete job?",
            Self::EditCell { .. } => "Edit",
            Self::AddInterview { .. } => "Add interview",
            Self::ConfirmDeleteInterview { .. } => "Delete interview?",
            Self::Stages => "Stages",
            Self::AddStage(_) => "Add stage",
            Self::ConfirmDeleteStage { .. } => "Delete stage?",
            Self::Columns => "Columns",
            Self::AddColumn(_) => "Add column",
            Self::ConfirmDeleteColumn { .. } => "Delete column?",
            Self::Filter(_) => "Filter",
        }
    }

    pub fn form_mut(&mut self) -> Option<&mut Form> {
        match self {
            Self::AddJob(form) | Self::AddStage(form) | Self::AddColumn(form) => Some(form),
            Self::AddInterview { form, .. } => Some(form),
            _ => None,
        }
    }
}

/// The filter popover being edited for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDraft {
    pub column_id: Uuid,
    pub operators: Vec<FilterOperator>,
    pub selected: usize,
    pub input: String,
    /// Index of the filter being edited, if this is not a new one.
    pub editing: Option<usize>,
}

impl FilterDraft {
    pub fn operator(&self) -> FilterOperator {
        self.operators
            .get(self.selected)
            .copied()
            .unwrap_or(FilterOperator::Equals)
    }

    pub fn cycle_operator(&mut self, forward: bool) {
        if self.operators.is_empty() {
            return;
        }
        let n = self.operators.len();
        self.selected = if forward {
            (self.selected + 1) % n
        } else {
            (self.selected + n - 1) % n
        };
    }

    pub fn value(&self) -> Option<FilterValue> {
        match self.input.trim() {
            "true" => Some(FilterValue::Bool(true)),
            "false" => Some(FilterValue::Bool(false)),
            _ => Some(FilterValue::Text(self.input.clone())),
        }
    }
}

/// Overlays are stacked; only the top one receives input.
#[derive(Debug, Clone, Default)]
pub struct ModalStack {
    stack: Vec<Modal>,
}

impl ModalStack {
    pub fn open(&mut self, modal: Modal) {
        tracing::debug!(modal = modal.title(), "open modal");
        self.stack.push(modal);
    }

    pub fn close(&mut self) -> Option<Modal> {
        self.stack.pop()
    }

    pub fn close_all(&mut self) {
        self.stack.clear();
    }

    pub fn top(&self) -> Option<&Modal> {
        self.stack.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Modal> {
        self.stack.last_mut()
    }

    pub fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }
}
