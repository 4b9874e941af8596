use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, Wrap},
};
use std::future::Future;
use std::io::stdout;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::api::{ApiError, JobsQuery};
use crate::app::{AppState, ToastKind, GENERIC_ERROR};
use crate::auth::{self, AuthFailure, SignUpOutcome};
use crate::debounce::{poll_timeout, Debounced};
use crate::filters::{promote_sort, toggle_sort, ColumnFilter, FilterOperator, FilterValue, SortDirection, ValueClass};
use crate::forms::{validate_column, validate_interview, validate_job, validate_stage, FieldErrors, Form, FormKind};
use crate::jobs::{build_query, cell_text, parse_column_value, JobEdit, JobsStore};
use crate::layout::{ColumnLayout, VirtualWindow};
use crate::modal::{FilterDraft, Modal};
use crate::models::{
    InterviewOutcome, InterviewPatch, JobApplication, JobColumn, JobStage, JobsPagePreferences,
    StagePatch, Theme,
};
use crate::prefs::PreferencesPatch;
use crate::routes::Route;
use crate::truncate;

const IDLE_TICK: Duration = Duration::from_millis(250);

/// Outcomes of spawned requests, drained by the event loop.
enum Msg {
    Done(Option<String>),
    Counted(JobsQuery, u64),
    MoreLoaded,
    Failed(ApiError),
}

/// Jobs page state that only the terminal cares about.
struct JobsView {
    columns: Vec<JobColumn>,
    stages: Vec<JobStage>,
    layout: ColumnLayout,
    /// Search, filters and sorts the current query is built from.
    applied: JobsPagePreferences,
    search_input: String,
    searching: bool,
    search: Debounced<String>,
    chips: Vec<ColumnFilter>,
    filters: Debounced<Vec<ColumnFilter>>,
    selected: usize,
    column_cursor: usize,
    window: VirtualWindow,
    height: usize,
    total: Option<u64>,
    loading: bool,
    loading_more: bool,
    list_cursor: usize,
}

impl JobsView {
    fn new(prefs: &JobsPagePreferences) -> Self {
        Self {
            columns: Vec::new(),
            stages: Vec::new(),
            layout: ColumnLayout::from_prefs(prefs),
            applied: prefs.clone(),
            search_input: prefs.search.clone(),
            searching: false,
            search: Debounced::default(),
            chips: prefs.column_filters.clone(),
            filters: Debounced::default(),
            selected: 0,
            column_cursor: 0,
            window: VirtualWindow::default(),
            height: 20,
            total: None,
            loading: false,
            loading_more: false,
            list_cursor: 0,
        }
    }

    fn query(&self, limit: u32) -> JobsQuery {
        build_query(&self.applied, &self.columns, limit)
    }

    fn sync(&mut self, jobs: &JobsStore) {
        self.columns = jobs.cached_columns();
        self.stages = jobs.cached_stages();
        let visible = self.layout.visible(&self.columns).len();
        self.column_cursor = self.column_cursor.min(visible.saturating_sub(1));
    }

    fn current_column(&self) -> Option<JobColumn> {
        self.layout
            .visible(&self.columns)
            .get(self.column_cursor)
            .map(|c| (*c).clone())
    }

    fn move_row(&mut self, delta: isize, total: usize) {
        if total == 0 {
            return;
        }
        self.selected = self.selected.saturating_add_signed(delta).min(total - 1);
        self.window.follow(self.selected, self.height);
    }

    fn move_column(&mut self, delta: isize) {
        let visible = self.layout.visible(&self.columns).len();
        if visible > 0 {
            self.column_cursor = self.column_cursor.saturating_add_signed(delta).min(visible - 1);
        }
    }

    fn reset_position(&mut self) {
        self.selected = 0;
        self.window = VirtualWindow::default();
    }

    fn edit_search(&mut self, text: String, now: Instant) {
        self.search_input = text.clone();
        self.search.set(text, now);
    }

    /// Releases search and filter edits whose quiet period is over.
    fn tick(&mut self, now: Instant) -> Vec<PreferencesPatch> {
        let mut patches = Vec::new();
        if let Some(search) = self.search.take_ready(now) {
            if search != self.applied.search {
                self.applied.search = search.clone();
                patches.push(PreferencesPatch::search(search));
            }
        }
        if let Some(filters) = self.filters.take_ready(now) {
            self.applied.column_filters = filters.clone();
            patches.push(PreferencesPatch::column_filters(filters));
        }
        patches
    }

    fn set_filter(&mut self, filter: ColumnFilter, editing: Option<usize>, now: Instant) {
        match editing.and_then(|i| self.chips.get_mut(i)) {
            Some(chip) => *chip = filter,
            None => self.chips.push(filter),
        }
        self.filters.set(self.chips.clone(), now);
    }

    /// Removal skips the debounce and takes any edit still waiting on it along.
    fn remove_filters(&mut self, column_id: Option<Uuid>) -> PreferencesPatch {
        match column_id {
            Some(id) => self.chips.retain(|f| f.column_id != id),
            None => self.chips.clear(),
        }
        self.filters.cancel();
        self.applied.column_filters = self.chips.clone();
        PreferencesPatch::column_filters(self.chips.clone())
    }

    fn toggle_sort(&mut self, column_id: Uuid) -> PreferencesPatch {
        toggle_sort(&mut self.applied.sorts, column_id);
        PreferencesPatch::sorts(self.applied.sorts.clone())
    }

    fn promote_sort(&mut self, column_id: Uuid) -> Option<PreferencesPatch> {
        let index = self.applied.sorts.iter().position(|s| s.column_id == column_id)?;
        if index == 0 {
            return None;
        }
        promote_sort(&mut self.applied.sorts, index);
        Some(PreferencesPatch::sorts(self.applied.sorts.clone()))
    }

    fn shift_column(&mut self, column_id: Uuid, delta: isize) -> PreferencesPatch {
        self.layout.shift(&self.columns, column_id, delta);
        let position = self
            .layout
            .visible(&self.columns)
            .iter()
            .position(|c| c.id == column_id);
        if let Some(position) = position {
            self.column_cursor = position;
        }
        self.layout.to_patch()
    }

    fn toggle_hidden(&mut self, column_id: Uuid) -> PreferencesPatch {
        self.layout.toggle_hidden(column_id);
        self.move_column(0);
        self.layout.to_patch()
    }
}

struct Tui {
    app: AppState,
    view: JobsView,
    auth_form: Form,
    notice: Option<String>,
    tx: UnboundedSender<Msg>,
    quit: bool,
}

pub async fn run_browse(app: AppState, start: &str) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let view = JobsView::new(&app.prefs.read().jobs);
    let mut tui = Tui {
        app,
        view,
        auth_form: Form::login(),
        notice: None,
        tx,
        quit: false,
    };
    tui.go(start).await;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut tui, rx).await;

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    tui: &mut Tui,
    mut rx: UnboundedReceiver<Msg>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| draw(frame, tui))?;

        let deadlines = [tui.view.search.deadline(), tui.view.filters.deadline()];
        if event::poll(poll_timeout(&deadlines, Instant::now(), IDLE_TICK))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    tui.on_key(key).await;
                }
            }
        }

        tui.tick(Instant::now());
        while let Ok(msg) = rx.try_recv() {
            tui.on_msg(msg).await;
        }
        if tui.quit {
            break;
        }
    }
    Ok(())
}

impl Tui {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<Msg, ApiError>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let msg = task.await.unwrap_or_else(Msg::Failed);
            let _ = tx.send(msg);
        });
    }

    fn save_prefs(&self, patch: PreferencesPatch) {
        let prefs = self.app.prefs.clone();
        self.spawn(async move {
            prefs.update(patch).await?;
            Ok(Msg::Done(None))
        });
    }

    fn current_query(&self) -> JobsQuery {
        self.view.query(self.app.page_size)
    }

    fn rows(&self) -> Vec<JobApplication> {
        self.app
            .jobs
            .cached_rows(&self.current_query())
            .unwrap_or_default()
    }

    async fn go(&mut self, path: &str) {
        let route = self.app.navigate(path).await;
        match route {
            Route::Home | Route::Jobs => self.enter_jobs(),
            Route::Login => self.auth_form = Form::login(),
            Route::SignUp => self.auth_form = Form::sign_up(),
            _ => {}
        }
    }

    fn enter_jobs(&mut self) {
        self.view = JobsView::new(&self.app.prefs.read().jobs);
        self.view.sync(&self.app.jobs);
        self.reload();
    }

    /// Loads columns and stages, then the rows and count for the current query.
    fn reload(&mut self) {
        let jobs = self.app.jobs.clone();
        let applied = self.view.applied.clone();
        let limit = self.app.page_size;
        self.view.loading = true;
        self.spawn(async move {
            let columns = jobs.columns().await?;
            jobs.stages().await?;
            let query = build_query(&applied, &columns, limit);
            jobs.rows(&query).await?;
            let count = jobs.count(&query).await?;
            Ok(Msg::Counted(query, count))
        });
    }

    fn apply_now(&mut self, patch: PreferencesPatch) {
        self.save_prefs(patch);
        self.view.reset_position();
        self.reload();
    }

    fn maybe_load_more(&mut self, loaded: usize) {
        let query = self.current_query();
        let has_more = self.app.jobs.has_more(&query);
        if self.view.loading_more || !self.view.window.wants_more(loaded, self.view.height, has_more) {
            return;
        }
        self.view.loading_more = true;
        let jobs = self.app.jobs.clone();
        self.spawn(async move {
            jobs.load_more(&query).await?;
            Ok(Msg::MoreLoaded)
        });
    }

    fn tick(&mut self, now: Instant) {
        self.app.toasts.expire(now);
        let patches = self.view.tick(now);
        if patches.is_empty() {
            return;
        }
        for patch in patches {
            self.save_prefs(patch);
        }
        self.view.reset_position();
        self.reload();
    }

    async fn on_msg(&mut self, msg: Msg) {
        self.view.sync(&self.app.jobs);
        match msg {
            Msg::Done(note) => {
                if let Some(note) = note {
                    self.app.toasts.info(note);
                }
            }
            Msg::Counted(query, count) => {
                if query == self.current_query() {
                    self.view.total = Some(count);
                    self.view.loading = false;
                }
            }
            Msg::MoreLoaded => self.view.loading_more = false,
            Msg::Failed(e) => {
                self.view.loading = false;
                self.view.loading_more = false;
                self.app.report(&e);
                if !self.app.auth.is_authenticated() && self.app.route.is_protected() {
                    self.go(Route::Login.path()).await;
                }
            }
        }
    }

    // --- Input ---

    async fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        if self.app.modals.is_open() {
            self.on_modal_key(key);
            return;
        }
        let route = self.app.route.clone();
        match route {
            Route::Login | Route::SignUp => self.on_auth_key(key).await,
            Route::Home | Route::Jobs if self.view.searching => self.on_search_key(key),
            Route::Home | Route::Jobs => {
                if !self.on_jobs_key(key) {
                    self.on_global_key(key).await;
                }
            }
            _ => self.on_global_key(key).await,
        }
    }

    async fn on_global_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char('1') => self.go(Route::Jobs.path()).await,
            KeyCode::Char('2') => self.go(Route::Analytics.path()).await,
            KeyCode::Char('3') => self.go(Route::Resume.path()).await,
            KeyCode::Char('4') => self.go(Route::Knowledge.path()).await,
            KeyCode::Char('b') => {
                let open = !self.app.prefs.read().sidebar_open;
                self.save_prefs(PreferencesPatch::sidebar_open(open));
            }
            KeyCode::Char('t') => {
                let next = match self.app.prefs.read().theme {
                    Theme::Light => Theme::Dark,
                    Theme::Dark => Theme::System,
                    Theme::System => Theme::Light,
                };
                self.save_prefs(PreferencesPatch::theme(next));
            }
            KeyCode::Char('L') => {
                auth::logout(&mut self.app).await;
                self.go(Route::Login.path()).await;
            }
            KeyCode::Enter | KeyCode::Esc if matches!(self.app.route, Route::AuthError { .. }) => {
                self.go(Route::Login.path()).await;
            }
            _ => {}
        }
    }

    async fn on_auth_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.quit = true,
            KeyCode::Tab | KeyCode::Down => self.auth_form.next_field(),
            KeyCode::BackTab | KeyCode::Up => self.auth_form.prev_field(),
            KeyCode::Backspace => self.auth_form.backspace(),
            KeyCode::F(2) => {
                let other = match self.app.route {
                    Route::Login => Route::SignUp,
                    _ => Route::Login,
                };
                self.notice = None;
                self.go(other.path()).await;
            }
            KeyCode::F(3) => match auth::oauth_start(&self.app, "google") {
                Ok(url) => self.notice = Some(format!("Open {} in a browser to continue", url)),
                Err(e) => self.app.report(&e),
            },
            KeyCode::Enter => self.submit_auth().await,
            KeyCode::Char(c) => self.auth_form.input(c),
            _ => {}
        }
    }

    async fn submit_auth(&mut self) {
        self.notice = None;
        self.auth_form.errors = FieldErrors::default();
        let result = if self.app.route == Route::SignUp {
            auth::sign_up(&mut self.app, &self.auth_form).await
        } else {
            auth::sign_in(&mut self.app, &self.auth_form)
                .await
                .map(|()| SignUpOutcome::SignedIn)
        };
        match result {
            Ok(SignUpOutcome::SignedIn) => self.go(Route::Jobs.path()).await,
            Ok(SignUpOutcome::ConfirmEmail) => {
                self.go(Route::Login.path()).await;
                self.notice = Some("Check your email to confirm your account, then sign in.".into());
            }
            Err(AuthFailure::Invalid(errors)) => self.auth_form.errors = errors,
            Err(AuthFailure::Api(ApiError::Status { message, .. })) => self.notice = Some(message),
            Err(AuthFailure::Api(e)) => {
                tracing::warn!(error = %e, "sign in failed");
                self.notice = Some(GENERIC_ERROR.into());
            }
        }
    }

    fn on_search_key(&mut self, key: KeyEvent) {
        let mut text = self.view.search_input.clone();
        match key.code {
            KeyCode::Esc | KeyCode::Enter => {
                self.view.searching = false;
                return;
            }
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(c) => text.push(c),
            _ => return,
        }
        self.view.edit_search(text, Instant::now());
    }

    /// Returns false for keys the jobs page leaves to the global handler.
    fn on_jobs_key(&mut self, key: KeyEvent) -> bool {
        let rows = self.rows();
        let column = self.view.current_column();
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => self.view.move_row(1, rows.len()),
            KeyCode::Up | KeyCode::Char('k') => self.view.move_row(-1, rows.len()),
            KeyCode::PageDown => self.view.move_row(self.view.height as isize, rows.len()),
            KeyCode::PageUp => self.view.move_row(-(self.view.height as isize), rows.len()),
            KeyCode::Right | KeyCode::Char('l') => self.view.move_column(1),
            KeyCode::Left | KeyCode::Char('h') => self.view.move_column(-1),
            KeyCode::Char('/') => self.view.searching = true,
            KeyCode::Char('f') => self.open_filter(),
            KeyCode::Char('x') => {
                if let Some(column) = column {
                    let patch = self.view.remove_filters(Some(column.id));
                    self.apply_now(patch);
                }
            }
            KeyCode::Char('X') => {
                let patch = self.view.remove_filters(None);
                self.apply_now(patch);
            }
            KeyCode::Char('s') => {
                if let Some(column) = column {
                    let patch = self.view.toggle_sort(column.id);
                    self.apply_now(patch);
                }
            }
            KeyCode::Char('p') => {
                if let Some(patch) = column.and_then(|c| self.view.promote_sort(c.id)) {
                    self.apply_now(patch);
                }
            }
            KeyCode::Char('<') | KeyCode::Char('>') => {
                if let Some(column) = column {
                    let delta = if key.code == KeyCode::Char('<') { -1 } else { 1 };
                    let patch = self.view.shift_column(column.id, delta);
                    self.save_prefs(patch);
                }
            }
            KeyCode::Char('H') => {
                if let Some(column) = column {
                    let patch = self.view.toggle_hidden(column.id);
                    self.save_prefs(patch);
                }
            }
            KeyCode::Char('e') | KeyCode::Enter => self.open_edit(&rows),
            KeyCode::Char('o') => {
                if let Some(job) = rows.get(self.view.selected) {
                    self.open_detail(job.id);
                }
            }
            KeyCode::Char('a') => self.app.modals.open(Modal::AddJob(Form::job())),
            KeyCode::Char('d') => {
                if let Some(job) = rows.get(self.view.selected) {
                    self.app.modals.open(Modal::ConfirmDeleteJob {
                        job_id: job.id,
                        label: format!("{} at {}", job.job_title, job.company_name),
                    });
                }
            }
            KeyCode::Char('g') => {
                self.view.list_cursor = 0;
                self.app.modals.open(Modal::Stages);
            }
            KeyCode::Char('c') => {
                self.view.list_cursor = 0;
                self.app.modals.open(Modal::Columns);
            }
            KeyCode::Char('r') => {
                self.app.jobs.invalidate();
                self.reload();
            }
            _ => return false,
        }
        self.maybe_load_more(rows.len());
        true
    }

    fn open_filter(&mut self) {
        let Some(column) = self.view.current_column() else { return };
        let operators = FilterOperator::for_column_type(column.column_type).to_vec();
        let editing = self.view.chips.iter().position(|f| f.column_id == column.id);
        let (selected, input) = match editing.map(|i| &self.view.chips[i]) {
            Some(filter) => (
                operators.iter().position(|o| *o == filter.operator).unwrap_or(0),
                value_text(filter.value.as_ref()),
            ),
            None => (0, String::new()),
        };
        self.app.modals.open(Modal::Filter(FilterDraft {
            column_id: column.id,
            operators,
            selected,
            input,
            editing,
        }));
    }

    fn open_edit(&mut self, rows: &[JobApplication]) {
        let (Some(job), Some(column)) = (rows.get(self.view.selected), self.view.current_column()) else {
            return;
        };
        if self.app.jobs.is_pending(job.id) {
            self.app.toasts.info("This job is still being saved");
            return;
        }
        if column.is_core && column.field_key.as_deref().is_none_or(|k| !JobEdit::FIELDS.contains(&k)) {
            self.app.toasts.info(format!("{} is read only", column.name));
            return;
        }
        self.app.modals.open(Modal::EditCell {
            job_id: job.id,
            column_id: column.id,
            input: cell_text(job, &column, &self.view.stages),
        });
    }

    fn open_detail(&mut self, job_id: Uuid) {
        self.view.list_cursor = 0;
        self.app.modals.open(Modal::JobDetail { job_id });
        let jobs = self.app.jobs.clone();
        self.spawn(async move {
            jobs.interviews(job_id).await?;
            Ok(Msg::Done(None))
        });
    }

    fn on_modal_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.app.modals.close();
            return;
        }
        let Some(top) = self.app.modals.top().cloned() else { return };
        match top {
            Modal::AddJob(_) | Modal::AddStage(_) | Modal::AddColumn(_) | Modal::AddInterview { .. } => {
                self.on_form_key(key)
            }
            Modal::EditCell { .. } => self.on_edit_key(key),
            Modal::Filter(_) => self.on_filter_key(key),
            Modal::JobDetail { job_id } => self.on_detail_key(job_id, key),
            Modal::Stages => self.on_stages_key(key),
            Modal::Columns => self.on_columns_key(key),
            Modal::ConfirmDeleteJob { job_id, .. } => self.confirm(key, move |jobs| async move {
                jobs.delete_job(job_id).await?;
                Ok(Msg::Done(Some("Job deleted".into())))
            }),
            Modal::ConfirmDeleteInterview { job_id, interview_id } => self.confirm(key, move |jobs| async move {
                jobs.delete_interview(job_id, interview_id).await?;
                Ok(Msg::Done(Some("Interview deleted".into())))
            }),
            Modal::ConfirmDeleteStage { stage_id, .. } => self.confirm(key, move |jobs| async move {
                jobs.delete_stage(stage_id).await?;
                Ok(Msg::Done(Some("Stage deleted".into())))
            }),
            Modal::ConfirmDeleteColumn { column_id, .. } => self.confirm(key, move |jobs| async move {
                jobs.delete_column(column_id).await?;
                Ok(Msg::Done(Some("Column deleted".into())))
            }),
        }
    }

    fn confirm<F, Fut>(&mut self, key: KeyEvent, action: F)
    where
        F: FnOnce(JobsStore) -> Fut,
        Fut: Future<Output = Result<Msg, ApiError>> + Send + 'static,
    {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                self.app.modals.close();
                self.spawn(action(self.app.jobs.clone()));
            }
            KeyCode::Char('n') => {
                self.app.modals.close();
            }
            _ => {}
        }
    }

    fn on_form_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Enter {
            self.submit_form();
            return;
        }
        let Some(form) = self.app.modals.top_mut().and_then(Modal::form_mut) else { return };
        match key.code {
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.prev_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Char(c) => form.input(c),
            _ => {}
        }
    }

    fn submit_form(&mut self) {
        let Some(modal) = self.app.modals.top().cloned() else { return };
        let jobs = self.app.jobs.clone();
        let outcome = match &modal {
            Modal::AddJob(form) => validate_job(form, &self.view.stages).map(|job| {
                self.spawn(async move {
                    jobs.create_job(job).await?;
                    Ok(Msg::Done(Some("Job added".into())))
                })
            }),
            Modal::AddInterview { job_id, form } => {
                let job_id = *job_id;
                validate_interview(form).map(|interview| {
                    self.spawn(async move {
                        jobs.create_interview(job_id, interview).await?;
                        Ok(Msg::Done(Some("Interview scheduled".into())))
                    })
                })
            }
            Modal::AddStage(form) => {
                let next = self.view.stages.iter().map(|s| s.position + 1).max().unwrap_or(0);
                validate_stage(form, next).map(|stage| {
                    self.spawn(async move {
                        jobs.create_stage(stage).await?;
                        Ok(Msg::Done(Some("Stage added".into())))
                    })
                })
            }
            Modal::AddColumn(form) => validate_column(form).map(|column| {
                self.spawn(async move {
                    jobs.create_column(column).await?;
                    Ok(Msg::Done(Some("Column added".into())))
                })
            }),
            _ => Ok(()),
        };
        match outcome {
            Ok(()) => {
                self.app.modals.close();
            }
            Err(errors) => {
                if let Some(form) = self.app.modals.top_mut().and_then(Modal::form_mut) {
                    form.errors = errors;
                }
            }
        }
    }

    fn on_edit_key(&mut self, key: KeyEvent) {
        let Some(Modal::EditCell { job_id, column_id, input }) = self.app.modals.top_mut() else {
            return;
        };
        match key.code {
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) => input.push(c),
            KeyCode::Enter => {
                let (job_id, column_id, raw) = (*job_id, *column_id, input.clone());
                self.save_cell(job_id, column_id, &raw);
            }
            _ => {}
        }
    }

    /// Core columns patch the job; custom columns upsert a column value.
    fn save_cell(&mut self, job_id: Uuid, column_id: Uuid, raw: &str) {
        let Some(column) = self.view.columns.iter().find(|c| c.id == column_id).cloned() else {
            self.app.modals.close();
            return;
        };
        let jobs = self.app.jobs.clone();
        let saved = match column.field_key.as_deref().filter(|_| column.is_core) {
            Some(field) => JobEdit::parse(field, raw, &self.view.stages).map(|edit| {
                self.spawn(async move {
                    jobs.update_field(job_id, edit).await?;
                    Ok(Msg::Done(None))
                })
            }),
            None => parse_column_value(&column, raw).map(|value| {
                self.spawn(async move {
                    jobs.set_column_value(job_id, column_id, value).await?;
                    Ok(Msg::Done(None))
                })
            }),
        };
        match saved {
            Ok(()) => {
                self.app.modals.close();
            }
            Err(e) => self.app.toasts.info(e.to_string()),
        }
    }

    fn on_filter_key(&mut self, key: KeyEvent) {
        let Some(Modal::Filter(draft)) = self.app.modals.top_mut() else { return };
        match key.code {
            KeyCode::Tab => draft.cycle_operator(true),
            KeyCode::BackTab => draft.cycle_operator(false),
            KeyCode::Backspace => {
                draft.input.pop();
            }
            KeyCode::Char(c) => draft.input.push(c),
            KeyCode::Enter => {
                let filter = ColumnFilter::new(draft.column_id, draft.operator(), draft.value());
                let editing = draft.editing;
                self.app.modals.close();
                self.view.set_filter(filter, editing, Instant::now());
            }
            _ => {}
        }
    }

    fn on_detail_key(&mut self, job_id: Uuid, key: KeyEvent) {
        let interviews = self.app.jobs.cached_interviews(job_id);
        let current = interviews.get(self.view.list_cursor);
        let outcome = match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.view.list_cursor = (self.view.list_cursor + 1).min(interviews.len().saturating_sub(1));
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.view.list_cursor = self.view.list_cursor.saturating_sub(1);
                None
            }
            KeyCode::Char('i') => {
                self.app.modals.open(Modal::AddInterview {
                    job_id,
                    form: Form::interview(),
                });
                None
            }
            KeyCode::Char('d') => {
                if let Some(interview) = current {
                    self.app.modals.open(Modal::ConfirmDeleteInterview {
                        job_id,
                        interview_id: interview.id,
                    });
                }
                None
            }
            KeyCode::Char('p') => Some(InterviewOutcome::Passed),
            KeyCode::Char('f') => Some(InterviewOutcome::Failed),
            KeyCode::Char('c') => Some(InterviewOutcome::Canceled),
            KeyCode::Char('u') => Some(InterviewOutcome::Pending),
            _ => None,
        };

        if let (Some(outcome), Some(interview)) = (outcome, current) {
            let jobs = self.app.jobs.clone();
            let interview_id = interview.id;
            let patch = InterviewPatch {
                outcome: Some(outcome),
                ..InterviewPatch::default()
            };
            self.spawn(async move {
                jobs.update_interview(job_id, interview_id, patch).await?;
                Ok(Msg::Done(None))
            });
        }
    }

    fn on_stages_key(&mut self, key: KeyEvent) {
        let stages = self.view.stages.clone();
        let cursor = self.view.list_cursor.min(stages.len().saturating_sub(1));
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.view.list_cursor = (cursor + 1).min(stages.len().saturating_sub(1));
            }
            KeyCode::Up | KeyCode::Char('k') => self.view.list_cursor = cursor.saturating_sub(1),
            KeyCode::Char('a') => self.app.modals.open(Modal::AddStage(Form::stage())),
            KeyCode::Char('d') => {
                if let Some(stage) = stages.get(cursor) {
                    self.app.modals.open(Modal::ConfirmDeleteStage {
                        stage_id: stage.id,
                        name: stage.name.clone(),
                    });
                }
            }
            KeyCode::Char('[') | KeyCode::Char(']') => {
                let other = if key.code == KeyCode::Char('[') {
                    cursor.checked_sub(1)
                } else {
                    Some(cursor + 1)
                };
                let (Some(a), Some(b)) = (stages.get(cursor), other.and_then(|i| stages.get(i))) else {
                    return;
                };
                let (a, b) = (a.clone(), b.clone());
                self.view.list_cursor = other.unwrap_or(cursor);
                let jobs = self.app.jobs.clone();
                self.spawn(async move {
                    let swap = |position| StagePatch {
                        position: Some(position),
                        ..StagePatch::default()
                    };
                    jobs.update_stage(a.id, swap(b.position)).await?;
                    jobs.update_stage(b.id, swap(a.position)).await?;
                    Ok(Msg::Done(None))
                });
            }
            _ => {}
        }
    }

    fn on_columns_key(&mut self, key: KeyEvent) {
        let ordered: Vec<JobColumn> = self
            .view
            .layout
            .ordered(&self.view.columns)
            .into_iter()
            .cloned()
            .collect();
        let cursor = self.view.list_cursor.min(ordered.len().saturating_sub(1));
        let current = ordered.get(cursor);
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => {
                self.view.list_cursor = (cursor + 1).min(ordered.len().saturating_sub(1));
            }
            KeyCode::Up | KeyCode::Char('k') => self.view.list_cursor = cursor.saturating_sub(1),
            KeyCode::Char(' ') => {
                if let Some(column) = current {
                    let patch = self.view.toggle_hidden(column.id);
                    self.save_prefs(patch);
                }
            }
            KeyCode::Char('<') | KeyCode::Char('>') => {
                if let Some(column) = current {
                    let delta = if key.code == KeyCode::Char('<') { -1 } else { 1 };
                    self.view.list_cursor = cursor.saturating_add_signed(delta).min(ordered.len() - 1);
                    let patch = self.view.shift_column(column.id, delta);
                    self.save_prefs(patch);
                }
            }
            KeyCode::Char('a') => self.app.modals.open(Modal::AddColumn(Form::column())),
            KeyCode::Char('d') => match current {
                Some(column) if column.is_core => {
                    self.app.toasts.info("Core columns can be hidden but not deleted");
                }
                Some(column) => self.app.modals.open(Modal::ConfirmDeleteColumn {
                    column_id: column.id,
                    name: column.name.clone(),
                }),
                None => {}
            },
            _ => {}
        }
    }
}

fn value_text(value: Option<&FilterValue>) -> String {
    match value {
        None => String::new(),
        Some(FilterValue::Bool(b)) => b.to_string(),
        Some(FilterValue::Text(s)) => s.clone(),
        Some(FilterValue::List(items)) => items.join(", "),
    }
}

// --- Drawing ---

struct Palette {
    accent: Color,
    muted: Color,
    error: Color,
    highlight: Style,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                accent: Color::Cyan,
                muted: Color::DarkGray,
                error: Color::LightRed,
                highlight: Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD),
            },
            Theme::Light => Self {
                accent: Color::Blue,
                muted: Color::Gray,
                error: Color::Red,
                highlight: Style::default()
                    .bg(Color::Gray)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            },
            Theme::System => Self {
                accent: Color::Yellow,
                muted: Color::DarkGray,
                error: Color::Red,
                highlight: Style::default().add_modifier(Modifier::REVERSED),
            },
        }
    }
}

fn draw(frame: &mut Frame, tui: &mut Tui) {
    let prefs = tui.app.prefs.read();
    let palette = Palette::for_theme(prefs.theme);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let user = tui
        .app
        .auth
        .user()
        .map(|u| u.full_name.clone().unwrap_or_else(|| u.email.clone()))
        .unwrap_or_default();
    let header = Line::from(vec![
        Span::styled(" jobtrack ", Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)),
        Span::raw(format!("| {} ", tui.app.route.title())),
        Span::styled(user, Style::default().fg(palette.muted)),
    ]);
    frame.render_widget(Paragraph::new(header), chunks[0]);

    let mut body = chunks[1];
    if prefs.sidebar_open && tui.app.route.is_protected() {
        let split = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(18), Constraint::Min(0)])
            .split(body);
        draw_sidebar(frame, split[0], &tui.app.route, &palette);
        body = split[1];
    }

    let route = tui.app.route.clone();
    match &route {
        Route::Login | Route::SignUp => draw_auth(frame, body, tui, &palette),
        Route::Home | Route::Jobs => draw_jobs(frame, body, tui, &palette),
        Route::Analytics | Route::Resume | Route::Knowledge => draw_placeholder(frame, body, &route),
        Route::Callback { .. } | Route::AuthError { .. } => draw_auth_error(frame, body, &route, &palette),
    }

    let help = Paragraph::new(help_text(tui)).style(Style::default().fg(palette.muted));
    frame.render_widget(help, chunks[2]);

    if let Some(modal) = tui.app.modals.top() {
        draw_modal(frame, modal, tui, &palette);
    }
    draw_toasts(frame, tui, &palette);
}

fn help_text(tui: &Tui) -> &'static str {
    match tui.app.modals.top() {
        Some(Modal::Filter(_)) => " Tab:operator  type value (lists: a, b)  Enter:apply  Esc:cancel",
        Some(Modal::EditCell { .. }) => " Enter:save  Esc:cancel",
        Some(Modal::JobDetail { .. }) => " j/k:interview  i:add  p/f/c/u:outcome  d:delete  Esc:close",
        Some(Modal::Stages) => " j/k:select  a:add  d:delete  [/]:reorder  Esc:close",
        Some(Modal::Columns) => " j/k:select  space:show/hide  </>:move  a:add  d:delete  Esc:close",
        Some(Modal::ConfirmDeleteJob { .. })
        | Some(Modal::ConfirmDeleteInterview { .. })
        | Some(Modal::ConfirmDeleteStage { .. })
        | Some(Modal::ConfirmDeleteColumn { .. }) => " y:delete  n:keep",
        Some(_) => " Tab:next field  Enter:save  Esc:cancel",
        None => match tui.app.route {
            Route::Login | Route::SignUp => " Tab:next field  Enter:submit  F2:sign in/up  F3:Google  Esc:quit",
            Route::Home | Route::Jobs if tui.view.searching => " type to search  Enter/Esc:done",
            Route::Home | Route::Jobs => {
                " j/k h/l:move  /:search  f:filter x/X:clear  s:sort p:primary  e:edit  o:open  a:add  d:delete  g:stages c:columns  </>/H:layout  q:quit"
            }
            _ => " 1:jobs 2:analytics 3:resume 4:knowledge  b:sidebar  t:theme  L:logout  q:quit",
        },
    }
}

fn draw_sidebar(frame: &mut Frame, area: Rect, route: &Route, palette: &Palette) {
    let pages = [
        ("1", Route::Jobs),
        ("2", Route::Analytics),
        ("3", Route::Resume),
        ("4", Route::Knowledge),
    ];
    let current = match route {
        Route::Home => &Route::Jobs,
        r => r,
    };
    let items: Vec<ListItem> = pages
        .iter()
        .map(|(key, page)| {
            let style = if page == current {
                Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Span::styled(format!("{} {}", key, page.title()), style))
        })
        .collect();
    frame.render_widget(List::new(items).block(Block::default().borders(Borders::ALL)), area);
}

fn draw_jobs(frame: &mut Frame, area: Rect, tui: &mut Tui, palette: &Palette) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(0)])
        .split(area);

    let rows = tui.rows();
    let height = chunks[2].height.saturating_sub(3) as usize;
    tui.view.height = height;
    tui.view.window.follow(tui.view.selected, height);

    let view = &tui.view;
    let columns = view.layout.visible(&view.columns);
    let name_of = |id: Uuid| {
        view.columns
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
            .unwrap_or("?")
    };

    // Search and filter chips
    let cursor = if view.searching { "_" } else { "" };
    let mut spans = vec![Span::styled(
        format!(" Search: {}{} ", view.search_input, cursor),
        Style::default().fg(if view.searching { palette.accent } else { Color::Reset }),
    )];
    for filter in &view.chips {
        let style = if filter.is_active() {
            Style::default().fg(palette.accent)
        } else {
            Style::default().fg(palette.muted).add_modifier(Modifier::ITALIC)
        };
        let value = value_text(filter.value.as_ref());
        spans.push(Span::styled(
            format!("[{} {} {}] ", name_of(filter.column_id), filter.operator.label(), value),
            style,
        ));
    }
    if view.filters.is_pending() || view.search.is_pending() {
        spans.push(Span::styled("...", Style::default().fg(palette.muted)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), chunks[0]);

    // Sort chips; only the first one reaches the server
    let mut spans = vec![Span::raw(" Sort: ")];
    for (i, sort) in view.applied.sorts.iter().enumerate() {
        let arrow = match sort.direction {
            SortDirection::Asc => "^",
            SortDirection::Desc => "v",
        };
        let style = if i == 0 {
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.muted)
        };
        spans.push(Span::styled(format!("[{}{}] ", name_of(sort.column_id), arrow), style));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), chunks[1]);

    // Table
    let header = Row::new(columns.iter().enumerate().map(|(i, column)| {
        let marker = match view.applied.sorts.iter().position(|s| s.column_id == column.id) {
            Some(0) if view.applied.sorts[0].direction == SortDirection::Asc => " ^",
            Some(0) => " v",
            Some(_) => " *",
            None => "",
        };
        let style = if i == view.column_cursor {
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        Cell::from(format!("{}{}", column.name, marker)).style(style)
    }));

    let range = view.window.range(rows.len(), height);
    let body: Vec<Row> = rows[range.clone()]
        .iter()
        .enumerate()
        .map(|(offset, job)| {
            let cells = columns
                .iter()
                .map(|column| Cell::from(truncate(&cell_text(job, column, &view.stages), 30)));
            let mut style = Style::default();
            if tui.app.jobs.is_pending(job.id) {
                style = style.fg(palette.muted).add_modifier(Modifier::ITALIC);
            }
            if range.start + offset == view.selected {
                style = style.patch(palette.highlight);
            }
            Row::new(cells).style(style)
        })
        .collect();

    let title = match (view.total, view.loading) {
        (_, true) => format!(" Jobs ({}) loading... ", rows.len()),
        (Some(total), false) => format!(" Jobs ({} of {}) ", rows.len(), total),
        (None, false) => format!(" Jobs ({}) ", rows.len()),
    };
    let widths = vec![Constraint::Min(8); columns.len().max(1)];
    let table = Table::new(body, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(table, chunks[2]);
}

fn draw_form(form: &Form, palette: &Palette) -> Text<'static> {
    let mut lines: Vec<Line> = Vec::new();
    for (i, field) in form.fields.iter().enumerate() {
        let value = if field.secret {
            "*".repeat(field.value.chars().count())
        } else {
            field.value.clone()
        };
        let focused = i == form.focus;
        let marker = if focused { "> " } else { "  " };
        let style = if focused {
            Style::default().fg(palette.accent)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{}{}: ", marker, field.label), style),
            Span::raw(value),
            Span::raw(if focused { "_" } else { "" }),
        ]));
        if let Some(error) = form.errors.get(field.key) {
            lines.push(Line::from(Span::styled(
                format!("    {}", error),
                Style::default().fg(palette.error),
            )));
        }
    }
    Text::from(lines)
}

fn draw_auth(frame: &mut Frame, area: Rect, tui: &Tui, palette: &Palette) {
    let area = centered_rect(60, 60, area);
    let mut text = draw_form(&tui.auth_form, palette);
    if let Some(notice) = &tui.notice {
        text.lines.push(Line::from(""));
        text.lines.push(Line::from(Span::styled(notice.clone(), Style::default().fg(palette.accent))));
    }
    let title = match tui.auth_form.kind {
        FormKind::SignUp => " Create an account ",
        _ => " Sign in ",
    };
    let widget = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    frame.render_widget(widget, area);
}

fn draw_auth_error(frame: &mut Frame, area: Rect, route: &Route, palette: &Palette) {
    let message = match route {
        Route::AuthError { message: Some(m) } => m.clone(),
        _ => "We could not sign you in.".to_string(),
    };
    let text = vec![
        Line::from(Span::styled(message, Style::default().fg(palette.error))),
        Line::from(""),
        Line::from("Press Enter to return to the sign in page."),
    ];
    let widget = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(" Sign in failed "));
    frame.render_widget(widget, centered_rect(60, 30, area));
}

fn draw_placeholder(frame: &mut Frame, area: Rect, route: &Route) {
    let body = match route {
        Route::Analytics => "Application funnel and response-rate charts will appear here.",
        Route::Resume => "Upload a resume and tailor it to a posting here.",
        _ => "Notes on companies, interview prep and contacts will live here.",
    };
    let widget = Paragraph::new(body)
        .block(Block::default().borders(Borders::ALL).title(format!(" {} ", route.title())))
        .wrap(Wrap { trim: true });
    frame.render_widget(widget, area);
}

fn draw_modal(frame: &mut Frame, modal: &Modal, tui: &Tui, palette: &Palette) {
    let area = centered_rect(70, 70, frame.area());
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", modal.title()))
        .border_style(Style::default().fg(palette.accent));
    frame.render_widget(Clear, area);

    let text: Text = match modal {
        Modal::AddJob(form) | Modal::AddStage(form) | Modal::AddColumn(form) => draw_form(form, palette),
        Modal::AddInterview { form, .. } => draw_form(form, palette),
        Modal::EditCell { column_id, input, .. } => {
            let name = tui
                .view
                .columns
                .iter()
                .find(|c| c.id == *column_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            Text::from(vec![
                Line::from(Span::styled(name, Style::default().add_modifier(Modifier::BOLD))),
                Line::from(format!("> {}_", input)),
            ])
        }
        Modal::Filter(draft) => build_filter(draft, tui, palette),
        Modal::JobDetail { job_id } => build_detail(*job_id, tui, palette),
        Modal::Stages => {
            let items: Vec<ListItem> = tui
                .view
                .stages
                .iter()
                .map(|s| ListItem::new(format!("{:<20} {:<8} {:?}", s.name, s.color, s.category)))
                .collect();
            render_list(frame, area, block, items, tui.view.list_cursor, palette);
            return;
        }
        Modal::Columns => {
            let items: Vec<ListItem> = tui
                .view
                .layout
                .ordered(&tui.view.columns)
                .iter()
                .map(|c| {
                    let shown = if tui.view.layout.is_hidden(c.id) { "[ ]" } else { "[x]" };
                    let kind = if c.is_core { "core" } else { c.column_type.as_str() };
                    ListItem::new(format!("{} {:<24} {}", shown, c.name, kind))
                })
                .collect();
            render_list(frame, area, block, items, tui.view.list_cursor, palette);
            return;
        }
        Modal::ConfirmDeleteJob { label, .. } => confirm_text(label),
        Modal::ConfirmDeleteInterview { .. } => confirm_text("this interview"),
        Modal::ConfirmDeleteStage { name, .. } => confirm_text(name),
        Modal::ConfirmDeleteColumn { name, .. } => {
            confirm_text(&format!("{} and every value stored in it", name))
        }
    };

    let widget = Paragraph::new(text).block(block).wrap(Wrap { trim: false });
    frame.render_widget(widget, area);
}

fn render_list(frame: &mut Frame, area: Rect, block: Block, items: Vec<ListItem>, cursor: usize, palette: &Palette) {
    let mut state = ListState::default();
    state.select((!items.is_empty()).then(|| cursor.min(items.len() - 1)));
    let list = List::new(items)
        .block(block)
        .highlight_style(palette.highlight)
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut state);
}

fn confirm_text(what: &str) -> Text<'static> {
    Text::from(vec![
        Line::from(format!("Delete {}?", what)),
        Line::from(""),
        Line::from("This cannot be undone. y: delete  n: keep"),
    ])
}

fn build_filter(draft: &FilterDraft, tui: &Tui, palette: &Palette) -> Text<'static> {
    let name = tui
        .view
        .columns
        .iter()
        .find(|c| c.id == draft.column_id)
        .map(|c| c.name.clone())
        .unwrap_or_default();
    let operators: Vec<Span> = draft
        .operators
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let style = if i == draft.selected {
                palette.highlight
            } else {
                Style::default().fg(palette.muted)
            };
            Span::styled(format!(" {} ", op.label()), style)
        })
        .collect();

    let mut lines = vec![
        Line::from(Span::styled(name, Style::default().add_modifier(Modifier::BOLD))),
        Line::from(operators),
        Line::from(""),
    ];
    let hint = match draft.operator().value_class() {
        ValueClass::Nothing => None,
        ValueClass::Single => Some("Value"),
        ValueClass::List => Some("Values (comma separated)"),
        ValueClass::Pair => Some("From, to"),
    };
    if let Some(hint) = hint {
        lines.push(Line::from(format!("{}: {}_", hint, draft.input)));
    }
    Text::from(lines)
}

fn build_detail(job_id: Uuid, tui: &Tui, palette: &Palette) -> Text<'static> {
    let Some(job) = tui.rows().into_iter().find(|j| j.id == job_id) else {
        return Text::raw("This job is no longer in the table");
    };

    let mut lines: Vec<Line> = Vec::new();

    // Header
    lines.push(Line::from(Span::styled(
        job.job_title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.company_name)));

    if let Some(stage) = job.stage_id.and_then(|id| tui.view.stages.iter().find(|s| s.id == id)) {
        lines.push(Line::from(Span::styled(
            format!("Stage: {}", stage.name),
            Style::default().fg(palette.accent),
        )));
    }
    if let Some(applied) = job.applied_at {
        lines.push(Line::from(format!("Applied: {}", applied.format("%Y-%m-%d"))));
    }
    if job.salary_min.is_some() || job.salary_max.is_some() {
        lines.push(Line::from(format!("Salary: {}", job.salary_label())));
    }
    if let Some(location) = &job.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    if let Some(url) = &job.job_url {
        lines.push(Line::from(format!("URL: {}", url)));
    }
    if let Some(notes) = &job.notes {
        lines.push(Line::from(""));
        for line in textwrap::fill(notes, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Interviews",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    let interviews = tui.app.jobs.cached_interviews(job_id);
    if interviews.is_empty() {
        lines.push(Line::from(Span::styled(
            "  (none scheduled, press i to add one)",
            Style::default().fg(palette.muted),
        )));
    }
    for (i, interview) in interviews.iter().enumerate() {
        let outcome_style = match interview.outcome {
            InterviewOutcome::Passed => Style::default().fg(Color::Green),
            InterviewOutcome::Failed => Style::default().fg(palette.error),
            InterviewOutcome::Canceled => Style::default().fg(palette.muted),
            InterviewOutcome::Pending => Style::default().fg(Color::Yellow),
        };
        let marker = if i == tui.view.list_cursor { "> " } else { "  " };
        lines.push(Line::from(vec![
            Span::raw(format!(
                "{}{} {:?} {}min ",
                marker,
                interview.scheduled_at.format("%Y-%m-%d %H:%M"),
                interview.interview_type,
                interview.duration_mins
            )),
            Span::styled(format!("{:?}", interview.outcome), outcome_style),
        ]));
    }

    Text::from(lines)
}

fn draw_toasts(frame: &mut Frame, tui: &Tui, palette: &Palette) {
    let area = frame.area();
    let toasts: Vec<_> = tui.app.toasts.visible().collect();
    for (i, toast) in toasts.iter().rev().enumerate() {
        let width = (toast.message.chars().count() as u16 + 4).min(area.width);
        let y = area.height.saturating_sub(2 + 3 * (i as u16 + 1));
        let rect = Rect::new(area.width.saturating_sub(width), y, width, 3).intersection(area);
        let color = match toast.kind {
            ToastKind::Info => palette.accent,
            ToastKind::Error => palette.error,
        };
        frame.render_widget(Clear, rect);
        frame.render_widget(
            Paragraph::new(toast.message.clone())
                .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(color))),
            rect,
        );
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::tests::column;
    use crate::models::ColumnType;

    fn view() -> (JobsView, JobColumn, JobColumn) {
        let company = column("Company", ColumnType::Text, Some("company_name"));
        let applied = column("Applied", ColumnType::Date, Some("applied_at"));
        let mut view = JobsView::new(&JobsPagePreferences::default());
        view.columns = vec![company.clone(), applied.clone()];
        (view, company, applied)
    }

    #[test]
    fn test_search_waits_for_quiet_period() {
        let (mut view, _, _) = view();
        let t0 = Instant::now();
        view.edit_search("ac".into(), t0);
        view.edit_search("acme".into(), t0 + Duration::from_millis(100));

        assert!(view.tick(t0 + Duration::from_millis(350)).is_empty());
        assert_eq!(view.query(50).search, None);

        let patches = view.tick(t0 + Duration::from_millis(400));
        assert_eq!(patches.len(), 1);
        assert_eq!(view.query(50).search.as_deref(), Some("acme"));
    }

    #[test]
    fn test_filter_removal_skips_debounce() {
        let (mut view, company, _) = view();
        let t0 = Instant::now();
        let filter = ColumnFilter::new(
            company.id,
            FilterOperator::Contains,
            Some(FilterValue::Text("acme".into())),
        );
        view.set_filter(filter.clone(), None, t0);
        assert!(view.query(50).filters.is_empty());
        view.tick(t0 + Duration::from_millis(300));
        assert_eq!(view.query(50).filters.len(), 1);

        // a pending edit is dropped along with the removal
        view.set_filter(filter, Some(0), t0 + Duration::from_millis(400));
        view.remove_filters(Some(company.id));
        assert!(!view.filters.is_pending());
        assert!(view.query(50).filters.is_empty());
        assert!(view.tick(t0 + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_only_primary_sort_is_queried() {
        let (mut view, company, applied) = view();
        view.toggle_sort(company.id);
        view.toggle_sort(applied.id);
        view.toggle_sort(applied.id);
        let sort = view.query(50).sort.unwrap();
        assert_eq!(sort.field.as_deref(), Some("company_name"));

        view.promote_sort(applied.id);
        let sort = view.query(50).sort.unwrap();
        assert_eq!(sort.field.as_deref(), Some("applied_at"));
        assert_eq!(sort.direction, SortDirection::Desc);
        assert!(view.promote_sort(applied.id).is_none());
    }
}
