mod api;
mod app;
mod auth;
mod config;
mod debounce;
mod filters;
mod forms;
mod jobs;
mod layout;
mod logging;
mod modal;
mod models;
mod prefs;
mod routes;
mod session;
mod tui;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use api::{ApiClient, HttpTransport, JobsQuery};
use app::AppState;
use auth::SignUpOutcome;
use config::Config;
use filters::{parse_filter_spec, parse_sort_spec, resolve_column};
use forms::Form;
use jobs::{build_query, cell_text, parse_column_value, JobEdit};
use layout::ColumnLayout;
use models::{ColumnPatch, InterviewOutcome, InterviewPatch, JobStage, JobsPagePreferences, Theme};
use prefs::PreferencesPatch;
use routes::Route;
use session::SessionStore;

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track job applications, stages and interviews from the terminal")]
struct Cli {
    /// API base URL (overrides JOBTRACK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log filter, e.g. "debug" or "jobtrack=trace" (overrides JOBTRACK_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        email: String,

        #[arg(long, env = "JOBTRACK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account
    Signup {
        email: String,

        #[arg(long, env = "JOBTRACK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Repeat the password (defaults to --password)
        #[arg(long)]
        confirm: Option<String>,

        /// Your full name
        #[arg(long)]
        name: Option<String>,
    },

    /// Sign out and forget the saved session
    Logout,

    /// Show the signed in user
    Whoami,

    /// Print the URL that starts an OAuth sign in
    Oauth {
        /// Provider name, e.g. google or github
        provider: String,
    },

    /// Open the interactive browser
    Browse {
        /// Page to start on (/jobs, /analytics, /resume, /knowledge)
        #[arg(default_value = "/jobs")]
        route: String,
    },

    /// Manage job applications
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Manage pipeline stages
    Stages {
        #[command(subcommand)]
        command: StageCommands,
    },

    /// Manage table columns
    Columns {
        #[command(subcommand)]
        command: ColumnCommands,
    },

    /// Manage interviews for a job
    Interviews {
        #[command(subcommand)]
        command: InterviewCommands,
    },

    /// Show or change saved preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
}

#[derive(clap::Args)]
struct ViewArgs {
    /// Search text (company, title, notes)
    #[arg(short, long)]
    search: Option<String>,

    /// Filter as column:operator[:value], repeatable
    #[arg(short, long)]
    filter: Vec<String>,

    /// Sort as column[:asc|desc]
    #[arg(long)]
    sort: Option<String>,

    /// Ignore the saved search, filters and sort
    #[arg(long)]
    fresh: bool,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs using the saved table view
    List {
        #[command(flatten)]
        view: ViewArgs,

        /// Fetch every page instead of the first
        #[arg(long)]
        all: bool,
    },

    /// Count jobs matching the view
    Count {
        #[command(flatten)]
        view: ViewArgs,
    },

    /// Add a job application
    Add {
        company: String,
        title: String,

        /// Stage name
        #[arg(long)]
        stage: Option<String>,

        /// Date applied (YYYY-MM-DD)
        #[arg(long)]
        applied: Option<String>,

        #[arg(long)]
        salary_min: Option<String>,

        #[arg(long)]
        salary_max: Option<String>,

        /// Posting URL
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Change one field of a job (company, title, stage, applied, notes, salary_min, salary_max, url, location)
    Set {
        id: Uuid,
        field: String,
        /// New value; empty clears optional fields
        value: String,
    },

    /// Set a custom column value
    Value {
        id: Uuid,
        column: String,
        /// New value; empty clears it
        value: String,
    },

    /// Delete a job
    Rm { id: Uuid },
}

#[derive(Subcommand)]
enum StageCommands {
    /// List stages in pipeline order
    List,

    /// Add a stage at the end of the pipeline
    Add {
        name: String,

        #[arg(long, default_value = "#6b7280")]
        color: String,

        /// active, offer or closed
        #[arg(long, default_value = "active")]
        category: String,
    },

    /// Delete a stage
    Rm {
        /// Stage name or ID
        name: String,
    },
}

#[derive(Subcommand)]
enum ColumnCommands {
    /// List columns in display order
    List,

    /// Add a custom column
    Add {
        name: String,

        /// text, number, date, url, checkbox, select or multi_select
        #[arg(short = 't', long = "type", default_value = "text")]
        column_type: String,

        /// Options for select columns, comma separated
        #[arg(long, default_value = "")]
        options: String,
    },

    /// Delete a custom column and its values
    Rm { name: String },

    /// Rename a column
    Rename { name: String, new_name: String },

    /// Move a column to a position in the table (0 is leftmost)
    Move { name: String, position: usize },

    /// Show or hide a column in the table
    Toggle { name: String },
}

#[derive(Subcommand)]
enum InterviewCommands {
    /// List interviews for a job
    List { job_id: Uuid },

    /// Schedule an interview
    Add {
        job_id: Uuid,

        /// When, as "YYYY-MM-DD HH:MM" (UTC)
        at: String,

        /// phone, video, onsite, technical, behavioral or other
        #[arg(short = 't', long = "type", default_value = "video")]
        interview_type: String,

        /// Duration in minutes
        #[arg(short, long, default_value = "60")]
        duration: String,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Record the outcome (pending, passed, failed, canceled)
    Outcome {
        job_id: Uuid,
        interview_id: Uuid,
        outcome: String,
    },

    /// Delete an interview
    Rm { job_id: Uuid, interview_id: Uuid },
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Print saved preferences as JSON
    Show,

    /// Set the color theme (light, dark, system)
    Theme { theme: String },

    /// Show or hide the sidebar (on/off)
    Sidebar {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        open: bool,
    },

    /// Save the table search; omit to clear
    Search { text: Option<String> },

    /// Save table filters (column:operator[:value]); none clears
    Filter { specs: Vec<String> },

    /// Save table sorts (column[:asc|desc]); the first is primary
    Sort { specs: Vec<String> },

    /// Clear the saved search, filters and sorts
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?.with_api_url(cli.api_url);
    let _log_guard = logging::init(&config.logs_dir(), cli.log.as_deref(), config.log_filter.as_deref());

    let session = SessionStore::load(&config.session_path(), &config.api_url)?;
    let transport = HttpTransport::new(&config.api_url, session.jar())?;
    let api = ApiClient::new(Arc::new(transport), &config.api_url);
    let mut app = AppState::new(api, &config, Some(session));

    match cli.command {
        Commands::Login { email, password } => {
            let mut form = Form::login();
            form.set("email", &email);
            form.set("password", &password);
            auth::sign_in(&mut app, &form).await.context("Sign in failed")?;
            println!("Signed in as {}.", email);
        }

        Commands::Signup {
            email,
            password,
            confirm,
            name,
        } => {
            let mut form = Form::sign_up();
            form.set("email", &email);
            form.set("password", &password);
            form.set("confirmation_password", confirm.as_deref().unwrap_or(&password));
            form.set("full_name", name.as_deref().unwrap_or_default());
            match auth::sign_up(&mut app, &form).await.context("Sign up failed")? {
                SignUpOutcome::SignedIn => println!("Account created. Signed in as {}.", email),
                SignUpOutcome::ConfirmEmail => {
                    println!("Account created. Check {} for a confirmation link, then sign in.", email)
                }
            }
        }

        Commands::Logout => {
            auth::logout(&mut app).await;
            println!("Signed out.");
        }

        Commands::Whoami => {
            require_session(&mut app).await?;
            if let Some(user) = app.auth.user() {
                match &user.full_name {
                    Some(name) => println!("{} <{}>", name, user.email),
                    None => println!("{}", user.email),
                }
            }
        }

        Commands::Oauth { provider } => {
            let url = auth::oauth_start(&app, &provider)?;
            println!("Open this URL in a browser to continue:\n{}", url);
        }

        Commands::Browse { route } => {
            tui::run_browse(app, &route).await?;
            return Ok(());
        }

        Commands::Jobs { command } => {
            require_session(&mut app).await?;
            run_jobs(&app, command).await?;
        }

        Commands::Stages { command } => {
            require_session(&mut app).await?;
            run_stages(&app, command).await?;
        }

        Commands::Columns { command } => {
            require_session(&mut app).await?;
            run_columns(&app, command).await?;
        }

        Commands::Interviews { command } => {
            require_session(&mut app).await?;
            run_interviews(&app, command).await?;
        }

        Commands::Prefs { command } => {
            require_session(&mut app).await?;
            run_prefs(&app, command).await?;
        }
    }

    // the refresh endpoint may have rotated the cookies
    if app.auth.is_authenticated() {
        app.persist_session();
    }
    Ok(())
}

/// Runs the same guard as the browser: a protected page either renders or
/// sends us to the login page.
async fn require_session(app: &mut AppState) -> Result<()> {
    if app.navigate(Route::Jobs.path()).await != Route::Jobs {
        bail!("Not signed in. Run: jobtrack login <email>");
    }
    Ok(())
}

/// The saved table view with any command-line overrides applied.
async fn resolve_view(app: &AppState, args: &ViewArgs) -> Result<(JobsQuery, Vec<models::JobColumn>)> {
    let columns = app.jobs.columns().await?;
    let mut view = if args.fresh {
        JobsPagePreferences::default()
    } else {
        app.prefs.read().jobs
    };
    if let Some(search) = &args.search {
        view.search = search.clone();
    }
    if !args.filter.is_empty() {
        view.column_filters = args
            .filter
            .iter()
            .map(|spec| parse_filter_spec(spec, &columns))
            .collect::<Result<_>>()?;
    }
    if let Some(sort) = &args.sort {
        view.sorts = vec![parse_sort_spec(sort, &columns)?];
    }
    Ok((build_query(&view, &columns, app.page_size), columns))
}

fn find_stage<'a>(stages: &'a [JobStage], name: &str) -> Result<&'a JobStage> {
    stages
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name) || s.id.to_string() == name)
        .ok_or_else(|| anyhow!("Unknown stage '{}'", name))
}

async fn run_jobs(app: &AppState, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::List { view, all } => {
            let (query, columns) = resolve_view(app, &view).await?;
            let stages = app.jobs.stages().await?;
            let mut rows = app.jobs.rows(&query).await?;
            if all {
                while app.jobs.load_more(&query).await? {}
                rows = app.jobs.cached_rows(&query).unwrap_or_default();
            }
            if rows.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }

            let layout = ColumnLayout::from_prefs(&app.prefs.read().jobs);
            let visible = layout.visible(&columns);
            let mut header = format!("{:<36}", "ID");
            for column in &visible {
                header.push_str(&format!(" {:<20}", truncate(&column.name.to_uppercase(), 20)));
            }
            println!("{}", header);
            println!("{}", "-".repeat(header.len()));
            for job in &rows {
                let mut line = format!("{:<36}", job.id);
                for column in &visible {
                    line.push_str(&format!(" {:<20}", truncate(&cell_text(job, column, &stages), 20)));
                }
                println!("{}", line);
            }
            if app.jobs.has_more(&query) {
                println!("\n{} shown, more available (use --all)", rows.len());
            }
        }

        JobCommands::Count { view } => {
            let (query, _) = resolve_view(app, &view).await?;
            println!("{}", app.jobs.count(&query).await?);
        }

        JobCommands::Add {
            company,
            title,
            stage,
            applied,
            salary_min,
            salary_max,
            url,
            location,
            notes,
        } => {
            let stages = app.jobs.stages().await?;
            let mut form = Form::job();
            form.set("company_name", &company);
            form.set("job_title", &title);
            for (key, value) in [
                ("stage", stage),
                ("applied_at", applied),
                ("salary_min", salary_min),
                ("salary_max", salary_max),
                ("job_url", url),
                ("location", location),
                ("notes", notes),
            ] {
                form.set(key, value.as_deref().unwrap_or_default());
            }
            let new_job = forms::validate_job(&form, &stages)?;
            let job = app.jobs.create_job(new_job).await?;
            println!("Added {} at {} ({})", job.job_title, job.company_name, job.id);
        }

        JobCommands::Set { id, field, value } => {
            let stages = app.jobs.stages().await?;
            let edit = JobEdit::parse(&field, &value, &stages)?;
            let job = app.jobs.update_field(id, edit).await?;
            println!("Updated {} at {}.", job.job_title, job.company_name);
        }

        JobCommands::Value { id, column, value } => {
            let columns = app.jobs.columns().await?;
            let column = resolve_column(&columns, &column)?;
            if column.is_core {
                bail!("'{}' is a core column; use: jobtrack jobs set", column.name);
            }
            let value = parse_column_value(column, &value)?;
            app.jobs.set_column_value(id, column.id, value).await?;
            println!("Updated {}.", column.name);
        }

        JobCommands::Rm { id } => {
            app.jobs.delete_job(id).await?;
            println!("Deleted job {}.", id);
        }
    }
    Ok(())
}

async fn run_stages(app: &AppState, command: StageCommands) -> Result<()> {
    match command {
        StageCommands::List => {
            let stages = app.jobs.stages().await?;
            if stages.is_empty() {
                println!("No stages found.");
                return Ok(());
            }
            println!("{:<4} {:<24} {:<8} {:<8}", "POS", "NAME", "COLOR", "CATEGORY");
            println!("{}", "-".repeat(47));
            for stage in stages {
                println!(
                    "{:<4} {:<24} {:<8} {:<8}",
                    stage.position,
                    truncate(&stage.name, 22),
                    stage.color,
                    format!("{:?}", stage.category).to_lowercase()
                );
            }
        }

        StageCommands::Add { name, color, category } => {
            let stages = app.jobs.stages().await?;
            let next = stages.iter().map(|s| s.position + 1).max().unwrap_or(0);
            let mut form = Form::stage();
            form.set("name", &name);
            form.set("color", &color);
            form.set("category", &category);
            let stage = app.jobs.create_stage(forms::validate_stage(&form, next)?).await?;
            println!("Added stage '{}' at position {}.", stage.name, stage.position);
        }

        StageCommands::Rm { name } => {
            let stages = app.jobs.stages().await?;
            let stage = find_stage(&stages, &name)?;
            app.jobs.delete_stage(stage.id).await?;
            println!("Deleted stage '{}'.", stage.name);
        }
    }
    Ok(())
}

async fn run_columns(app: &AppState, command: ColumnCommands) -> Result<()> {
    let mut layout = ColumnLayout::from_prefs(&app.prefs.read().jobs);
    match command {
        ColumnCommands::List => {
            let columns = app.jobs.columns().await?;
            println!("{:<4} {:<24} {:<13} {:<6} {:<7}", "POS", "NAME", "TYPE", "CORE", "SHOWN");
            println!("{}", "-".repeat(58));
            for (i, column) in layout.ordered(&columns).iter().enumerate() {
                println!(
                    "{:<4} {:<24} {:<13} {:<6} {:<7}",
                    i,
                    truncate(&column.name, 22),
                    column.column_type.as_str(),
                    if column.is_core { "yes" } else { "" },
                    if layout.is_hidden(column.id) { "no" } else { "yes" }
                );
                if !column.options.is_empty() {
                    println!("     options: {}", column.options.join(", "));
                }
            }
        }

        ColumnCommands::Add {
            name,
            column_type,
            options,
        } => {
            let mut form = Form::column();
            form.set("name", &name);
            form.set("column_type", &column_type);
            form.set("options", &options);
            let column = app.jobs.create_column(forms::validate_column(&form)?).await?;
            println!("Added column '{}' ({}).", column.name, column.column_type.as_str());
        }

        ColumnCommands::Rm { name } => {
            let columns = app.jobs.columns().await?;
            let column = resolve_column(&columns, &name)?;
            if column.is_core {
                bail!("Core columns cannot be deleted; hide it with: jobtrack columns toggle {}", column.name);
            }
            app.jobs.delete_column(column.id).await?;
            println!("Deleted column '{}'.", column.name);
        }

        ColumnCommands::Rename { name, new_name } => {
            let columns = app.jobs.columns().await?;
            let column = resolve_column(&columns, &name)?;
            let new_name = new_name.trim();
            if new_name.is_empty() {
                bail!("Column name cannot be empty");
            }
            let patch = ColumnPatch {
                name: Some(new_name.to_string()),
                ..ColumnPatch::default()
            };
            app.jobs.update_column(column.id, patch).await?;
            println!("Renamed '{}' to '{}'.", column.name, new_name);
        }

        ColumnCommands::Move { name, position } => {
            let columns = app.jobs.columns().await?;
            let column = resolve_column(&columns, &name)?;
            layout.move_column(&columns, column.id, position);
            app.prefs.update(layout.to_patch()).await?;
            println!("Moved '{}' to position {}.", column.name, position.min(columns.len() - 1));
        }

        ColumnCommands::Toggle { name } => {
            let columns = app.jobs.columns().await?;
            let column = resolve_column(&columns, &name)?;
            layout.toggle_hidden(column.id);
            app.prefs.update(layout.to_patch()).await?;
            let state = if layout.is_hidden(column.id) { "hidden" } else { "shown" };
            println!("'{}' is now {}.", column.name, state);
        }
    }
    Ok(())
}

async fn run_interviews(app: &AppState, command: InterviewCommands) -> Result<()> {
    match command {
        InterviewCommands::List { job_id } => {
            let interviews = app.jobs.interviews(job_id).await?;
            if interviews.is_empty() {
                println!("No interviews scheduled.");
                return Ok(());
            }
            println!("{:<36} {:<17} {:<11} {:>5} {:<9}", "ID", "WHEN (UTC)", "TYPE", "MINS", "OUTCOME");
            println!("{}", "-".repeat(82));
            for interview in interviews {
                println!(
                    "{:<36} {:<17} {:<11} {:>5} {:<9}",
                    interview.id,
                    interview.scheduled_at.format("%Y-%m-%d %H:%M").to_string(),
                    format!("{:?}", interview.interview_type).to_lowercase(),
                    interview.duration_mins,
                    format!("{:?}", interview.outcome).to_lowercase()
                );
                if let Some(notes) = &interview.notes {
                    println!("     {}", truncate(notes, 72));
                }
            }
        }

        InterviewCommands::Add {
            job_id,
            at,
            interview_type,
            duration,
            location,
            url,
            notes,
        } => {
            let mut form = Form::interview();
            form.set("type", &interview_type);
            form.set("scheduled_at", &at);
            form.set("duration_mins", &duration);
            form.set("location", location.as_deref().unwrap_or_default());
            form.set("meeting_url", url.as_deref().unwrap_or_default());
            form.set("notes", notes.as_deref().unwrap_or_default());
            let interview = app
                .jobs
                .create_interview(job_id, forms::validate_interview(&form)?)
                .await?;
            println!(
                "Scheduled for {} ({}).",
                interview.scheduled_at.format("%Y-%m-%d %H:%M UTC"),
                interview.id
            );
        }

        InterviewCommands::Outcome {
            job_id,
            interview_id,
            outcome,
        } => {
            let outcome = InterviewOutcome::parse(&outcome.to_lowercase())
                .ok_or_else(|| anyhow!("Outcome must be pending, passed, failed or canceled"))?;
            let patch = InterviewPatch {
                outcome: Some(outcome),
                ..InterviewPatch::default()
            };
            app.jobs.update_interview(job_id, interview_id, patch).await?;
            println!("Recorded outcome.");
        }

        InterviewCommands::Rm { job_id, interview_id } => {
            app.jobs.delete_interview(job_id, interview_id).await?;
            println!("Deleted interview {}.", interview_id);
        }
    }
    Ok(())
}

async fn run_prefs(app: &AppState, command: PrefsCommands) -> Result<()> {
    let patch = match command {
        PrefsCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&app.prefs.read())?);
            return Ok(());
        }
        PrefsCommands::Theme { theme } => PreferencesPatch::theme(
            Theme::parse(&theme.to_lowercase()).ok_or_else(|| anyhow!("Theme must be light, dark or system"))?,
        ),
        PrefsCommands::Sidebar { open } => PreferencesPatch::sidebar_open(open),
        PrefsCommands::Search { text } => PreferencesPatch::search(text.unwrap_or_default()),
        PrefsCommands::Filter { specs } => {
            let columns = app.jobs.columns().await?;
            let filters = specs
                .iter()
                .map(|spec| parse_filter_spec(spec, &columns))
                .collect::<Result<Vec<_>>>()?;
            PreferencesPatch::column_filters(filters)
        }
        PrefsCommands::Sort { specs } => {
            let columns = app.jobs.columns().await?;
            let sorts = specs
                .iter()
                .map(|spec| parse_sort_spec(spec, &columns))
                .collect::<Result<Vec<_>>>()?;
            PreferencesPatch::sorts(sorts)
        }
        PrefsCommands::Clear => PreferencesPatch {
            search: Some(String::new()),
            column_filters: Some(Vec::new()),
            sorts: Some(Vec::new()),
            ..PreferencesPatch::default()
        },
    };
    app.prefs.update(patch).await?;
    println!("Preferences saved.");
    Ok(())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Initech", 30), "Initech");
        assert_eq!(truncate("A very long company name indeed", 10), "A very ...");
        assert_eq!(truncate("Société Générale", 10), "Société...");
    }

    #[test]
    fn test_cli_parses_filters() {
        let cli = Cli::try_parse_from([
            "jobtrack",
            "jobs",
            "list",
            "-f",
            "company:contains:acme",
            "-f",
            "applied:between:2024-01-01,2024-01-31",
            "--sort",
            "applied:desc",
        ])
        .unwrap();
        match cli.command {
            Commands::Jobs {
                command: JobCommands::List { view, all },
            } => {
                assert_eq!(view.filter.len(), 2);
                assert_eq!(view.sort.as_deref(), Some("applied:desc"));
                assert!(!all);
            }
            _ => panic!("expected jobs list"),
        }
    }
}
