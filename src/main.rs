mod auth;
mod config;
mod error;
mod jsearch;
mod models;
mod pager;
mod saved;
mod store;
mod tui;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use auth::{AuthClient, SessionHandle, SignUp, SignUpOutcome};
use config::{JSearchConfig, SupabaseConfig};
use jsearch::{JSearchClient, JobSource, DEFAULT_COUNTRY};
use models::{EmploymentType, ExperienceLevel, JobSummary, SavedJob};
use pager::{FetchOutcome, SearchPager, SearchQuery};
use saved::SavedJobs;
use store::SupabaseStore;
use tui::truncate;

#[derive(Parser)]
#[command(name = "jobify")]
#[command(about = "Job search from the terminal - browse postings and keep a list of saved jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Employment type (FULLTIME, CONTRACTOR, PARTTIME, INTERN)
    #[arg(short = 't', long = "type")]
    employment_type: Option<EmploymentType>,

    /// Experience level (under_3_years_experience, more_than_3_years_experience, no_experience, no_degree)
    #[arg(short, long)]
    experience: Option<ExperienceLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search job postings
    Search {
        /// Free-text query (empty searches everything)
        query: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        /// Number of result pages to load
        #[arg(short, long, default_value = "1")]
        pages: u32,
    },

    /// Browse search results interactively
    Browse {
        /// Free-text query (empty searches everything)
        query: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show job details
    Show {
        /// Job ID
        job_id: String,

        /// Country the posting is listed in
        #[arg(short, long, default_value = DEFAULT_COUNTRY)]
        country: String,
    },

    /// List saved jobs, newest first
    Saved,

    /// Save a job
    Save {
        /// Job ID
        job_id: String,

        /// Country the posting is listed in
        #[arg(short, long, default_value = DEFAULT_COUNTRY)]
        country: String,
    },

    /// Remove a job from the saved list
    Unsave {
        /// Job ID
        job_id: String,
    },

    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Create an account
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Full name
        #[arg(short, long)]
        name: String,
    },

    /// Sign out and forget the local session
    Logout,

    /// Show the signed-in user
    Whoami,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();
}

fn build_query(text: Option<String>, filters: FilterArgs) -> Result<SearchQuery> {
    let mut query = SearchQuery::new(text.unwrap_or_default()).with_date_posted(config::date_posted()?);
    if let Some(employment_type) = filters.employment_type {
        query.toggle_employment_type(employment_type);
    }
    if let Some(experience) = filters.experience {
        query.toggle_experience(experience);
    }
    Ok(query)
}

fn with_retry_hint(e: error::Error, what: &str) -> anyhow::Error {
    if e.is_network_failure() {
        anyhow!("{}: {}. The job service may be unreachable; try again.", what, e)
    } else {
        anyhow!("{}: {}", what, e)
    }
}

fn job_source() -> Result<Arc<JSearchClient>> {
    Ok(Arc::new(JSearchClient::new(&JSearchConfig::from_env()?)))
}

/// Load the stored session, refreshing it first if the access token expired.
async fn restore_session(config: &SupabaseConfig, path: &Path) -> Result<SessionHandle> {
    let Some(session) = auth::load_session(path)? else {
        return Ok(SessionHandle::default());
    };
    let handle = SessionHandle::new(Some(session.clone()));
    if !session.is_expired() {
        return Ok(handle);
    }

    match AuthClient::new(config).refresh(&session).await {
        Ok(fresh) => {
            auth::save_session(path, &fresh)?;
            handle.set(fresh);
        }
        Err(e) => {
            warn!("Session refresh failed: {}", e);
            auth::remove_session(path)?;
            handle.clear();
        }
    }
    Ok(handle)
}

/// Saved-jobs access for the stored session, if configured and signed in.
async fn open_saved(path: &Path) -> Result<Option<SavedJobs>> {
    let Ok(config) = SupabaseConfig::from_env() else {
        return Ok(None);
    };
    let session = restore_session(&config, path).await?;
    if session.current().is_none() {
        return Ok(None);
    }
    let store = Arc::new(SupabaseStore::new(&config, session.clone()));
    Ok(Some(SavedJobs::new(store, session)))
}

async fn require_saved(path: &Path) -> Result<SavedJobs> {
    SupabaseConfig::from_env()?;
    open_saved(path)
        .await?
        .ok_or_else(|| anyhow!("Not signed in. Run 'jobify login' first."))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let session_path = config::session_path();

    match cli.command {
        Commands::Search { query, filters, pages } => {
            let source = job_source()?;
            let pager = SearchPager::new(source);
            pager
                .search(build_query(query, filters)?)
                .await
                .map_err(|e| with_retry_hint(e, "Search failed"))?;
            for _ in 1..pages {
                let outcome = pager
                    .load_more()
                    .await
                    .map_err(|e| with_retry_hint(e, "Loading more results failed"))?;
                if outcome == FetchOutcome::Skipped {
                    break;
                }
            }

            let state = pager.state().await;
            let saved = open_saved(&session_path).await?;
            if let Some(saved) = &saved {
                saved.check_all(&state.items).await?;
            }

            if state.items.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<2} {:<32} {:<22} {:<11} {:<20} {}", "", "TITLE", "EMPLOYER", "TYPE", "LOCATION", "ID");
                println!("{}", "-".repeat(110));
                for job in &state.items {
                    let is_saved = match &saved {
                        Some(saved) => saved.cached_flag(&job.id).await == Some(true),
                        None => false,
                    };
                    print_job_row(if is_saved { "*" } else { " " }, job);
                }
                if state.has_more {
                    println!("\nMore results available (use --pages {}).", state.page + 1);
                }
            }
        }

        Commands::Browse { query, filters } => {
            let source = job_source()?;
            let pager = SearchPager::new(source.clone());
            let saved = open_saved(&session_path).await?;
            let browser = tui::Browser {
                pager: &pager,
                source: source.as_ref(),
                saved: saved.as_ref(),
            };
            browser.run(build_query(query, filters)?).await?;
        }

        Commands::Show { job_id, country } => {
            let source = job_source()?;
            let detail = source
                .job_details(&job_id, &country)
                .await
                .with_context(|| format!("Failed to load job {}", job_id))?;
            let job = &detail.summary;

            println!("{}", job.title);
            println!("Employer: {}", job.employer_name);
            println!("Type: {}", job.employment_type);
            println!("Posted: {}", job.posted_at.format("%B %-d, %Y"));
            if let Some(location) = detail.location() {
                println!("Location: {}", location);
            }
            if let Some(link) = &detail.apply_link {
                println!("Apply: {}", link);
            }
            if let Some(saved) = open_saved(&session_path).await? {
                let is_saved = saved.is_saved(&job.id).await?;
                println!("Saved: {}", if is_saved { "yes" } else { "no" });
            }

            let highlights = &detail.highlights;
            if !highlights.is_empty() {
                let sections = [
                    ("Qualifications", &highlights.qualifications),
                    ("Responsibilities", &highlights.responsibilities),
                    ("Benefits", &highlights.benefits),
                ];
                for (label, entries) in sections {
                    if entries.is_empty() {
                        continue;
                    }
                    println!("\n--- {} ---", label);
                    for entry in entries {
                        let wrapped = textwrap::fill(entry, textwrap::Options::new(76).initial_indent("  - ").subsequent_indent("    "));
                        println!("{}", wrapped);
                    }
                }
            } else {
                println!("\n(no highlights listed)");
            }

            if !detail.description.trim().is_empty() {
                println!("\n--- Description ---");
                println!("{}", textwrap::fill(&detail.description, 80));
            }
        }

        Commands::Saved => {
            let saved = require_saved(&session_path).await?;
            let rows = saved.fetch_all().await.context("Failed to load saved jobs")?;
            if rows.is_empty() {
                println!("No saved jobs.");
            } else {
                println!("{:<12} {:<32} {:<22} {:<11} {:<20} {}", "SAVED", "TITLE", "EMPLOYER", "TYPE", "LOCATION", "ID");
                println!("{}", "-".repeat(120));
                for row in &rows {
                    print_saved_row(row);
                }
            }
        }

        Commands::Save { job_id, country } => {
            let saved = require_saved(&session_path).await?;
            let source = job_source()?;
            let detail = source
                .job_details(&job_id, &country)
                .await
                .with_context(|| format!("Failed to load job {}", job_id))?;
            let row = saved.save(&detail.to_summary()).await.context("Failed to save job")?;
            println!("Saved '{}' at {} (row {}).", row.job.title, row.job.employer_name, row.id);
        }

        Commands::Unsave { job_id } => {
            let saved = require_saved(&session_path).await?;
            saved.unsave(&job_id).await.context("Failed to remove saved job")?;
            println!("Removed {} from saved jobs.", job_id);
        }

        Commands::Login { email, password } => {
            let config = SupabaseConfig::from_env()?;
            let session = AuthClient::new(&config)
                .sign_in(&email, &password)
                .await
                .context("Sign in failed")?;
            auth::save_session(&session_path, &session)?;
            println!("Signed in as {}.", session.email.as_deref().unwrap_or(&session.user_id));
        }

        Commands::Signup { email, password, name } => {
            let config = SupabaseConfig::from_env()?;
            let request = SignUp { email, password, full_name: name };
            match AuthClient::new(&config).sign_up(&request).await.context("Sign up failed")? {
                SignUpOutcome::SignedIn(session) => {
                    auth::save_session(&session_path, &session)?;
                    println!("Account created. Signed in as {}.", request.email);
                }
                SignUpOutcome::ConfirmationPending { .. } => {
                    println!("Verification email sent. Please check your email to verify your account, then run 'jobify login'.");
                }
            }
        }

        Commands::Logout => {
            let config = SupabaseConfig::from_env()
                .map_err(|e| warn!("Skipping remote sign out: {}", e))
                .ok();
            auth::end_session(&session_path, config.as_ref()).await?;
            println!("Signed out.");
        }

        Commands::Whoami => match auth::load_session(&session_path)? {
            Some(session) => {
                println!("User: {}", session.user_id);
                if let Some(email) = &session.email {
                    println!("Email: {}", email);
                }
                if session.is_expired() {
                    println!("(session expired; it will be refreshed on next use)");
                }
            }
            None => println!("Not signed in."),
        },
    }

    Ok(())
}

fn print_job_row(marker: &str, job: &JobSummary) {
    println!(
        "{:<2} {:<32} {:<22} {:<11} {:<20} {}",
        marker,
        truncate(&job.title, 30),
        truncate(&job.employer_name, 20),
        job.employment_type,
        truncate(&job.location().unwrap_or_default(), 18),
        job.id
    );
}

fn print_saved_row(row: &SavedJob) {
    let saved_at = row
        .created_at
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    println!(
        "{:<12} {:<32} {:<22} {:<11} {:<20} {}",
        saved_at,
        truncate(&row.job.title, 30),
        truncate(&row.job.employer_name, 20),
        row.job.employment_type,
        truncate(&row.job.location().unwrap_or_default(), 18),
        row.job.id
    );
}
