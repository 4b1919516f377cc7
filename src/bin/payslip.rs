//! CLI binary for payslip-dispatch.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DispatchConfig` / `SmtpConfig`, drives progress bars and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use payslip_dispatch::export::archive_path;
use payslip_dispatch::{
    Category, DeliveryState, DispatchConfig, Dispatcher, DocumentSplitter, DryRunTransport,
    MailTransport, PageOutcome, Registry, RegistryUser, SmtpConfig, SmtpTransport,
    SplitProgressCallback, SplitReport, SqliteRegistry,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn bar_style(unit: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "{{spinner:.cyan}} {{prefix:.bold}}  \
         [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
         ⏱ {{elapsed_precise}}  {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

fn spinner(prefix: &'static str, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for a split: one bar tick and one log line per page.
struct CliSplitProgress {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliSplitProgress {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: spinner("Preparing", "Opening PDF…"),
            skipped: AtomicUsize::new(0),
        })
    }
}

impl SplitProgressCallback for CliSplitProgress {
    fn on_split_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(bar_style("pages"));
        self.bar.set_prefix("Splitting");
        self.bar.reset_eta();
    }

    fn on_page_processed(&self, page_num: usize, total: usize, outcome: &PageOutcome) {
        match outcome {
            PageOutcome::Written { path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                self.bar.println(format!(
                    "  {} Page {:>3}/{:<3}  {}",
                    green("✓"),
                    page_num,
                    total,
                    name
                ));
            }
            PageOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                self.bar.println(format!(
                    "  {} Page {:>3}/{:<3}  {}",
                    dim("–"),
                    page_num,
                    total,
                    dim("no payslip record")
                ));
            }
        }
        self.bar.inc(1);
    }

    fn on_split_complete(&self, report: &SplitReport) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} files from {} pages  {}",
            green("✔"),
            bold(&report.written.len().to_string()),
            report.total_pages,
            dim(&format!("({} skipped)", self.skipped.load(Ordering::SeqCst)))
        );
    }

    fn on_split_failed(&self, reason: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(reason));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split a batch into encrypted per-employee files
  payslip split march.pdf -o split/

  # Load the registry, then see who matches
  payslip users import staff.json
  payslip reconcile split/
  payslip reconcile split/ --list inactive

  # Mail every active file, export the audit trail
  payslip send split/ --export reports/

  # Re-send what failed last time
  payslip send split/ --retry

  # Rehearse without sending anything
  payslip send split/ --dry-run

PASSWORDS:
  Each split file is encrypted with the first two letters of the surname
  followed by the last two characters of the identifier:
  1001_ARAF_MAR-2023.pdf → "AR01".

OUTPUT LAYOUT AFTER SEND:
  split/success_mail/   files delivered
  split/failed_mail/    files that exhausted their attempts

ENVIRONMENT VARIABLES:
  PAYSLIP_DB              Registry database path
  PAYSLIP_SMTP_HOST       SMTP relay host
  PAYSLIP_SMTP_PORT       SMTP port (465 implicit TLS, 587 with --starttls)
  PAYSLIP_SENDER          From: address
  PAYSLIP_SMTP_USER       Login (defaults to the sender)
  PAYSLIP_SMTP_PASSWORD   SMTP password
  RUST_LOG                Overrides the log filter
"#;

/// Split payroll PDF batches and mail each payslip to its owner.
#[derive(Parser, Debug)]
#[command(
    name = "payslip",
    version,
    about = "Split payroll PDF batches and mail each payslip to its owner",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite registry of recipients.
    #[arg(long, global = true, env = "PAYSLIP_DB", default_value = "payslip.db")]
    db: PathBuf,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "PAYSLIP_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, global = true, env = "PAYSLIP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAYSLIP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAYSLIP_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a batch into one encrypted PDF per payslip.
    Split {
        /// The multi-page payslip batch.
        source: PathBuf,

        /// Output directory. Deleted and recreated.
        #[arg(short, long, env = "PAYSLIP_OUTPUT")]
        output: PathBuf,

        /// Pause after each page, in milliseconds.
        #[arg(long, env = "PAYSLIP_PAGE_DELAY_MS", default_value_t = 100)]
        page_delay_ms: u64,
    },

    /// Compare split files with the registry.
    Reconcile {
        /// Directory holding split files.
        directory: PathBuf,

        /// Print one category instead of the summary: active, inactive, unknown.
        #[arg(long)]
        list: Option<Category>,

        /// Page of the listing (1-based).
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 100)]
        per_page: usize,
    },

    /// Mail every active split file to its owner.
    Send(SendArgs),

    /// Manage the recipient registry.
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Directory holding split files.
    directory: PathBuf,

    /// Re-send files from the failed directory first.
    #[arg(long)]
    retry: bool,

    /// Write logs.csv and errors.csv as a ZIP to this file or directory.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Log messages instead of sending them.
    #[arg(long, env = "PAYSLIP_DRY_RUN")]
    dry_run: bool,

    #[arg(long, env = "PAYSLIP_SMTP_HOST", required_unless_present = "dry_run")]
    smtp_host: Option<String>,

    #[arg(long, env = "PAYSLIP_SMTP_PORT", default_value_t = 465)]
    smtp_port: u16,

    /// Upgrade a plain connection with STARTTLS instead of implicit TLS.
    #[arg(long, env = "PAYSLIP_STARTTLS")]
    starttls: bool,

    #[arg(long, env = "PAYSLIP_SENDER", required_unless_present = "dry_run")]
    sender: Option<String>,

    #[arg(long, env = "PAYSLIP_SMTP_USER")]
    smtp_user: Option<String>,

    #[arg(long, env = "PAYSLIP_SMTP_PASSWORD", hide_env_values = true, default_value = "")]
    smtp_password: String,

    /// Per-command SMTP timeout in seconds.
    #[arg(long, env = "PAYSLIP_SMTP_TIMEOUT", default_value_t = 30)]
    smtp_timeout: u64,

    /// Attempts per file.
    #[arg(long, env = "PAYSLIP_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Pause between attempts, in milliseconds.
    #[arg(long, env = "PAYSLIP_RETRY_INTERVAL_MS", default_value_t = 5000)]
    retry_interval_ms: u64,

    /// Keep retrying after a permanent (5xx) rejection.
    #[arg(long, env = "PAYSLIP_RETRY_PERMANENT")]
    retry_permanent: bool,

    #[arg(long, env = "PAYSLIP_SUCCESS_DIR", default_value = "success_mail")]
    success_dir: String,

    #[arg(long, env = "PAYSLIP_FAILED_DIR", default_value = "failed_mail")]
    failed_dir: String,
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    /// Add one recipient.
    Add {
        identifier: String,
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        surname: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Mark the recipient active.
        #[arg(long)]
        active: bool,
    },
    /// Remove a recipient by identifier or email.
    Remove { key: String },
    /// List every recipient.
    List,
    /// Bulk-insert recipients from a JSON array. All or nothing.
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars replace INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Split {
            source,
            output,
            page_delay_ms,
        } => run_split(&cli, source, output, *page_delay_ms).await,
        Command::Reconcile {
            directory,
            list,
            page,
            per_page,
        } => run_reconcile(&cli, directory, *list, *page, *per_page),
        Command::Send(args) => run_send(&cli, args, show_progress).await,
        Command::Users(command) => run_users(&cli, command),
    }
}

fn open_registry(cli: &Cli) -> Result<Arc<SqliteRegistry>> {
    let registry = SqliteRegistry::open(&cli.db)
        .with_context(|| format!("Failed to open registry {:?}", cli.db))?;
    Ok(Arc::new(registry))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise output")?
    );
    Ok(())
}

// ── split ────────────────────────────────────────────────────────────────────

async fn run_split(cli: &Cli, source: &Path, output: &Path, page_delay_ms: u64) -> Result<()> {
    let config = DispatchConfig::builder()
        .page_delay_ms(page_delay_ms)
        .build()
        .context("Invalid configuration")?;
    let splitter = DocumentSplitter::from_config(&config);

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let progress: Arc<dyn SplitProgressCallback> = if show_progress {
        CliSplitProgress::new() as Arc<dyn SplitProgressCallback>
    } else {
        Arc::new(payslip_dispatch::NoopProgressCallback)
    };

    let report = splitter
        .split(source, output, progress)
        .await
        .context("Split failed")?;

    if cli.json {
        print_json(&report)?;
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Wrote {} files from {} pages to {}",
            report.written.len(),
            report.total_pages,
            output.display()
        );
    }
    Ok(())
}

// ── reconcile ────────────────────────────────────────────────────────────────

fn run_reconcile(
    cli: &Cli,
    directory: &Path,
    list: Option<Category>,
    page: usize,
    per_page: usize,
) -> Result<()> {
    let registry = open_registry(cli)?;
    let dispatcher = Dispatcher::new(
        DispatchConfig::default(),
        registry.clone(),
        Arc::new(DryRunTransport),
    );
    let sets = dispatcher
        .reconcile(directory)
        .with_context(|| format!("Failed to reconcile {:?}", directory))?;

    if let Some(category) = list {
        let listing = registry
            .cached_partition(category, page, per_page)
            .context("Failed to read partition cache")?;
        if cli.json {
            return print_json(&listing);
        }
        for id in &listing.items {
            println!("{id}");
        }
        if !cli.quiet {
            eprintln!(
                "{}",
                dim(&format!(
                    "{} {} · page {}/{}",
                    listing.total,
                    category,
                    page.max(1),
                    listing.pages
                ))
            );
        }
        return Ok(());
    }

    if cli.json {
        return print_json(&sets);
    }
    for category in Category::ALL {
        println!("{:<9} {:>5}", category.as_str(), sets.get(category).len());
    }
    Ok(())
}

// ── send ─────────────────────────────────────────────────────────────────────

fn build_transport(args: &SendArgs) -> Result<Arc<dyn MailTransport>> {
    if args.dry_run {
        return Ok(Arc::new(DryRunTransport));
    }
    let host = args.smtp_host.clone().context("--smtp-host is required")?;
    let sender = args.sender.clone().context("--sender is required")?;

    let mut smtp = SmtpConfig::new(host, sender, args.smtp_password.clone());
    smtp.port = args.smtp_port;
    smtp.starttls = args.starttls;
    smtp.username = args.smtp_user.clone();
    smtp.timeout_secs = args.smtp_timeout;

    let transport = SmtpTransport::new(&smtp).context("Invalid SMTP configuration")?;
    Ok(Arc::new(transport))
}

async fn run_send(cli: &Cli, args: &SendArgs, show_progress: bool) -> Result<()> {
    let config = DispatchConfig::builder()
        .max_send_attempts(args.max_attempts)
        .retry_interval_ms(args.retry_interval_ms)
        .retry_permanent_failures(args.retry_permanent)
        .success_dir(args.success_dir.clone())
        .failed_dir(args.failed_dir.clone())
        .build()
        .context("Invalid configuration")?;

    let registry = open_registry(cli)?;
    let dispatcher = Arc::new(Dispatcher::new(config, registry, build_transport(args)?));

    let handle = if args.retry {
        dispatcher.start_retry(&args.directory)
    } else {
        dispatcher.start_delivery(&args.directory)
    };
    let task_id = handle.task_id().to_string();

    // ── Ctrl-C cancels before the next file ──────────────────────────────
    let interrupt = {
        let dispatcher = Arc::clone(&dispatcher);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Canceling after the current file…", cyan("⚠"));
                dispatcher.cancel(&task_id);
            }
        })
    };

    if show_progress {
        let bar = spinner("Preparing", "Reconciling…");
        let mut shown = 0usize;
        while !handle.is_finished() {
            let state = dispatcher.delivery_tracker().get(&task_id);
            if state.total > 0 && bar.length() != Some(state.total as u64) {
                bar.set_length(state.total as u64);
                bar.set_style(bar_style("files"));
                bar.set_prefix(if args.retry { "Retrying" } else { "Sending" });
            }
            for log in state.logs.iter().skip(shown) {
                bar.println(format!("  {}  {}", dim(&log.file), log.message));
            }
            shown = state.logs.len();
            bar.set_position(state.processed() as u64);
            bar.set_message(format!("{} failed", state.failed));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        bar.finish_and_clear();
    }

    let state = handle.wait().await.context("Delivery failed")?;
    interrupt.abort();

    if let Some(target) = &args.export {
        let path = write_export(&dispatcher, &task_id, target)?;
        if !cli.quiet && !cli.json {
            eprintln!("   logs exported to {}", bold(&path.display().to_string()));
        }
    }

    if cli.json {
        return print_json(&state);
    }
    if !cli.quiet {
        print_summary(&state);
    }
    Ok(())
}

fn print_summary(state: &DeliveryState) {
    let icon = if state.failed == 0 && !state.is_canceled() {
        green("✔")
    } else if state.sent == 0 && state.total > 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {}/{} sent  {} failed{}",
        icon,
        bold(&state.sent.to_string()),
        state.total,
        if state.failed > 0 {
            red(&state.failed.to_string())
        } else {
            state.failed.to_string()
        },
        if state.is_canceled() {
            dim("  (canceled)")
        } else {
            String::new()
        }
    );
    for error in &state.errors {
        let file = if error.file.is_empty() { "-" } else { &error.file };
        eprintln!("   {} {}  {}", red("✗"), file, dim(&error.error));
    }
}

/// Write the archive next to its final name, then move it into place.
fn write_export(dispatcher: &Dispatcher, task_id: &str, target: &Path) -> Result<PathBuf> {
    let archive = dispatcher
        .export_logs(task_id)
        .context("Failed to build export archive")?;

    let path = archive_path(target)
        .with_context(|| format!("Failed to prepare export target {:?}", target))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
    file.write_all(&archive)
        .context("Failed to write export archive")?;
    file.persist(&path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}

// ── users ────────────────────────────────────────────────────────────────────

fn run_users(cli: &Cli, command: &UsersCommand) -> Result<()> {
    let registry = open_registry(cli)?;

    match command {
        UsersCommand::Add {
            identifier,
            email,
            first_name,
            surname,
            phone,
            active,
        } => {
            let user = RegistryUser {
                identifier: identifier.clone(),
                email: email.clone(),
                first_name: first_name.clone(),
                surname: surname.clone(),
                phone: phone.clone(),
                active: *active,
            };
            registry
                .insert_many(std::slice::from_ref(&user))
                .context("Failed to add user")?;
            if !cli.quiet {
                eprintln!("{} added {} <{}>", green("✔"), user.identifier, user.email);
            }
        }
        UsersCommand::Remove { key } => match registry.remove(key).context("Failed to remove user")? {
            Some(user) if !cli.quiet => {
                eprintln!("{} removed {} <{}>", green("✔"), user.identifier, user.email)
            }
            Some(_) => {}
            None => anyhow::bail!("No user with identifier or email '{}'", key),
        },
        UsersCommand::List => {
            let users = registry.find_all().context("Failed to list users")?;
            if cli.json {
                return print_json(&users);
            }
            for user in &users {
                let name = [user.first_name.as_deref(), user.surname.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                println!(
                    "{:<12} {:<32} {}{}",
                    user.identifier,
                    user.email,
                    name,
                    if user.active { "" } else { " (inactive)" }
                );
            }
        }
        UsersCommand::Import { file } => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let users: Vec<RegistryUser> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {:?} as a JSON array of users", file))?;
            let inserted = registry
                .insert_many(&users)
                .context("Import rejected, no users were added")?;
            if !cli.quiet {
                eprintln!("{} imported {} users", green("✔"), bold(&inserted.to_string()));
            }
        }
    }
    Ok(())
}
