//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use fontsync::core::cancel::StopSignal;
use fontsync::core::config::Config;
use fontsync::core::errors::FontSyncError;
use fontsync::core::paths::resolve_absolute_path;
use fontsync::daemon::scheduler::{DaemonArgs as SchedulerArgs, DirectoryLock, SyncDaemon};
use fontsync::daemon::service::{
    ServiceActionResult, ServiceManager, SystemdConfig, SystemdServiceManager,
};
use fontsync::daemon::signals::SignalHandler;
use fontsync::fonts::hasher::{ContentHasher, digests_match};
use fontsync::fonts::index::{IndexStore, PersistentIndex};
use fontsync::logger::activity::{ActivityLoggerConfig, spawn_logger};
use fontsync::logger::jsonl::JsonlConfig;
use fontsync::platform::pal::detect_registrar;
use fontsync::remote;
use fontsync::sync::engine::{SyncEngine, SyncPlan, SyncSettings};
use fontsync::sync::report::{EntryAction, SyncReport};

/// fontsync keeps a local font directory in step with a remote font index.
#[derive(Debug, Parser)]
#[command(
    name = "fontsync",
    author,
    version,
    about = "fontsync - managed font synchronization agent",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the sync agent until stopped.
    Daemon(DaemonArgs),
    /// Run a single sync pass.
    Sync(SyncArgs),
    /// Inspect the persistent index of managed fonts.
    Index(IndexArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Install fontsync as a systemd service.
    Install(ServiceArgs),
    /// Remove the systemd service.
    Uninstall(ServiceArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DaemonArgs {
    /// Read the index and fonts from a local directory laid out like the server.
    #[arg(long, value_name = "DIR")]
    mirror: Option<PathBuf>,
    /// Exit after this many sync passes.
    #[arg(long, value_name = "N")]
    max_passes: Option<u64>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct SyncArgs {
    /// Read the index and fonts from a local directory laid out like the server.
    #[arg(long, value_name = "DIR")]
    mirror: Option<PathBuf>,
    /// Print what would change without touching disk or registrations.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum IndexCommand {
    /// List managed fonts.
    Show,
    /// Rehash every managed font and compare with the index.
    Verify,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct ServiceArgs {
    /// Use the user service scope.
    #[arg(long)]
    user: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Json(_) | Self::Io(_) => 2,
        }
    }
}

impl From<FontSyncError> for CliError {
    fn from(e: FontSyncError) -> Self {
        match e {
            FontSyncError::InvalidConfig { .. }
            | FontSyncError::MissingConfig { .. }
            | FontSyncError::ConfigParse { .. }
            | FontSyncError::UnsupportedPlatform { .. } => Self::User(e.to_string()),
            _ => Self::Runtime(e.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Sync(args) => run_sync(cli, args),
        Command::Index(args) => run_index(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Install(args) => run_service(cli, args, true),
        Command::Uninstall(args) => run_service(cli, args, false),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version(args) => emit_version(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn logger_config(cli: &Cli, config: &Config) -> ActivityLoggerConfig {
    ActivityLoggerConfig {
        jsonl_config: JsonlConfig {
            path: config.paths.jsonl_log.clone(),
            ..JsonlConfig::default()
        },
        mirror_to_stderr: !cli.quiet,
        ..ActivityLoggerConfig::default()
    }
}

// ---------------------------------------------------------------------------
// daemon / sync
// ---------------------------------------------------------------------------

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = SyncDaemon::init(
        config,
        SchedulerArgs {
            mirror: args.mirror.clone(),
            max_passes: args.max_passes,
        },
    )?;
    daemon.run()?;
    Ok(())
}

fn run_sync(cli: &Cli, args: &SyncArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (source, downloader) = remote::connect(&config, args.mirror.as_deref())?;
    let remote_entries = source.fetch()?;

    if args.dry_run {
        let plan = SyncEngine::plan_from_index(
            &SyncSettings::from_config(&config),
            &PersistentIndex::new(&config.paths.index_file),
            &remote_entries,
        )?;
        return emit_plan(cli, &plan);
    }

    let _lock = DirectoryLock::acquire(&config.paths.font_dir)?;
    let (logger, logger_join) = spawn_logger(logger_config(cli, &config))?;
    let stop = StopSignal::new();
    let _signals = SignalHandler::new(stop.clone());
    let registrar = detect_registrar(&config.paths.font_dir)?;

    let result = SyncEngine::from_config(&config, registrar, downloader, stop, logger.clone())
        .and_then(|mut engine| engine.run_once(&remote_entries));

    logger.shutdown();
    let _ = logger_join.join();

    let report = result?;
    emit_report(cli, &report)
}

fn emit_report(cli: &Cli, report: &SyncReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                for (outcome, line) in report.outcomes.iter().zip(report.lines()) {
                    let quiet_line =
                        matches!(outcome.action, EntryAction::Unchanged | EntryAction::Adopted);
                    if quiet_line && !cli.verbose {
                        continue;
                    }
                    match outcome.action {
                        EntryAction::Failed { .. }
                        | EntryAction::Skipped { .. }
                        | EntryAction::EvictionDeferred { .. } => println!("{}", line.red()),
                        EntryAction::Added { .. } | EntryAction::Updated { .. } => {
                            println!("{}", line.green());
                        }
                        _ => println!("{line}"),
                    }
                }
            }
            println!("{} {report}", "sync:".bold());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "sync",
                "summary": {
                    "added": report.added(),
                    "updated": report.updated(),
                    "evicted": report.evicted(),
                    "failed": report.failed(),
                    "unchanged": report.unchanged(),
                },
                "report": serde_json::to_value(report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn emit_plan(cli: &Cli, plan: &SyncPlan) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            for path in &plan.evict {
                println!("evict     {}", path.display());
            }
            for download in &plan.download {
                println!("download  {} ({})", download.path.display(), download.reason);
            }
            for skipped in &plan.skipped {
                if let EntryAction::Skipped { reason } = &skipped.action {
                    println!("skip      {} ({reason})", skipped.key);
                }
            }
            if cli.verbose {
                for path in &plan.unchanged {
                    println!("keep      {}", path.display());
                }
            }
            if plan.is_noop() {
                println!("Nothing to do; {} font(s) up to date.", plan.unchanged.len());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "sync",
                "dry_run": true,
                "plan": serde_json::to_value(plan)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// index
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct VerifyRow {
    path: PathBuf,
    expected: String,
    actual: Option<String>,
    status: &'static str,
}

fn run_index(cli: &Cli, args: &IndexArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let index = PersistentIndex::new(&config.paths.index_file);

    match args.command {
        IndexCommand::Show => {
            let document = index.read_document()?;
            let committed_at = document.as_ref().map(|d| d.committed_at.to_rfc3339());
            let fonts = document.map(|d| d.fonts).unwrap_or_default();
            match output_mode(cli) {
                OutputMode::Human => {
                    match &committed_at {
                        Some(ts) => println!(
                            "{} ({} font(s), committed {ts})",
                            index.path().display(),
                            fonts.len()
                        ),
                        None => println!("{} (no index yet)", index.path().display()),
                    }
                    for font in &fonts {
                        let marker = if font.local_file.is_file() {
                            String::new()
                        } else {
                            format!(" {}", "(missing)".yellow())
                        };
                        println!(
                            "  {}  {}  {}{marker}",
                            font.md5,
                            font.local_file.display(),
                            font.name
                        );
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "index show",
                        "path": index.path().to_string_lossy(),
                        "committed_at": committed_at,
                        "fonts": serde_json::to_value(&fonts)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        IndexCommand::Verify => {
            let hasher = ContentHasher::default();
            let rows: Vec<VerifyRow> = index
                .load()?
                .into_iter()
                .map(|entry| {
                    let (actual, status) = match hasher.hash(&entry.local_file) {
                        Ok(digest) if digests_match(&digest, &entry.md5) => (Some(digest), "ok"),
                        Ok(digest) => (Some(digest), "mismatch"),
                        Err(_) if !entry.local_file.exists() => (None, "missing"),
                        Err(_) => (None, "unreadable"),
                    };
                    VerifyRow {
                        path: entry.local_file,
                        expected: entry.md5,
                        actual,
                        status,
                    }
                })
                .collect();
            let bad = rows.iter().filter(|r| r.status != "ok").count();

            match output_mode(cli) {
                OutputMode::Human => {
                    for row in &rows {
                        if row.status == "ok" {
                            if cli.verbose {
                                println!("{}  {}", "ok".green(), row.path.display());
                            }
                        } else {
                            println!("{}  {}", row.status.red(), row.path.display());
                        }
                    }
                    println!("{} font(s) checked, {bad} problem(s)", rows.len());
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "index verify",
                        "checked": rows.len(),
                        "problems": bad,
                        "fonts": serde_json::to_value(&rows)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            if bad > 0 {
                return Err(CliError::Runtime(format!(
                    "{bad} managed font(s) failed verification"
                )));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Index URL: {}", config.server.index_url());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "index_url": config.server.index_url(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// install / uninstall
// ---------------------------------------------------------------------------

fn run_service(cli: &Cli, args: &ServiceArgs, install: bool) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    // The unit file must not depend on the caller's working directory.
    config.paths.config_file = resolve_absolute_path(&config.paths.config_file);
    let mgr = SystemdServiceManager::new(SystemdConfig::from_config(&config, args.user)?);
    let unit_path = mgr.config().unit_path();
    let scope = mgr.config().scope();
    let action = if install { "install" } else { "uninstall" };

    let outcome = if install {
        mgr.install()
    } else {
        mgr.uninstall()
    };
    let result = ServiceActionResult {
        action,
        service_type: "systemd",
        scope,
        unit_path: unit_path.clone(),
        success: outcome.is_ok(),
        error: outcome.as_ref().err().map(ToString::to_string),
    };

    match (output_mode(cli), &outcome) {
        (OutputMode::Json, _) => write_json_line(&serde_json::to_value(&result)?)?,
        (OutputMode::Human, Ok(())) if install => {
            let user_flag = if args.user { " --user" } else { "" };
            println!("Installed systemd service ({scope} scope).");
            println!("  Unit file: {}", unit_path.display());
            println!("  Service enabled. Start with:");
            println!("    systemctl{user_flag} start fontsync.service");
        }
        (OutputMode::Human, Ok(())) => {
            println!("Removed systemd service ({scope} scope).");
        }
        (OutputMode::Human, Err(e)) => eprintln!("Failed to {action} systemd service: {e}"),
    }
    outcome.map_err(|e| CliError::Runtime(format!("{action} failed: {e}")))
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("fontsync {version}");
            if args.verbose || cli.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "fontsync",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("FONTSYNC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some(" JSON "), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("bogus"), false), OutputMode::Json);
    }

    #[test]
    fn config_errors_are_user_errors() {
        let user: CliError = FontSyncError::InvalidConfig {
            details: "port".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        let runtime: CliError = FontSyncError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn parses_sync_with_mirror_and_dry_run() {
        let cli = Cli::try_parse_from(["fontsync", "sync", "--mirror", "/srv/m", "--dry-run"])
            .unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert!(args.dry_run);
                assert_eq!(args.mirror, Some(PathBuf::from("/srv/m")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["fontsync", "-v", "-q", "version"]).is_err());
    }
}
