// doctrack - document tracking import, report and CSV intake

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use doctrack_cli::exit_codes::{failure_exit_code, EXIT_FAILURE, EXIT_SUCCESS, EXIT_USAGE};
use doctrack_cli::paths::{resolve_path, settings_base};
use doctrack_cli::{
    run_import, run_intake, run_report, FailureKind, IntakeOptions, Paths, PipelineOutcome, ReportOptions,
};
use doctrack_config::{Settings, CONFIG_ENV};

#[derive(Parser)]
#[command(name = "doctrack")]
#[command(about = "Clinic document tracking: import, de-duplicate, report")]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/doctrack/config.toml)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Print the outcome as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a monthly workbook into the database
    #[command(after_help = "\
Examples:
  doctrack import 2025年1月.xlsx
  doctrack import 2025年1月.xlsx --database /srv/clinic/医療文書データベース.xlsx")]
    Import {
        /// Workbook with the new rows (first sheet, header in row 1)
        source: PathBuf,

        /// Database workbook (overrides the settings)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Write the staff x department report
    #[command(after_help = "\
Examples:
  doctrack report
  doctrack report --from 2025-01-01 --to 2025-01-31 --no-open")]
    Report {
        /// First deposit date to include (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Last deposit date to include (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Don't open the report afterwards
        #[arg(long)]
        no_open: bool,
    },

    /// Append the newest CSV export to the assignment list
    #[command(after_help = "\
Examples:
  doctrack intake
  doctrack intake --csv ~/Downloads/ABC_20250110093000.csv")]
    Intake {
        /// Export to take instead of the newest one in the downloads directory
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Don't open the assignment list afterwards
        #[arg(long)]
        no_open: bool,
    },

    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective settings as TOML
    Show,
    /// Write a settings file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the settings file location
    Path,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = Settings::resolve_path(cli.config.as_deref());
    let json = cli.json;

    match cli.command {
        Commands::Config { command } => cmd_config(command, &config_path),
        Commands::Import { source, database } => {
            let (_, mut paths) = load(&config_path)?;
            if let Some(database) = database {
                paths.database = resolve_path(&database.to_string_lossy(), &cwd());
            }
            finish(run_import(&source, &paths), json)
        }
        Commands::Report { from, to, no_open } => {
            let (settings, paths) = load(&config_path)?;
            let options = ReportOptions { from, to, open: !no_open };
            finish(run_report(&settings, &paths, &options), json)
        }
        Commands::Intake { csv, no_open } => {
            let (settings, paths) = load(&config_path)?;
            let options = IntakeOptions { csv, open: !no_open };
            finish(run_intake(&settings, &paths, &options), json)
        }
    }
}

fn load(config_path: &Path) -> Result<(Settings, Paths), CliError> {
    let settings = Settings::load_or_default(config_path).map_err(|e| {
        CliError::usage(e.to_string()).with_hint("fix the file, or regenerate it with `doctrack config init --force`")
    })?;
    if !config_path.exists() {
        log::info!("no settings at {}, using defaults", config_path.display());
    }
    let paths = Paths::resolve(&settings, &settings_base(config_path));
    Ok((settings, paths))
}

fn cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Print the outcome and turn a failed one into an exit code.
fn finish(outcome: PipelineOutcome, json: bool) -> Result<(), CliError> {
    if json {
        let text = serde_json::to_string_pretty(&outcome)
            .map_err(|e| CliError::failure(format!("JSON serialization error: {e}")))?;
        println!("{text}");
    } else if outcome.success {
        for warning in &outcome.warnings {
            eprintln!("warning: {warning}");
        }
        println!("{}", outcome.message);
    }

    if outcome.success {
        return Ok(());
    }

    let kind = outcome.failure.unwrap_or(FailureKind::Failed);
    let message = if json { String::new() } else { outcome.message };
    let err = CliError { code: failure_exit_code(kind), message, hint: None };
    Err(match kind {
        FailureKind::Locked => err.with_hint("close the workbook in Excel, then run the command again"),
        FailureKind::NotFound => err.with_hint("check the paths with `doctrack config show`"),
        FailureKind::Failed => err,
    })
}

fn cmd_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let (settings, _) = load(config_path)?;
            let text = settings.to_toml().map_err(|e| CliError::failure(e.to_string()))?;
            print!("{text}");
            Ok(())
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                return Err(CliError::usage(format!("{} already exists", config_path.display()))
                    .with_hint("pass --force to overwrite it"));
            }
            Settings::default()
                .save(config_path)
                .map_err(|e| CliError::failure(e.to_string()))?;
            println!("wrote {}", config_path.display());
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self { code: EXIT_FAILURE, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
