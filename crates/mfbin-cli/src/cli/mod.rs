mod commands;
mod helpers;

use clap::Parser;
use mfbin_core::domain::{DecodeError, ErrorCategory};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_DIRECTIVES: &str = "mfbin=info,mfbin_core=info";
const QUIET_LOG_DIRECTIVES: &str = "warn";

pub fn run_from_env() -> i32 {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    match run(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", error.diagnostic_line());
            if let Some(summary_line) = error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            error.exit_code()
        }
    }
}

fn run(args: Vec<String>) -> Result<i32, CliError> {
    let full_args = std::iter::once("mfbin".to_string())
        .chain(args)
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_logging(cli.quiet);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

fn init_logging(quiet: bool) {
    let directives = if quiet {
        QUIET_LOG_DIRECTIVES
    } else {
        DEFAULT_LOG_DIRECTIVES
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "mfbin",
    version,
    about = "Decode MODFLOW binary head, concentration and budget output"
)]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Decode head layers keyed by stress period
    Heads(commands::SnapshotArgs),
    /// Decode concentration layers keyed by elapsed time
    Conc(commands::SnapshotArgs),
    /// Decode cell-by-cell budget terms
    Budget(commands::BudgetArgs),
    /// Compile flow vectors from the right-face and front-face budget terms
    Vectors(commands::VectorArgs),
    /// List the budget terms saved in the first stress period
    Terms(commands::TermsArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Heads(args) => {
            commands::run_snapshot_command(mfbin_core::snapshot::SnapshotKind::Head, args)
        }
        CliCommand::Conc(args) => {
            commands::run_snapshot_command(mfbin_core::snapshot::SnapshotKind::Concentration, args)
        }
        CliCommand::Budget(args) => commands::run_budget_command(args),
        CliCommand::Vectors(args) => commands::run_vectors_command(args),
        CliCommand::Terms(args) => commands::run_terms_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Decode(DecodeError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Usage(_) => ErrorCategory::InputValidationError,
            Self::Decode(error) => error.category(),
            Self::Internal(_) => ErrorCategory::IoSystemError,
        }
    }

    fn placeholder(&self) -> &'static str {
        match self {
            Self::Usage(_) => "INPUT.CLI_USAGE",
            Self::Decode(error) => error.placeholder(),
            Self::Internal(_) => "IO.CLI",
        }
    }

    fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    fn diagnostic_line(&self) -> String {
        match self {
            Self::Decode(error) => error.diagnostic_line(),
            Self::Internal(error) => format!("ERROR: [{}] {error:#}", self.placeholder()),
            Self::Usage(message) => format!("ERROR: [{}] {}", self.placeholder(), message.trim_end()),
        }
    }

    fn fatal_exit_line(&self) -> Option<String> {
        self.category()
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}
