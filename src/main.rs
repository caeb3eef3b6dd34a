use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use edit_session::commands::{
    ApplyTextEditsRequest, CommitRequest, DiffRequest, OpenRequest, SetContentRequest,
    StatusRequest, TransactionRequest,
};
use edit_session::{
    settings, CancellationToken, CommandError, EditOperation, SessionCommands, TextEdit,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "EDIT_SESSION_LOG";

#[derive(Parser)]
#[command(name = "edit-session")]
#[command(about = "Versioned editing sessions and atomic multi-file edits", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $EDIT_SESSION_CONFIG, then ./.edit-session.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for session records, overriding settings
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a file in a new session
    Open {
        file: PathBuf,

        /// Session id to use instead of a generated one
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Replace a session's whole content
    SetContent {
        session_id: String,

        /// File holding the new content, or `-` for stdin
        content: String,

        #[arg(short = 'g', long)]
        expected_generation: Option<u64>,
    },

    /// Apply a JSON array of text edits to a session
    ApplyEdits {
        session_id: String,

        /// JSON file with the edits, or `-` for stdin
        edits: String,

        #[arg(short = 'g', long)]
        expected_generation: Option<u64>,
    },

    /// Show lines changed since the session was opened
    Diff {
        session_id: String,

        #[arg(long)]
        max_changes: Option<usize>,

        /// Print a unified diff instead of JSON
        #[arg(short, long)]
        unified: bool,
    },

    /// Compare the session with the file on disk
    Status {
        session_id: String,

        /// Include a diagnostic report for the current content
        #[arg(short, long)]
        diagnostics: bool,
    },

    /// Write the session's content to its file
    Commit {
        session_id: String,

        /// Close the session after writing
        #[arg(long)]
        close: bool,

        /// Overwrite the file even if it changed behind the session
        #[arg(long = "override")]
        override_conflict: bool,
    },

    /// Discard a session
    Close { session_id: String },

    /// List persisted sessions
    List,

    /// Apply a JSON array of operations across files, all or nothing
    Transaction {
        /// JSON file with the operations, or `-` for stdin
        operations: String,

        /// Validate and report without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[arg(long)]
        max_diagnostics: Option<usize>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Open { .. } => "open",
            Commands::SetContent { .. } => "set_content",
            Commands::ApplyEdits { .. } => "apply_text_edits",
            Commands::Diff { .. } => "diff",
            Commands::Status { .. } => "status",
            Commands::Commit { .. } => "commit",
            Commands::Close { .. } => "close",
            Commands::List => "list",
            Commands::Transaction { .. } => "transaction",
        }
    }
}

enum Output {
    Json(Value),
    Text(String),
}

fn json<T: Serialize>(value: T) -> Result<Output> {
    Ok(Output::Json(serde_json::to_value(value)?))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let command = cli.command.name();
    match run(cli) {
        Ok(Output::Json(data)) => {
            println!("{}", json!({ "ok": true, "command": command, "data": data }));
            ExitCode::SUCCESS
        }
        Ok(Output::Text(text)) => {
            print_unified_diff(&text);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            let error = json!({ "code": error_code(&err), "message": format!("{err:#}") });
            println!("{}", json!({ "ok": false, "command": command, "error": error }));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn run(cli: Cli) -> Result<Output> {
    let mut settings = settings::load(cli.config.as_deref()).map_err(CommandError::from)?;
    if let Some(dir) = cli.state_dir {
        settings.state_dir = Some(dir);
    }
    let commands = SessionCommands::with_syntax_analyzer(settings)?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Open { file, session_id } => json(commands.open(OpenRequest {
            file_path: file,
            session_id,
        })?),

        Commands::SetContent {
            session_id,
            content,
            expected_generation,
        } => {
            let new_content = read_input(&content)?;
            json(commands.set_content(
                SetContentRequest {
                    session_id,
                    new_content,
                    expected_generation,
                },
                &cancel,
            )?)
        }

        Commands::ApplyEdits {
            session_id,
            edits,
            expected_generation,
        } => {
            let edits: Vec<TextEdit> = serde_json::from_str(&read_input(&edits)?)
                .context("edits must be a JSON array of text edits")?;
            json(commands.apply_text_edits(
                ApplyTextEditsRequest {
                    session_id,
                    edits,
                    expected_generation,
                },
                &cancel,
            )?)
        }

        Commands::Diff {
            session_id,
            unified: true,
            ..
        } => Ok(Output::Text(commands.unified_diff(&session_id)?)),

        Commands::Diff {
            session_id,
            max_changes,
            ..
        } => json(commands.diff(DiffRequest {
            session_id,
            max_changes,
        })?),

        Commands::Status {
            session_id,
            diagnostics,
        } => json(commands.status(
            StatusRequest {
                session_id,
                include_diagnostics: diagnostics,
            },
            &cancel,
        )?),

        Commands::Commit {
            session_id,
            close,
            override_conflict,
        } => json(commands.commit(CommitRequest {
            session_id,
            keep_session: !close,
            override_conflict,
        })?),

        Commands::Close { session_id } => json(commands.close(&session_id)?),

        Commands::List => json(commands.list()?),

        Commands::Transaction {
            operations,
            dry_run,
            max_diagnostics,
        } => {
            let operations: Vec<EditOperation> = serde_json::from_str(&read_input(&operations)?)
                .context("operations must be a JSON array of edit operations")?;
            json(commands.transaction(
                TransactionRequest {
                    operations,
                    apply: !dry_run,
                    max_diagnostics,
                },
                &cancel,
            )?)
        }
    }
}

/// Contents of `source`, or stdin when it is `-`.
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(command) = err.downcast_ref::<CommandError>() {
        return command.code();
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return "invalid_input";
    }
    match err.downcast_ref::<io::Error>() {
        Some(io) if io.kind() == io::ErrorKind::NotFound => "file_not_found",
        Some(_) => "io_error",
        None => "internal_error",
    }
}

fn print_unified_diff(text: &str) {
    if !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    for line in text.lines() {
        let styled = if line.starts_with("---") || line.starts_with("+++") {
            line.dimmed()
        } else if line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.normal()
        };
        println!("{styled}");
    }
}
