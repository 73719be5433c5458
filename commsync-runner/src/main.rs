mod logging;

use std::{
    io::IsTerminal as _,
    path::{Path, PathBuf},
    process::exit,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory as _, Parser, Subcommand, ValueEnum};
use commsync::{
    error::GeneratedPosition, sourcemap::Mappings, translate::original_line, AppBuilder,
    ProcessTransport, Registry, Session, SessionOptions,
};
use commsync_core::{apply_patches, Patch};
use serde_json::Value;
use tracing::info;

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    logging::set_up(&logging::Options {
        verbose: args.options.verbose,
        color: args.options.color.enabled(),
    })?;
    match &args.command {
        Commands::Connect {
            backend,
            initial_state,
            backend_args,
        } => {
            let initial_state = match initial_state {
                Some(s) => serde_json::from_str(s)
                    .context("failed to parse value of --initial-state")?,
                None => Value::Null,
            };
            connect(backend, backend_args, initial_state)
        }
        Commands::Diff { before, after } => {
            println!("{}", diff_files(before, after)?);
            Ok(())
        }
        Commands::Apply { state, patches } => {
            println!("{}", apply_files(state, patches)?);
            Ok(())
        }
        Commands::Locate {
            sourcemap,
            source,
            line,
            column,
        } => {
            println!("{}", locate(sourcemap, source, *line, *column)?);
            Ok(())
        }
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "commsync-runner", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Applications this runner can load when the backend sends `set_app_code`.
fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("passthrough", |_| Ok(AppBuilder::new().build()));
    registry
}

/// Run a session until the backend closes its stdout, printing every state
/// the session goes through as one line of JSON.
fn connect(backend: &str, backend_args: &[String], initial_state: Value) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let transport = ProcessTransport::new(backend, backend_args.to_vec());
        let options = SessionOptions {
            initial_state,
            ..Default::default()
        };
        let session = Session::connect(transport, Arc::new(builtin_registry()), options)
            .await
            .with_context(|| format!("could not start backend {}", backend))?;
        session.subscribe(|state| println!("{}", state));
        session.closed().await;
        info!(pending_calls = session.pending_calls().len(), "backend closed the channel");
        session.dispose();
        Ok(())
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("could not parse {} as JSON", path.display()))
}

fn diff_files(before: &Path, after: &Path) -> Result<String> {
    let patches = commsync::diff(&read_json(before)?, &read_json(after)?);
    Ok(serde_json::to_string_pretty(&patches)?)
}

fn apply_files(state: &Path, patches: &Path) -> Result<String> {
    let state = read_json(state)?;
    let patches: Vec<Patch> = serde_json::from_value(read_json(patches)?)
        .context("patches must be a JSON array of patch objects")?;
    let result = apply_patches(&state, &patches)?;
    Ok(serde_json::to_string_pretty(&result)?)
}

fn locate(sourcemap: &Path, source: &Path, line: u32, column: u32) -> Result<String> {
    let text = std::fs::read_to_string(sourcemap)
        .with_context(|| format!("could not read {}", sourcemap.display()))?;
    let mappings = Mappings::parse(&text)
        .with_context(|| format!("could not decode {}", sourcemap.display()))?;
    let source_text = std::fs::read_to_string(source)
        .with_context(|| format!("could not read {}", source.display()))?;
    match original_line(GeneratedPosition { line, column }, &mappings, &source_text) {
        Some(original) => Ok(original.to_string()),
        None => bail!("no original line for generated position {}:{}", line, column),
    }
}

fn handle_result(r: Result<()>) {
    match r {
        Ok(()) => {}
        Err(e) => {
            eprintln!("commsync-runner error: {:#}", e);
            exit(1);
        }
    }
}

/// Run commsync sessions and inspect their patches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Parser, Debug, Clone)]
struct Options {
    /// Trace everything, including span enter/exit
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// When to color the log output
    #[arg(long, global = true, value_enum, default_value_t = Color::Auto)]
    color: Color,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Auto,
    Always,
    Never,
}

impl Color {
    fn enabled(self) -> bool {
        match self {
            Color::Auto => std::io::stderr().is_terminal(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a backend process and print the synchronized state as it changes
    ///
    /// The backend speaks newline-delimited JSON envelopes on its stdin and
    /// stdout. Each state the session goes through is printed on its own line.
    Connect {
        /// The backend executable
        #[arg(long, env = "COMMSYNC_BACKEND")]
        backend: String,

        /// The state before the backend's first snapshot, in JSON
        #[arg(long("initial-state"))]
        initial_state: Option<String>,

        /// Arguments for the backend executable
        #[arg(last = true)]
        backend_args: Vec<String>,
    },

    /// Print the patches that turn one JSON document into another
    Diff {
        before: PathBuf,
        after: PathBuf,
    },

    /// Apply a JSON array of patches to a JSON document and print the result
    ///
    /// Nothing is printed if any patch fails to apply.
    Apply {
        state: PathBuf,
        patches: PathBuf,
    },

    /// Print the original source line for a position in generated code
    Locate {
        /// Source map: a bare `mappings` string or a source map document
        #[arg(long)]
        sourcemap: PathBuf,

        /// The original source
        #[arg(long)]
        source: PathBuf,

        /// Generated line, 1-based
        line: u32,

        /// Generated column, 1-based
        #[arg(default_value = "1")]
        column: u32,
    },

    /// Generate markdown documentation for commsync-runner
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for commsync-runner
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for commsync-runner
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}
