use crate::model::{CommandId, RelayEvent, RelayRequest};
use crate::relay::{ProcessRelay, RelayConfig, ShellSpec};
use crate::store::{self, CommandStore};
use crate::view::{Field, ViewController, DEFAULT_BUFFER_LINES, FORM_INCOMPLETE};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output routing for the stdout/stderr writer.
enum OutputLine {
    /// Raw process output; carries its own newlines.
    Chunk(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = stdout.lock();
        let mut err = stderr.lock();

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Chunk(chunk) => {
                    let _ = out.write_all(chunk.as_bytes());
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cmd-deck",
    version,
    about = "Saved shell commands with live output, in a TUI"
)]
pub struct Cli {
    /// Path of the command database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Shell used to interpret commands (default: sh, or cmd on Windows)
    #[arg(long, global = true)]
    pub shell: Option<String>,

    /// Output chunks kept per command in the output panel
    #[arg(long, global = true, default_value_t = DEFAULT_BUFFER_LINES)]
    pub buffer_lines: usize,

    /// Wait between a process exiting and its exit notice
    #[arg(long, global = true, default_value = "0s")]
    pub exit_notice_delay: humantime::Duration,

    /// Log file (default: <data dir>/cmd-deck/cmd-deck.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print saved commands
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Save a new command
    Add {
        #[arg(long, default_value = "")]
        name: String,
        /// Working directory
        #[arg(long, default_value = "")]
        path: String,
        /// Shell command text
        #[arg(long, default_value = "")]
        cmd: String,
    },
    /// Delete a saved command
    Remove { id: CommandId },
    /// Run a saved command and stream its output until it exits
    Run { id: CommandId },
}

pub async fn run(args: Cli) -> Result<()> {
    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(crate::logging::default_log_path);
    if let Err(e) = crate::logging::init(&log_path, &args.log_level) {
        eprintln!("logging disabled: {e:#}");
    }

    match args.command.clone() {
        None => run_default(args).await,
        Some(Command::List { json }) => list(&args, json),
        Some(Command::Add { name, path, cmd }) => add(&args, name, path, cmd),
        Some(Command::Remove { id }) => remove(&args, id),
        Some(Command::Run { id }) => run_headless(&args, id).await,
    }
}

#[cfg(feature = "tui")]
async fn run_default(args: Cli) -> Result<()> {
    crate::tui::run(args).await
}

/// Fallback when built without TUI support.
#[cfg(not(feature = "tui"))]
async fn run_default(args: Cli) -> Result<()> {
    list(&args, false)
}

/// Open (creating if needed) the command database selected by `--db`.
pub fn open_store(args: &Cli) -> Result<CommandStore> {
    let path = args.db.clone().unwrap_or_else(store::default_db_path);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create data directory {}", dir.display()))?;
    }
    CommandStore::open(&path).with_context(|| format!("open database {}", path.display()))
}

/// Build a `RelayConfig` from CLI arguments.
pub fn build_relay_config(args: &Cli) -> RelayConfig {
    RelayConfig {
        shell: args
            .shell
            .as_deref()
            .map(ShellSpec::from_program)
            .unwrap_or_default(),
        exit_notice_delay: Duration::from(args.exit_notice_delay),
    }
}

/// A controller for one-shot store edits. Nothing listens on the relay side.
fn offline_controller(args: &Cli) -> Result<ViewController> {
    let (relay_tx, _) = mpsc::unbounded_channel::<RelayRequest>();
    ViewController::new(open_store(args)?, relay_tx, args.buffer_lines)
}

fn list(args: &Cli, json: bool) -> Result<()> {
    let vc = offline_controller(args)?;
    if json {
        println!("{}", serde_json::to_string_pretty(vc.records())?);
        return Ok(());
    }
    if vc.records().is_empty() {
        println!("No saved commands. Add one with `cmd-deck add --name N --path P --cmd C`.");
        return Ok(());
    }
    for r in vc.records() {
        let id = r.id.map(|i| i.to_string()).unwrap_or_default();
        println!("{:>4}  {:<20}  {:<30}  {}", id, r.display_name(), r.path, r.cmd);
    }
    Ok(())
}

fn add(args: &Cli, name: String, path: String, cmd: String) -> Result<()> {
    let mut vc = offline_controller(args)?;
    vc.form.set(Field::Name, name);
    vc.form.set(Field::Path, path);
    vc.form.set(Field::Cmd, cmd);
    match vc.submit()? {
        Some(id) => {
            println!("Added command {id}");
            Ok(())
        }
        None => {
            let details: Vec<String> = vc
                .form
                .errors()
                .into_iter()
                .map(|(f, e)| format!("{}: {}", f.label(), e))
                .collect();
            Err(anyhow::anyhow!("{FORM_INCOMPLETE} ({})", details.join(", ")))
        }
    }
}

fn remove(args: &Cli, id: CommandId) -> Result<()> {
    let mut vc = offline_controller(args)?;
    if vc.record(id).is_none() {
        return Err(anyhow::anyhow!("no command with id {id}"));
    }
    vc.delete(id)?;
    println!("Removed command {id}");
    Ok(())
}

/// Run one saved command through the relay, streaming its output to stdout.
async fn run_headless(args: &Cli, id: CommandId) -> Result<()> {
    let store = open_store(args)?;
    let (req_tx, req_rx) = mpsc::unbounded_channel::<RelayRequest>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let relay = ProcessRelay::new(build_relay_config(args));
    let relay_handle = tokio::spawn(async move { relay.run(req_rx, event_tx).await });

    let mut vc = ViewController::new(store, req_tx, args.buffer_lines)?;
    vc.reset_run_state()?;

    let Some(label) = vc.record(id).map(|r| r.display_name().to_string()) else {
        vc.shutdown();
        let _ = relay_handle.await;
        return Err(anyhow::anyhow!("no command with id {id}"));
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let _ = out_tx.send(OutputLine::Stderr(format!("== {label} ==")));
    vc.run(id)?;

    let mut stop_sent = false;
    loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else { break };
                let mut finished = false;
                if let RelayEvent::Output(m) = &ev {
                    if m.id == id {
                        if m.run_state.is_running() {
                            let _ = out_tx.send(OutputLine::Chunk(m.msg.clone()));
                        } else {
                            // Exit notice or spawn failure: either way the run is over.
                            let _ = out_tx.send(OutputLine::Stderr(m.msg.trim_end().to_string()));
                            finished = true;
                        }
                    }
                }
                vc.handle_event(ev)?;
                if finished {
                    break;
                }
            }
            res = tokio::signal::ctrl_c(), if !stop_sent => {
                if let Err(e) = res {
                    tracing::warn!("ctrl-c handler failed: {e}");
                }
                stop_sent = true;
                if vc.kill(id) {
                    let _ = out_tx.send(OutputLine::Stderr("Stopping…".into()));
                } else {
                    // No pid yet; shutdown below signals whatever did start.
                    break;
                }
            }
        }
    }

    vc.shutdown();
    drop(out_tx);
    let _ = out_handle.await;
    relay_handle.await.context("relay task failed")??;
    Ok(())
}
