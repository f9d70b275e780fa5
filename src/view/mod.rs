//! View controller: the add form, per-command display buffers, and the
//! dispatch of user actions to the store and the process relay.
//!
//! Presentation layers (the TUI, the headless `run` subcommand) own one
//! controller and feed it relay events; they never talk to the store or the
//! relay directly.

mod buffer;
mod form;

pub use buffer::{DisplayBuffer, DEFAULT_BUFFER_LINES};
pub use form::{CommandForm, Field, EMPTY_FIELD_ERROR, FORM_INCOMPLETE};

use crate::model::{CommandId, CommandPatch, CommandRecord, RelayEvent, RelayRequest, RunState};
use crate::store::CommandStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

pub const TERMINATE_WARNING: &str = "Process will be terminated";
/// Banners hide themselves after this long.
pub const BANNER_TTL: Duration = Duration::from_secs(6);
const RUN_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
struct Banner {
    text: String,
    shown_at: Instant,
}

pub struct ViewController {
    store: CommandStore,
    relay_tx: UnboundedSender<RelayRequest>,
    records: Vec<CommandRecord>,
    buffers: HashMap<CommandId, DisplayBuffer>,
    buffer_cap: usize,
    pub form: CommandForm,
    banner: Option<Banner>,
}

impl ViewController {
    pub fn new(
        store: CommandStore,
        relay_tx: UnboundedSender<RelayRequest>,
        buffer_cap: usize,
    ) -> Result<Self> {
        let mut vc = Self {
            store,
            relay_tx,
            records: Vec::new(),
            buffers: HashMap::new(),
            buffer_cap,
            form: CommandForm::default(),
            banner: None,
        };
        vc.refresh()?;
        Ok(vc)
    }

    /// Clear persisted pids left over from a previous session.
    pub fn reset_run_state(&mut self) -> Result<usize> {
        let n = self
            .store
            .reset_run_state()
            .context("reset persisted run state")?;
        if n > 0 {
            tracing::info!(count = n, "cleared stale run state");
        }
        self.refresh()?;
        Ok(n)
    }

    /// Reload the record list from the store.
    pub fn refresh(&mut self) -> Result<()> {
        self.records = self.store.list().context("load commands")?;
        Ok(())
    }

    pub fn records(&self) -> &[CommandRecord] {
        &self.records
    }

    pub fn record(&self, id: CommandId) -> Option<&CommandRecord> {
        self.records.iter().find(|r| r.id == Some(id))
    }

    pub fn buffer(&self, id: CommandId) -> Option<&DisplayBuffer> {
        self.buffers.get(&id)
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_ref().map(|b| b.text.as_str())
    }

    pub fn show_banner(&mut self, text: impl Into<String>) {
        self.banner = Some(Banner {
            text: text.into(),
            shown_at: Instant::now(),
        });
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    /// Hide the banner once it has been visible for `BANNER_TTL`.
    pub fn expire_banner(&mut self, now: Instant) {
        if let Some(b) = &self.banner {
            if now.saturating_duration_since(b.shown_at) >= BANNER_TTL {
                self.banner = None;
            }
        }
    }

    /// Validate the form and persist a new record. `Ok(None)` when validation failed.
    pub fn submit(&mut self) -> Result<Option<CommandId>> {
        if !self.form.validate_all() {
            self.show_banner(FORM_INCOMPLETE);
            return Ok(None);
        }
        let record = self.form.to_record();
        let id = self.store.put(&record).context("save command")?;
        tracing::info!(id, cmd = %record.cmd, path = %record.path, "command added");
        self.form.clear();
        self.refresh()?;
        Ok(Some(id))
    }

    /// Ask the relay to start `id`. Returns false when the record is unknown or
    /// already running.
    pub fn run(&mut self, id: CommandId) -> Result<bool> {
        let Some(record) = self.record(id) else {
            return Ok(false);
        };
        if record.disabled || record.run_state.is_running() {
            return Ok(false);
        }

        let patch = CommandPatch {
            msg: Some(String::new()),
            disabled: Some(true),
            ..Default::default()
        };
        self.mirror(id, &patch)?;

        if let Some(buf) = self.buffers.get_mut(&id) {
            if !buf.is_empty() {
                buf.push(RUN_SEPARATOR);
            }
        }

        if let Some(msg) = self.record(id).and_then(CommandRecord::to_message) {
            let _ = self.relay_tx.send(RelayRequest::Start(msg));
        }
        Ok(true)
    }

    /// Ask the relay to terminate `id`'s process tree. Ignored without a pid.
    pub fn kill(&mut self, id: CommandId) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };
        if !record.run_state.is_running() {
            tracing::debug!(id, "kill ignored: not running");
            return false;
        }
        if let Some(msg) = record.to_message() {
            let _ = self.relay_tx.send(RelayRequest::Stop(msg));
        }
        true
    }

    /// Delete `id`, terminating its process first when one is live. The delete
    /// does not wait for the termination.
    pub fn delete(&mut self, id: CommandId) -> Result<()> {
        if self.record(id).is_some_and(|r| r.run_state.is_running()) {
            self.show_banner(TERMINATE_WARNING);
            self.kill(id);
        }
        self.store.delete(id).context("delete command")?;
        self.buffers.remove(&id);
        tracing::info!(id, "command deleted");
        self.refresh()
    }

    /// Apply one relay event to the buffers and the store.
    pub fn handle_event(&mut self, ev: RelayEvent) -> Result<()> {
        match ev {
            RelayEvent::Output(m) => {
                if self.record(m.id).is_some() {
                    let cap = self.buffer_cap;
                    self.buffers
                        .entry(m.id)
                        .or_insert_with(|| DisplayBuffer::new(cap))
                        .push(m.msg.as_str());
                }
                self.mirror(m.id, &CommandPatch::from_message(&m))
            }
            RelayEvent::KillRequested(m) => {
                // The process may have exited before the stop was handled; an
                // echo for a pid the record no longer holds must not revive it.
                let current = self.record(m.id).map(|r| r.run_state);
                if current != Some(m.run_state) {
                    tracing::debug!(id = m.id, "stale kill echo ignored");
                    return Ok(());
                }
                self.mirror(m.id, &CommandPatch::from_message(&m))
            }
            RelayEvent::Terminal { id } => {
                let patch = CommandPatch {
                    run_state: Some(RunState::NotRunning),
                    disabled: Some(false),
                    ..Default::default()
                };
                self.mirror(id, &patch)
            }
        }
    }

    /// Signal the relay to terminate everything and stop.
    pub fn shutdown(&self) {
        let _ = self.relay_tx.send(RelayRequest::Shutdown);
    }

    /// Persist `patch` and apply it to the in-memory list. Unknown keys are ignored.
    fn mirror(&mut self, id: CommandId, patch: &CommandPatch) -> Result<()> {
        let found = self.store.update(id, patch).context("update command")?;
        if !found {
            tracing::debug!(id, "update for unknown command ignored");
            return Ok(());
        }
        if let Some(r) = self.records.iter_mut().find(|r| r.id == Some(id)) {
            patch.apply(r);
        }
        Ok(())
    }
}
