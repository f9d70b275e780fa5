use serde::{Deserialize, Serialize};

/// Store-assigned primary key of a command row.
pub type CommandId = i64;

/// Whether a command currently has a live process attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotRunning,
    Running {
        pid: u32,
    },
}

impl RunState {
    pub fn from_pid(pid: Option<u32>) -> Self {
        match pid {
            Some(pid) => RunState::Running { pid },
            None => RunState::NotRunning,
        }
    }

    pub fn pid(self) -> Option<u32> {
        match self {
            RunState::Running { pid } => Some(pid),
            RunState::NotRunning => None,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommandId>,
    #[serde(default)]
    pub name: String,
    pub cmd: String,
    pub path: String,
    #[serde(default)]
    pub run_state: RunState,
    /// Last output chunk seen for this command; not the full history.
    #[serde(default)]
    pub msg: String,
    /// True while a process is believed running (Run disabled, Kill enabled).
    #[serde(default)]
    pub disabled: bool,
}

impl CommandRecord {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            cmd: cmd.into(),
            path: path.into(),
            run_state: RunState::NotRunning,
            msg: String::new(),
            disabled: false,
        }
    }

    /// Label shown in lists: the name, or the command text when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.cmd
        } else {
            &self.name
        }
    }

    /// Build the relay payload for this record. Unsaved records have no identity.
    pub fn to_message(&self) -> Option<CommandMessage> {
        Some(CommandMessage {
            run_state: self.run_state,
            msg: self.msg.clone(),
            id: self.id?,
            cmd: self.cmd.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            disabled: self.disabled,
        })
    }
}

/// Partial update merged into an existing record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPatch {
    pub name: Option<String>,
    pub cmd: Option<String>,
    pub path: Option<String>,
    pub run_state: Option<RunState>,
    pub msg: Option<String>,
    pub disabled: Option<bool>,
}

impl CommandPatch {
    /// Patch carrying the run status fields of a relay message.
    pub fn from_message(m: &CommandMessage) -> Self {
        Self {
            run_state: Some(m.run_state),
            msg: Some(m.msg.clone()),
            disabled: Some(m.disabled),
            ..Default::default()
        }
    }

    pub fn apply(&self, record: &mut CommandRecord) {
        if let Some(v) = &self.name {
            record.name = v.clone();
        }
        if let Some(v) = &self.cmd {
            record.cmd = v.clone();
        }
        if let Some(v) = &self.path {
            record.path = v.clone();
        }
        if let Some(v) = self.run_state {
            record.run_state = v;
        }
        if let Some(v) = &self.msg {
            record.msg = v.clone();
        }
        if let Some(v) = self.disabled {
            record.disabled = v;
        }
    }
}

/// Payload exchanged between the view and the relay in both directions.
/// Identity fields are echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub run_state: RunState,
    pub msg: String,
    pub id: CommandId,
    pub cmd: String,
    pub name: String,
    pub path: String,
    pub disabled: bool,
}

/// Requests sent from the view controller to the process relay.
#[derive(Debug, Clone)]
pub enum RelayRequest {
    Start(CommandMessage),
    Stop(CommandMessage),
    /// Signal every live process tree and stop the relay.
    Shutdown,
}

/// One-way messages emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// An output chunk, a spawn failure, or the final exit notice.
    Output(CommandMessage),
    /// Echo of a stop request once the termination signal went out.
    KillRequested(CommandMessage),
    /// The process has exited; precedes the exit notice.
    Terminal { id: CommandId },
}

pub const EXIT_NOTICE_PREFIX: &str = "Process exited with code: ";

pub fn exit_notice(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("{EXIT_NOTICE_PREFIX}{c}"),
        None => format!("{EXIT_NOTICE_PREFIX}null"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_cmd() {
        let mut r = CommandRecord::new("", "echo hi", "/tmp");
        assert_eq!(r.display_name(), "echo hi");
        r.name = "greet".into();
        assert_eq!(r.display_name(), "greet");
    }

    #[test]
    fn unsaved_record_has_no_message() {
        let r = CommandRecord::new("a", "b", "/tmp");
        assert!(r.to_message().is_none());
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut r = CommandRecord::new("a", "b", "/tmp");
        r.id = Some(3);
        CommandPatch {
            run_state: Some(RunState::Running { pid: 42 }),
            disabled: Some(true),
            ..Default::default()
        }
        .apply(&mut r);
        assert_eq!(r.run_state.pid(), Some(42));
        assert!(r.disabled);
        assert_eq!(r.name, "a");
        assert_eq!(r.msg, "");
    }

    #[test]
    fn run_state_serializes_tagged() {
        let s = serde_json::to_string(&RunState::Running { pid: 7 }).unwrap();
        assert_eq!(s, r#"{"state":"running","pid":7}"#);
        let back: RunState = serde_json::from_str(r#"{"state":"not_running"}"#).unwrap();
        assert_eq!(back, RunState::NotRunning);
    }

    #[test]
    fn exit_notice_formats_signal_exit_as_null() {
        assert_eq!(exit_notice(Some(0)), "Process exited with code: 0");
        assert_eq!(exit_notice(None), "Process exited with code: null");
    }
}
