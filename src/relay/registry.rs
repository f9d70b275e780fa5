use crate::model::{CommandId, CommandMessage};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryStatus {
    Running,
    /// Kill signal sent; waiting for the OS to reap it.
    Terminating,
}

/// A live child owned by the relay.
#[derive(Debug, Clone)]
pub(crate) struct ProcessEntry {
    pub pid: u32,
    pub cmd: String,
    pub id: CommandId,
    pub name: String,
    pub path: String,
    pub disabled: bool,
    pub started_at: OffsetDateTime,
    pub status: EntryStatus,
}

impl ProcessEntry {
    pub fn new(pid: u32, request: &CommandMessage) -> Self {
        Self {
            pid,
            cmd: request.cmd.clone(),
            id: request.id,
            name: request.name.clone(),
            path: request.path.clone(),
            disabled: request.disabled,
            started_at: OffsetDateTime::now_utc(),
            status: EntryStatus::Running,
        }
    }
}

/// Live processes keyed by pid. Only the relay actor touches this.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<u32, ProcessEntry>,
}

impl Registry {
    pub fn insert(&mut self, entry: ProcessEntry) {
        self.entries.insert(entry.pid, entry);
    }

    pub fn remove(&mut self, pid: u32) -> Option<ProcessEntry> {
        self.entries.remove(&pid)
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    /// Whether any live process belongs to the command `id`.
    pub fn has_command(&self, id: CommandId) -> bool {
        self.entries.values().any(|e| e.id == id)
    }

    pub fn mark_terminating(&mut self, pid: u32) -> bool {
        match self.entries.get_mut(&pid) {
            Some(e) => {
                e.status = EntryStatus::Terminating;
                true
            }
            None => false,
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunState;

    fn request(id: CommandId) -> CommandMessage {
        CommandMessage {
            run_state: RunState::NotRunning,
            msg: String::new(),
            id,
            cmd: "sleep 1".into(),
            name: "nap".into(),
            path: "/tmp".into(),
            disabled: true,
        }
    }

    #[test]
    fn tracks_entries_by_pid_and_command() {
        let mut reg = Registry::default();
        reg.insert(ProcessEntry::new(100, &request(1)));
        reg.insert(ProcessEntry::new(101, &request(2)));

        assert_eq!(reg.len(), 2);
        assert!(reg.has_command(1));
        assert!(!reg.has_command(3));

        assert!(reg.mark_terminating(100));
        assert_eq!(reg.get(100).map(|e| e.status), Some(EntryStatus::Terminating));
        assert!(!reg.mark_terminating(555));

        let removed = reg.remove(100).expect("entry");
        assert_eq!(removed.id, 1);
        assert!(!reg.has_command(1));
        assert_eq!(reg.pids(), vec![101]);
    }
}
