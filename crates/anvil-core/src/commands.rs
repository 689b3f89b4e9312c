//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Primary agent lifecycle and command execution."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use anvil_api::CommandView;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

/// Terminal state of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success(Value),
    Failure(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success(_))
    }
}

/// One submitted command and, once finished, its outcome.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: Uuid,
    pub name: String,
    pub mode: String,
    pub params: Value,
    pub submitted_at: DateTime<Utc>,
    /// `None` while the command is still executing.
    pub outcome: Option<CommandOutcome>,
}

impl CommandRecord {
    pub fn running(name: &str, mode: &str, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            mode: mode.to_owned(),
            params,
            submitted_at: Utc::now(),
            outcome: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    /// Project into the wire representation served by the local API.
    pub fn view(&self) -> CommandView {
        let (success, result, error) = match &self.outcome {
            None => (None, None, None),
            Some(CommandOutcome::Success(value)) => (Some(true), Some(value.clone()), None),
            Some(CommandOutcome::Failure(message)) => (Some(false), None, Some(message.clone())),
        };
        CommandView {
            id: self.id,
            name: self.name.clone(),
            params: self.params.clone(),
            submitted_at: self.submitted_at,
            done: self.is_done(),
            success,
            result,
            error,
        }
    }
}

/// Ordered log of every command the agent has accepted.
///
/// Submission order is retrieval order; the overlord inspects the log
/// top-to-bottom to follow a deployment.
#[derive(Debug, Default)]
pub struct CommandLog {
    entries: IndexMap<Uuid, CommandRecord>,
}

impl CommandLog {
    pub fn insert(&mut self, record: CommandRecord) -> Uuid {
        let id = record.id;
        self.entries.insert(id, record);
        id
    }

    pub fn complete(&mut self, id: Uuid, outcome: CommandOutcome) -> bool {
        match self.entries.get_mut(&id) {
            Some(record) => {
                record.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether the most recently submitted command is still executing.
    pub fn busy(&self) -> bool {
        self.entries
            .last()
            .map(|(_, record)| !record.is_done())
            .unwrap_or(false)
    }

    pub fn get(&self, id: Uuid) -> Option<&CommandRecord> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandRecord> {
        self.entries.values()
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
    use serde_json::json;

    #[test]
    fn log_preserves_submission_order() {
        let mut log = CommandLog::default();
        let first = log.insert(CommandRecord::running("standby.cache_image", "standby", json!({})));
        let _ = log.complete(first, CommandOutcome::Success(json!({"ok": true})));
        let second =
            log.insert(CommandRecord::running("standby.run_image", "standby", json!({})));

        let ids: Vec<_> = log.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn busy_tracks_last_entry_only() {
        let mut log = CommandLog::default();
        assert!(!log.busy());

        let id = log.insert(CommandRecord::running("standby.cache_image", "standby", json!({})));
        assert!(log.busy());

        log.complete(id, CommandOutcome::Failure("boom".into()));
        assert!(!log.busy());
    }

    #[test]
    fn view_projects_outcomes() {
        let mut record = CommandRecord::running("decom.erase_hardware", "decom", json!({}));
        assert_eq!(record.view().success, None);

        record.outcome = Some(CommandOutcome::Failure("no disks".into()));
        let view = record.view();
        assert_eq!(view.success, Some(false));
        assert_eq!(view.error.as_deref(), Some("no disks"));
        assert!(view.done);
    }
}
