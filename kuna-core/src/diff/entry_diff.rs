use std::fmt;

use crate::diff::DiffKind;
use crate::entry::{Entry, EntryDraft};
use crate::task::TaskId;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    Create(EntryDraft),
    Update { old: Entry, new: EntryDraft },
    Delete(Entry),
}

/// One change to apply to the store, with the task it belongs to (if the
/// entry's tag could be decoded).
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDiff {
    pub task_id: Option<TaskId>,
    pub change: EntryChange,
}

impl fmt::Display for EntryDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match &self.change {
            EntryChange::Create(new) | EntryChange::Update { new, .. } => &new.fields.title,
            EntryChange::Delete(old) => &old.fields.title,
        };
        write!(f, "{}: {}", self.kind(), title)
    }
}

impl EntryDiff {
    pub fn create(task_id: TaskId, draft: EntryDraft) -> Self {
        EntryDiff {
            task_id: Some(task_id),
            change: EntryChange::Create(draft),
        }
    }

    pub fn update(task_id: TaskId, old: Entry, new: EntryDraft) -> Self {
        EntryDiff {
            task_id: Some(task_id),
            change: EntryChange::Update { old, new },
        }
    }

    pub fn delete(task_id: Option<TaskId>, old: Entry) -> Self {
        EntryDiff {
            task_id,
            change: EntryChange::Delete(old),
        }
    }

    pub fn kind(&self) -> DiffKind {
        match self.change {
            EntryChange::Create(_) => DiffKind::Create,
            EntryChange::Update { .. } => DiffKind::Update,
            EntryChange::Delete(_) => DiffKind::Delete,
        }
    }
}
