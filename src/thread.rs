/// Conversation threads anchored to code.
///
/// A `Thread` is an ordered, append-only sequence of `Turn`s pinned to one
/// `Anchor`. The `ThreadRegistry` is the arena that owns every thread and
/// hands out process-unique ids; turns refer back to their thread by id, not
/// by pointer. All lifecycle transitions address turns by id equality so the
/// UI layer is free to work with copies.
use chrono::{DateTime, Utc};

use crate::document::Anchor;

// ── Ids ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

// ── Roles & modes ─────────────────────────────────────────────────────────────

/// Author role, fixed at construction. Display names are presentation only —
/// replay decisions are made on this tag and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Human,
    Assistant,
    /// Plain annotation; never replayed into prompts.
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Previewing,
    Editing,
}

// ── Turn ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    /// Currently displayed body. Mutable while the turn is in `Editing` mode.
    pub content: String,
    /// Last committed body, restored on cancel.
    pub saved_content: String,
    pub mode: TurnMode,
    /// Key into the registry, never a back-pointer.
    pub thread: ThreadId,
    pub created_at: DateTime<Utc>,
}

// ── Thread ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: ThreadId,
    /// Fixed for the life of the thread.
    pub anchor: Anchor,
    /// Insertion order == conversation order == prompt replay order.
    /// Deletion removes elements; nothing ever reorders or renumbers.
    pub turns: Vec<Turn>,
}

impl Thread {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ── Delete outcome ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Turn removed, thread still has others.
    Removed,
    /// Turn removed and it was the last one — the thread is gone too.
    ThreadDisposed,
    NotFound,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Arena for all live threads. Owns the id counters: thread and turn ids are
/// monotonically increasing, unique within the process, and never reused.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: Vec<Thread>,
    next_thread: u64,
    next_turn: u64,
}

impl ThreadRegistry {
    pub fn create_thread(&mut self, anchor: Anchor) -> ThreadId {
        self.next_thread += 1;
        let id = ThreadId(self.next_thread);
        self.threads.push(Thread { id, anchor, turns: Vec::new() });
        id
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }

    /// Threads anchored in `path`, in creation order.
    pub fn for_path<'a>(&'a self, path: &'a std::path::Path) -> impl Iterator<Item = &'a Thread> {
        self.threads.iter().filter(move |t| t.anchor.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    // ── Turn creation ─────────────────────────────────────────────────────────

    /// Append a turn to `thread`. The new turn starts in `Previewing` mode with
    /// `saved_content` equal to `content`. Returns `None` when the thread does
    /// not exist (e.g. disposed while a flow was in flight).
    pub fn append_turn(&mut self, thread: ThreadId, role: Role, content: impl Into<String>) -> Option<TurnId> {
        self.next_turn += 1;
        let id = TurnId(self.next_turn);
        let content = content.into();
        let turn = Turn {
            id,
            role,
            saved_content: content.clone(),
            content,
            mode: TurnMode::Previewing,
            thread,
            created_at: Utc::now(),
        };
        self.get_mut(thread)?.turns.push(turn);
        Some(id)
    }

    // ── Turn lifecycle transitions ────────────────────────────────────────────

    /// `Previewing -> Editing`. Content untouched.
    pub fn edit_turn(&mut self, id: TurnId) -> bool {
        match self.find_turn_mut(id) {
            Some(turn) => {
                turn.mode = TurnMode::Editing;
                true
            }
            None => false,
        }
    }

    /// `Editing -> Previewing`, committing `content` into `saved_content`.
    /// Saving an already-previewing turn is a harmless no-op commit.
    pub fn save_turn(&mut self, id: TurnId) -> bool {
        match self.find_turn_mut(id) {
            Some(turn) => {
                turn.saved_content = turn.content.clone();
                turn.mode = TurnMode::Previewing;
                true
            }
            None => false,
        }
    }

    /// `Editing -> Previewing`, discarding in-progress edits by restoring
    /// `content` from `saved_content`.
    pub fn cancel_turn(&mut self, id: TurnId) -> bool {
        match self.find_turn_mut(id) {
            Some(turn) => {
                turn.content = turn.saved_content.clone();
                turn.mode = TurnMode::Previewing;
                true
            }
            None => false,
        }
    }

    /// Overwrite the in-progress body of a turn that is being edited. The UI
    /// calls this as the user types; `save_turn`/`cancel_turn` decide whether
    /// the text sticks.
    pub fn set_turn_content(&mut self, id: TurnId, content: impl Into<String>) -> bool {
        match self.find_turn_mut(id) {
            Some(turn) => {
                turn.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Remove the turn with `id` from its thread. Rebuilds the turn sequence
    /// by id filtering — existing turns keep their order. Disposes the thread
    /// when its last turn goes.
    pub fn delete_turn(&mut self, id: TurnId) -> DeleteOutcome {
        let Some(thread_id) = self.find_turn(id).map(|t| t.thread) else {
            return DeleteOutcome::NotFound;
        };
        let thread = self.get_mut(thread_id).expect("turn's thread must exist");
        thread.turns.retain(|t| t.id != id);
        if thread.turns.is_empty() {
            self.dispose(thread_id);
            DeleteOutcome::ThreadDisposed
        } else {
            DeleteOutcome::Removed
        }
    }

    /// Drop a thread and everything in it. Also the explicit "delete thread"
    /// user command.
    pub fn dispose(&mut self, id: ThreadId) -> bool {
        let before = self.threads.len();
        self.threads.retain(|t| t.id != id);
        self.threads.len() != before
    }

    // ── Lookup helpers ────────────────────────────────────────────────────────

    pub fn find_turn(&self, id: TurnId) -> Option<&Turn> {
        self.threads.iter().flat_map(|t| t.turns.iter()).find(|t| t.id == id)
    }

    fn find_turn_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        self.threads
            .iter_mut()
            .flat_map(|t| t.turns.iter_mut())
            .find(|t| t.id == id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
