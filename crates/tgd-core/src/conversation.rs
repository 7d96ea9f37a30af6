//! Live conversations keyed by (identity, category).
//!
//! The table exclusively owns every running sequence. Each entry sits behind
//! its own async mutex so inputs to one sequence are serialized while
//! different conversations progress independently.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tokio::sync::Mutex;

use crate::{
    domain::ConversationId,
    event::{Category, Event},
    sequence::{InputOutcome, Sequence},
};

type Entry = Arc<Mutex<Sequence<Event>>>;

/// Result of offering an event to the table.
#[derive(Debug)]
pub enum Routed {
    /// A live sequence consumed the event.
    Handled(InputOutcome),
    /// No live sequence for the key; the event is handed back for the
    /// remaining routing stages.
    NotHandled(Event),
}

impl Routed {
    pub fn is_handled(&self) -> bool {
        matches!(self, Routed::Handled(_))
    }
}

#[derive(Default)]
pub struct ConversationTable {
    entries: RwLock<HashMap<(ConversationId, Category), Entry>>,
}

impl ConversationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sequence` as live for `(id, category)`, replacing any prior
    /// entry for that key. Already-finished sequences are not stored.
    pub fn start(&self, id: ConversationId, category: Category, sequence: Sequence<Event>) {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if sequence.is_finished() {
            map.remove(&(id, category));
            return;
        }
        map.insert((id, category), Arc::new(Mutex::new(sequence)));
    }

    /// Remove every live sequence for `id`, across all categories. Returns
    /// how many were removed.
    pub fn stop(&self, id: ConversationId) -> usize {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|(cid, _), _| *cid != id);
        before - map.len()
    }

    pub fn is_active(&self, id: ConversationId, category: Category) -> bool {
        self.get(id, category).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor of the live sequence for the key, if any.
    pub async fn cursor(&self, id: ConversationId, category: Category) -> Option<usize> {
        let entry = self.get(id, category)?;
        let seq = entry.lock().await;
        Some(seq.cursor())
    }

    /// Feed `event` to the live sequence for `(id, category)`.
    ///
    /// The entry is removed once the sequence finishes or its common guard
    /// vetoes the event. If the entry is stopped or replaced while this call
    /// waits for its turn, the call reports `NotHandled` and nothing runs.
    pub async fn route(&self, id: ConversationId, category: Category, event: Event) -> Routed {
        let Some(entry) = self.get(id, category) else {
            return Routed::NotHandled(event);
        };

        let mut seq = entry.lock().await;
        if !self.is_current(id, category, &entry) {
            return Routed::NotHandled(event);
        }

        let outcome = seq.input(event).await;
        match outcome {
            InputOutcome::Finished | InputOutcome::Vetoed | InputOutcome::Ignored => {
                self.remove_if_current(id, category, &entry);
            }
            InputOutcome::Advanced | InputOutcome::Retry => {}
        }
        Routed::Handled(outcome)
    }

    fn get(&self, id: ConversationId, category: Category) -> Option<Entry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(id, category))
            .cloned()
    }

    fn is_current(&self, id: ConversationId, category: Category, entry: &Entry) -> bool {
        self.get(id, category)
            .is_some_and(|cur| Arc::ptr_eq(&cur, entry))
    }

    fn remove_if_current(&self, id: ConversationId, category: Category, entry: &Entry) {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&(id, category))
            .is_some_and(|cur| Arc::ptr_eq(cur, entry))
        {
            map.remove(&(id, category));
        }
    }
}
