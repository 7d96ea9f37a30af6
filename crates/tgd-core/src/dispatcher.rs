//! Update dispatcher.
//!
//! One call to [`Dispatcher::process_batch`] decodes a raw payload, turns
//! every update into a routing job on the worker pool, and advances the
//! delivery cursor past the batch. Each job routes its update through, in
//! order:
//!
//! 1. the sender's live conversation for the update's category;
//! 2. the exact router for the category;
//! 3. the pattern router for the category;
//! 4. the global fallback.
//!
//! The first stage that takes the update ends routing. A handler panic is
//! contained to its own job.
//!
//! Jobs of one identity route in batch order: a job waits for the previous
//! job of the same sender before it starts. Different senders run in
//! parallel.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use regex::Regex;
use tracing::{debug, error, warn};

use crate::{
    config::DispatcherConfig,
    conversation::{ConversationTable, Routed},
    cursor::DeliveryCursor,
    domain::ConversationId,
    event::{Category, Event, EventKind, Update},
    handler::Handler,
    lanes::Lanes,
    pool::{PoolConfig, Submitted, WorkerPool},
    ports::{DecodedBatch, UpdateCodec},
    router::Routes,
    sequence::Sequence,
    Result,
};

/// What one batch did to the dispatcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Updates handed to the worker pool.
    pub dispatched: usize,
    /// Updates discarded because the queue was full or closed.
    pub dropped: usize,
    /// Items the codec could not decode.
    pub rejected: usize,
    /// Cursor after the batch.
    pub offset: u64,
}

/// Cheap to clone; all clones share the same routes, conversations, cursor
/// and worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    codec: Arc<dyn UpdateCodec>,
    routes: RwLock<HashMap<Category, Routes<Handler<Event>>>>,
    fallback: RwLock<Option<Handler<Update>>>,
    conversations: ConversationTable,
    lanes: Lanes,
    // Held while a batch is submitted so queue order matches lane order.
    submitting: tokio::sync::Mutex<()>,
    cursor: DeliveryCursor,
    pool: WorkerPool,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime (spawns the workers).
    pub fn new(codec: Arc<dyn UpdateCodec>, cfg: DispatcherConfig) -> Self {
        let pool = WorkerPool::new(PoolConfig {
            workers: cfg.workers,
            capacity: cfg.queue_capacity,
            backpressure: cfg.backpressure,
        });
        Self {
            inner: Arc::new(Inner {
                codec,
                routes: RwLock::new(HashMap::new()),
                fallback: RwLock::new(None),
                conversations: ConversationTable::new(),
                lanes: Lanes::new(),
                submitting: tokio::sync::Mutex::new(()),
                cursor: DeliveryCursor::default(),
                pool,
            }),
        }
    }

    // ---- registration ----

    /// Route discriminant `key` of category `E` to `handler`. Re-registering
    /// a key replaces the old handler; returns `true` when that happened.
    pub fn register_command<E: EventKind>(&self, key: &str, handler: Handler<E>) -> bool {
        let replaced = self
            .with_routes(E::CATEGORY, |r| r.exact.register(key, handler.erase()))
            .is_some();
        if replaced {
            warn!(category = %E::CATEGORY, key, "command handler replaced");
        }
        replaced
    }

    pub fn unregister_command<E: EventKind>(&self, key: &str) -> bool {
        self.with_routes(E::CATEGORY, |r| r.exact.unregister(key))
            .is_some()
    }

    /// Append a regex route for category `E`. Patterns are tried in
    /// registration order after the exact router misses.
    pub fn register_pattern<E: EventKind>(
        &self,
        pattern: &str,
        handler: Handler<E>,
    ) -> Result<()> {
        let handler = handler.erase();
        self.with_routes(E::CATEGORY, |r| r.patterns.register_str(pattern, handler))
    }

    pub fn register_regex<E: EventKind>(&self, pattern: Regex, handler: Handler<E>) {
        let handler = handler.erase();
        self.with_routes(E::CATEGORY, |r| r.patterns.register(pattern, handler));
    }

    /// Remove every route of category `E` registered with this exact pattern
    /// source. Returns how many were removed.
    pub fn unregister_patterns<E: EventKind>(&self, pattern: &str) -> usize {
        self.with_routes(E::CATEGORY, |r| r.patterns.unregister(pattern))
    }

    /// Install the catch-all for updates nothing else took. Last one wins;
    /// returns `true` if a previous fallback was replaced.
    pub fn register_fallback(&self, handler: Handler<Update>) -> bool {
        self.inner
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler)
            .is_some()
    }

    pub fn clear_fallback(&self) {
        self.inner
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    // ---- conversations ----

    /// Make `sequence` the live dialog for `id` in category `E`, replacing
    /// any dialog already running there.
    pub fn start_conversation<E: EventKind>(
        &self,
        id: impl Into<ConversationId>,
        sequence: Sequence<E>,
    ) {
        self.start_conversation_in(id, E::CATEGORY, sequence.erase());
    }

    /// Untyped form of [`Dispatcher::start_conversation`].
    pub fn start_conversation_in(
        &self,
        id: impl Into<ConversationId>,
        category: Category,
        sequence: Sequence<Event>,
    ) {
        let id = id.into();
        debug!(conversation = id.0, %category, steps = sequence.len(), "conversation started");
        self.inner.conversations.start(id, category, sequence);
    }

    /// Cancel every live dialog of `id`. Returns how many were cancelled.
    pub fn stop_conversation(&self, id: impl Into<ConversationId>) -> usize {
        let id = id.into();
        let n = self.inner.conversations.stop(id);
        debug!(conversation = id.0, stopped = n, "conversation stopped");
        n
    }

    pub fn has_conversation(&self, id: impl Into<ConversationId>, category: Category) -> bool {
        self.inner.conversations.is_active(id.into(), category)
    }

    // ---- cursor ----

    /// Next update id to fetch.
    pub fn offset(&self) -> u64 {
        self.inner.cursor.offset()
    }

    /// Resume from a stored offset.
    pub fn set_offset(&self, offset: u64) {
        self.inner.cursor.seed(offset);
    }

    // ---- driving ----

    /// Decode `raw` and dispatch it.
    ///
    /// An envelope-level decode failure is returned as an error and leaves
    /// the cursor untouched. Individual undecodable updates are logged and
    /// skipped; the cursor still moves past them.
    pub async fn process_batch(&self, raw: &[u8]) -> Result<BatchReport> {
        let batch = self.inner.codec.decode_batch(raw)?;
        Ok(self.dispatch_batch(batch).await)
    }

    /// Push entry point for webhook bodies. Same as
    /// [`Dispatcher::process_batch`].
    pub async fn on_payload(&self, raw: &[u8]) -> Result<BatchReport> {
        self.process_batch(raw).await
    }

    /// Schedule an already-decoded batch and advance the cursor past it.
    pub async fn dispatch_batch(&self, batch: DecodedBatch) -> BatchReport {
        let highest = batch.highest_id();
        let mut report = BatchReport {
            rejected: batch.rejected.len(),
            ..BatchReport::default()
        };

        for r in &batch.rejected {
            warn!(update_id = ?r.update_id, reason = %r.reason, "skipping undecodable update");
        }

        let _submitting = self.inner.submitting.lock().await;
        self.inner.lanes.prune();
        for update in batch.updates {
            let label = format!("update {} ({})", update.id, update.event.category());
            let turn = update
                .event
                .conversation_id()
                .map(|cid| self.inner.lanes.enqueue(cid));
            let inner = self.inner.clone();
            let job = async move {
                let mut turn = turn;
                if let Some(turn) = turn.as_mut() {
                    turn.wait().await;
                }
                inner.route(update).await;
            };
            match self.inner.pool.submit(label, job).await {
                Ok(Submitted::Queued) => report.dispatched += 1,
                Ok(Submitted::Dropped) => report.dropped += 1,
                Err(e) => {
                    error!(error = %e, "failed to schedule update");
                    report.dropped += 1;
                }
            }
        }

        report.offset = match highest {
            Some(id) => self.inner.cursor.advance_past(id),
            None => self.inner.cursor.offset(),
        };
        report
    }

    /// Wait for every scheduled routing job to complete.
    pub async fn wait_idle(&self) {
        self.inner.pool.wait_idle().await;
    }

    /// Stop accepting work, drain the queue and join the workers.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }

    /// Handlers that panicked since start.
    pub fn handler_panics(&self) -> usize {
        self.inner.pool.panics()
    }

    fn with_routes<R>(
        &self,
        category: Category,
        f: impl FnOnce(&mut Routes<Handler<Event>>) -> R,
    ) -> R {
        let mut map = self
            .inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(map.entry(category).or_default())
    }
}

impl Inner {
    async fn route(&self, update: Update) {
        let Update { id, event } = update;
        let category = event.category();

        let event = match event.conversation_id() {
            Some(cid) => match self.conversations.route(cid, category, event).await {
                Routed::Handled(outcome) => {
                    debug!(
                        update_id = id,
                        %category,
                        conversation = cid.0,
                        ?outcome,
                        "routed to conversation"
                    );
                    return;
                }
                Routed::NotHandled(event) => event,
            },
            None => event,
        };

        if let Some(handler) = self.resolve(category, &event) {
            debug!(update_id = id, %category, key = ?event.discriminant(), "routed to handler");
            handler.call(event).await;
            return;
        }

        match self.fallback() {
            Some(fallback) => {
                debug!(update_id = id, %category, "routed to fallback");
                fallback.call(Update { id, event }).await;
            }
            None => debug!(update_id = id, %category, "no route for update"),
        }
    }

    fn resolve(&self, category: Category, event: &Event) -> Option<Handler<Event>> {
        let key = event.discriminant()?;
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)?
            .resolve(key)
    }

    fn fallback(&self) -> Option<Handler<Update>> {
        self.fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
