//! Per-call mutable state shared by an adapter and the event emitter.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{Model, ModelCost};
use crate::models::calculate_cost;
use crate::types::{AssistantMessage, BlockKind, ContentBlock, StopReason, UsageUpdate};

/// Live handle to the message a call is building.
///
/// Every streaming event of a call carries a clone of the same handle, so
/// reading it yields the message as it is now, not as it was when the event
/// was emitted. Use [`PartialMessage::snapshot`] to keep a copy.
#[derive(Clone)]
pub struct PartialMessage(Arc<RwLock<AssistantMessage>>);

impl PartialMessage {
    pub(crate) fn new(message: AssistantMessage) -> Self {
        Self(Arc::new(RwLock::new(message)))
    }

    /// Read access to the current message. Do not hold the guard across an
    /// `.await`; the producer blocks on it.
    pub fn read(&self) -> RwLockReadGuard<'_, AssistantMessage> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, AssistantMessage> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owned copy of the current message.
    pub fn snapshot(&self) -> AssistantMessage {
        self.read().clone()
    }

    /// Whether both handles point at the same call's message.
    pub fn same_message(&self, other: &PartialMessage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for PartialMessage {
    fn eq(&self, other: &Self) -> bool {
        self.same_message(other) || *self.read() == *other.read()
    }
}

impl fmt::Debug for PartialMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PartialMessage").field(&*self.read()).finish()
    }
}

/// Wraps the [`AssistantMessage`] under construction for one call.
///
/// The message is held in a [`PartialMessage`] shared with every event of the
/// call; writes take the lock briefly and never copy the message.
#[derive(Debug)]
pub struct StreamState {
    message: PartialMessage,
    pricing: ModelCost,
    cost_multiplier: f64,
    completed: bool,
}

impl StreamState {
    pub fn new(model: &Model) -> Self {
        Self {
            message: PartialMessage::new(AssistantMessage::empty(model)),
            pricing: model.cost.clone(),
            cost_multiplier: 1.0,
            completed: false,
        }
    }

    pub fn message(&self) -> RwLockReadGuard<'_, AssistantMessage> {
        self.message.read()
    }

    /// Handle to attach to an event.
    pub fn partial(&self) -> PartialMessage {
        self.message.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn stop_reason(&self) -> StopReason {
        self.message.read().stop_reason
    }

    fn message_mut(&mut self) -> RwLockWriteGuard<'_, AssistantMessage> {
        self.message.write()
    }

    /// Appends a block and returns its content position.
    pub fn push_block(&mut self, block: ContentBlock) -> usize {
        let mut message = self.message_mut();
        message.content.push(block);
        message.content.len() - 1
    }

    /// Kind of the block at `index`, if any.
    pub fn block_kind(&self, index: usize) -> Option<BlockKind> {
        self.message.read().content.get(index).map(ContentBlock::kind)
    }

    /// Runs `edit` on the block at `index`; `None` when there is no such block.
    pub fn update_block<T>(
        &mut self,
        index: usize,
        edit: impl FnOnce(&mut ContentBlock) -> T,
    ) -> Option<T> {
        self.message_mut().content.get_mut(index).map(edit)
    }

    /// Multiplier applied to every cost component (service tiers).
    pub fn set_cost_multiplier(&mut self, multiplier: f64) {
        self.cost_multiplier = multiplier;
        self.recompute_cost();
    }

    /// Replaces the reported token counts and recomputes cost from the
    /// model's pricing table. Ignored after completion.
    pub fn set_usage(&mut self, update: UsageUpdate) {
        if self.completed {
            return;
        }
        self.message_mut().usage.apply(&update);
        self.recompute_cost();
    }

    fn recompute_cost(&mut self) {
        let multiplier = self.cost_multiplier;
        let mut message = self.message.write();
        let usage = &mut message.usage;
        usage.cost = calculate_cost(&self.pricing, usage);
        if (multiplier - 1.0).abs() > f64::EPSILON {
            usage.cost.scale(multiplier);
        }
    }

    /// Sets the stop reason. Returns `false` (and changes nothing) once the
    /// call has completed.
    pub fn set_stop_reason(&mut self, reason: StopReason) -> bool {
        if self.completed {
            return false;
        }
        self.message_mut().stop_reason = reason;
        true
    }

    /// Marks the call finished successfully.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// Marks the call failed: forces `stop_reason = error` and records the
    /// message. One-way; later calls are ignored.
    pub fn error(&mut self, message: impl Into<String>) {
        self.fail(StopReason::Error, message.into());
    }

    /// Marks the call cancelled. Takes the place of `error` when the caller's
    /// abort signal fired.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.fail(StopReason::Aborted, message.into());
    }

    fn fail(&mut self, reason: StopReason, message: String) {
        if self.completed {
            return;
        }
        {
            let mut msg = self.message_mut();
            msg.stop_reason = reason;
            msg.error_message = Some(message);
        }
        self.completed = true;
    }

    /// Final owned message.
    pub fn to_message(&self) -> AssistantMessage {
        self.message.snapshot()
    }
}

/// Maps vendor-assigned block keys (wire `index`, item id, ...) to positions
/// in the message content. Entries are dropped when their block closes so the
/// message itself never carries wire bookkeeping.
#[derive(Debug)]
pub struct BlockTracker<K> {
    open: HashMap<K, usize>,
}

impl<K> Default for BlockTracker<K> {
    fn default() -> Self {
        Self {
            open: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> BlockTracker<K> {
    pub fn open(&mut self, key: K, position: usize) {
        self.open.insert(key, position);
    }

    /// Content position of an open block.
    pub fn resolve(&self, key: &K) -> Option<usize> {
        self.open.get(key).copied()
    }

    /// Forgets the block and returns its content position.
    pub fn close(&mut self, key: &K) -> Option<usize> {
        self.open.remove(key)
    }

    /// Positions of blocks still open, in content order.
    pub fn open_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = self.open.values().copied().collect();
        positions.sort_unstable();
        positions
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}
