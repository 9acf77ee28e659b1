//! Push/pull event channel with a single deferred final result.
//!
//! A producer pushes events synchronously; consumers pull them with
//! [`EventStream::next`] (or any of the `Stream` views) in arrival order.
//! Independently of iteration, [`EventStream::result`] resolves once the
//! first event matching the completion predicate has been pushed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{Notify, watch};

use crate::accumulator::PartialMessage;
use crate::errors::HarnessError;
use crate::event::AssistantMessageEvent;
use crate::types::{AssistantMessage, DoneReason, ErrorReason, ToolCall};

/// Default number of events kept for replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Extractor<T, R> = Box<dyn Fn(&T) -> R + Send + Sync>;

#[derive(Clone)]
enum ResultSlot<R> {
    Pending,
    Ready(R),
    Ended,
}

struct Buffers<T> {
    queue: VecDeque<T>,
    history: VecDeque<T>,
    /// Set once a completing event was pushed or `end()` was called.
    closed: bool,
}

struct Shared<T, R> {
    buffers: Mutex<Buffers<T>>,
    notify: Notify,
    result: watch::Sender<ResultSlot<R>>,
    is_complete: Predicate<T>,
    extract: Extractor<T, R>,
    history_limit: usize,
}

impl<T, R> Shared<T, R> {
    fn lock(&self) -> MutexGuard<'_, Buffers<T>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generic buffered event stream. Cloning yields another handle to the same
/// stream (same queue, same result).
pub struct EventStream<T, R> {
    shared: Arc<Shared<T, R>>,
}

impl<T, R> Clone for EventStream<T, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, R> EventStream<T, R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Creates a stream whose result is `extract(event)` for the first event
    /// where `is_complete(event)` holds.
    pub fn new(
        is_complete: impl Fn(&T) -> bool + Send + Sync + 'static,
        extract: impl Fn(&T) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT, is_complete, extract)
    }

    /// Same as [`EventStream::new`] with a custom replay history cap.
    pub fn with_history_limit(
        history_limit: usize,
        is_complete: impl Fn(&T) -> bool + Send + Sync + 'static,
        extract: impl Fn(&T) -> R + Send + Sync + 'static,
    ) -> Self {
        let (result, _) = watch::channel(ResultSlot::Pending);
        Self {
            shared: Arc::new(Shared {
                buffers: Mutex::new(Buffers {
                    queue: VecDeque::new(),
                    history: VecDeque::new(),
                    closed: false,
                }),
                notify: Notify::new(),
                result,
                is_complete: Box::new(is_complete),
                extract: Box::new(extract),
                history_limit,
            }),
        }
    }

    /// Appends an event. No-op once the stream has completed or ended.
    pub fn push(&self, event: T) {
        let completed = (self.shared.is_complete)(&event);
        {
            let mut buffers = self.shared.lock();
            if buffers.closed {
                return;
            }
            if self.shared.history_limit > 0 {
                if buffers.history.len() == self.shared.history_limit {
                    buffers.history.pop_front();
                }
                buffers.history.push_back(event.clone());
            }
            if completed {
                buffers.closed = true;
                let value = (self.shared.extract)(&event);
                self.shared.result.send_replace(ResultSlot::Ready(value));
            }
            buffers.queue.push_back(event);
        }
        self.shared.notify.notify_waiters();
    }

    /// Ends the stream. Waiting consumers drain what is buffered and then see
    /// the end; a pending result resolves to `None`. Idempotent.
    pub fn end(&self) {
        {
            let mut buffers = self.shared.lock();
            buffers.closed = true;
        }
        self.shared.result.send_if_modified(|slot| {
            if matches!(slot, ResultSlot::Pending) {
                *slot = ResultSlot::Ended;
                true
            } else {
                false
            }
        });
        self.shared.notify.notify_waiters();
    }

    /// Returns `true` after a completing event or `end()`.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Waits for the next event. Returns `None` once the stream is closed and
    /// every buffered event has been taken.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut buffers = self.shared.lock();
                if let Some(event) = buffers.queue.pop_front() {
                    return Some(event);
                }
                if buffers.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Waits for the final result. `None` means the stream ended without a
    /// completing event.
    pub async fn result(&self) -> Option<R> {
        let mut rx = self.shared.result.subscribe();
        loop {
            {
                let slot = rx.borrow_and_update();
                match &*slot {
                    ResultSlot::Ready(value) => return Some(value.clone()),
                    ResultSlot::Ended => return None,
                    ResultSlot::Pending => {}
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Races [`EventStream::result`] against a timer. The stream itself keeps
    /// running when the timer wins.
    pub async fn result_with_timeout(&self, timeout: Duration) -> Result<Option<R>, HarnessError> {
        tokio::time::timeout(timeout, self.result())
            .await
            .map_err(|_| HarnessError::Timeout(timeout))
    }

    /// Snapshot of the replay history, oldest first.
    pub fn history(&self) -> Vec<T> {
        self.shared.lock().history.iter().cloned().collect()
    }

    /// Consumes this handle into a `Stream` of the remaining events.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        futures::stream::unfold(self, |stream| async move {
            let event = stream.next().await?;
            Some((event, stream))
        })
    }

    /// Lazy view yielding only events accepted by `predicate`. Shares the
    /// underlying queue: events skipped here are consumed.
    pub fn filter<F>(&self, predicate: F) -> impl Stream<Item = T> + Send + 'static
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        futures::stream::unfold(
            (self.clone(), predicate),
            |(stream, predicate)| async move {
                loop {
                    let event = stream.next().await?;
                    if predicate(&event) {
                        return Some((event, (stream, predicate)));
                    }
                }
            },
        )
    }

    /// Lazy view mapping each event through `f`.
    pub fn map<U, F>(&self, f: F) -> impl Stream<Item = U> + Send + 'static
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        futures::stream::unfold((self.clone(), f), |(stream, f)| async move {
            let event = stream.next().await?;
            Some((f(event), (stream, f)))
        })
    }
}

/// Event stream of one assistant-message call. Its result is the final
/// message from either `done` or `error`.
pub type AssistantMessageEventStream = EventStream<AssistantMessageEvent, AssistantMessage>;

impl EventStream<AssistantMessageEvent, AssistantMessage> {
    /// Creates an assistant-message stream with the default history cap.
    pub fn assistant() -> Self {
        Self::new(AssistantMessageEvent::is_terminal, |event| match event {
            AssistantMessageEvent::Done { message, .. } => message.clone(),
            AssistantMessageEvent::Error { error, .. } => error.clone(),
            other => other.message(),
        })
    }

    /// Pushes `start`, the first event of every call.
    pub fn push_start(&self, partial: PartialMessage) {
        self.push(AssistantMessageEvent::Start { partial });
    }

    /// Pushes `text_start` for the block at `content_index`.
    pub fn push_text_start(&self, content_index: usize, partial: PartialMessage) {
        self.push(AssistantMessageEvent::TextStart {
            content_index,
            partial,
        });
    }

    /// Pushes one text fragment; `delta` is never empty.
    pub fn push_text_delta(&self, content_index: usize, delta: String, partial: PartialMessage) {
        self.push(AssistantMessageEvent::TextDelta {
            content_index,
            delta,
            partial,
        });
    }

    /// Pushes `text_end` with the full text of the block.
    pub fn push_text_end(
        &self,
        content_index: usize,
        content: String,
        partial: PartialMessage,
    ) {
        self.push(AssistantMessageEvent::TextEnd {
            content_index,
            content,
            partial,
        });
    }

    pub fn push_thinking_start(&self, content_index: usize, partial: PartialMessage) {
        self.push(AssistantMessageEvent::ThinkingStart {
            content_index,
            partial,
        });
    }

    pub fn push_thinking_delta(
        &self,
        content_index: usize,
        delta: String,
        partial: PartialMessage,
    ) {
        self.push(AssistantMessageEvent::ThinkingDelta {
            content_index,
            delta,
            partial,
        });
    }

    /// Pushes `thinking_end` with the full reasoning text of the block.
    pub fn push_thinking_end(
        &self,
        content_index: usize,
        content: String,
        partial: PartialMessage,
    ) {
        self.push(AssistantMessageEvent::ThinkingEnd {
            content_index,
            content,
            partial,
        });
    }

    pub fn push_tool_call_start(&self, content_index: usize, partial: PartialMessage) {
        self.push(AssistantMessageEvent::ToolCallStart {
            content_index,
            partial,
        });
    }

    /// Pushes a raw argument fragment as it arrived on the wire.
    pub fn push_tool_call_delta(
        &self,
        content_index: usize,
        delta: String,
        partial: PartialMessage,
    ) {
        self.push(AssistantMessageEvent::ToolCallDelta {
            content_index,
            delta,
            partial,
        });
    }

    /// Pushes `toolcall_end` with the call's finally parsed arguments.
    pub fn push_tool_call_end(
        &self,
        content_index: usize,
        tool_call: ToolCall,
        partial: PartialMessage,
    ) {
        self.push(AssistantMessageEvent::ToolCallEnd {
            content_index,
            tool_call,
            partial,
        });
    }

    /// Pushes the terminal `done` event; the stream's result resolves to
    /// `message`.
    pub fn push_done(&self, reason: DoneReason, message: AssistantMessage) {
        self.push(AssistantMessageEvent::Done { reason, message });
    }

    /// Pushes the terminal `error` event, carrying the partial message with
    /// its error fields set.
    pub fn push_error(&self, reason: ErrorReason, error: AssistantMessage) {
        self.push(AssistantMessageEvent::Error { reason, error });
    }
}
