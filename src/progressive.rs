//! Streaming result loading.
//!
//! A progressive load delivers a result in stages instead of waiting for
//! every participant's laps:
//!
//! ```text
//! INITIAL ──Initial(coarse)──► STREAMING ──Progress / ParticipantUpdate ...──► COMPLETE ──Complete(final)
//!    │                             │
//!    └───────────── Failed(error) ─┴──► FAILED
//! ```
//!
//! The coarse result (no laps) is placed in the result cache as soon as it is
//! built, so blocking callers that arrive mid-stream get it immediately. The
//! final result replaces it when the stream completes.
//!
//! Only one stream runs per result. A second progressive request for the same
//! result follows the running stream and receives `Initial` and `Complete`
//! without per-participant events. A request for a result already held in
//! the cache receives that value as `Initial` followed by `Complete`.
//!
//! Dropping the [`ProgressiveStream`] cancels the load at its next suspension
//! point and evicts the coarse value it seeded. Requests that were following
//! or joining that load start over, and one of them becomes the new owner.

use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::aggregator::AggregationObserver;
use crate::cache::{Claim, SharedFetch};
use crate::pipeline::Pipeline;
use crate::types::{Lap, RaceResult};
use crate::{Result, ResultsError};

/// Events emitted by a progressive load, in order.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Coarse result with empty lap lists
    Initial(Arc<RaceResult>),
    /// Emitted before each participant is looked up
    Progress { processed: usize, total: usize, participant: String },
    /// Laps for one participant, fetched or cached
    ParticipantUpdate { cust_id: i64, laps: Arc<[Lap]> },
    /// Final result with all collected laps
    Complete(Arc<RaceResult>),
    Failed(ResultsError),
}

/// Where a progressive load is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Initial,
    Streaming,
    Complete,
    Failed,
}

impl LoadPhase {
    fn advance(self, event: &LoadEvent) -> LoadPhase {
        match (self, event) {
            (LoadPhase::Complete | LoadPhase::Failed, _) => self,
            (_, LoadEvent::Failed(_)) => LoadPhase::Failed,
            (_, LoadEvent::Complete(_)) => LoadPhase::Complete,
            (LoadPhase::Initial, LoadEvent::Initial(_)) => LoadPhase::Streaming,
            (phase, _) => phase,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoadPhase::Complete | LoadPhase::Failed)
    }
}

pin_project! {
    /// Stream of [`LoadEvent`]s for one progressive request.
    ///
    /// Ends after `Complete` or `Failed`. Dropping it cancels the load.
    pub struct ProgressiveStream {
        #[pin]
        events: UnboundedReceiverStream<LoadEvent>,
        phase: LoadPhase,
        cancel: CancellationToken,
        _guard: DropGuard,
    }
}

impl ProgressiveStream {
    fn new(events: mpsc::UnboundedReceiver<LoadEvent>, cancel: CancellationToken) -> Self {
        Self {
            events: UnboundedReceiverStream::new(events),
            phase: LoadPhase::Initial,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Stop the load without dropping the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream and return the final result.
    pub async fn into_result(self) -> Result<Arc<RaceResult>> {
        use futures::StreamExt;

        let mut stream = std::pin::pin!(self);
        let mut last_seen = None;
        while let Some(event) = stream.next().await {
            match event {
                LoadEvent::Complete(result) => return Ok(result),
                LoadEvent::Failed(error) => return Err(error),
                LoadEvent::Initial(result) => last_seen = Some(result),
                _ => {}
            }
        }

        let result_id = last_seen.map_or(0, |result| result.id);
        Err(ResultsError::Cancelled { result_id })
    }
}

impl Stream for ProgressiveStream {
    type Item = LoadEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.phase.is_terminal() {
            return Poll::Ready(None);
        }

        let polled = this.events.poll_next(cx);
        if let Poll::Ready(Some(event)) = &polled {
            *this.phase = this.phase.advance(event);
        }
        polled
    }
}

/// Progress shared with requests that follow a running stream.
#[derive(Debug, Clone)]
enum StreamState {
    Pending,
    Coarse(Arc<RaceResult>),
    Complete(Arc<RaceResult>),
    Failed(ResultsError),
}

impl StreamState {
    fn is_settled(&self) -> bool {
        !matches!(self, StreamState::Pending)
    }

    fn value(&self, result_id: u64) -> Result<Arc<RaceResult>> {
        match self {
            StreamState::Coarse(result) | StreamState::Complete(result) => Ok(Arc::clone(result)),
            StreamState::Failed(error) => Err(error.clone()),
            StreamState::Pending => Err(ResultsError::Cancelled { result_id }),
        }
    }
}

enum Role {
    Owner { generation: u64, state: watch::Sender<StreamState> },
    Follower(watch::Receiver<StreamState>),
    Joiner(SharedFetch),
}

/// Forwards aggregation callbacks onto the event channel.
///
/// `Initial` is delivered at most once, even when the request changes role.
struct EventSink {
    events: mpsc::UnboundedSender<LoadEvent>,
    cancel: CancellationToken,
    sent_initial: bool,
}

impl EventSink {
    fn emit(&mut self, event: LoadEvent) {
        if matches!(event, LoadEvent::Initial(_)) {
            if self.sent_initial {
                return;
            }
            self.sent_initial = true;
        }
        if self.events.send(event).is_err() {
            trace!("Progressive stream receiver dropped");
        }
    }
}

/// How a request that waited on someone else's load ended.
enum Waited {
    Done,
    /// The load was cancelled by its owner; the request must start over
    Orphaned,
}

impl AggregationObserver for EventSink {
    fn on_progress(&mut self, processed: usize, total: usize, participant: &str) {
        self.emit(LoadEvent::Progress { processed, total, participant: participant.to_string() });
    }

    fn on_participant(&mut self, cust_id: i64, laps: &Arc<[Lap]>) {
        self.emit(LoadEvent::ParticipantUpdate { cust_id, laps: Arc::clone(laps) });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }
}

/// Runs progressive loads and tracks which results are streaming.
pub(crate) struct ProgressiveLoader {
    pipeline: Arc<Pipeline>,
    /// Running streams by result id, with the owning cache generation
    streams: Mutex<HashMap<u64, (u64, watch::Receiver<StreamState>)>>,
}

impl ProgressiveLoader {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, streams: Mutex::new(HashMap::new()) }
    }

    /// Results with a stream currently running.
    pub fn active_streams(&self) -> usize {
        self.streams.lock().len()
    }

    /// Begin a progressive load for `result_id`.
    pub fn start(self: &Arc<Self>, result_id: u64) -> ProgressiveStream {
        let (events, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sink = EventSink { events, cancel: cancel.clone(), sent_initial: false };

        let role = self.register(result_id);
        tokio::spawn(Arc::clone(self).drive(result_id, role, sink));

        ProgressiveStream::new(receiver, cancel)
    }

    /// Serve one request, taking over when the load it waits on is cancelled.
    async fn drive(self: Arc<Self>, result_id: u64, mut role: Role, mut sink: EventSink) {
        loop {
            let waited = match role {
                Role::Owner { generation, state } => {
                    debug!(result_id, generation, "Starting progressive load");
                    self.run_owner(result_id, generation, state, sink).await;
                    return;
                }
                Role::Follower(state) => {
                    debug!(result_id, "Following running progressive load");
                    follow(result_id, state, &mut sink).await
                }
                Role::Joiner(fetch) => {
                    debug!(result_id, "Joining cached result");
                    join(fetch, &mut sink).await
                }
            };

            if matches!(waited, Waited::Done) || sink.is_cancelled() {
                return;
            }
            debug!(result_id, "Awaited load was cancelled by its owner, starting over");
            role = self.register(result_id);
        }
    }

    /// Decide this request's role; registry and cache are checked under one lock.
    fn register(&self, result_id: u64) -> Role {
        let mut streams = self.streams.lock();
        if let Some((_, state)) = streams.get(&result_id) {
            // A closed sender means the owner task died without settling
            if state.has_changed().is_ok() {
                return Role::Follower(state.clone());
            }
            streams.remove(&result_id);
        }

        let (state, receiver) = watch::channel(StreamState::Pending);
        let mut waiter = receiver.clone();
        let seed = async move {
            match waiter.wait_for(StreamState::is_settled).await {
                Ok(settled) => settled.value(result_id),
                Err(_) => Err(ResultsError::Cancelled { result_id }),
            }
        };

        match self.pipeline.results.claim(result_id, seed) {
            Claim::Owner(generation) => {
                streams.insert(result_id, (generation, receiver));
                Role::Owner { generation, state }
            }
            Claim::Existing(fetch) => Role::Joiner(fetch),
        }
    }

    async fn run_owner(
        self: Arc<Self>,
        result_id: u64,
        generation: u64,
        state: watch::Sender<StreamState>,
        mut sink: EventSink,
    ) {
        let cancel = sink.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ResultsError::Cancelled { result_id }),
            outcome = self.stream(result_id, &state, &mut sink) => outcome,
        };

        // Unregister before publishing; waiters that start over must not find this stream
        self.settle_slot(result_id, generation, &outcome);

        match outcome {
            Ok(result) => {
                state.send_replace(StreamState::Complete(Arc::clone(&result)));
                info!(result_id, "Progressive load complete");
                sink.emit(LoadEvent::Complete(result));
            }
            Err(error) => {
                state.send_replace(StreamState::Failed(error.clone()));
                match error.kind() {
                    crate::ErrorKind::Cancelled => debug!(result_id, "Progressive load cancelled"),
                    _ => warn!(result_id, error = %error, "Progressive load failed"),
                }
                sink.emit(LoadEvent::Failed(error));
            }
        }
    }

    /// Store or evict the owned cache slot and drop the registry entry.
    fn settle_slot(&self, result_id: u64, generation: u64, outcome: &Result<Arc<RaceResult>>) {
        let results = &self.pipeline.results;
        match outcome {
            Ok(result) => {
                results.replace(result_id, generation, Arc::clone(result));
            }
            Err(_) => {
                results.evict_generation(result_id, generation);
            }
        }

        let mut streams = self.streams.lock();
        if streams.get(&result_id).is_some_and(|(owner, _)| *owner == generation) {
            streams.remove(&result_id);
        }
    }

    async fn stream(
        &self,
        result_id: u64,
        state: &watch::Sender<StreamState>,
        sink: &mut EventSink,
    ) -> Result<Arc<RaceResult>> {
        let pipeline = &self.pipeline;
        let loaded = pipeline.load(result_id).await?;

        let coarse = Arc::new(pipeline.build(result_id, &loaded, &Default::default())?);
        state.send_replace(StreamState::Coarse(Arc::clone(&coarse)));
        sink.emit(LoadEvent::Initial(Arc::clone(&coarse)));

        let laps = pipeline.aggregate(result_id, &loaded, sink).await?;
        Ok(Arc::new(pipeline.build(result_id, &loaded, &laps)?))
    }
}

async fn follow(result_id: u64, mut state: watch::Receiver<StreamState>, sink: &mut EventSink) -> Waited {
    loop {
        let current = state.borrow_and_update().clone();
        match current {
            StreamState::Pending => {}
            StreamState::Coarse(result) => sink.emit(LoadEvent::Initial(result)),
            StreamState::Complete(result) => {
                sink.emit(LoadEvent::Initial(Arc::clone(&result)));
                sink.emit(LoadEvent::Complete(result));
                return Waited::Done;
            }
            StreamState::Failed(error) if error.kind() == crate::ErrorKind::Cancelled => return Waited::Orphaned,
            StreamState::Failed(error) => {
                sink.emit(LoadEvent::Failed(error));
                return Waited::Done;
            }
        }

        tokio::select! {
            _ = sink.cancel.cancelled() => return Waited::Done,
            changed = state.changed() => {
                if changed.is_err() {
                    trace!(result_id, "Followed stream went away without settling");
                    return Waited::Orphaned;
                }
            }
        }
    }
}

async fn join(fetch: SharedFetch, sink: &mut EventSink) -> Waited {
    let outcome = tokio::select! {
        _ = sink.cancel.cancelled() => return Waited::Done,
        outcome = fetch => outcome,
    };

    match outcome {
        Ok(result) => {
            sink.emit(LoadEvent::Initial(Arc::clone(&result)));
            sink.emit(LoadEvent::Complete(result));
        }
        Err(error) if error.kind() == crate::ErrorKind::Cancelled => return Waited::Orphaned,
        Err(error) => sink.emit(LoadEvent::Failed(error)),
    }
    Waited::Done
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> Arc<RaceResult> {
        Arc::new(crate::test_utils::sample_race_result(1, 1))
    }

    #[test]
    fn phases_follow_the_state_machine() {
        let phase = LoadPhase::Initial;
        let phase = phase.advance(&LoadEvent::Initial(result()));
        assert_eq!(phase, LoadPhase::Streaming);

        let phase = phase.advance(&LoadEvent::Progress { processed: 0, total: 1, participant: "A".into() });
        assert_eq!(phase, LoadPhase::Streaming);

        let phase = phase.advance(&LoadEvent::Complete(result()));
        assert_eq!(phase, LoadPhase::Complete);
        assert_eq!(phase.advance(&LoadEvent::Failed(ResultsError::network("late"))), LoadPhase::Complete);
    }

    #[test]
    fn any_phase_can_fail() {
        for phase in [LoadPhase::Initial, LoadPhase::Streaming] {
            assert_eq!(phase.advance(&LoadEvent::Failed(ResultsError::CaptchaRequired)), LoadPhase::Failed);
        }
    }

    #[test]
    fn stream_state_values() {
        assert!(!StreamState::Pending.is_settled());
        assert_eq!(StreamState::Coarse(result()).value(1).map(|r| r.id).ok(), Some(1));
        assert_eq!(
            StreamState::Failed(ResultsError::InvalidCredentials).value(1).unwrap_err().kind(),
            crate::ErrorKind::InvalidCredentials
        );
    }
}
