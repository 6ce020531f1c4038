//! Queue Engine
//!
//! Turns recommendation batches and cover downloads into a steady, ordered,
//! deduplicated sequence of displayable books.
//!
//! ## Flow
//!
//! 1. **Fetch** - ask the recommendation source for a batch (one refill at a time)
//! 2. **Filter** - drop titles already shown this epoch, queued, or repeated in the batch
//! 3. **Illustrate** - resolve and download covers concurrently, outside the lock
//! 4. **Enqueue** - release results to the ready queue strictly in arrival order
//!
//! All queue state sits behind one mutex that is never held across an await,
//! so `current()` and `decide()` never wait on the network.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::events::{QueueEvent, QueueSnapshot, QueueStatus, RefillRequest};
use super::item::{Book, Decision, DecisionTag, IllustratedBook};
use super::metrics::{Counter, EngineStats, PerformanceTimer, StatsSnapshot};
use super::pending::{PendingPool, Sequence, Settled};
use super::ports::{CoverResolver, DecisionSink, ImageFetcher, RecommendationSource, ShownHistory};
use super::ready::ReadyQueue;
use crate::config::QueueConfig;
use crate::error::{Error, Result};

/// Automatic retries after a batch yields nothing new
const MAX_REFILL_RETRIES: u32 = 1;

const SLOW_REFILL_MS: u64 = 3_000;
const SLOW_ILLUSTRATION_MS: u64 = 5_000;

/// External services the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecommendationSource>,
    pub covers: Arc<dyn CoverResolver>,
    pub images: Arc<dyn ImageFetcher>,
    pub history: Arc<dyn ShownHistory>,
    pub decisions: Arc<dyn DecisionSink>,
}

/// What a single refill did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefillSummary {
    pub request: RefillRequest,
    /// Calls made to the recommendation source
    pub attempts: u32,
    pub fetched: usize,
    pub filtered_shown: usize,
    pub filtered_duplicate: usize,
    /// Books handed to illustration
    pub admitted: usize,
    pub history_cleared: bool,
    /// The engine was shut down while this refill ran
    pub abandoned: bool,
}

impl RefillSummary {
    fn new(request: RefillRequest) -> Self {
        Self {
            request,
            attempts: 0,
            fetched: 0,
            filtered_shown: 0,
            filtered_duplicate: 0,
            admitted: 0,
            history_cleared: false,
            abandoned: false,
        }
    }

    fn abandoned(mut self) -> Self {
        self.abandoned = true;
        self
    }
}

/// Liked or disliked books for this session, in decision order
#[derive(Debug, Default)]
struct SessionSet {
    books: Vec<Book>,
    titles: HashSet<String>,
}

impl SessionSet {
    fn insert(&mut self, book: Book) {
        if self.titles.insert(book.title.clone()) {
            self.books.push(book);
        }
    }

    fn to_vec(&self) -> Vec<Book> {
        self.books.clone()
    }
}

struct EngineState {
    generation: u64,
    closed: bool,
    fetching: bool,
    ready: ReadyQueue,
    pending: PendingPool,
    /// Titles admitted this epoch that were not dropped
    epoch_titles: HashSet<String>,
    liked: SessionSet,
    disliked: SessionSet,
    /// Whether the last published status was `Starved`
    starved: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            generation: 0,
            closed: false,
            fetching: false,
            ready: ReadyQueue::new(),
            pending: PendingPool::new(),
            epoch_titles: HashSet::new(),
            liked: SessionSet::default(),
            disliked: SessionSet::default(),
            // Starting empty is not a transition into starvation
            starved: true,
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            generation: self.generation,
            cursor: self.ready.cursor(),
            len: self.ready.len(),
            pending: self.pending.len(),
            fetching: self.fetching,
            closed: self.closed,
        }
    }

    fn refill_active(&self) -> bool {
        self.fetching || !self.pending.is_empty()
    }

    /// Split a batch into new books and the number rejected as duplicates
    fn dedupe(&self, books: Vec<Book>) -> (Vec<Book>, usize) {
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(books.len());
        let mut duplicates = 0;

        for book in books {
            if book.title.trim().is_empty()
                || self.epoch_titles.contains(&book.title)
                || !seen.insert(book.title.clone())
            {
                duplicates += 1;
            } else {
                fresh.push(book);
            }
        }

        (fresh, duplicates)
    }

    /// Forget titles from the finished epoch, keeping ones still on their way to the consumer
    fn start_epoch(&mut self) {
        let mut titles = self.ready.upcoming_titles();
        titles.extend(self.pending.titles());
        self.epoch_titles = titles;
    }
}

struct Shared {
    state: Mutex<EngineState>,
    collaborators: Collaborators,
    config: QueueConfig,
    runtime: Handle,
    events: broadcast::Sender<QueueEvent>,
    snapshots: watch::Sender<QueueSnapshot>,
    permits: Semaphore,
    /// Readers are shown-history writes, the writer is an epoch clear
    shown_writes: Arc<RwLock<()>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: EngineStats,
}

/// Recommendation queue engine
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct QueueEngine {
    shared: Arc<Shared>,
}

impl QueueEngine {
    /// Create an engine bound to the current tokio runtime
    pub fn new(collaborators: Collaborators, config: QueueConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("QueueEngine must be created inside a tokio runtime"))?;

        let state = EngineState::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (snapshots, _) = watch::channel(state.snapshot());
        let permits = Semaphore::new(config.illustration_concurrency.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                collaborators,
                config,
                runtime,
                events,
                snapshots,
                permits,
                shown_writes: Arc::new(RwLock::new(())),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                stats: EngineStats::new(),
            }),
        })
    }

    // ========================================================================
    // Consumer operations
    // ========================================================================

    /// The book to display now, or `None` while the queue is starved or loading
    pub fn current(&self) -> Option<IllustratedBook> {
        self.shared.lock().ready.current().cloned()
    }

    /// The current book and how many undecided books remain, read together
    pub fn current_with_remaining(&self) -> Option<(IllustratedBook, usize)> {
        let state = self.shared.lock();
        let current = state.ready.current()?.clone();
        Some((current, state.ready.remaining()))
    }

    /// Record a like/skip for the current book and move to the next one.
    ///
    /// Persists the decision and shown status in the background, and starts a
    /// refill when few undecided books remain.
    pub fn decide(&self, tag: DecisionTag) -> Result<Decision> {
        let shared = &self.shared;

        let (decision, refill, events) = {
            let mut state = shared.lock();
            if state.closed {
                return Err(Error::EngineClosed);
            }

            let position = state.ready.cursor();
            let book = match state.ready.advance() {
                Some(entry) => entry.book().clone(),
                None => return Err(Error::EmptyQueue),
            };

            match tag {
                DecisionTag::Liked => state.liked.insert(book.clone()),
                DecisionTag::Skipped => state.disliked.insert(book.clone()),
            }

            let refill = if state.ready.remaining() <= shared.config.low_water_mark {
                match shared.begin_refill(&mut state) {
                    RefillRequest::Started => Some((
                        state.generation,
                        state.liked.to_vec(),
                        state.disliked.to_vec(),
                    )),
                    _ => None,
                }
            } else {
                None
            };

            let events = shared.publish(&mut state);
            let decision = Decision {
                book,
                tag,
                position,
                decided_at: chrono::Utc::now(),
            };
            (decision, refill, events)
        };

        shared.stats.incr(Counter::Decision);
        shared.emit(events);
        debug!(
            "Decided \"{}\" as {} at position {}",
            decision.book.title, decision.tag, decision.position
        );

        shared.persist_decision(decision.book.clone(), tag);

        if let Some((generation, liked, disliked)) = refill {
            debug!("Low-water mark reached, prefetching recommendations");
            shared.spawn_refill(generation, liked, disliked);
        }

        Ok(decision)
    }

    /// Start a refill in the background with the given preference sets.
    ///
    /// Returns immediately. Failures are reported on the event channel.
    pub fn request_refill(&self, liked: Vec<Book>, disliked: Vec<Book>) -> RefillRequest {
        let shared = &self.shared;
        let (request, generation, events) = {
            let mut state = shared.lock();
            let request = shared.begin_refill(&mut state);
            let events = shared.publish(&mut state);
            (request, state.generation, events)
        };
        shared.emit(events);

        if request == RefillRequest::Started {
            shared.spawn_refill(generation, liked, disliked);
        }
        request
    }

    /// Start a refill using this session's liked/disliked books
    pub fn request_session_refill(&self) -> RefillRequest {
        let (liked, disliked) = self.session_sets();
        self.request_refill(liked, disliked)
    }

    /// Run a refill to the point where its books are admitted for illustration.
    ///
    /// Covers keep arriving in the background afterwards; use [`settled`](Self::settled)
    /// to wait for them.
    pub async fn refill(&self, liked: Vec<Book>, disliked: Vec<Book>) -> Result<RefillSummary> {
        let shared = &self.shared;
        let (request, generation, events) = {
            let mut state = shared.lock();
            let request = shared.begin_refill(&mut state);
            let events = shared.publish(&mut state);
            (request, state.generation, events)
        };
        shared.emit(events);

        match request {
            RefillRequest::Started => {
                // Detached, so dropping this future leaves the refill running to completion
                let task = shared.spawn_refill(generation, liked, disliked);
                task.await
                    .map_err(|err| Error::Other(anyhow::anyhow!("Refill task failed: {}", err)))?
            }
            RefillRequest::Coalesced => Ok(RefillSummary::new(RefillRequest::Coalesced)),
            RefillRequest::Closed => Err(Error::EngineClosed),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn snapshot(&self) -> QueueSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn status(&self) -> QueueStatus {
        self.snapshot().status()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Receive `RefillFailed`, `QueueStarved` and `ItemsAvailable` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<QueueSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Wait until no refill is active
    pub async fn settled(&self) {
        let mut snapshots = self.watch_snapshot();
        let _ = snapshots.wait_for(|snapshot| !snapshot.is_busy()).await;
    }

    /// Every book in the ready queue, decided ones included, in display order
    pub fn ready_entries(&self) -> Vec<IllustratedBook> {
        let state = self.shared.lock();
        state
            .ready
            .history()
            .iter()
            .chain(state.ready.upcoming())
            .cloned()
            .collect()
    }

    /// Liked and disliked books for this session
    pub fn session_sets(&self) -> (Vec<Book>, Vec<Book>) {
        let state = self.shared.lock();
        (state.liked.to_vec(), state.disliked.to_vec())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Invalidate in-flight work and wait for background tasks to finish.
    ///
    /// Results from work started before shutdown are discarded. Further refills
    /// are rejected.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.lock();
            if !state.closed {
                state.closed = true;
                state.generation += 1;
                state.fetching = false;
                state.pending.clear();
                let events = shared.publish(&mut state);
                drop(state);
                shared.emit(events);
            }
        }

        shared.cancel.cancel();
        shared.tracker.close();
        shared.tracker.wait().await;
        info!("Queue engine stopped");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // State is consistent between statements, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_refill(&self, state: &mut EngineState) -> RefillRequest {
        if state.closed {
            return RefillRequest::Closed;
        }
        if state.refill_active() {
            self.stats.incr(Counter::RefillCoalesced);
            return RefillRequest::Coalesced;
        }
        state.fetching = true;
        self.stats.incr(Counter::RefillStarted);
        RefillRequest::Started
    }

    /// Publish the snapshot and report a transition into starvation
    fn publish(&self, state: &mut EngineState) -> Option<QueueEvent> {
        let snapshot = state.snapshot();
        self.snapshots.send_replace(snapshot);

        let starved = snapshot.status() == QueueStatus::Starved;
        let event = (starved && !state.starved).then_some(QueueEvent::QueueStarved);
        state.starved = starved;
        event
    }

    fn emit(&self, events: impl IntoIterator<Item = QueueEvent>) {
        for event in events {
            debug!("Queue event: {:?}", event);
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn spawn_refill(
        self: &Arc<Self>,
        generation: u64,
        liked: Vec<Book>,
        disliked: Vec<Book>,
    ) -> JoinHandle<Result<RefillSummary>> {
        let shared = Arc::clone(self);
        self.tracker.spawn_on(
            async move { shared.run_refill(generation, liked, disliked).await },
            &self.runtime,
        )
    }

    #[instrument(skip_all, fields(refill = %Uuid::new_v4(), generation = generation))]
    async fn run_refill(
        self: &Arc<Self>,
        generation: u64,
        liked: Vec<Book>,
        disliked: Vec<Book>,
    ) -> Result<RefillSummary> {
        let timer = PerformanceTimer::new("refill");
        let mut summary = RefillSummary::new(RefillRequest::Started);

        loop {
            summary.attempts += 1;

            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(summary.abandoned()),
                result = self.collaborators.source.fetch_recommendations(&liked, &disliked) => result,
            };

            let batch = match fetched {
                Ok(batch) => batch,
                Err(err) => {
                    let err = Error::source_unavailable_from(err);
                    self.fail_refill(generation, &err);
                    return Err(err);
                }
            };

            let batch_len = batch.len();
            summary.fetched += batch_len;
            self.stats.add(Counter::CandidatesFetched, batch_len as u64);
            debug!(
                "Fetched {} candidates (attempt {}/{})",
                batch_len,
                summary.attempts,
                MAX_REFILL_RETRIES + 1
            );

            let (unshown, shown) = self.filter_shown(batch).await;
            summary.filtered_shown += shown;
            self.stats.add(Counter::FilteredShown, shown as u64);

            // Admission happens under the lock so concurrent refills and
            // settling illustrations see a consistent set of epoch titles.
            let admitted = {
                let mut state = self.lock();
                if state.generation != generation {
                    return Ok(summary.abandoned());
                }

                let (fresh, duplicates) = state.dedupe(unshown);
                summary.filtered_duplicate += duplicates;
                self.stats.add(Counter::FilteredDuplicate, duplicates as u64);

                if fresh.is_empty() {
                    None
                } else {
                    let admitted: Vec<(Sequence, Book)> = fresh
                        .into_iter()
                        .map(|book| {
                            state.epoch_titles.insert(book.title.clone());
                            (state.pending.admit(book.clone()), book)
                        })
                        .collect();
                    state.fetching = false;
                    let events = self.publish(&mut state);
                    Some((admitted, events))
                }
            };

            if let Some((admitted, events)) = admitted {
                self.emit(events);
                summary.admitted = admitted.len();
                info!(
                    "Admitted {} of {} candidates for illustration",
                    summary.admitted, summary.fetched
                );
                for (sequence, book) in admitted {
                    self.spawn_illustration(generation, sequence, book);
                }
                timer.log_if_slow(SLOW_REFILL_MS);
                return Ok(summary);
            }

            // Nothing new in this batch
            let all_shown = shown > 0;
            let may_retry =
                summary.attempts <= MAX_REFILL_RETRIES && (all_shown || batch_len == 0);

            if !may_retry {
                info!(
                    "Refill produced no new books after {} attempt(s)",
                    summary.attempts
                );
                self.finish_empty_refill(generation);
                return Ok(summary);
            }

            if all_shown {
                debug!("{}; starting a new history epoch", Error::AllShown);
                let cleared = {
                    // Decisions made before this point land in the old epoch
                    let _clearing = self.shown_writes.write().await;
                    self.collaborators.history.clear().await
                };
                if let Err(err) = cleared {
                    warn!("Failed to clear shown history: {}", err);
                }
                let mut state = self.lock();
                if state.generation != generation {
                    return Ok(summary.abandoned());
                }
                state.start_epoch();
                summary.history_cleared = true;
                self.stats.incr(Counter::HistoryCleared);
            } else {
                debug!("Recommendation source returned an empty batch, retrying");
            }
        }
    }

    /// Remove books already in the shown history. A failing lookup keeps the book.
    async fn filter_shown(&self, batch: Vec<Book>) -> (Vec<Book>, usize) {
        let mut unshown = Vec::with_capacity(batch.len());
        let mut shown = 0;

        for book in batch {
            match self.collaborators.history.contains(&book.title).await {
                Ok(true) => shown += 1,
                Ok(false) => unshown.push(book),
                Err(err) => {
                    warn!("Shown-history lookup failed for \"{}\": {}", book.title, err);
                    unshown.push(book);
                }
            }
        }

        (unshown, shown)
    }

    fn fail_refill(&self, generation: u64, err: &Error) {
        warn!("Refill failed: {}", err);
        self.stats.incr(Counter::RefillFailed);

        let starved = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.fetching = false;
            self.publish(&mut state)
        };

        self.emit(
            std::iter::once(QueueEvent::RefillFailed {
                reason: err.to_string(),
            })
            .chain(starved),
        );
    }

    fn finish_empty_refill(&self, generation: u64) {
        let events = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.fetching = false;
            self.publish(&mut state)
        };
        self.emit(events);
    }

    fn spawn_illustration(self: &Arc<Self>, generation: u64, sequence: Sequence, book: Book) {
        let shared = Arc::clone(self);
        self.tracker.spawn_on(
            async move {
                let outcome = tokio::select! {
                    _ = shared.cancel.cancelled() => return,
                    outcome = shared.illustrate(book) => outcome,
                };
                shared.settle(generation, sequence, outcome);
            },
            &self.runtime,
        );
    }

    async fn illustrate(&self, book: Book) -> Settled {
        let Ok(_permit) = self.permits.acquire().await else {
            return Settled::Dropped(book);
        };
        let timer = PerformanceTimer::new("illustration");

        let outcome = match self.fetch_cover(&book).await {
            Ok(ready) => Settled::Illustrated(ready),
            Err(err) => {
                let counter = match err {
                    Error::CoverUnavailable { .. } => Counter::DroppedNoCover,
                    _ => Counter::DroppedImageFailed,
                };
                self.stats.incr(counter);
                debug!("Dropping \"{}\": {}", book.title, err);
                Settled::Dropped(book)
            }
        };

        timer.log_if_slow(SLOW_ILLUSTRATION_MS);
        outcome
    }

    async fn fetch_cover(&self, book: &Book) -> Result<IllustratedBook> {
        let cover_unavailable = || Error::CoverUnavailable {
            title: book.title.clone(),
        };

        let locator = match self.collaborators.covers.resolve_cover(&book.title).await {
            Ok(Some(locator)) => locator,
            Ok(None) => return Err(cover_unavailable()),
            Err(err) => {
                debug!("Cover lookup failed for \"{}\": {}", book.title, err);
                return Err(cover_unavailable());
            }
        };

        let bytes = self
            .collaborators
            .images
            .fetch_image(&locator)
            .await
            .map_err(|err| match err {
                err @ Error::ImageFetchFailed { .. } => err,
                other => Error::image_fetch(locator.clone(), other.to_string()),
            })?;

        IllustratedBook::from_bytes(book.clone(), locator, bytes)
    }

    /// Record an illustration result and release whatever is now in order
    fn settle(&self, generation: u64, sequence: Sequence, outcome: Settled) {
        let events = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!("Discarding illustration from stale generation {}", generation);
                return;
            }
            if !state.pending.settle(sequence, outcome) {
                return;
            }

            let mut appended = 0;
            for settled in state.pending.drain_settled() {
                match settled {
                    Settled::Illustrated(ready) => {
                        state.ready.push(ready);
                        appended += 1;
                    }
                    // Never shown, so a later batch may offer it again
                    Settled::Dropped(book) => {
                        state.epoch_titles.remove(&book.title);
                    }
                }
            }

            let available = (appended > 0).then_some(QueueEvent::ItemsAvailable { count: appended });
            let starved = self.publish(&mut state);
            self.stats.add(Counter::Enqueued, appended as u64);
            available.into_iter().chain(starved).collect::<Vec<_>>()
        };
        self.emit(events);
    }

    fn persist_decision(self: &Arc<Self>, book: Book, tag: DecisionTag) {
        let shared = Arc::clone(self);
        // Taken now so a history clear requested after this decision waits for it
        let held = Arc::clone(&self.shown_writes).try_read_owned().ok();
        self.tracker.spawn_on(
            async move {
                let writing = match held {
                    Some(guard) => guard,
                    None => Arc::clone(&shared.shown_writes).read_owned().await,
                };
                if let Err(err) = shared.collaborators.history.add(&book.title).await {
                    warn!("Failed to mark \"{}\" as shown: {}", book.title, err);
                }
                drop(writing);

                if let Err(err) = shared
                    .collaborators
                    .decisions
                    .persist_decision(&book, tag)
                    .await
                {
                    warn!("Failed to persist {} decision for \"{}\": {}", tag, book.title, err);
                }
            },
            &self.runtime,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ports::{
        MockCoverResolver, MockDecisionSink, MockImageFetcher, MockRecommendationSource,
        MockShownHistory,
    };

    fn engine_with(source: MockRecommendationSource, history: MockShownHistory) -> QueueEngine {
        let collaborators = Collaborators {
            source: Arc::new(source),
            covers: Arc::new(MockCoverResolver::new()),
            images: Arc::new(MockImageFetcher::new()),
            history: Arc::new(history),
            decisions: Arc::new(MockDecisionSink::new()),
        };
        QueueEngine::new(collaborators, QueueConfig::default()).unwrap()
    }

    #[test]
    fn test_engine_requires_runtime() {
        let collaborators = Collaborators {
            source: Arc::new(MockRecommendationSource::new()),
            covers: Arc::new(MockCoverResolver::new()),
            images: Arc::new(MockImageFetcher::new()),
            history: Arc::new(MockShownHistory::new()),
            decisions: Arc::new(MockDecisionSink::new()),
        };
        let result = QueueEngine::new(collaborators, QueueConfig::default());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_decide_on_empty_queue_is_typed_error() {
        let engine = engine_with(MockRecommendationSource::new(), MockShownHistory::new());
        assert!(engine.current().is_none());
        assert!(matches!(engine.decide(DecisionTag::Liked), Err(Error::EmptyQueue)));
        assert_eq!(engine.snapshot().cursor, 0);
    }

    #[tokio::test]
    async fn test_source_failure_surfaces_once_without_retry() {
        let mut source = MockRecommendationSource::new();
        source
            .expect_fetch_recommendations()
            .times(1)
            .returning(|_, _| Err(Error::UpstreamStatus {
                service: "recommendations",
                status: 503,
            }));

        let engine = engine_with(source, MockShownHistory::new());
        let mut events = engine.subscribe();

        let err = engine.refill(Vec::new(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));

        match events.recv().await.unwrap() {
            QueueEvent::RefillFailed { reason } => assert!(reason.contains("503")),
            other => panic!("expected RefillFailed, got {other:?}"),
        }
        assert_eq!(events.recv().await.unwrap(), QueueEvent::QueueStarved);
        assert_eq!(engine.status(), QueueStatus::Starved);
        assert_eq!(engine.stats().refills_failed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_history_retries_once() {
        let mut source = MockRecommendationSource::new();
        source
            .expect_fetch_recommendations()
            .times(2)
            .returning(|_, _| Ok(vec![Book::new("Dune", "")]));

        // History that refuses to forget: every retry still sees "Dune" as shown
        let mut history = MockShownHistory::new();
        history.expect_contains().returning(|_| Ok(true));
        history.expect_clear().times(1).returning(|| Ok(()));

        let engine = engine_with(source, history);
        let summary = engine.refill(Vec::new(), Vec::new()).await.unwrap();

        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.admitted, 0);
        assert_eq!(summary.filtered_shown, 2);
        assert!(summary.history_cleared);
        assert_eq!(engine.status(), QueueStatus::Starved);
    }

    #[tokio::test]
    async fn test_empty_batch_retries_without_clearing_history() {
        let mut source = MockRecommendationSource::new();
        source
            .expect_fetch_recommendations()
            .times(2)
            .returning(|_, _| Ok(Vec::new()));

        let mut history = MockShownHistory::new();
        history.expect_clear().never();

        let engine = engine_with(source, history);
        let summary = engine.refill(Vec::new(), Vec::new()).await.unwrap();

        assert_eq!(summary.attempts, 2);
        assert!(!summary.history_cleared);
        assert_eq!(summary.fetched, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let mut source = MockRecommendationSource::new();
        // One refill: the empty batch plus its single retry
        source
            .expect_fetch_recommendations()
            .times(2)
            .returning(|_, _| Ok(Vec::new()));

        let engine = engine_with(source, MockShownHistory::new());

        assert_eq!(engine.request_refill(Vec::new(), Vec::new()), RefillRequest::Started);
        assert_eq!(engine.request_refill(Vec::new(), Vec::new()), RefillRequest::Coalesced);
        assert_eq!(engine.stats().refills_coalesced, 1);

        engine.settled().await;
        assert!(!engine.snapshot().is_busy());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_work() {
        let engine = engine_with(MockRecommendationSource::new(), MockShownHistory::new());
        engine.shutdown().await;

        assert_eq!(engine.status(), QueueStatus::Closed);
        assert_eq!(engine.request_refill(Vec::new(), Vec::new()), RefillRequest::Closed);
        assert!(matches!(
            engine.refill(Vec::new(), Vec::new()).await,
            Err(Error::EngineClosed)
        ));
        assert!(matches!(engine.decide(DecisionTag::Skipped), Err(Error::EngineClosed)));
    }
}
