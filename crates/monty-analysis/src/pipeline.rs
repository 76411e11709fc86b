//! Orchestration of parse, analysis, and diagnostic publication.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;
use url::Url;

use crate::config::ServerConfig;
use crate::counter::CounterGuard;
use crate::counter::VolatileCounter;
use crate::diagnostics::DiagnosticPublisher;
use crate::document::Entry;
use crate::document::ParseCookie;
use crate::error::Error;
use crate::error::Result;
use crate::event::AnalysisEvent;
use crate::event::EventBus;
use crate::interpreter::AnalyzerHandle;
use crate::interpreter::Interpreter;
use crate::queue::AnalysisQueue;
use crate::queue::ParseQueue;
use crate::queue::Priority;
use crate::rayon::RayonHandle;
use crate::store::DocumentStore;

/// The maximum number of in-flight parse intents per document.
///
/// Enqueues beyond the bound are dropped; a later enqueue observes the
/// newest text.
const MAX_PENDING_PARSES: usize = 3;

/// Per-document counters of in-flight parse intents.
///
/// Counters are tracked under a coarse lock on the outer map and removed
/// when they return to zero.
#[derive(Debug, Default)]
pub(crate) struct PendingParses {
    /// The per-document counters.
    counters: Mutex<HashMap<Url, Arc<VolatileCounter>>>,
}

impl PendingParses {
    /// Increments the counter for a document, unless the count has reached
    /// the given limit.
    ///
    /// The check and the increment happen under one lock so concurrent
    /// enqueues cannot exceed the limit.
    fn try_increment(self: &Arc<Self>, uri: &Url, limit: usize) -> Option<PendingParseGuard> {
        let guard = {
            let mut counters = self.counters.lock();
            if let Some(counter) = counters.get(uri)
                && counter.value() >= limit
            {
                return None;
            }

            counters.entry(uri.clone()).or_default().increment()
        };

        Some(PendingParseGuard {
            parses: self.clone(),
            uri: uri.clone(),
            guard: Some(guard),
        })
    }

    /// Completes when no parse is in flight for the document.
    pub(crate) async fn wait(&self, uri: &Url) {
        let counter = self.counters.lock().get(uri).cloned();
        if let Some(counter) = counter {
            counter.wait_for_zero().await;
        }
    }
}

/// Scoped release handle for a pending parse intent.
///
/// Dropping the guard decrements the document's counter and removes the
/// counter from the map once it returns to zero.
#[derive(Debug)]
struct PendingParseGuard {
    /// The owning counter map.
    parses: Arc<PendingParses>,
    /// The document the intent is for.
    uri: Url,
    /// The underlying counter release handle.
    guard: Option<CounterGuard>,
}

impl Drop for PendingParseGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut counters = self.parses.counters.lock();
        if let Some(counter) = counters.get(&self.uri)
            && counter.is_zero()
        {
            counters.remove(&self.uri);
        }
    }
}

/// Gets the parts recorded by a cookie, substituting the sentinel part when
/// no versioning is available.
fn cookie_parts(cookie: &ParseCookie) -> Vec<(u32, i32)> {
    if cookie.is_empty() {
        vec![(0, 0)]
    } else {
        cookie.parts().collect()
    }
}

/// Publishes the analyzer's current diagnostics for every part recorded by a
/// cookie, gated so that published versions never regress.
fn publish_diagnostics(
    store: &DocumentStore,
    publisher: &DiagnosticPublisher,
    config: &RwLock<ServerConfig>,
    services: &Interpreter,
    entry: &Entry,
    cookie: &ParseCookie,
    allow_equal: bool,
) {
    if !config.read().live_linting {
        return;
    }

    let mut diagnostics = services.analyzer.diagnostics(entry.uri());
    for (part, version) in cookie_parts(cookie) {
        let diagnostics = diagnostics.remove(&part).unwrap_or_default();
        store.reported().publish_gated(
            publisher,
            entry.uri(),
            part,
            version,
            diagnostics,
            allow_equal,
        );
    }
}

/// Coordinates parsing and analysis of documents.
///
/// The pipeline throttles parse intents per document, forwards completed
/// parses to the analysis queue, and publishes diagnostics without ever
/// regressing a published version.
#[derive(Debug)]
pub struct ParseAnalyzePipeline {
    /// The document store.
    store: Arc<DocumentStore>,
    /// The parse scheduler.
    parse_queue: Arc<ParseQueue>,
    /// The priority queue of analysis work.
    analysis_queue: AnalysisQueue,
    /// The active language services.
    services: AnalyzerHandle,
    /// The event bus for pipeline events.
    events: Arc<EventBus>,
    /// The diagnostics sink.
    publisher: DiagnosticPublisher,
    /// The per-document parse intent counters.
    pending: Arc<PendingParses>,
    /// Counts all in-flight pipeline tasks.
    activity: Arc<VolatileCounter>,
    /// The configuration of the core.
    config: Arc<RwLock<ServerConfig>>,
}

impl ParseAnalyzePipeline {
    /// Constructs a new pipeline.
    ///
    /// Must be called from the context of a Tokio runtime.
    pub(crate) fn new(
        store: Arc<DocumentStore>,
        services: AnalyzerHandle,
        events: Arc<EventBus>,
        config: Arc<RwLock<ServerConfig>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let publisher = DiagnosticPublisher::new(events.clone());

        let analysis_queue = {
            let store = store.clone();
            let services = services.clone();
            let events = events.clone();
            let publisher = publisher.clone();
            let config = config.clone();
            AnalysisQueue::new(cancel.child_token(), move |entry| {
                Self::analyze_entry(
                    store.clone(),
                    services.clone(),
                    events.clone(),
                    publisher.clone(),
                    config.clone(),
                    entry,
                )
                .boxed()
            })
        };

        Arc::new(Self {
            store,
            parse_queue: Arc::new(ParseQueue::new(cancel)),
            analysis_queue,
            services,
            events,
            publisher,
            pending: Default::default(),
            activity: Arc::new(VolatileCounter::new()),
            config,
        })
    }

    /// Enqueues a document for reparse and, optionally, analysis.
    ///
    /// The request is dropped when the document already has the maximum
    /// number of parse intents in flight.
    pub fn enqueue(self: &Arc<Self>, entry: Arc<Entry>, priority: Priority, analyze: bool) {
        let parse_guard = match self
            .pending
            .try_increment(entry.uri(), MAX_PENDING_PARSES)
        {
            Some(guard) => guard,
            None => {
                debug!(
                    "dropping parse request for `{uri}`: too many parses are in flight",
                    uri = entry.uri()
                );
                return;
            }
        };

        let activity = self.activity.increment();
        let this = self.clone();
        tokio::spawn(async move {
            let _activity = activity;
            let uri = entry.uri().clone();
            match this.process(entry, priority, analyze, parse_guard).await {
                Ok(()) => {}
                Err(Error::BadSource) => {
                    debug!("the source of `{uri}` could not be parsed");
                }
                Err(Error::Cancelled) => {
                    warn!("parsing of `{uri}` was canceled");
                }
                Err(e) => {
                    error!("parsing of `{uri}` failed: {e:#}");
                }
            }
        });
    }

    /// Parses a document, kicks off analysis, and publishes diagnostics.
    async fn process(
        &self,
        entry: Arc<Entry>,
        priority: Priority,
        analyze: bool,
        parse_guard: PendingParseGuard,
    ) -> Result<()> {
        // A cleared handle means shutdown has begun
        let services = match self.services.get() {
            Some(services) => services,
            None => return Ok(()),
        };

        let submission = self
            .parse_queue
            .submit(services.parser.clone(), entry.clone())
            .await;

        // The parse intent is complete once the submission resolves
        drop(parse_guard);

        let cookie = match submission {
            Ok(cookie) => cookie,
            Err(Error::BadSource) => {
                self.events.emit(AnalysisEvent::ParseComplete {
                    uri: entry.uri().clone(),
                    version: 0,
                });
                return Err(Error::BadSource);
            }
            Err(e) => return Err(e),
        };

        for (_, version) in cookie_parts(&cookie) {
            self.events.emit(AnalysisEvent::ParseComplete {
                uri: entry.uri().clone(),
                version,
            });
        }

        if analyze && entry.is_analyzable() {
            self.analysis_queue.enqueue(entry.clone(), priority);
        }

        // Let the enqueueing caller finish before publishing
        tokio::task::yield_now().await;

        publish_diagnostics(
            &self.store,
            &self.publisher,
            &self.config,
            &services,
            &entry,
            &cookie,
            false,
        );

        Ok(())
    }

    /// Analyzes an entry popped from the analysis queue.
    async fn analyze_entry(
        store: Arc<DocumentStore>,
        services: AnalyzerHandle,
        events: Arc<EventBus>,
        publisher: DiagnosticPublisher,
        config: Arc<RwLock<ServerConfig>>,
        entry: Arc<Entry>,
    ) -> Result<()> {
        let services = match services.get() {
            Some(services) => services,
            None => return Ok(()),
        };

        let snapshot = match entry.parse_snapshot() {
            Some(snapshot) => snapshot,
            None => return Ok(()),
        };

        {
            let services = services.clone();
            let entry = entry.clone();
            let snapshot = snapshot.clone();
            RayonHandle::spawn(move || {
                services
                    .analyzer
                    .analyze(entry.uri(), &snapshot.tree, &snapshot.cookie)
            })
            .await?;
        }

        for (_, version) in cookie_parts(&snapshot.cookie) {
            events.emit(AnalysisEvent::AnalysisComplete {
                uri: entry.uri().clone(),
                version,
            });
        }

        // Analysis republishes the version the parse already reported
        publish_diagnostics(
            &store,
            &publisher,
            &config,
            &services,
            &entry,
            &snapshot.cookie,
            true,
        );

        Ok(())
    }

    /// Completes when no parse is in flight for the given document.
    ///
    /// A negative timeout waits indefinitely; other timeouts are best
    /// effort.
    pub(crate) async fn wait_for_parse(&self, uri: &Url, timeout_ms: i64) {
        if timeout_ms < 0 {
            self.pending.wait(uri).await;
        } else {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(timeout_ms as u64),
                self.pending.wait(uri),
            )
            .await;
        }
    }

    /// Completes when every in-flight pipeline task and all queued analysis
    /// work has drained.
    pub async fn wait_for_complete(&self) {
        loop {
            self.activity.wait_for_zero().await;
            self.analysis_queue.wait_for_complete().await;
            if self.activity.is_zero() && self.analysis_queue.count() == 0 {
                return;
            }
        }
    }

    /// Subscribes to the analysis queue's unhandled error signal.
    pub fn unhandled_errors(&self) -> tokio::sync::watch::Receiver<Option<String>> {
        self.analysis_queue.unhandled_errors()
    }

    /// Discards per-document queue state for a removed entry.
    pub(crate) fn forget(&self, uri: &Url) {
        self.parse_queue.forget(uri);
    }
}
