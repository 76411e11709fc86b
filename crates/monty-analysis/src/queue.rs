//! The parse and analysis work queues.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;
use url::Url;

use crate::contracts::SyntaxParser;
use crate::counter::CounterGuard;
use crate::counter::VolatileCounter;
use crate::document::Entry;
use crate::document::ParseCookie;
use crate::document::ParseSnapshot;
use crate::error::Error;
use crate::error::Result;
use crate::rayon::RayonHandle;

/// The priority of queued analysis work.
///
/// Higher priorities drain first; within one priority, work is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Work servicing an interactive request.
    High,
    /// Work triggered by a document change.
    Normal,
    /// Background work, such as dependency reanalysis.
    Low,
}

impl Priority {
    /// Gets the queue index for the priority.
    fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Schedules document parses, preserving per-document order.
///
/// A later submission for a URI observes the effects of every earlier
/// submission for that URI; submissions for distinct URIs run concurrently.
/// The parse body runs on the rayon thread pool.
#[derive(Debug)]
pub struct ParseQueue {
    /// Per-document submission locks; lock fairness preserves submit order.
    locks: Mutex<HashMap<Url, Arc<tokio::sync::Mutex<()>>>>,
    /// Cancelled on shutdown.
    cancel: CancellationToken,
}

impl ParseQueue {
    /// Constructs a new parse queue.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            locks: Default::default(),
            cancel,
        }
    }

    /// Submits a document for parsing and returns its parse cookie.
    ///
    /// On success the entry's parse snapshot is replaced with the result.
    pub async fn submit(
        &self,
        parser: Arc<dyn SyntaxParser>,
        entry: Arc<Entry>,
    ) -> Result<ParseCookie> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(entry.uri().clone()).or_default().clone()
        };

        let _ordering = lock.lock().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let parsed = {
            let entry = entry.clone();
            RayonHandle::spawn(move || parser.parse(entry.uri(), entry.document())).await?
        };

        let cookie = parsed.cookie.clone();
        entry.set_parse_snapshot(ParseSnapshot {
            tree: parsed.tree,
            cookie: parsed.cookie,
        });

        Ok(cookie)
    }

    /// Discards the per-document state for a URI.
    pub(crate) fn forget(&self, uri: &Url) {
        self.locks.lock().remove(uri);
    }
}

/// The signature of the analysis executor callback.
type AnalysisExecutor = dyn Fn(Arc<Entry>) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// An entry waiting in the analysis queue.
struct QueuedAnalysis {
    /// The entry to analyze.
    entry: Arc<Entry>,
    /// Released when the work completes or is discarded.
    _guard: CounterGuard,
}

/// Shared state between the analysis queue handle and its worker task.
struct QueueState {
    /// One FIFO queue per priority, highest priority first.
    queues: Mutex<[VecDeque<QueuedAnalysis>; 3]>,
    /// Wakes the worker when work is enqueued.
    notify: Notify,
    /// Counts queued and running work.
    pending: Arc<VolatileCounter>,
    /// Cancelled on shutdown.
    cancel: CancellationToken,
    /// Publishes the message of the most recent unhandled analysis error.
    errors: watch::Sender<Option<String>>,
    /// The callback that performs analysis of one entry.
    execute: Box<AnalysisExecutor>,
}

impl QueueState {
    /// Pops the next queued entry in priority order.
    fn pop(&self) -> Option<QueuedAnalysis> {
        let mut queues = self.queues.lock();
        queues.iter_mut().find_map(VecDeque::pop_front)
    }
}

/// A priority FIFO queue of analyzable entries.
///
/// Work is drained by a dedicated worker task in priority order. Unhandled
/// executor errors are logged and published through the error signal; they
/// never tear down the worker.
pub struct AnalysisQueue {
    /// The state shared with the worker task.
    state: Arc<QueueState>,
}

impl AnalysisQueue {
    /// Constructs a new analysis queue with the given executor callback.
    ///
    /// Must be called from the context of a Tokio runtime; the worker task is
    /// spawned immediately.
    pub fn new<E>(cancel: CancellationToken, execute: E) -> Self
    where
        E: Fn(Arc<Entry>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let (errors, _) = watch::channel(None);
        let state = Arc::new(QueueState {
            queues: Default::default(),
            notify: Notify::new(),
            pending: Arc::new(VolatileCounter::new()),
            cancel,
            errors,
            execute: Box::new(execute),
        });

        tokio::spawn(Self::run(state.clone()));
        Self { state }
    }

    /// Gets the number of queued and running work items.
    pub fn count(&self) -> usize {
        self.state.pending.value()
    }

    /// Enqueues an entry for analysis at the given priority.
    pub fn enqueue(&self, entry: Arc<Entry>, priority: Priority) {
        if self.state.cancel.is_cancelled() {
            warn!(
                "analysis of `{uri}` was canceled before it was enqueued",
                uri = entry.uri()
            );
            return;
        }

        let guard = self.state.pending.increment();
        self.state.queues.lock()[priority.index()].push_back(QueuedAnalysis {
            entry,
            _guard: guard,
        });
        self.state.notify.notify_one();
    }

    /// Completes when all queued and running work has drained.
    pub async fn wait_for_complete(&self) {
        self.state.pending.wait_for_zero().await;
    }

    /// Subscribes to the unhandled analysis error signal.
    ///
    /// The receiver observes the message of the most recent executor error or
    /// panic.
    pub fn unhandled_errors(&self) -> watch::Receiver<Option<String>> {
        self.state.errors.subscribe()
    }

    /// The worker task draining the queue.
    async fn run(state: Arc<QueueState>) {
        debug!("analysis queue has started");

        loop {
            match state.pop() {
                Some(item) => Self::process(&state, item).await,
                None => {
                    tokio::select! {
                        _ = state.cancel.cancelled() => break,
                        _ = state.notify.notified() => {}
                    }
                }
            }

            if state.cancel.is_cancelled() {
                break;
            }
        }

        // Discard whatever is still queued; dropping the guards releases the
        // pending count so waiters are not stranded
        while let Some(item) = state.pop() {
            warn!(
                "analysis of `{uri}` was canceled",
                uri = item.entry.uri()
            );
        }

        debug!("analysis queue has shut down");
    }

    /// Runs the executor for one queued entry.
    async fn process(state: &Arc<QueueState>, item: QueuedAnalysis) {
        let uri = item.entry.uri().clone();
        let work = (state.execute)(item.entry.clone());
        match std::panic::AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(Error::Cancelled)) => {
                warn!("analysis of `{uri}` was canceled");
            }
            Ok(Err(e)) => {
                error!("analysis of `{uri}` failed: {e:#}");
                state.errors.send_replace(Some(format!("{e:#}")));
                debug_assert!(false, "unhandled analysis error: {e:#}");
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "analysis task panicked".to_string());
                error!("analysis of `{uri}` panicked: {message}");
                state.errors.send_replace(Some(message));
            }
        }
    }
}

impl fmt::Debug for AnalysisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisQueue")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::contracts::Parse;
    use crate::contracts::SyntaxTree;
    use crate::document::EntryKind;
    use crate::document::TextDocument;
    use crate::edit::SourcePosition;

    /// A tree with no expressions.
    struct EmptyTree;

    impl SyntaxTree for EmptyTree {
        fn find_member_expression(&self, _: u32, _: SourcePosition) -> Option<String> {
            None
        }

        fn find_expression(&self, _: u32, _: SourcePosition) -> Option<String> {
            None
        }

        fn find_call(&self, _: u32, _: SourcePosition) -> Option<crate::contracts::CallContext> {
            None
        }

        fn find_import_name(&self, _: u32, _: SourcePosition) -> Option<String> {
            None
        }
    }

    /// A parser that sleeps briefly and counts invocations.
    struct SlowParser {
        /// How long each parse sleeps.
        delay: Duration,
        /// The number of parses performed.
        parses: AtomicUsize,
    }

    impl SyntaxParser for SlowParser {
        fn parse(&self, _: &Url, document: &TextDocument) -> Result<Parse> {
            std::thread::sleep(self.delay);
            self.parses.fetch_add(1, Ordering::SeqCst);
            Ok(Parse {
                tree: Arc::new(EmptyTree),
                cookie: ParseCookie::snapshot(document),
            })
        }
    }

    /// Creates an open entry for the given URI string.
    fn entry(uri: &str) -> Arc<Entry> {
        let entry = Arc::new(Entry::new(uri.parse().unwrap(), EntryKind::Source));
        entry.document().reset(0, 1, Some("x = 1\n".to_string()));
        entry
    }

    #[tokio::test]
    async fn it_preserves_per_document_order() {
        let parser = Arc::new(SlowParser {
            delay: Duration::from_millis(100),
            parses: AtomicUsize::new(0),
        });
        let queue = Arc::new(ParseQueue::new(CancellationToken::new()));
        let entry = entry("file:///a.py");

        // Stagger the submissions so they queue behind the first slow parse
        // in a known order
        let mut tasks = Vec::new();
        for version in 2..5 {
            entry
                .document()
                .reset(0, version, Some(format!("x = {version}\n")));

            let parser = parser.clone();
            let queue = queue.clone();
            let entry = entry.clone();
            tasks.push(tokio::spawn(
                async move { queue.submit(parser, entry).await },
            ));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for task in tasks {
            task.await.unwrap().expect("parse should succeed");
        }

        assert_eq!(parser.parses.load(Ordering::SeqCst), 3);
        // The final snapshot reflects the last submission
        let snapshot = entry.parse_snapshot().expect("should have parsed");
        assert_eq!(snapshot.cookie.version(0), Some(4));
    }

    #[tokio::test]
    async fn it_cancels_submissions_on_shutdown() {
        let cancel = CancellationToken::new();
        let queue = ParseQueue::new(cancel.clone());
        cancel.cancel();

        let parser = Arc::new(SlowParser {
            delay: Duration::ZERO,
            parses: AtomicUsize::new(0),
        });
        let result = queue.submit(parser, entry("file:///a.py")).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn it_drains_priorities_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());

        let queue = {
            let order = order.clone();
            let gate = gate.clone();
            AnalysisQueue::new(CancellationToken::new(), move |entry: Arc<Entry>| {
                let order = order.clone();
                let gate = gate.clone();
                async move {
                    if entry.uri().path() == "/first.py" {
                        // Hold the worker until the other entries are queued
                        gate.notified().await;
                    }
                    order.lock().push(entry.uri().path().to_string());
                    Ok(())
                }
                .boxed()
            })
        };

        queue.enqueue(entry("file:///first.py"), Priority::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.enqueue(entry("file:///low.py"), Priority::Low);
        queue.enqueue(entry("file:///normal.py"), Priority::Normal);
        queue.enqueue(entry("file:///high.py"), Priority::High);
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), queue.wait_for_complete())
            .await
            .expect("queue should drain");

        assert_eq!(
            *order.lock(),
            vec!["/first.py", "/high.py", "/normal.py", "/low.py"]
        );
    }

    #[tokio::test]
    async fn it_signals_unhandled_errors() {
        let queue = AnalysisQueue::new(CancellationToken::new(), |_| {
            async { Err(Error::Internal(anyhow::anyhow!("analysis exploded"))) }.boxed()
        });
        let mut errors = queue.unhandled_errors();

        // The executor error would trip a debug assertion by design
        if cfg!(debug_assertions) {
            return;
        }

        queue.enqueue(entry("file:///a.py"), Priority::Normal);
        queue.wait_for_complete().await;

        errors.changed().await.unwrap();
        let message = errors.borrow().clone().unwrap();
        assert!(message.contains("analysis exploded"));
    }

    #[tokio::test]
    async fn it_swallows_cancellation_with_a_warning() {
        let queue = AnalysisQueue::new(CancellationToken::new(), |_| {
            async { Err(Error::Cancelled) }.boxed()
        });
        queue.enqueue(entry("file:///a.py"), Priority::Normal);
        tokio::time::timeout(Duration::from_secs(5), queue.wait_for_complete())
            .await
            .expect("queue should drain");
        assert!(queue.unhandled_errors().borrow().is_none());
    }
}
