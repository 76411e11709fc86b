//! Events emitted by the analysis core.

use lsp_types::Diagnostic;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::unbounded_channel;
use url::Url;

/// Represents an event emitted by the analysis core.
///
/// Subscribers receive events over a channel and cannot mutate core state.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// A parse of a document part has completed.
    ParseComplete {
        /// The URI of the parsed document.
        uri: Url,
        /// The version of the parsed part, or 0 when no versioning was
        /// available.
        version: i32,
    },
    /// Analysis of a document part has completed.
    AnalysisComplete {
        /// The URI of the analyzed document.
        uri: Url,
        /// The version of the analyzed part, or 0 when no versioning was
        /// available.
        version: i32,
    },
    /// A file was discovered while loading a directory.
    FileFound {
        /// The URI of the discovered file.
        uri: Url,
    },
    /// Diagnostics are ready to be delivered to the client.
    PublishDiagnostics {
        /// The URI of the document the diagnostics are for.
        uri: Url,
        /// The part of the document the diagnostics are for.
        part: u32,
        /// The version of the part the diagnostics were produced from.
        version: i32,
        /// The diagnostics to deliver.
        diagnostics: Vec<Diagnostic>,
    },
}

/// Fans analysis events out to subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    /// The current subscriber channels.
    subscribers: Mutex<Vec<UnboundedSender<AnalysisEvent>>>,
}

impl EventBus {
    /// Constructs a new event bus with no subscribers.
    pub fn new() -> Self {
        Default::default()
    }

    /// Subscribes to events emitted after this call.
    pub fn subscribe(&self) -> UnboundedReceiver<AnalysisEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Emits an event to every live subscriber.
    ///
    /// Subscribers whose receiving half has been dropped are removed.
    pub fn emit(&self, event: AnalysisEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn it_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let uri: Url = "file:///test.py".parse().unwrap();
        bus.emit(AnalysisEvent::FileFound { uri: uri.clone() });

        for rx in [&mut first, &mut second] {
            match rx.recv().await {
                Some(AnalysisEvent::FileFound { uri: found }) => assert_eq!(found, uri),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn it_drops_closed_subscribers() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        let uri: Url = "file:///test.py".parse().unwrap();
        bus.emit(AnalysisEvent::FileFound { uri });
        assert!(bus.subscribers.lock().is_empty());
    }
}
