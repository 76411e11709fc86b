//! Integration of rayon tasks with the Tokio runtime.
//!
//! Parse and analyze bodies are CPU bound, so they run on the shared rayon
//! worker pool while the queues remain async.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::sync::oneshot;
use tokio::sync::oneshot::Receiver;

/// A handle to a task spawned on the rayon thread pool.
///
/// Awaiting the handle yields the value returned by the spawned closure.
#[must_use]
#[derive(Debug)]
pub struct RayonHandle<T> {
    /// Receives the task result when the rayon task completes.
    rx: Receiver<T>,
}

impl<T> RayonHandle<T>
where
    T: Send + 'static,
{
    /// Spawns a closure on the rayon thread pool.
    pub fn spawn<F: FnOnce() -> T + Send + 'static>(func: F) -> Self {
        let (tx, rx) = oneshot::channel();
        rayon::spawn(move || {
            tx.send(func()).ok();
        });

        Self { rx }
    }
}

impl<T> Future for RayonHandle<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);
        rx.poll(cx)
            .map(|result| result.expect("rayon task should not be dropped before completing"))
    }
}
