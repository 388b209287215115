use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::BridgeError;

/// What the worker sends back for one unit of demand
enum Pulled<T> {
    Item(T),
    /// The underlying iterator is done. Kept apart from `Item` so that an
    /// item which is itself "empty" (`None`, `()`) is never taken for the end.
    Exhausted,
}

/// Async view of a blocking iterator
///
/// The iterator runs on a blocking worker and is advanced exactly once per
/// call to [`next`](Self::next): nothing is read ahead, so a slow consumer
/// holds the source back instead of filling a buffer. Both channels between
/// the consumer and the worker have capacity 1.
///
/// Errors are part of the item type. A source yielding
/// `Result<Event, Error>` surfaces each error at the position it occurred.
pub struct EventBridge<T> {
    demand: mpsc::Sender<()>,
    items: mpsc::Receiver<Pulled<T>>,
    worker: Option<JoinHandle<()>>,
    /// A pull was requested and its answer not yet received
    outstanding: bool,
    finished: bool,
}

impl<T: Send + 'static> EventBridge<T> {
    /// Must be called from within a tokio runtime
    pub fn wrap<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let (demand_tx, mut demand_rx) = mpsc::channel::<()>(1);
        let (items_tx, items_rx) = mpsc::channel(1);
        let mut iter = iter.into_iter();

        let worker = tokio::task::spawn_blocking(move || {
            while demand_rx.blocking_recv().is_some() {
                let pulled = match iter.next() {
                    Some(item) => Pulled::Item(item),
                    None => Pulled::Exhausted,
                };
                let exhausted = matches!(pulled, Pulled::Exhausted);
                if items_tx.blocking_send(pulled).is_err() || exhausted {
                    break;
                }
            }
        });

        Self {
            demand: demand_tx,
            items: items_rx,
            worker: Some(worker),
            outstanding: false,
            finished: false,
        }
    }

    /// Pull the next item
    ///
    /// Returns `None` once the iterator is exhausted. Cancel safe: if the
    /// returned future is dropped mid-pull, the next call picks up the same
    /// pull instead of requesting another.
    pub async fn next(&mut self) -> Option<Result<T, BridgeError>> {
        if self.finished {
            return None;
        }

        if !self.outstanding {
            if self.demand.send(()).await.is_err() {
                self.finished = true;
                return Some(Err(self.worker_failure().await));
            }
            self.outstanding = true;
        }

        match self.items.recv().await {
            Some(Pulled::Item(item)) => {
                self.outstanding = false;
                Some(Ok(item))
            }
            Some(Pulled::Exhausted) => {
                self.outstanding = false;
                self.finished = true;
                None
            }
            None => {
                self.outstanding = false;
                self.finished = true;
                Some(Err(self.worker_failure().await))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the bridge as a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<T, BridgeError>> + Send {
        futures::stream::unfold(self, |mut bridge| async move {
            let item = bridge.next().await?;
            Some((item, bridge))
        })
    }

    async fn worker_failure(&mut self) -> BridgeError {
        let Some(worker) = self.worker.take() else {
            return BridgeError::WorkerLost;
        };
        match worker.await {
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                BridgeError::Panicked(message)
            }
            _ => BridgeError::WorkerLost,
        }
    }
}
