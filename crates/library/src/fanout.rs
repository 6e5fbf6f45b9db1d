//! Splitting one stream into several.
//!
//! Neither helper spawns anything. Partitions only receive items while the returned `manager`
//! stream is being polled, so callers must drive it alongside the partitions, usually by
//! merging it into the same output stream with [`drive`].

use std::convert::Infallible;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct Distributed<T> {
    pub lanes: Vec<UnboundedReceiverStream<T>>,
    pub manager: BoxStream<'static, Infallible>,
}

/// Deals items from `source` round robin across `n` lanes, by arrival index modulo `n`.
pub fn distribute<T, S>(source: S, n: usize) -> Distributed<T>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let n = n.max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| mpsc::unbounded_channel()).unzip();
    let manager = run_manager(async move {
        let mut source = std::pin::pin!(source);
        let mut index = 0usize;
        while let Some(item) = source.next().await {
            // A lane whose consumer went away just loses its share.
            let _ = senders[index % senders.len()].send(item);
            index += 1;
        }
    });
    Distributed {
        lanes: receivers
            .into_iter()
            .map(UnboundedReceiverStream::new)
            .collect(),
        manager,
    }
}

/// Routing decision for [`divert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divert<L, R> {
    Left(L),
    Right(R),
}

pub struct Diverted<L, R> {
    pub left: UnboundedReceiverStream<L>,
    pub right: UnboundedReceiverStream<R>,
    pub manager: BoxStream<'static, Infallible>,
}

/// Splits `source` in two according to `classify`.
pub fn divert<T, L, R, S, F>(source: S, classify: F) -> Diverted<L, R>
where
    T: Send + 'static,
    L: Send + 'static,
    R: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
    F: Fn(T) -> Divert<L, R> + Send + 'static,
{
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    let manager = run_manager(async move {
        let mut source = std::pin::pin!(source);
        while let Some(item) = source.next().await {
            let _ = match classify(item) {
                Divert::Left(value) => left_tx.send(value).map_err(drop),
                Divert::Right(value) => right_tx.send(value).map_err(drop),
            };
        }
    });
    Diverted {
        left: UnboundedReceiverStream::new(left_rx),
        right: UnboundedReceiverStream::new(right_rx),
        manager,
    }
}

/// Merges a manager into `output` so polling the output also routes items.
pub fn drive<T, S>(manager: BoxStream<'static, Infallible>, output: S) -> BoxStream<'static, T>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    stream::select(manager.map(|never| match never {}), output).boxed()
}

fn run_manager<F>(routing: F) -> BoxStream<'static, Infallible>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    // The senders live inside `routing`, so partitions close once it completes.
    stream::once(routing)
        .filter_map(|()| async { None::<Infallible> })
        .boxed()
}
