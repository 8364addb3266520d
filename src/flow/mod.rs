//! Cold flows, hot broadcast/state holders, and pipeline operators.
//!
//! A [`Flow`] is a lazy, restartable sequence: nothing runs until a
//! terminal operator collects it, and every collection re-invokes the
//! producer from scratch. Failures travel in-band (`Result` items) and
//! terminate the stream; cancellation of the collecting task propagates
//! through every operator.
//!
//! Operators are poll-driven adapters over the internal [`FlowStream`]
//! trait, composed per collection by the flow's stream factory.

mod create;
pub mod ops;
mod shared;
mod state;

pub use create::{flow, FlowCollector};
pub use shared::{SharedFlow, Subscription};
pub use state::StateFlow;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::context::JobContext;
use crate::error::{Error, Result};

use ops::buffer::{Buffer, Conflate};
use ops::catch::{Catch, Retry};
use ops::combine::Combine;
use ops::debounce::{Debounce, Sample};
use ops::distinct::DistinctUntilChanged;
use ops::flat_map::{FlatMapConcat, FlatMapMerge};
use ops::lifecycle::{OnCompletion, OnEach, OnEmpty, OnStart};
use ops::map::{Filter, Map};
use ops::merge::Merge;
use ops::scan::Scan;
use ops::skip::{Skip, SkipWhile};
use ops::take::{Take, TakeWhile};
use ops::zip::Zip;

/// Default concurrency bound for [`Flow::flat_map_merge`].
pub const DEFAULT_FLAT_MAP_CONCURRENCY: usize = 16;

/// An asynchronous sequence of `Result` items, polled by operators.
///
/// The flow-facing analog of an iterator: `poll_next` yields `Some(item)`
/// per element and `None` at the end of the stream. An `Err` item carries
/// an upstream failure; well-behaved streams end right after yielding one.
pub trait FlowStream: Send {
    /// The element type.
    type Item;

    /// Attempts to pull the next value.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;
}

/// A boxed, pinned stream of `Result<T>` items.
pub type BoxFlowStream<T> = Pin<Box<dyn FlowStream<Item = Result<T>> + Send>>;

impl<I> FlowStream for Pin<Box<dyn FlowStream<Item = I> + Send>> {
    type Item = I;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().as_mut().poll_next(cx)
    }
}

type StreamFactory<T> = dyn Fn(JobContext) -> BoxFlowStream<T> + Send + Sync;

/// A cold, restartable reactive sequence.
///
/// Cloning a flow clones the recipe, not any running state: each terminal
/// operator on each clone starts the producer fresh.
#[must_use = "flows do nothing unless collected"]
pub struct Flow<T> {
    factory: Arc<StreamFactory<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T> std::fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").finish_non_exhaustive()
    }
}

/// Creates a flow emitting the given items in order.
pub fn flow_of<T>(items: impl IntoIterator<Item = T>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    let items: Vec<T> = items.into_iter().collect();
    Flow::from_factory(move |_ctx| {
        Box::pin(IterStream {
            items: items.clone().into_iter(),
        })
    })
}

/// Creates a flow that ends immediately.
pub fn empty<T: Send + 'static>() -> Flow<T> {
    Flow::from_factory(|_ctx| Box::pin(IterStream { items: Vec::new().into_iter() }))
}

/// Interleaves emissions from several flows.
///
/// Order across sources is unspecified; within one source, order is
/// preserved. The merged flow ends when every source has ended, or
/// immediately after any source fails.
pub fn merge<T: Send + 'static>(flows: Vec<Flow<T>>) -> Flow<T> {
    Flow::from_factory(move |ctx| {
        let streams: Vec<BoxFlowStream<T>> =
            flows.iter().map(|f| f.make_stream(&ctx)).collect();
        Box::pin(Merge::new(streams))
    })
}

struct IterStream<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> Unpin for IterStream<T> {}

impl<T: Send> FlowStream for IterStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().items.next().map(Ok))
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Builds a flow from a per-collection stream factory.
    pub fn from_factory(
        factory: impl Fn(JobContext) -> BoxFlowStream<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub(crate) fn make_stream(&self, ctx: &JobContext) -> BoxFlowStream<T> {
        (self.factory)(ctx.clone())
    }

    // =====================================================================
    // Intermediate operators
    // =====================================================================

    /// 1:1 element-wise transform; preserves order and error timing.
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| Box::pin(Map::new(self.make_stream(&ctx), f.clone())))
    }

    /// Drops elements for which the predicate returns false.
    pub fn filter<P>(self, predicate: P) -> Flow<T>
    where
        P: FnMut(&T) -> bool + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(Filter::new(self.make_stream(&ctx), predicate.clone()))
        })
    }

    /// Emits `init`, then each progressive accumulation.
    pub fn scan<A, F>(self, init: A, f: F) -> Flow<A>
    where
        A: Clone + Send + Sync + 'static,
        F: FnMut(&A, T) -> A + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(Scan::new(self.make_stream(&ctx), init.clone(), f.clone()))
        })
    }

    /// Takes the first `n` elements. `take(0)` is empty without polling
    /// upstream.
    pub fn take(self, n: usize) -> Flow<T> {
        Flow::from_factory(move |ctx| Box::pin(Take::new(self.make_stream(&ctx), n)))
    }

    /// Takes elements while the predicate holds.
    pub fn take_while<P>(self, predicate: P) -> Flow<T>
    where
        P: FnMut(&T) -> bool + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(TakeWhile::new(self.make_stream(&ctx), predicate.clone()))
        })
    }

    /// Skips the first `n` elements.
    pub fn skip(self, n: usize) -> Flow<T> {
        Flow::from_factory(move |ctx| Box::pin(Skip::new(self.make_stream(&ctx), n)))
    }

    /// Skips elements while the predicate holds.
    pub fn skip_while<P>(self, predicate: P) -> Flow<T>
    where
        P: FnMut(&T) -> bool + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(SkipWhile::new(self.make_stream(&ctx), predicate.clone()))
        })
    }

    /// Suppresses consecutive equal elements; the first element always
    /// passes.
    pub fn distinct_until_changed(self) -> Flow<T>
    where
        T: PartialEq + Clone,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(DistinctUntilChanged::new(self.make_stream(&ctx)))
        })
    }

    /// Pairs elements with `other` in lockstep; ends when either side
    /// ends.
    pub fn zip<U>(self, other: Flow<U>) -> Flow<(T, U)>
    where
        U: Send + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(Zip::new(
                self.make_stream(&ctx),
                other.make_stream(&ctx),
            ))
        })
    }

    /// Emits `f(latest_self, latest_other)` on every upstream emission
    /// once both sides have produced at least one element; ends when
    /// either side ends.
    pub fn combine<U, R, F>(self, other: Flow<U>, f: F) -> Flow<R>
    where
        T: Clone,
        U: Clone + Send + 'static,
        R: Send + 'static,
        F: FnMut(&T, &U) -> R + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(Combine::new(
                self.make_stream(&ctx),
                other.make_stream(&ctx),
                f.clone(),
            ))
        })
    }

    /// Sequential flatten: fully drains the inner flow of each element
    /// before taking the next.
    pub fn flat_map_concat<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Flow<U> + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(FlatMapConcat::new(
                self.make_stream(&ctx),
                f.clone(),
                ctx.clone(),
            ))
        })
    }

    /// Concurrent flatten bounded by `concurrency` simultaneous inner
    /// flows; emissions interleave.
    pub fn flat_map_merge<U, F>(self, concurrency: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Flow<U> + Clone + Send + Sync + 'static,
    {
        let limit = if concurrency == 0 {
            DEFAULT_FLAT_MAP_CONCURRENCY
        } else {
            concurrency
        };
        Flow::from_factory(move |ctx| {
            Box::pin(FlatMapMerge::new(
                self.make_stream(&ctx),
                f.clone(),
                ctx.clone(),
                limit,
            ))
        })
    }

    /// Decouples producer and consumer with an `n`-slot buffer; the
    /// producer stops being polled while the buffer is full.
    pub fn buffer(self, n: usize) -> Flow<T> {
        let n = n.max(1);
        Flow::from_factory(move |ctx| Box::pin(Buffer::new(self.make_stream(&ctx), n)))
    }

    /// Keeps only the latest unread element, dropping older ones.
    pub fn conflate(self) -> Flow<T> {
        Flow::from_factory(move |ctx| Box::pin(Conflate::new(self.make_stream(&ctx))))
    }

    /// After each element, suppresses emission until `interval` of quiet
    /// time has passed, then emits the last element seen. The final
    /// element is emitted at the end of the stream. Zero interval means
    /// immediate.
    pub fn debounce(self, interval: Duration) -> Flow<T> {
        Flow::from_factory(move |ctx| {
            Box::pin(Debounce::new(self.make_stream(&ctx), ctx.clone(), interval))
        })
    }

    /// Emits the latest-seen element on every periodic tick; ticks with
    /// no fresh element are skipped. Zero interval passes elements
    /// through.
    pub fn sample(self, interval: Duration) -> Flow<T> {
        Flow::from_factory(move |ctx| {
            Box::pin(Sample::new(self.make_stream(&ctx), ctx.clone(), interval))
        })
    }

    /// Catches an upstream failure and continues with the flow returned
    /// by `handler`. Failures of the replacement are not re-caught.
    pub fn catch<H>(self, handler: H) -> Flow<T>
    where
        H: Fn(Error) -> Flow<T> + Send + Sync + 'static,
    {
        let handler: Arc<dyn Fn(Error) -> Flow<T> + Send + Sync> = Arc::new(handler);
        Flow::from_factory(move |ctx| {
            Box::pin(Catch::new(
                self.make_stream(&ctx),
                Arc::clone(&handler),
                ctx.clone(),
            ))
        })
    }

    /// On failure, restarts the upstream up to `attempts` total tries
    /// with doubling backoff (100ms, 200ms, …).
    pub fn retry(self, attempts: u32) -> Flow<T> {
        self.retry_when(move |_, attempt| attempt < attempts, default_backoff)
    }

    /// `retry` with a caller-supplied predicate and backoff. The
    /// predicate receives the failure and the 1-based count of attempts
    /// made so far; returning false stops retrying.
    pub fn retry_when<P, D>(self, predicate: P, delay: D) -> Flow<T>
    where
        P: Fn(&Error, u32) -> bool + Send + Sync + 'static,
        D: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        let predicate: Arc<dyn Fn(&Error, u32) -> bool + Send + Sync> = Arc::new(predicate);
        let delay: Arc<dyn Fn(u32) -> Duration + Send + Sync> = Arc::new(delay);
        Flow::from_factory(move |ctx| {
            Box::pin(Retry::new(
                self.clone(),
                ctx.clone(),
                Arc::clone(&predicate),
                Arc::clone(&delay),
            ))
        })
    }

    /// Runs a side effect before the first element is pulled.
    pub fn on_start<F>(self, f: F) -> Flow<T>
    where
        F: FnMut() + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(OnStart::new(self.make_stream(&ctx), f.clone()))
        })
    }

    /// Runs a side effect on each element.
    pub fn on_each<F>(self, f: F) -> Flow<T>
    where
        F: FnMut(&T) + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(OnEach::new(self.make_stream(&ctx), f.clone()))
        })
    }

    /// Runs a side effect when the flow terminates, receiving the
    /// terminating error (or `None` for a normal end). Runs once.
    pub fn on_completion<F>(self, f: F) -> Flow<T>
    where
        F: FnMut(Option<&Error>) + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(OnCompletion::new(self.make_stream(&ctx), f.clone()))
        })
    }

    /// Runs a side effect if the flow ends without emitting anything.
    pub fn on_empty<F>(self, f: F) -> Flow<T>
    where
        F: FnMut() + Clone + Send + Sync + 'static,
    {
        Flow::from_factory(move |ctx| {
            Box::pin(OnEmpty::new(self.make_stream(&ctx), f.clone()))
        })
    }

    // =====================================================================
    // Terminal operators
    // =====================================================================

    /// Collects the flow, invoking `f` per element. Returns the upstream
    /// failure, or a cancellation error if the collecting task stops.
    pub async fn collect<F>(&self, ctx: &JobContext, mut f: F) -> Result<()>
    where
        F: FnMut(T),
    {
        let mut stream = self.make_stream(ctx);
        loop {
            ctx.ensure_active()?;
            match next(&mut stream).await {
                Some(Ok(value)) => f(value),
                Some(Err(error)) => return Err(error),
                None => return Ok(()),
            }
        }
    }

    /// Collects every element into a vector.
    pub async fn collect_values(&self, ctx: &JobContext) -> Result<Vec<T>> {
        let mut values = Vec::new();
        self.collect(ctx, |v| values.push(v)).await?;
        Ok(values)
    }

    /// Terminal fold: returns the final accumulator.
    pub async fn fold<A, F>(&self, ctx: &JobContext, init: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, T) -> A,
    {
        let mut stream = self.make_stream(ctx);
        let mut acc = init;
        loop {
            ctx.ensure_active()?;
            match next(&mut stream).await {
                Some(Ok(value)) => acc = f(acc, value),
                Some(Err(error)) => return Err(error),
                None => return Ok(acc),
            }
        }
    }

    /// Returns the first element, or `None` for an empty flow. The
    /// upstream is not polled past the first element.
    pub async fn first(&self, ctx: &JobContext) -> Result<Option<T>> {
        let mut stream = self.make_stream(ctx);
        ctx.ensure_active()?;
        match next(&mut stream).await {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    /// Counts the elements.
    pub async fn count(&self, ctx: &JobContext) -> Result<usize> {
        let mut n = 0usize;
        self.collect(ctx, |_| n += 1).await?;
        Ok(n)
    }
}

fn default_backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(100).saturating_mul(factor)
}

/// Future resolving to the next item of a stream.
pub(crate) fn next<T>(stream: &mut BoxFlowStream<T>) -> Next<'_, T> {
    Next { stream }
}

pub(crate) struct Next<'a, T> {
    stream: &'a mut BoxFlowStream<T>,
}

impl<T> Future for Next<'_, T> {
    type Output = Option<Result<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}
