//! Lifecycle side-effect combinators.

use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{Error, Result};
use crate::flow::FlowStream;

/// Stream for the [`on_start`](crate::flow::Flow::on_start) operator.
#[must_use = "flows do nothing unless collected"]
pub struct OnStart<S, F> {
    stream: S,
    f: Option<F>,
}

impl<S, F> OnStart<S, F> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self { stream, f: Some(f) }
    }
}

impl<S: Unpin, F> Unpin for OnStart<S, F> {}

impl<T, S, F> FlowStream for OnStart<S, F>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut() + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(mut f) = this.f.take() {
            f();
        }
        Pin::new(&mut this.stream).poll_next(cx)
    }
}

/// Stream for the [`on_each`](crate::flow::Flow::on_each) operator.
#[must_use = "flows do nothing unless collected"]
pub struct OnEach<S, F> {
    stream: S,
    f: F,
}

impl<S, F> OnEach<S, F> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self { stream, f }
    }
}

impl<S: Unpin, F> Unpin for OnEach<S, F> {}

impl<T, S, F> FlowStream for OnEach<S, F>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(&T) + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                (this.f)(&value);
                Poll::Ready(Some(Ok(value)))
            }
            other => other,
        }
    }
}

/// Stream for the [`on_completion`](crate::flow::Flow::on_completion)
/// operator: observes the terminating error (or none), exactly once.
#[must_use = "flows do nothing unless collected"]
pub struct OnCompletion<S, F> {
    stream: S,
    f: Option<F>,
}

impl<S, F> OnCompletion<S, F> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self { stream, f: Some(f) }
    }
}

impl<S: Unpin, F> Unpin for OnCompletion<S, F> {}

impl<T, S, F> FlowStream for OnCompletion<S, F>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut(Option<&Error>) + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Err(error))) => {
                if let Some(mut f) = this.f.take() {
                    f(Some(&error));
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if let Some(mut f) = this.f.take() {
                    f(None);
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Stream for the [`on_empty`](crate::flow::Flow::on_empty) operator.
#[must_use = "flows do nothing unless collected"]
pub struct OnEmpty<S, F> {
    stream: S,
    f: Option<F>,
    emitted_any: bool,
}

impl<S, F> OnEmpty<S, F> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self {
            stream,
            f: Some(f),
            emitted_any: false,
        }
    }
}

impl<S: Unpin, F> Unpin for OnEmpty<S, F> {}

impl<T, S, F> FlowStream for OnEmpty<S, F>
where
    S: FlowStream<Item = Result<T>> + Unpin,
    F: FnMut() + Send,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.emitted_any = true;
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(None) => {
                if !this.emitted_any {
                    if let Some(mut f) = this.f.take() {
                        f();
                    }
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
