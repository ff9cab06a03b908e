//! Single-flight, memoized asynchronous values.
//!
//! A [`BoundedValue`] runs its producer at most once. The first caller starts
//! it on the tokio runtime; every caller, including ones that arrive after
//! the value resolved, receives a clone of the same outcome.
//!
//! ```text
//!   Unstarted ──get──▶ Pending(waiters) ──producer done──▶ Succeeded(T)
//!                                                   └────▶ Failed(Error)
//! ```
//!
//! The producer runs as its own task, so a consumer that stops waiting does
//! not cancel the computation for everyone else.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::Error;

type Waiter<T> = oneshot::Sender<Result<T, Error>>;

enum State<T> {
    Unstarted,
    Pending(Vec<Waiter<T>>),
    Succeeded(T),
    Failed(Error),
}

/// Either the cached outcome or a ticket for the pending one.
enum Ticket<T> {
    Ready(Result<T, Error>),
    Wait(oneshot::Receiver<Result<T, Error>>),
}

/// A lazily computed value shared by every consumer of one request.
pub struct BoundedValue<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for BoundedValue<T> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<T> Default for BoundedValue<T> {
    fn default() -> Self {
        Self { state: Arc::new(Mutex::new(State::Unstarted)) }
    }
}

impl<T> BoundedValue<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once a producer has been started.
    pub fn is_started(&self) -> bool {
        !matches!(*self.state.lock(), State::Unstarted)
    }

    /// The cached outcome, if the producer already finished.
    pub fn peek(&self) -> Option<Result<T, Error>> {
        match &*self.state.lock() {
            State::Succeeded(value) => Some(Ok(value.clone())),
            State::Failed(err) => Some(Err(err.clone())),
            State::Unstarted | State::Pending(_) => None,
        }
    }

    /// Returns the value, starting `producer` if nobody has yet.
    ///
    /// `producer` is only called by the first consumer; later consumers'
    /// producers are dropped unused.
    pub async fn get_or_load<F, Fut>(&self, producer: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        match self.ticket(producer) {
            Ticket::Ready(outcome) => outcome,
            // The producer task always settles its waiters; a closed channel
            // means the runtime dropped it.
            Ticket::Wait(rx) => rx.await.unwrap_or(Err(Error::LoaderAborted)),
        }
    }

    fn ticket<F, Fut>(&self, producer: F) -> Ticket<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        match &mut *state {
            State::Succeeded(value) => return Ticket::Ready(Ok(value.clone())),
            State::Failed(err) => return Ticket::Ready(Err(err.clone())),
            State::Pending(waiters) => {
                waiters.push(tx);
                return Ticket::Wait(rx);
            }
            State::Unstarted => {}
        }
        *state = State::Pending(vec![tx]);
        drop(state);

        let fut = producer();
        let slot = Arc::clone(&self.state);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or(Err(Error::LoaderAborted));
            settle(&slot, outcome);
        });
        Ticket::Wait(rx)
    }
}

fn settle<T: Clone>(slot: &Mutex<State<T>>, outcome: Result<T, Error>) {
    let resolved = match &outcome {
        Ok(value) => State::Succeeded(value.clone()),
        Err(err) => State::Failed(err.clone()),
    };

    let waiters = match std::mem::replace(&mut *slot.lock(), resolved) {
        State::Pending(waiters) => waiters,
        State::Unstarted | State::Succeeded(_) | State::Failed(_) => Vec::new(),
    };

    // A consumer that stopped waiting has dropped its receiver; that's fine.
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn producer_runs_once_for_concurrent_consumers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let value: BoundedValue<u32> = BoundedValue::new();

        let load = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(7)
            }
        };

        let (a, b) = tokio::join!(
            value.get_or_load(load(Arc::clone(&calls))),
            value.get_or_load(load(Arc::clone(&calls))),
        );

        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_consumer_gets_cached_value() {
        let value: BoundedValue<String> = BoundedValue::new();
        let first = value.get_or_load(|| async { Ok("ready".to_owned()) }).await;
        assert_eq!(first.unwrap(), "ready");
        assert!(matches!(value.peek(), Some(Ok(ref s)) if s == "ready"));

        let second = value
            .get_or_load(|| async { Err(Error::Body("producer ran twice".to_owned())) })
            .await;
        assert_eq!(second.unwrap(), "ready");
    }

    #[tokio::test]
    async fn failure_is_cached_for_everyone() {
        let value: BoundedValue<u8> = BoundedValue::new();
        let first = value
            .get_or_load(|| async { Err(Error::LimitExceeded { received: 11, limit: 10 }) })
            .await;
        assert!(matches!(first, Err(Error::LimitExceeded { received: 11, limit: 10 })));

        let second = value.get_or_load(|| async { Ok(1) }).await;
        assert!(matches!(second, Err(Error::LimitExceeded { .. })));
    }

    #[tokio::test]
    async fn panicking_producer_aborts_waiters() {
        async fn explode() -> Result<u8, Error> {
            panic!("boom")
        }

        let value: BoundedValue<u8> = BoundedValue::new();
        let outcome = value.get_or_load(explode).await;
        assert!(matches!(outcome, Err(Error::LoaderAborted)));
        assert!(value.is_started());
    }
}
