//! Single-assignment futures
//!
//! [`completion`] returns a connected [`CompletionSink`] / [`ActorFuture`]
//! pair. The sink assigns the value once; the future hands it to exactly one
//! consumer: an `.await`, a blocking [`ActorFuture::wait`], or a
//! [`ActorFuture::then`] continuation.
//!
//! Continuations run synchronously on the completing thread, after the
//! internal lock is released, so a continuation may freely touch the same
//! future's state.

use crate::error::{ActorError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type Continuation = Box<dyn FnOnce() + Send + 'static>;

struct State<T> {
    value: Option<T>,
    completed: bool,
    abandoned: bool,
    continuations: Vec<Continuation>,
    waker: Option<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

impl<T> Shared<T> {
    fn take(&self) -> Option<T> {
        self.state.lock().value.take()
    }
}

/// Create a connected sink and future
pub fn completion<T: Send + 'static>() -> (CompletionSink<T>, ActorFuture<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            value: None,
            completed: false,
            abandoned: false,
            continuations: Vec::new(),
            waker: None,
        }),
        signal: Condvar::new(),
    });
    (
        CompletionSink {
            shared: Some(shared.clone()),
        },
        ActorFuture { shared },
    )
}

/// Write side of a single-assignment future
///
/// Dropping an uncompleted sink abandons the future: blocking waits return
/// [`ActorError::Abandoned`] and stored continuations are dropped unrun.
pub struct CompletionSink<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Send + 'static> CompletionSink<T> {
    /// Assign the value, wake any waiter and run stored continuations
    pub fn complete(mut self, value: T) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let (continuations, waker) = {
            let mut state = shared.state.lock();
            state.value = Some(value);
            state.completed = true;
            (std::mem::take(&mut state.continuations), state.waker.take())
        };
        shared.signal.notify_all();

        if let Some(waker) = waker {
            waker.wake();
        }
        for continuation in continuations {
            continuation();
        }
    }
}

impl<T> Drop for CompletionSink<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let dropped = {
                let mut state = shared.state.lock();
                state.abandoned = true;
                std::mem::take(&mut state.continuations)
            };
            shared.signal.notify_all();
            drop(dropped);
        }
    }
}

impl<T> fmt::Debug for CompletionSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

/// Read side of a single-assignment future
///
/// Implements [`Future`]; an abandoned future never resolves when awaited.
pub struct ActorFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ActorFuture<T> {
    /// An already completed future
    pub fn ready(value: T) -> Self {
        let (sink, future) = completion();
        sink.complete(value);
        future
    }

    pub fn is_completed(&self) -> bool {
        self.shared.state.lock().completed
    }

    pub fn is_abandoned(&self) -> bool {
        self.shared.state.lock().abandoned
    }

    /// Register a continuation; runs immediately if already complete
    pub fn on_completed<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.completed {
            drop(state);
            continuation();
        } else if !state.abandoned {
            state.continuations.push(Box::new(continuation));
        }
    }

    /// Consume the value in a continuation
    pub fn then<F>(self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.on_completed(move || {
            if let Some(value) = shared.take() {
                f(value);
            }
        });
    }

    /// Block the calling thread until the value arrives
    ///
    /// Never call this from inside an actor method: the value may depend on
    /// work queued behind the caller.
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.abandoned || state.completed {
                return Err(ActorError::abandoned("wait"));
            }
            self.shared.signal.wait(&mut state);
        }
    }

    /// Block for at most `timeout`
    ///
    /// A timeout too large to turn into a deadline waits like [`wait`](Self::wait).
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.abandoned || state.completed {
                return Err(ActorError::abandoned("wait_timeout"));
            }
            if self
                .shared
                .signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.value.take() {
                    Some(value) => Ok(value),
                    None => Err(ActorError::timeout("wait_timeout", timeout)),
                };
            }
        }
    }
}

impl<T> Future for ActorFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.value.take() {
            return Poll::Ready(value);
        }
        if !state.completed && !state.abandoned {
            match &state.waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                _ => state.waker = Some(cx.waker().clone()),
            }
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for ActorFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ActorFuture")
            .field("completed", &state.completed)
            .field("abandoned", &state.abandoned)
            .finish()
    }
}
