//! Lifecycle wrapper over a native worker thread.
//!
//! [`WorkerThread`] starts a named OS thread, exposes its identity and lets
//! the owner join it either unconditionally or with a deadline. Joining only
//! blocks the caller; the managed thread is never interrupted.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::traits::{DiagError, Result};

/// Outcome of [`WorkerThread::join_timed`].
#[derive(Debug)]
pub enum JoinStatus<T> {
    /// The thread terminated and its result was collected.
    Joined(T),
    /// The deadline passed first. The thread is still joinable.
    TimedOut,
}

#[derive(Default)]
struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

/// Flags completion when the worker closure returns or unwinds.
struct CompletionGuard(Arc<Completion>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        *self.0.done.lock() = true;
        self.0.signal.notify_all();
    }
}

/// A started native thread producing a `T`.
pub struct WorkerThread<T> {
    name: String,
    id: ThreadId,
    handle: Option<JoinHandle<T>>,
    completion: Arc<Completion>,
}

impl<T: Send + 'static> WorkerThread<T> {
    /// Spawn a thread named `name` running `entry`.
    ///
    /// Fails with [`DiagError::ThreadCreation`] when the OS cannot provide
    /// another thread.
    pub fn start<F>(name: &str, entry: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let completion = Arc::new(Completion::default());
        let guard = CompletionGuard(Arc::clone(&completion));

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _guard = guard;
                entry()
            })
            .map_err(DiagError::ThreadCreation)?;

        let id = handle.thread().id();
        debug!(thread = name, ?id, "Worker thread started");

        Ok(Self {
            name: name.to_owned(),
            id,
            handle: Some(handle),
            completion,
        })
    }
}

impl<T> WorkerThread<T> {
    /// Identity of the managed thread.
    pub const fn identity(&self) -> ThreadId {
        self.id
    }

    /// Name the thread was started with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread body has returned (or unwound).
    pub fn is_finished(&self) -> bool {
        *self.completion.done.lock()
    }

    /// Block until the thread terminates and return its result.
    ///
    /// A thread can be joined once; later calls fail with
    /// [`DiagError::InvalidArgument`].
    pub fn join(&mut self) -> Result<T> {
        let handle = self.handle.take().ok_or_else(|| {
            DiagError::InvalidArgument(format!("thread '{}' was already joined", self.name))
        })?;

        let result = handle
            .join()
            .map_err(|payload| DiagError::ThreadPanicked(panic_message(payload.as_ref())));
        debug!(thread = %self.name, ok = result.is_ok(), "Worker thread joined");
        result
    }

    /// Block for at most `timeout` waiting for the thread to terminate.
    ///
    /// A zero timeout is rejected with [`DiagError::InvalidArgument`]
    /// without waiting.
    pub fn join_timed(&mut self, timeout: Duration) -> Result<JoinStatus<T>> {
        if timeout.is_zero() {
            return Err(DiagError::InvalidArgument(
                "join timeout must be positive".to_owned(),
            ));
        }
        if self.handle.is_none() {
            return Err(DiagError::InvalidArgument(format!(
                "thread '{}' was already joined",
                self.name
            )));
        }

        let finished = {
            let mut done = self.completion.done.lock();
            match Instant::now().checked_add(timeout) {
                Some(deadline) => {
                    while !*done {
                        if self
                            .completion
                            .signal
                            .wait_until(&mut done, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                }
                None => {
                    while !*done {
                        self.completion.signal.wait(&mut done);
                    }
                }
            }
            *done
        };

        if finished {
            self.join().map(JoinStatus::Joined)
        } else {
            debug!(thread = %self.name, ?timeout, "Timed join expired");
            Ok(JoinStatus::TimedOut)
        }
    }
}

impl<T> Drop for WorkerThread<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(thread = %self.name, "Detaching unjoined worker thread");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_start_and_join_returns_result() {
        let mut worker = WorkerThread::start("adder", || 2 + 3).expect("start failed");
        assert_eq!(worker.name(), "adder");
        assert_eq!(worker.join().expect("join failed"), 5);
    }

    #[test]
    fn test_identity_matches_running_thread() {
        let (tx, rx) = mpsc::channel();
        let mut worker = WorkerThread::start("identity", move || {
            tx.send(thread::current().id()).expect("send failed");
        })
        .expect("start failed");

        let inside = rx.recv().expect("recv failed");
        assert_eq!(worker.identity(), inside);
        assert_ne!(worker.identity(), thread::current().id());
        worker.join().expect("join failed");
    }

    #[test]
    fn test_second_join_is_rejected() {
        let mut worker = WorkerThread::start("once", || ()).expect("start failed");
        worker.join().expect("first join failed");

        let result = worker.join();
        assert!(matches!(result, Err(DiagError::InvalidArgument(_))));
    }

    #[test]
    fn test_join_timed_rejects_zero_without_waiting() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut worker = WorkerThread::start("blocked", move || {
            let _ = release_rx.recv();
        })
        .expect("start failed");

        let started = Instant::now();
        let result = worker.join_timed(Duration::ZERO);
        assert!(matches!(result, Err(DiagError::InvalidArgument(_))));
        assert!(started.elapsed() < Duration::from_secs(1));

        release_tx.send(()).expect("send failed");
        worker.join().expect("thread should still be joinable");
    }

    #[test]
    fn test_join_timed_times_out_then_joins() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut worker = WorkerThread::start("slow", move || {
            let _ = release_rx.recv();
            7
        })
        .expect("start failed");

        let status = worker
            .join_timed(Duration::from_millis(20))
            .expect("join_timed failed");
        assert!(matches!(status, JoinStatus::TimedOut));
        assert!(!worker.is_finished());

        release_tx.send(()).expect("send failed");
        let status = worker
            .join_timed(Duration::from_secs(5))
            .expect("join_timed failed");
        assert!(matches!(status, JoinStatus::Joined(7)));
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_panicking_thread_reports_message() {
        let mut worker =
            WorkerThread::start("panics", || -> u32 { panic!("boom") }).expect("start failed");

        match worker.join() {
            Err(DiagError::ThreadPanicked(msg)) => assert_eq!(msg, "boom"),
            other => unreachable!("expected ThreadPanicked, got {other:?}"),
        }
    }

    #[test]
    fn test_join_timed_after_join_is_rejected() {
        let mut worker = WorkerThread::start("done", || ()).expect("start failed");
        worker.join().expect("join failed");
        let result = worker.join_timed(Duration::from_millis(10));
        assert!(matches!(result, Err(DiagError::InvalidArgument(_))));
    }
}
