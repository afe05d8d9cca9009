//! Fire-once delayed callbacks owned by a session.
//!
//! Every callback runs on a task inside one `JoinSet`. Cancelling the set or
//! dropping its owner aborts whatever has not fired yet.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinSet;

#[derive(Default)]
pub struct Deferred {
    tasks: Mutex<JoinSet<()>>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`. Must be called within a Tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        });
    }

    /// Callbacks scheduled and not yet finished.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn cancel_all(&self) {
        self.tasks().abort_all();
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
