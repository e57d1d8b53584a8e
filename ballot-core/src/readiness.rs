//! One-shot initialization state machine for slow-to-start backends.
//!
//! `Uninitialized -> Initializing -> Ready(T) | Failed(reason)`. Callers that
//! need the backend suspend in [`Readiness::wait`] until it settles.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug)]
pub enum ReadyState<T> {
    Uninitialized,
    Initializing,
    Ready(Arc<T>),
    Failed(String),
}

impl<T> Clone for ReadyState<T> {
    fn clone(&self) -> Self {
        match self {
            ReadyState::Uninitialized => ReadyState::Uninitialized,
            ReadyState::Initializing => ReadyState::Initializing,
            ReadyState::Ready(value) => ReadyState::Ready(Arc::clone(value)),
            ReadyState::Failed(reason) => ReadyState::Failed(reason.clone()),
        }
    }
}

impl<T> ReadyState<T> {
    fn is_settled(&self) -> bool {
        matches!(self, ReadyState::Ready(_) | ReadyState::Failed(_))
    }
}

pub struct Readiness<T> {
    tx: watch::Sender<ReadyState<T>>,
    name: &'static str,
}

impl<T> Readiness<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ReadyState::Uninitialized);
        Self { tx, name }
    }

    /// Already-settled readiness, for backends with nothing to load.
    pub fn ready(name: &'static str, value: T) -> Self {
        let (tx, _rx) = watch::channel(ReadyState::Ready(Arc::new(value)));
        Self { tx, name }
    }

    /// Claims the initialization. Returns `false` if another caller already did.
    pub fn begin(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, ReadyState::Uninitialized) {
                *state = ReadyState::Initializing;
                true
            } else {
                false
            }
        })
    }

    pub fn complete(&self, value: T) {
        tracing::info!(backend = self.name, "backend ready");
        self.tx.send_replace(ReadyState::Ready(Arc::new(value)));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(backend = self.name, %reason, "backend failed to initialize");
        self.tx.send_replace(ReadyState::Failed(reason));
    }

    pub fn state(&self) -> ReadyState<T> {
        self.tx.borrow().clone()
    }

    /// Suspends until the backend is ready or has failed.
    pub async fn wait(&self) -> Result<Arc<T>, Error> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(ReadyState::is_settled)
            .await
            .map_err(|_| Error::UpstreamUnavailable(format!("{} backend dropped", self.name)))?;
        match &*settled {
            ReadyState::Ready(value) => Ok(Arc::clone(value)),
            ReadyState::Failed(reason) => Err(Error::UpstreamUnavailable(format!(
                "{} backend failed: {reason}",
                self.name
            ))),
            ReadyState::Uninitialized | ReadyState::Initializing => {
                unreachable!("wait_for only returns settled states")
            }
        }
    }
}
