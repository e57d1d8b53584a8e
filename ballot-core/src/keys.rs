//! Threshold-encryption public key retrieval.

use std::{sync::Arc, time::Duration};

use futures_util::future::BoxFuture;

use crate::{error::Error, retry::RetryPolicy};

pub type PublicKey = [u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key service unreachable: {0}")]
    Unavailable(String),
    #[error("key generation has not completed")]
    NotReady,
}

/// The MPC cluster's key endpoint. `Ok(None)` means keygen is still running.
pub trait KeyService: Send + Sync {
    fn public_key<'a>(&'a self, deployment_id: &'a str)
        -> BoxFuture<'a, Result<Option<PublicKey>, KeyError>>;
}

/// Polls a [`KeyService`] under one bounded retry policy.
#[derive(Clone)]
pub struct KeyRetriever {
    service: Arc<dyn KeyService>,
    policy: RetryPolicy,
}

impl KeyRetriever {
    pub const DEFAULT_POLICY: RetryPolicy = RetryPolicy::fixed(30, Duration::from_secs(5));

    pub fn new(service: Arc<dyn KeyService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub async fn public_key(&self, deployment_id: &str) -> Result<PublicKey, Error> {
        let fetch = || async {
            self.service
                .public_key(deployment_id)
                .await?
                .ok_or(KeyError::NotReady)
        };
        self.policy
            .run("mpc public key", fetch, |_: &KeyError| true)
            .await
            .map_err(|(err, attempts)| match err {
                KeyError::NotReady => Error::KeygenNotReady { attempts },
                KeyError::Unavailable(reason) => Error::UpstreamUnavailable(format!(
                    "key service after {attempts} attempts: {reason}"
                )),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::future;

    use super::*;

    /// Reports "not ready" until `ready_after` calls have been made.
    struct SlowKeygen {
        calls: AtomicU32,
        ready_after: u32,
    }

    impl KeyService for SlowKeygen {
        fn public_key<'a>(
            &'a self,
            _deployment_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<PublicKey>, KeyError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let key = (call >= self.ready_after).then_some([0xab; 32]);
            Box::pin(future::ready(Ok(key)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn key_arrives_within_budget() {
        let service = Arc::new(SlowKeygen {
            calls: AtomicU32::new(0),
            ready_after: 3,
        });
        let retriever = KeyRetriever::new(service.clone(), KeyRetriever::DEFAULT_POLICY);
        assert_eq!(retriever.public_key("mxe").await.unwrap(), [0xab; 32]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_is_keygen_not_ready() {
        let service = Arc::new(SlowKeygen {
            calls: AtomicU32::new(0),
            ready_after: u32::MAX,
        });
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        let retriever = KeyRetriever::new(service.clone(), policy);
        let err = retriever.public_key("mxe").await.unwrap_err();
        assert!(matches!(err, Error::KeygenNotReady { attempts: 5 }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 5);
    }
}
