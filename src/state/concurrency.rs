//! Deploy lock guarding the project working tree
//!
//! At most one deploy holds the slot at a time. What a second trigger does
//! while the slot is taken depends on the configured [`LockPolicy`].

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::config::types::LockPolicy;
use crate::types::{Error, Result};

/// Single-slot lock around the deployment executor
#[derive(Clone)]
pub struct DeployLock {
    policy: LockPolicy,
    slot: Arc<Semaphore>,
    /// Deploy ID of the current holder
    holder: Arc<Mutex<Option<String>>>,
}

impl DeployLock {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy,
            slot: Arc::new(Semaphore::new(1)),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Whether a deploy currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Deploy ID of the current holder, if any
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }

    /// Take the slot for `deploy_id` according to the policy
    ///
    /// Under `reject` a busy slot yields [`Error::DeploymentInProgress`];
    /// under `serialize` this waits; under `allow` nothing is taken.
    pub async fn acquire(&self, deploy_id: &str) -> Result<DeployGuard> {
        let permit = match self.policy {
            LockPolicy::Allow => {
                debug!(deploy_id = %deploy_id, "Deploy lock disabled, running unserialized");
                return Ok(DeployGuard::unlocked());
            }
            LockPolicy::Serialize => {
                if self.is_busy() {
                    info!(
                        deploy_id = %deploy_id,
                        held_by = ?self.holder(),
                        "Waiting for running deployment to finish"
                    );
                }
                self.slot
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Application("Deploy lock was closed".to_string()))?
            }
            LockPolicy::Reject => match self.slot.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    let held_by = self.holder().unwrap_or_else(|| "unknown".to_string());
                    warn!(
                        deploy_id = %deploy_id,
                        held_by = %held_by,
                        "Rejecting deployment, another one is in progress"
                    );
                    return Err(Error::DeploymentInProgress { held_by });
                }
                Err(TryAcquireError::Closed) => {
                    return Err(Error::Application("Deploy lock was closed".to_string()));
                }
            },
        };

        *self.holder.lock() = Some(deploy_id.to_string());

        Ok(DeployGuard {
            permit: Some(permit),
            holder: Some(self.holder.clone()),
            deploy_id: deploy_id.to_string(),
        })
    }
}

/// RAII guard that releases the deploy slot when dropped
pub struct DeployGuard {
    permit: Option<OwnedSemaphorePermit>,
    holder: Option<Arc<Mutex<Option<String>>>>,
    deploy_id: String,
}

impl DeployGuard {
    fn unlocked() -> Self {
        Self {
            permit: None,
            holder: None,
            deploy_id: String::new(),
        }
    }

    /// Whether this guard actually holds the slot
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        // Clear the holder before the permit goes back to the semaphore
        if let Some(holder) = self.holder.take() {
            let mut current = holder.lock();
            if current.as_deref() == Some(self.deploy_id.as_str()) {
                *current = None;
            }
        }
        if self.permit.take().is_some() {
            debug!(deploy_id = %self.deploy_id, "Deploy lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = DeployLock::new(LockPolicy::Serialize);
        assert!(!lock.is_busy());

        {
            let guard = lock.acquire("deploy-1").await.unwrap();
            assert!(guard.is_held());
            assert!(lock.is_busy());
            assert_eq!(lock.holder().as_deref(), Some("deploy-1"));
        } // guard dropped here

        assert!(!lock.is_busy());
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_second_deploy() {
        let lock = DeployLock::new(LockPolicy::Reject);

        let _guard = lock.acquire("deploy-1").await.unwrap();
        let result = lock.acquire("deploy-2").await;

        match result {
            Err(Error::DeploymentInProgress { held_by }) => assert_eq!(held_by, "deploy-1"),
            Err(e) => panic!("Expected DeploymentInProgress, got: {}", e),
            Ok(_) => panic!("Expected DeploymentInProgress, got a guard"),
        }
    }

    #[tokio::test]
    async fn test_reject_policy_allows_after_release() {
        let lock = DeployLock::new(LockPolicy::Reject);

        drop(lock.acquire("deploy-1").await.unwrap());
        assert!(lock.acquire("deploy-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_serialize_policy_waits_for_slot() {
        let lock = DeployLock::new(LockPolicy::Serialize);
        let first = lock.acquire("deploy-1").await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire("deploy-2").await.unwrap();
                lock.holder()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(lock.holder().as_deref(), Some("deploy-1"));

        drop(first);
        let holder_inside = waiter.await.unwrap();
        assert_eq!(holder_inside.as_deref(), Some("deploy-2"));
        assert!(!lock.is_busy());
    }

    #[tokio::test]
    async fn test_allow_policy_never_blocks() {
        let lock = DeployLock::new(LockPolicy::Allow);

        let first = lock.acquire("deploy-1").await.unwrap();
        let second = lock.acquire("deploy-2").await.unwrap();

        assert!(!first.is_held());
        assert!(!second.is_held());
        assert!(!lock.is_busy());
    }
}
