//! Bounded pool of warmed sandbox children. Acquisition blocks on a
//! semaphore sized to the pool; release either `reset`s a child back to
//! idle or destroys it and lets the next acquisition spawn a fresh one.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::executor::child::SandboxChild;

struct PoolInner {
    binary_path: String,
    max_frame_bytes: u32,
    idle: Mutex<Vec<SandboxChild>>,
}

/// A bounded pool of sandbox children, shared across concurrent queries.
///
/// Each query acquires exactly one child at a time via [`Pool::acquire`]
/// and must release it (on success) or destroy it (on failure) before
/// dropping the handle — see [`PooledChild`].
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
    semaphore: Arc<Semaphore>,
}

impl Pool {
    /// Creates a pool that spawns children of `binary_path` on demand,
    /// up to `size` concurrently checked out.
    #[must_use]
    pub fn new(binary_path: impl Into<String>, size: usize, max_frame_bytes: u32) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                binary_path: binary_path.into(),
                max_frame_bytes,
                idle: Mutex::new(Vec::with_capacity(size)),
            }),
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    /// Acquires a child, reusing an idle one if available or spawning a
    /// fresh one otherwise. The returned guard must be consumed via
    /// [`PooledChild::release`] or [`PooledChild::destroy`].
    pub async fn acquire(&self) -> Result<PooledChild, SandboxError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::ChildDied("pool semaphore closed".to_string()))?;

        let existing = self.inner.idle.lock().await.pop();
        let child = match existing {
            Some(child) => {
                debug!("reusing idle sandbox child");
                child
            }
            None => {
                debug!("spawning fresh sandbox child");
                SandboxChild::spawn(&self.inner.binary_path, self.inner.max_frame_bytes)?
            }
        };

        Ok(PooledChild {
            inner: Arc::clone(&self.inner),
            child: Some(child),
            _permit: permit,
        })
    }
}

/// A checked-out sandbox child. Exactly one of [`release`](Self::release)
/// or [`destroy`](Self::destroy) must be called before this value is
/// dropped; a caller that forgets leaks the slot for the process's
/// lifetime rather than silently recycling a child in an unknown state.
pub struct PooledChild {
    inner: Arc<PoolInner>,
    child: Option<SandboxChild>,
    _permit: OwnedSemaphorePermit,
}

impl PooledChild {
    /// Borrows the underlying child for sending commands.
    pub fn child_mut(&mut self) -> &mut SandboxChild {
        self.child.as_mut().expect("child taken before release/destroy")
    }

    /// Resets the child and returns it to the idle set. If `reset`
    /// fails, the child is destroyed instead.
    pub async fn release(mut self) {
        let mut child = self.child.take().expect("child taken before release/destroy");
        match child.reset().await {
            Ok(()) => self.inner.idle.lock().await.push(child),
            Err(e) => {
                warn!(error = %e, "reset failed, destroying sandbox child instead of recycling");
                child.kill().await;
            }
        }
    }

    /// Destroys the child outright (used after a protocol failure or a
    /// cancellation that may have left the child mid-exec).
    pub async fn destroy(mut self) {
        if let Some(mut child) = self.child.take() {
            child.kill().await;
        }
    }
}

impl Drop for PooledChild {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("PooledChild dropped without release()/destroy(); sandbox child leaked until process exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_cloneable_and_shares_state() {
        let pool = Pool::new("shesha-sandbox-runner", 2, 1024);
        let cloned = pool.clone();
        assert_eq!(Arc::strong_count(&pool.inner), Arc::strong_count(&cloned.inner));
    }
}
