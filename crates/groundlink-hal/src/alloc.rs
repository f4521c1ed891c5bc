use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tracing::debug;

use crate::error::{HalError, Result};

static GLOBAL: LazyLock<Arc<HandleAllocator>> = LazyLock::new(|| Arc::new(HandleAllocator::new()));

/// Hands out exclusive claims on named hardware resources.
///
/// A resource name can be held by at most one [`HandleClaim`] at a time; a
/// second request fails with [`HalError::AlreadyAllocated`] until the first
/// claim is released or dropped.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    claimed: Mutex<BTreeSet<String>>,
}

impl HandleAllocator {
    /// Create an isolated allocator (useful for tests and simulations).
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide allocator used by default constructors.
    pub fn global() -> Arc<HandleAllocator> {
        Arc::clone(&GLOBAL)
    }

    /// Claim `resource` exclusively.
    pub fn claim(self: &Arc<Self>, resource: impl Into<String>) -> Result<HandleClaim> {
        let resource = resource.into();
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(resource.clone()) {
            return Err(HalError::AlreadyAllocated { resource });
        }
        debug!(%resource, "hardware resource claimed");
        Ok(HandleClaim {
            allocator: Arc::clone(self),
            resource,
            released: false,
        })
    }

    /// Whether `resource` is currently claimed.
    pub fn is_claimed(&self, resource: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(resource)
    }

    fn release(&self, resource: &str) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource);
        debug!(%resource, "hardware resource released");
    }
}

/// Exclusive ownership of a named resource. Released on [`HandleClaim::release`] or drop.
#[derive(Debug)]
pub struct HandleClaim {
    allocator: Arc<HandleAllocator>,
    resource: String,
    released: bool,
}

impl HandleClaim {
    /// Name of the claimed resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Release the claim now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.allocator.release(&self.resource);
        }
    }
}

impl Drop for HandleClaim {
    fn drop(&mut self) {
        self.release_inner();
    }
}
