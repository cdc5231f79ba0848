use crate::{LdapMuxError, Result};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Lets one operation at a time build and write its request.
#[derive(Debug)]
pub struct OperationGate {
    semaphore: Semaphore,
}

/// Held while a request is built and written; dropping it opens the gate.
#[derive(Debug)]
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl OperationGate {
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
        }
    }

    pub async fn enter(&self) -> Result<GatePermit<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LdapMuxError::ConnectionClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for OperationGate {
    fn default() -> Self {
        Self::new()
    }
}
