use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::UmbrellaScope;

static PROCESS_UMBRELLA_SENT: AtomicBool = AtomicBool::new(false);

/// Opaque per-batch calling context.
///
/// One context is shared by every request of a batch (for instance all
/// external-data references of one rendering pass). It carries the flag that
/// keeps the umbrella "not fetched" error from being reported more than once
/// within its scope.
#[derive(Debug, Clone)]
pub struct CallContext {
    batch_id: Uuid,
    scope: UmbrellaScope,
    umbrella_sent: Arc<AtomicBool>,
}

impl CallContext {
    pub fn new(scope: UmbrellaScope) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            scope,
            umbrella_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn scope(&self) -> UmbrellaScope {
        self.scope
    }

    /// Returns `true` exactly once per scope: the caller that gets `true`
    /// emits the umbrella error.
    pub fn claim_umbrella(&self) -> bool {
        let flag = match self.scope {
            UmbrellaScope::PerBatch => self.umbrella_sent.as_ref(),
            UmbrellaScope::PerProcess => &PROCESS_UMBRELLA_SENT,
        };
        !flag.swap(true, Ordering::SeqCst)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(UmbrellaScope::PerBatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_batch_claim_is_granted_once_per_context() {
        let first = CallContext::default();
        let shared = first.clone();
        assert!(first.claim_umbrella());
        assert!(!shared.claim_umbrella());

        let other = CallContext::default();
        assert!(other.claim_umbrella());
        assert_ne!(first.batch_id(), other.batch_id());
    }

    #[test]
    fn per_process_claim_spans_contexts() {
        let first = CallContext::new(UmbrellaScope::PerProcess);
        let second = CallContext::new(UmbrellaScope::PerProcess);
        let granted = [first.claim_umbrella(), second.claim_umbrella()];
        assert!(granted.iter().filter(|claimed| **claimed).count() <= 1);
        assert!(!second.claim_umbrella());
    }
}
