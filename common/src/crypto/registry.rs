// Callback correlation registry
//
// Maps request ids to completion actions. Entries are consumed exactly
// once by `complete`, removed explicitly by `remove`, or evicted by the
// periodic expiry sweep. Nothing else may drop an entry.

use crate::errors::{CallbackError, HandlerError};
use crate::models::OperationStatus;
use crate::store::{transition_status, OperationStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Action invoked when the crypto service answers for a request id.
/// Runs at most once.
pub type CompletionAction = Box<dyn FnOnce() -> Result<(), HandlerError> + Send>;

struct PendingCallback {
    action: CompletionAction,
    registered_at: DateTime<Utc>,
}

/// In-memory correlation map for outstanding crypto callbacks
pub struct CallbackRegistry {
    pending: Mutex<HashMap<String, PendingCallback>>,
    expiry: ChronoDuration,
}

impl CallbackRegistry {
    pub fn new(expiry_minutes: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            expiry: ChronoDuration::minutes(expiry_minutes as i64),
        }
    }

    /// Register a completion action for a request id.
    ///
    /// Re-registering an id replaces the previous action; the replaced
    /// action is dropped without being invoked.
    pub async fn register(
        &self,
        request_id: &str,
        action: CompletionAction,
    ) -> Result<(), CallbackError> {
        if request_id.trim().is_empty() {
            return Err(CallbackError::InvalidArgument(
                "request id cannot be empty".to_string(),
            ));
        }

        let mut pending = self.pending.lock().await;
        if pending
            .insert(
                request_id.to_string(),
                PendingCallback {
                    action,
                    registered_at: Utc::now(),
                },
            )
            .is_some()
        {
            warn!(request_id = request_id, "Replaced existing callback registration");
        }
        Ok(())
    }

    /// Consume the entry for a request id and run its action.
    ///
    /// Returns `None` when no entry exists. The entry is removed before
    /// the action runs, so a concurrent second delivery finds nothing.
    pub async fn complete(&self, request_id: &str) -> Option<Result<(), HandlerError>> {
        let entry = self.pending.lock().await.remove(request_id)?;
        Some((entry.action)())
    }

    /// Remove an entry without invoking its action
    pub async fn remove(&self, request_id: &str) -> bool {
        self.pending.lock().await.remove(request_id).is_some()
    }

    /// Whether an entry is registered for the request id
    pub async fn has(&self, request_id: &str) -> bool {
        self.pending.lock().await.contains_key(request_id)
    }

    /// Number of outstanding entries
    pub async fn count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Request ids currently registered, for diagnostics
    pub async fn active_request_ids(&self) -> Vec<String> {
        self.pending.lock().await.keys().cloned().collect()
    }

    /// Remove entries older than the configured expiry and return their ids.
    /// Expired actions are dropped, never invoked.
    pub async fn sweep_expired(&self) -> Vec<String> {
        self.sweep_expired_at(Utc::now()).await
    }

    async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut pending = self.pending.lock().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| now - entry.registered_at > self.expiry)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            pending.remove(id);
        }
        expired
    }

    #[cfg(test)]
    async fn backdate(&self, request_id: &str, minutes: i64) {
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.get_mut(request_id) {
            entry.registered_at = entry.registered_at - ChronoDuration::minutes(minutes);
        }
    }
}

/// Run the expiry sweep on an interval. Swept operations are marked
/// TIMEOUT in the store.
#[instrument(skip(registry, store))]
pub async fn run_sweeper(
    registry: Arc<CallbackRegistry>,
    store: Arc<dyn OperationStore>,
    interval_minutes: u64,
) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(interval_minutes * 60));
    // First tick fires immediately; skip it so a restart does not sweep early
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let expired = registry.sweep_expired().await;
        if expired.is_empty() {
            continue;
        }

        info!(count = expired.len(), "Swept expired callback registrations");
        for request_id in expired {
            if let Err(e) = transition_status(
                store.as_ref(),
                &request_id,
                OperationStatus::Timeout,
                Some("Callback registration expired"),
            )
            .await
            {
                error!(request_id = %request_id, error = %e, "Failed to mark swept operation");
            }
        }
    }
}
