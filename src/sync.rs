// ABOUTME: Pull and push flows: refresh SyncTokens from queries, apply staged edits
// ABOUTME: Applies edits sequentially with per-edit outcomes and no batch abort on conflicts

use crate::{
    api::ApiClient,
    auth::TokenManager,
    model::{EntityKind, EntityVersion, ItemEdit},
    sync_state::SyncTracker,
    util::LastUpdatedFormatter,
    Error, Result,
};
use serde_json::Value;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation for a batch. Checked between edits only, so an
/// update already on the wire is always allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Routes SIGINT and SIGTERM to this flag. The first signal cancels the
    /// batch after the current edit; a second one exits immediately.
    pub fn register_signals(&self) -> Result<()> {
        for signal in [SIGINT, SIGTERM] {
            flag::register_conditional_shutdown(signal, 130, Arc::clone(&self.0))?;
            flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Succeeded {
        body: Value,
    },
    Failed {
        status: Option<u16>,
        body: String,
        reason: String,
    },
    NotAttempted {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditResult {
    pub entity_id: String,
    /// Token sent with the update (0 if the entity was never observed).
    pub sync_token: u64,
    pub outcome: EditOutcome,
}

impl EditResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, EditOutcome::Succeeded { .. })
    }
}

/// Per-edit outcomes in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub results: Vec<EditResult>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, EditOutcome::Failed { .. }))
            .count()
    }

    pub fn not_attempted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, EditOutcome::NotAttempted { .. }))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(EditResult::is_success)
    }
}

fn failure(e: Error) -> EditOutcome {
    let status = e.status();
    let reason = e.to_string();
    let body = match e {
        Error::Conflict { body, .. } | Error::MalformedResponse { body, .. } => body,
        Error::Api { message, .. } => message,
        _ => String::new(),
    };
    EditOutcome::Failed {
        status,
        body,
        reason,
    }
}

/// Errors after which every later edit in the run would fail the same way.
fn ends_run(e: &Error) -> bool {
    matches!(e, Error::AuthExpired | Error::NotAuthenticated(_))
}

pub struct Orchestrator<'a> {
    client: &'a ApiClient,
    tokens: &'a mut TokenManager,
    formatter: LastUpdatedFormatter,
    cancel: CancelFlag,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a ApiClient, tokens: &'a mut TokenManager) -> Self {
        Orchestrator {
            client,
            tokens,
            formatter: LastUpdatedFormatter::utc(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_formatter(mut self, formatter: LastUpdatedFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Queries every entity of `kind` and records their SyncTokens.
    pub fn pull(&mut self, kind: EntityKind, tracker: &mut SyncTracker) -> Result<Vec<Value>> {
        let client = self.client;
        let entities = self.tokens.ensure_valid(|cred| client.query(kind, cred))?;

        let versions: Vec<EntityVersion> = entities
            .iter()
            .filter_map(EntityVersion::from_entity)
            .collect();
        let skipped = entities.len() - versions.len();
        if skipped > 0 {
            tracing::warn!(%kind, skipped, "entities without a usable Id/SyncToken were not tracked");
        }

        tracker.observe(&versions)?;
        tracing::info!(%kind, count = entities.len(), "pulled entities");
        Ok(entities)
    }

    /// Applies `edits` one at a time. The tracker is only read: a successful
    /// update does not advance the stored token, the next pull does.
    pub fn apply_updates(
        &mut self,
        edits: &[ItemEdit],
        tracker: &SyncTracker,
        mut on_result: impl FnMut(&EditResult),
    ) -> BatchResult {
        let mut batch = BatchResult {
            results: Vec::with_capacity(edits.len()),
        };
        let mut halted: Option<String> = None;

        for edit in edits {
            if halted.is_none() && self.cancel.is_cancelled() {
                tracing::info!("batch cancelled");
                halted = Some("batch cancelled".into());
            }

            let sync_token = tracker.token_for(&edit.id);
            let outcome = if let Some(reason) = halted.clone() {
                EditOutcome::NotAttempted { reason }
            } else {
                if !tracker.is_tracked(&edit.id) {
                    tracing::warn!(
                        id = %edit.id,
                        "entity was never observed; update will likely be rejected as stale"
                    );
                }
                match self.apply_one(edit, sync_token) {
                    Ok(body) => {
                        tracing::info!(id = %edit.id, sync_token, "item updated");
                        EditOutcome::Succeeded { body }
                    }
                    Err(e) => {
                        tracing::warn!(id = %edit.id, sync_token, error = %e, "item update failed");
                        if ends_run(&e) {
                            halted = Some(e.to_string());
                        }
                        failure(e)
                    }
                }
            };

            let result = EditResult {
                entity_id: edit.id.clone(),
                sync_token,
                outcome,
            };
            on_result(&result);
            batch.results.push(result);
        }

        batch
    }

    fn apply_one(&mut self, edit: &ItemEdit, sync_token: u64) -> Result<Value> {
        let payload = edit.to_payload(sync_token, &self.formatter.now())?;
        let client = self.client;
        self.tokens
            .ensure_valid(|cred| client.update(EntityKind::Item, &edit.id, cred, &payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(outcome: EditOutcome) -> EditResult {
        EditResult {
            entity_id: "1".into(),
            sync_token: 0,
            outcome,
        }
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    #[cfg(unix)]
    fn test_interrupt_sets_cancel_flag() {
        let flag = CancelFlag::new();
        flag.register_signals().unwrap();
        assert!(!flag.is_cancelled());

        signal_hook::low_level::raise(SIGINT).unwrap();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_batch_counts() {
        let batch = BatchResult {
            results: vec![
                result(EditOutcome::Succeeded { body: json!({}) }),
                result(EditOutcome::Failed {
                    status: Some(400),
                    body: "stale".into(),
                    reason: "conflict".into(),
                }),
                result(EditOutcome::NotAttempted {
                    reason: "cancelled".into(),
                }),
            ],
        };
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.succeeded(), 1);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.not_attempted(), 1);
        assert!(!batch.all_succeeded());
    }

    #[test]
    fn test_conflict_failure_keeps_status_and_body() {
        let outcome = failure(Error::Conflict {
            entity_id: "5".into(),
            status: 400,
            body: "Stale Object Error".into(),
        });
        match outcome {
            EditOutcome::Failed { status, body, .. } => {
                assert_eq!(status, Some(400));
                assert_eq!(body, "Stale Object Error");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_transient_failure_has_no_status() {
        match failure(Error::TransientNetwork("timed out".into())) {
            EditOutcome::Failed { status, .. } => assert_eq!(status, None),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_only_auth_loss_ends_run() {
        assert!(ends_run(&Error::AuthExpired));
        assert!(!ends_run(&Error::Conflict {
            entity_id: "1".into(),
            status: 400,
            body: String::new(),
        }));
        assert!(!ends_run(&Error::TransientNetwork("reset".into())));
    }
}
