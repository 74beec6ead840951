//! Notification entry point for the external work queue.

use crate::{
    errors::AppError,
    handlers::record_handlers::RecordKind,
    models::meta::ObjectKey,
    reconcilers::{Action, Reconcile, ReconcileError, reconcile, run_bounded},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{error, info, warn};

/// `POST /reconcile/{kind}/{namespace}/{name}`
///
/// Runs one reconcile for the key under the configured deadline and answers
/// with the requeue decision. Failures come back as errors for the queue's
/// own backoff; a broken random source stops the process.
pub async fn reconcile_record(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<Action>, AppError> {
    let kind: RecordKind = kind.parse()?;
    let key = ObjectKey::new(namespace, name);

    let outcome = match kind {
        RecordKind::Buckets => run(&state, state.buckets.as_ref(), &key).await,
        RecordKind::Policies => run(&state, state.policies.as_ref(), &key).await,
        RecordKind::Users => run(&state, state.users.as_ref(), &key).await,
        RecordKind::Secrets => {
            return Err(AppError::bad_request(
                "secrets are reconciled through their owning user",
            ));
        }
    };

    match outcome {
        Ok(action) => {
            info!(%kind, %key, ?action, "reconciled");
            Ok(Json(action))
        }
        Err(err) if err.is_fatal() => {
            error!(%kind, %key, error = %err, "unrecoverable fault, shutting down");
            state.fail(err.to_string());
            Err(AppError::internal(err.to_string()))
        }
        Err(err) => {
            warn!(%kind, %key, error = %err, "reconcile failed");
            Err(err.into())
        }
    }
}

async fn run<K: Reconcile>(
    state: &AppState,
    reconciler: &K,
    key: &ObjectKey,
) -> Result<Action, ReconcileError> {
    run_bounded(
        reconcile(reconciler, key),
        state.reconcile_timeout,
        &state.shutdown,
    )
    .await
}
