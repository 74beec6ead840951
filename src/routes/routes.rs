//! Defines routes for declared records and reconciliation.
//!
//! ## Structure
//! - **Record endpoints**
//!   - `GET    /apis/{kind}/{namespace}` list records in a namespace
//!   - `PUT    /apis/{kind}/{namespace}/{name}` apply a spec
//!   - `GET    /apis/{kind}/{namespace}/{name}` read a record
//!   - `DELETE /apis/{kind}/{namespace}/{name}` request deletion
//!
//! - **Reconcile endpoint**
//!   - `POST   /reconcile/{kind}/{namespace}/{name}` run one reconcile
//!
//! `kind` is one of `buckets`, `policies`, `users` or the read-only `secrets`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        reconcile_handlers::reconcile_record,
        record_handlers::{apply_record, delete_record, get_record, list_records},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the operator router.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Record routes
        .route("/apis/{kind}/{namespace}", get(list_records))
        .route(
            "/apis/{kind}/{namespace}/{name}",
            put(apply_record).get(get_record).delete(delete_record),
        )
        // Notification entry point
        .route("/reconcile/{kind}/{namespace}/{name}", post(reconcile_record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reconcilers::Action,
        services::credentials::CredentialGenerator,
        testing::{FailingEntropy, FakeAdmin, SeededEntropy, memory_store},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    async fn state() -> (AppState, Arc<FakeAdmin>) {
        let admin = Arc::new(FakeAdmin::default());
        let generator = CredentialGenerator::new(Arc::new(SeededEntropy::new(7)), 32);
        let state = AppState::new(
            memory_store().await,
            admin.clone(),
            generator,
            Duration::from_secs(5),
        );
        (state, admin)
    }

    async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = routes()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_endpoints_answer() {
        let (state, _) = state().await;
        let (status, body) = send(&state, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&state, Method::GET, "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["record_store"]["ok"], true);
    }

    #[tokio::test]
    async fn apply_creates_then_updates_keeping_status() {
        let (state, _) = state().await;
        let uri = "/apis/buckets/storage/photos";

        let (status, body) =
            send(&state, Method::PUT, uri, Some(json!({"public": true}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["spec"]["public"], true);

        let (status, _) =
            send(&state, Method::POST, "/reconcile/buckets/storage/photos", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(&state, Method::PUT, uri, Some(json!({"public": false}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spec"]["public"], false);
        assert_eq!(
            body["status"]["conditions"].as_array().map(Vec::len),
            Some(2)
        );
    }

    #[tokio::test]
    async fn reconcile_returns_the_action() {
        let (state, admin) = state().await;
        send(
            &state,
            Method::PUT,
            "/apis/policies/storage/bob-reports",
            Some(json!({"user": "bob", "read": true, "write": true})),
        )
        .await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/reconcile/policies/storage/bob-reports",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::to_value(Action::Requeue { after_secs: 10 }).unwrap()
        );
        assert_eq!(admin.count("add_canned_policy"), 1);
    }

    #[tokio::test]
    async fn user_secret_is_readable_but_not_writable() {
        let (state, _) = state().await;
        send(&state, Method::PUT, "/apis/users/storage/carol", Some(json!({}))).await;
        send(&state, Method::POST, "/reconcile/users/storage/carol", None).await;

        let (status, body) = send(
            &state,
            Method::GET,
            "/apis/secrets/storage/carol-credentials",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["AWS_ACCESS_KEY_ID"], "carol");

        let (status, _) = send(
            &state,
            Method::PUT,
            "/apis/secrets/storage/carol-credentials",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn delete_waits_for_finalizer_then_reconcile_finishes_it() {
        let (state, admin) = state().await;
        let uri = "/apis/buckets/storage/photos";
        send(&state, Method::PUT, uri, Some(json!({}))).await;
        send(&state, Method::POST, "/reconcile/buckets/storage/photos", None).await;

        let (status, body) = send(&state, Method::DELETE, uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "pending");

        let (status, body) =
            send(&state, Method::POST, "/reconcile/buckets/storage/photos", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "await_change");
        assert_eq!(admin.count("remove_bucket"), 1);

        let (status, _) = send(&state, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_kind_is_not_found() {
        let (state, _) = state().await;
        let (status, body) = send(&state, Method::GET, "/apis/widgets/storage", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn missing_bucket_reconcile_is_not_found() {
        let (state, _) = state().await;
        let (status, _) =
            send(&state, Method::POST, "/reconcile/buckets/storage/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!state.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn entropy_failure_shuts_the_server_down() {
        let admin = Arc::new(FakeAdmin::default());
        let generator = CredentialGenerator::new(Arc::new(FailingEntropy), 32);
        let state = AppState::new(
            memory_store().await,
            admin.clone(),
            generator,
            Duration::from_secs(5),
        );
        send(&state, Method::PUT, "/apis/users/storage/carol", Some(json!({}))).await;

        let (status, _) =
            send(&state, Method::POST, "/reconcile/users/storage/carol", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.shutdown.is_cancelled());
        assert!(state.fatal.get().is_some());
        assert_eq!(admin.count("add_user"), 0);

        let (status, _) = send(&state, Method::GET, "/readyz", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
