//! HTTP handlers for declared records.
//! Applying or deleting a record only changes the store; reconciliation is
//! triggered separately through `/reconcile`.

use crate::{
    errors::AppError,
    models::{
        bucket::Bucket,
        meta::{Declared, ObjectKey, ObjectMeta, Resource},
        policy::Policy,
        secret::SecretRecord,
        user::User,
    },
    services::record_store::{Api, DeleteOutcome, RecordStore},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use std::{fmt, str::FromStr};
use tracing::info;

/// Plural path segment naming a record kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Buckets,
    Policies,
    Users,
    Secrets,
}

impl FromStr for RecordKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buckets" => Ok(RecordKind::Buckets),
            "policies" => Ok(RecordKind::Policies),
            "users" => Ok(RecordKind::Users),
            "secrets" => Ok(RecordKind::Secrets),
            other => Err(AppError::not_found(format!("unknown kind `{}`", other))),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Buckets => "buckets",
            RecordKind::Policies => "policies",
            RecordKind::Users => "users",
            RecordKind::Secrets => "secrets",
        })
    }
}

fn read_only(kind: RecordKind) -> AppError {
    AppError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("{} are managed by the operator", kind),
    )
}

/// `PUT /apis/{kind}/{namespace}/{name}` with the spec as the JSON body.
///
/// Creates the record or replaces its spec. Status and finalizers are kept.
pub async fn apply_record(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Json(spec): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let kind: RecordKind = kind.parse()?;
    let key = ObjectKey::new(namespace, name);
    let (created, record) = match kind {
        RecordKind::Buckets => apply::<Bucket>(&state, key, spec).await?,
        RecordKind::Policies => apply::<Policy>(&state, key, spec).await?,
        RecordKind::Users => apply::<User>(&state, key, spec).await?,
        RecordKind::Secrets => return Err(read_only(kind)),
    };
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record)))
}

async fn apply<R: Declared>(
    state: &AppState,
    key: ObjectKey,
    spec: Value,
) -> Result<(bool, Value), AppError> {
    let spec: R::Spec = serde_json::from_value(spec)?;
    let api = Api::<R>::new(state.records.clone());

    let (created, stored) = match api.get_opt(&key).await? {
        Some(mut existing) => {
            if existing.meta().is_deleting() {
                return Err(AppError::new(
                    StatusCode::CONFLICT,
                    format!("{} {} is being deleted", R::KIND, key),
                ));
            }
            existing.set_spec(spec);
            (false, api.replace(&existing).await?)
        }
        None => {
            let fresh = R::from_spec(ObjectMeta::new(key.clone()), spec);
            (true, api.create(&fresh).await?)
        }
    };
    info!(kind = R::KIND, %key, created, "record applied");
    Ok((created, serde_json::to_value(stored)?))
}

/// `GET /apis/{kind}/{namespace}/{name}`
pub async fn get_record(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let kind: RecordKind = kind.parse()?;
    let key = ObjectKey::new(namespace, name);
    let record = match kind {
        RecordKind::Buckets => fetch::<Bucket>(&state, &key).await?,
        RecordKind::Policies => fetch::<Policy>(&state, &key).await?,
        RecordKind::Users => fetch::<User>(&state, &key).await?,
        RecordKind::Secrets => fetch::<SecretRecord>(&state, &key).await?,
    };
    Ok(Json(record))
}

async fn fetch<R: Resource>(state: &AppState, key: &ObjectKey) -> Result<Value, AppError> {
    let api = Api::<R>::new(state.records.clone());
    Ok(serde_json::to_value(api.get(key).await?)?)
}

/// `GET /apis/{kind}/{namespace}` lists the namespace, ordered by name.
pub async fn list_records(
    State(state): State<AppState>,
    Path((kind, namespace)): Path<(String, String)>,
) -> Result<Json<Vec<Value>>, AppError> {
    let kind: RecordKind = kind.parse()?;
    let records = match kind {
        RecordKind::Buckets => list::<Bucket>(&state, &namespace).await?,
        RecordKind::Policies => list::<Policy>(&state, &namespace).await?,
        RecordKind::Users => list::<User>(&state, &namespace).await?,
        RecordKind::Secrets => list::<SecretRecord>(&state, &namespace).await?,
    };
    Ok(Json(records))
}

async fn list<R: Resource>(state: &AppState, namespace: &str) -> Result<Vec<Value>, AppError> {
    let api = Api::<R>::new(state.records.clone());
    api.list(namespace)
        .await?
        .into_iter()
        .map(|record| serde_json::to_value(record).map_err(AppError::from))
        .collect()
}

/// `DELETE /apis/{kind}/{namespace}/{name}` requests deletion.
///
/// Answers 202 while finalizers still hold the record, 200 once it is gone.
pub async fn delete_record(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let kind: RecordKind = kind.parse()?;
    let key = ObjectKey::new(namespace, name);
    let outcome = match kind {
        RecordKind::Buckets => state.records.delete(Bucket::KIND, &key).await?,
        RecordKind::Policies => state.records.delete(Policy::KIND, &key).await?,
        RecordKind::Users => state.records.delete(User::KIND, &key).await?,
        RecordKind::Secrets => return Err(read_only(kind)),
    };
    info!(%kind, %key, ?outcome, "deletion requested");
    let status = match &outcome {
        DeleteOutcome::Deleted => StatusCode::OK,
        DeleteOutcome::Pending { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}
