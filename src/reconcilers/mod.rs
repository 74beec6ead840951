//! Shared reconciliation state machine.
//!
//! `Fetched → (Deleting | Converging) → Done(Requeue)`. Each resource kind
//! plugs its teardown and convergence steps into [`Reconcile`]; [`reconcile`]
//! owns fetching, finalizer handling, and requeue timing.

pub mod bucket;
pub mod policy;
pub mod user;

use crate::{
    models::{
        conditions::HasConditions,
        meta::{ObjectKey, Resource},
    },
    services::{
        admin::AdminError,
        credentials::EntropyError,
        record_store::{Api, StoreError},
        secret_manager::SecretError,
    },
};
use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Requeue delay after every successful convergence.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(60);

/// What the caller's work queue should do with the key next.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Requeue { after_secs: u64 },
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Action::Requeue {
            after_secs: after.as_secs(),
        }
    }

    pub fn await_change() -> Self {
        Action::AwaitChange
    }
}

/// Outcome of the resource-specific convergence phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// Every step is satisfied; requeue at the kind's interval.
    Done,
    /// A dependency is not ready yet; retry sooner.
    RetryAfter(Duration),
}

/// The step an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    GetManifest,
    AddFinalizer,
    RemoveFinalizer,
    UpdateStatus,
    CheckBucket,
    CreateBucket,
    RemoveBucket,
    EncodePolicy,
    SetBucketPolicy,
    AddPolicy,
    RemovePolicy,
    SetPolicy,
    CreateUser,
    UpdateUser,
    RemoveUser,
    UserInfo,
    SetSecret,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::GetManifest => "get manifest",
            Step::AddFinalizer => "add finalizer",
            Step::RemoveFinalizer => "remove finalizer",
            Step::UpdateStatus => "update status",
            Step::CheckBucket => "check bucket",
            Step::CreateBucket => "create bucket",
            Step::RemoveBucket => "remove bucket",
            Step::EncodePolicy => "encode policy",
            Step::SetBucketPolicy => "set bucket policy",
            Step::AddPolicy => "add policy",
            Step::RemovePolicy => "remove policy",
            Step::SetPolicy => "set policy",
            Step::CreateUser => "create user",
            Step::UpdateUser => "update user",
            Step::RemoveUser => "remove user",
            Step::UserInfo => "user info",
            Step::SetSecret => "set secret",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{step}: {source}")]
    Store {
        step: Step,
        #[source]
        source: StoreError,
    },
    #[error("{step}: {source}")]
    Admin {
        step: Step,
        #[source]
        source: AdminError,
    },
    #[error("{step}: {source}")]
    Encode {
        step: Step,
        #[source]
        source: serde_json::Error,
    },
    /// Broken random source. The process should stop rather than retry.
    #[error("generate credentials: {0}")]
    Entropy(#[from] EntropyError),
    #[error("reconcile cancelled")]
    Cancelled,
    #[error("reconcile exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl ReconcileError {
    pub fn step(&self) -> Option<Step> {
        match self {
            ReconcileError::Store { step, .. }
            | ReconcileError::Admin { step, .. }
            | ReconcileError::Encode { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Entropy(_))
    }
}

impl From<(Step, SecretError)> for ReconcileError {
    fn from((step, err): (Step, SecretError)) -> Self {
        match err {
            SecretError::Store(source) => ReconcileError::Store { step, source },
            SecretError::Entropy(err) => ReconcileError::Entropy(err),
        }
    }
}

/// Annotate an external failure with the step that produced it.
pub trait StepExt<T> {
    fn step(self, step: Step) -> Result<T, ReconcileError>;
}

impl<T> StepExt<T> for Result<T, StoreError> {
    fn step(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Store { step, source })
    }
}

impl<T> StepExt<T> for Result<T, AdminError> {
    fn step(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Admin { step, source })
    }
}

impl<T> StepExt<T> for Result<T, serde_json::Error> {
    fn step(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Encode { step, source })
    }
}

impl<T> StepExt<T> for Result<T, SecretError> {
    fn step(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|err| ReconcileError::from((step, err)))
    }
}

/// Per-kind capabilities plugged into the shared driver.
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Resource: Resource;

    /// Finalizer guarding the resource until teardown has run.
    const FINALIZER: &'static str;

    fn api(&self) -> &Api<Self::Resource>;

    /// Read the declared record. `None` means it is already gone.
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Self::Resource>, ReconcileError> {
        self.api().get_opt(key).await.step(Step::GetManifest)
    }

    fn is_deleting(&self, resource: &Self::Resource) -> bool {
        resource.meta().is_deleting()
    }

    /// Remove the resource from the storage service. Must succeed when the
    /// service reports it as already absent.
    async fn teardown(&self, resource: &Self::Resource) -> Result<(), ReconcileError>;

    async fn converge(
        &self,
        resource: &mut Self::Resource,
    ) -> Result<Convergence, ReconcileError>;

    fn requeue_interval(&self) -> Duration {
        DEFAULT_REQUEUE
    }
}

/// Run one reconcile invocation for `key`.
pub async fn reconcile<K: Reconcile>(
    reconciler: &K,
    key: &ObjectKey,
) -> Result<Action, ReconcileError> {
    let resource_kind = <K::Resource as Resource>::KIND;
    let Some(mut resource) = reconciler.fetch(key).await? else {
        debug!(kind = resource_kind, %key, "record is gone, nothing to do");
        return Ok(Action::await_change());
    };

    if reconciler.is_deleting(&resource) {
        if !resource.meta().has_finalizer(K::FINALIZER) {
            debug!(kind = resource_kind, %key, "teardown already completed");
            return Ok(Action::await_change());
        }
        info!(kind = resource_kind, %key, "tearing down");
        reconciler.teardown(&resource).await?;
        resource.meta_mut().remove_finalizer(K::FINALIZER);
        reconciler
            .api()
            .replace(&resource)
            .await
            .step(Step::RemoveFinalizer)?;
        info!(kind = resource_kind, %key, "finalizer removed");
        return Ok(Action::await_change());
    }

    if resource.meta_mut().add_finalizer(K::FINALIZER) {
        resource = reconciler
            .api()
            .replace(&resource)
            .await
            .step(Step::AddFinalizer)?;
        debug!(kind = resource_kind, %key, "finalizer attached");
    }

    match reconciler.converge(&mut resource).await? {
        Convergence::Done => Ok(Action::requeue(reconciler.requeue_interval())),
        Convergence::RetryAfter(delay) => Ok(Action::requeue(delay)),
    }
}

/// Drive `work` under a deadline, aborting promptly on cancellation.
pub async fn run_bounded<F>(
    work: F,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<Action, ReconcileError>
where
    F: Future<Output = Result<Action, ReconcileError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        outcome = tokio::time::timeout(deadline, work) => {
            outcome.unwrap_or(Err(ReconcileError::DeadlineExceeded(deadline)))
        }
    }
}

/// Record `condition` as satisfied, persisting only on change.
pub async fn mark<R>(
    api: &Api<R>,
    resource: &mut R,
    condition: R::Kind,
    reason: &str,
) -> Result<(), ReconcileError>
where
    R: Resource + HasConditions,
{
    set_condition(api, resource, condition, true, reason).await
}

pub async fn set_condition<R>(
    api: &Api<R>,
    resource: &mut R,
    condition: R::Kind,
    status: bool,
    reason: &str,
) -> Result<(), ReconcileError>
where
    R: Resource + HasConditions,
{
    if resource.conditions_mut().set(condition, status, reason) {
        *resource = api.replace(resource).await.step(Step::UpdateStatus)?;
    }
    Ok(())
}
