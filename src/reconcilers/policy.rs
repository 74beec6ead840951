//! Registers a single-user canned policy and attaches it to that user.

use super::{Convergence, Reconcile, ReconcileError, Step, StepExt, mark, set_condition};
use crate::{
    models::policy::{Policy, PolicyCondition},
    services::{access_policy, admin::StorageAdmin, record_store::Api},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

pub const POLICY_FINALIZER: &str = "storage-operator/policy-cleanup";

/// Retry delay while the target user has not been created yet.
pub const USER_PENDING_RETRY: Duration = Duration::from_secs(10);

pub struct PolicyReconciler {
    policies: Api<Policy>,
    admin: Arc<dyn StorageAdmin>,
}

impl PolicyReconciler {
    pub fn new(policies: Api<Policy>, admin: Arc<dyn StorageAdmin>) -> Self {
        Self { policies, admin }
    }
}

#[async_trait]
impl Reconcile for PolicyReconciler {
    type Resource = Policy;

    const FINALIZER: &'static str = POLICY_FINALIZER;

    fn api(&self) -> &Api<Policy> {
        &self.policies
    }

    async fn teardown(&self, policy: &Policy) -> Result<(), ReconcileError> {
        let name = &policy.metadata.name;
        match self.admin.remove_canned_policy(name).await {
            Ok(()) => {
                info!(policy = %name, "policy removed");
                Ok(())
            }
            Err(err) if err.is_no_such_policy() => {
                info!(policy = %name, "policy already removed");
                Ok(())
            }
            Err(source) => Err(ReconcileError::Admin {
                step: Step::RemovePolicy,
                source,
            }),
        }
    }

    async fn converge(&self, policy: &mut Policy) -> Result<Convergence, ReconcileError> {
        let name = policy.metadata.name.clone();
        let user = policy.spec.user.clone();

        let document = access_policy::user_policy(&name, &policy.spec)
            .to_json()
            .step(Step::EncodePolicy)?;
        info!(policy = %name, "creating policy");
        self.admin
            .add_canned_policy(&name, &document)
            .await
            .step(Step::AddPolicy)?;
        mark(&self.policies, policy, PolicyCondition::Created, "PolicyStored").await?;

        info!(policy = %name, %user, "assigning policy");
        match self.admin.attach_policy(&name, &user).await {
            Ok(()) => {}
            Err(err) if err.is_no_such_user() => {
                warn!(policy = %name, %user, "no such user, retrying later");
                set_condition(
                    &self.policies,
                    policy,
                    PolicyCondition::Assigned,
                    false,
                    "UserMissing",
                )
                .await?;
                return Ok(Convergence::RetryAfter(USER_PENDING_RETRY));
            }
            Err(source) => {
                return Err(ReconcileError::Admin {
                    step: Step::SetPolicy,
                    source,
                });
            }
        }
        mark(
            &self.policies,
            policy,
            PolicyCondition::Assigned,
            "AttachedToUser",
        )
        .await?;

        Ok(Convergence::Done)
    }
}
