//! Creates storage-service accounts and their credential records.
//!
//! The credential record is checked every cycle and repaired when it is
//! missing or malformed; fresh material is pushed to the account. Account
//! creation is gated on `userCreated`, so a converged user costs one account
//! lookup per cycle.

use super::{Convergence, Reconcile, ReconcileError, Step, StepExt, mark, set_condition};
use crate::{
    models::user::{User, UserCondition},
    services::{
        admin::{AccountStatus, StorageAdmin},
        record_store::Api,
        secret_manager::SecretManager,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const USER_FINALIZER: &str = "storage-operator/user-cleanup";

pub struct UserReconciler {
    users: Api<User>,
    admin: Arc<dyn StorageAdmin>,
    secrets: SecretManager,
}

impl UserReconciler {
    pub fn new(users: Api<User>, admin: Arc<dyn StorageAdmin>, secrets: SecretManager) -> Self {
        Self {
            users,
            admin,
            secrets,
        }
    }

    /// Check a user marked as created against the service.
    ///
    /// Returns whether the account needs re-enabling; clears `userCreated`
    /// when the account has disappeared.
    async fn check_account(&self, user: &mut User) -> Result<bool, ReconcileError> {
        let name = user.metadata.name.clone();
        match self.admin.user_info(&name).await {
            Ok(info) => Ok(info.status != AccountStatus::Enabled),
            Err(err) if err.is_no_such_user() => {
                warn!(user = %name, "account missing on the service, recreating");
                set_condition(
                    &self.users,
                    user,
                    UserCondition::Created,
                    false,
                    "AccountMissing",
                )
                .await?;
                Ok(false)
            }
            Err(source) => Err(ReconcileError::Admin {
                step: Step::UserInfo,
                source,
            }),
        }
    }
}

#[async_trait]
impl Reconcile for UserReconciler {
    type Resource = User;

    const FINALIZER: &'static str = USER_FINALIZER;

    fn api(&self) -> &Api<User> {
        &self.users
    }

    /// The credential record is owned by the user and goes with it.
    async fn teardown(&self, user: &User) -> Result<(), ReconcileError> {
        let name = &user.metadata.name;
        match self.admin.remove_user(name).await {
            Ok(()) => {
                info!(user = %name, "user removed");
                Ok(())
            }
            Err(err) if err.is_no_such_user() => {
                info!(user = %name, "user already removed");
                Ok(())
            }
            Err(source) => Err(ReconcileError::Admin {
                step: Step::RemoveUser,
                source,
            }),
        }
    }

    async fn converge(&self, user: &mut User) -> Result<Convergence, ReconcileError> {
        let name = user.metadata.name.clone();

        let needs_enable = if user.status.is_true(UserCondition::Created) {
            self.check_account(user).await?
        } else {
            false
        };

        let material = self.secrets.ensure(user).await.step(Step::SetSecret)?;
        if material.is_generated() {
            info!(user = %name, "credential record written");
        }
        mark(
            &self.users,
            user,
            UserCondition::SecretCreated,
            "SecretStored",
        )
        .await?;

        let created = user.status.is_true(UserCondition::Created);
        if !created || needs_enable || material.is_generated() {
            if !created {
                info!(user = %name, "creating user");
                self.admin
                    .add_user(&name, material.secret_key())
                    .await
                    .step(Step::CreateUser)?;
            }
            self.admin
                .set_user(&name, material.secret_key(), AccountStatus::Enabled)
                .await
                .step(Step::UpdateUser)?;
            mark(&self.users, user, UserCondition::Created, "AccountEnabled").await?;
        }

        Ok(Convergence::Done)
    }
}
