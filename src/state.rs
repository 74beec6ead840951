//! Shared handler state.

use crate::{
    reconcilers::{bucket::BucketReconciler, policy::PolicyReconciler, user::UserReconciler},
    services::{
        admin::StorageAdmin,
        credentials::CredentialGenerator,
        record_store::{Api, RecordStore},
        secret_manager::SecretManager,
    },
};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub buckets: Arc<BucketReconciler>,
    pub policies: Arc<PolicyReconciler>,
    pub users: Arc<UserReconciler>,
    pub reconcile_timeout: Duration,
    /// Cancelled on shutdown or after an unrecoverable fault.
    pub shutdown: CancellationToken,
    /// Reason for a fault-triggered shutdown, if any.
    pub fatal: Arc<OnceLock<String>>,
}

impl AppState {
    pub fn new(
        records: Arc<dyn RecordStore>,
        admin: Arc<dyn StorageAdmin>,
        generator: CredentialGenerator,
        reconcile_timeout: Duration,
    ) -> Self {
        let secrets = SecretManager::new(Api::new(records.clone()), generator);
        Self {
            buckets: Arc::new(BucketReconciler::new(
                Api::new(records.clone()),
                admin.clone(),
            )),
            policies: Arc::new(PolicyReconciler::new(
                Api::new(records.clone()),
                admin.clone(),
            )),
            users: Arc::new(UserReconciler::new(Api::new(records.clone()), admin, secrets)),
            records,
            reconcile_timeout,
            shutdown: CancellationToken::new(),
            fatal: Arc::new(OnceLock::new()),
        }
    }

    /// Record an unrecoverable fault and stop the server.
    pub fn fail(&self, reason: String) {
        let _ = self.fatal.set(reason);
        self.shutdown.cancel();
    }
}
