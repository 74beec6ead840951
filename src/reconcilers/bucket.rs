//! Keeps a bucket and its access policy present on the storage service.
//!
//! Existence check and policy push repeat on every cycle; both calls are
//! idempotent, and repeating them picks up spec edits and out-of-band drift.

use super::{Convergence, Reconcile, ReconcileError, Step, StepExt, mark};
use crate::{
    models::{
        bucket::{Bucket, BucketCondition},
        meta::ObjectKey,
    },
    services::{access_policy, admin::StorageAdmin, record_store::Api},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const BUCKET_FINALIZER: &str = "storage-operator/bucket-cleanup";

pub struct BucketReconciler {
    buckets: Api<Bucket>,
    admin: Arc<dyn StorageAdmin>,
}

impl BucketReconciler {
    pub fn new(buckets: Api<Bucket>, admin: Arc<dyn StorageAdmin>) -> Self {
        Self { buckets, admin }
    }
}

#[async_trait]
impl Reconcile for BucketReconciler {
    type Resource = Bucket;

    const FINALIZER: &'static str = BUCKET_FINALIZER;

    fn api(&self) -> &Api<Bucket> {
        &self.buckets
    }

    /// Bucket notifications always name a live record, so a missing one is
    /// an error rather than a completed deletion.
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Bucket>, ReconcileError> {
        self.buckets.get(key).await.map(Some).step(Step::GetManifest)
    }

    async fn teardown(&self, bucket: &Bucket) -> Result<(), ReconcileError> {
        let name = &bucket.metadata.name;
        if bucket.spec.retain {
            info!(bucket = %name, "retain is set, leaving bucket in place");
            return Ok(());
        }

        match self.admin.remove_bucket(name).await {
            Ok(()) => {
                info!(bucket = %name, "bucket removed");
                Ok(())
            }
            Err(err) if err.is_no_such_bucket() => {
                warn!(bucket = %name, "bucket already removed");
                Ok(())
            }
            Err(source) => Err(ReconcileError::Admin {
                step: Step::RemoveBucket,
                source,
            }),
        }
    }

    async fn converge(&self, bucket: &mut Bucket) -> Result<Convergence, ReconcileError> {
        let name = bucket.metadata.name.clone();

        let exists = self
            .admin
            .bucket_exists(&name)
            .await
            .step(Step::CheckBucket)?;
        if !exists {
            info!(bucket = %name, "creating bucket");
            self.admin
                .make_bucket(&name)
                .await
                .step(Step::CreateBucket)?;
        }
        mark(&self.buckets, bucket, BucketCondition::Created, "BucketExists").await?;

        let policy = access_policy::bucket_policy(&name, &bucket.spec)
            .to_json()
            .step(Step::EncodePolicy)?;
        self.admin
            .set_bucket_policy(&name, &policy)
            .await
            .step(Step::SetBucketPolicy)?;
        mark(
            &self.buckets,
            bucket,
            BucketCondition::PolicyAssigned,
            "PolicyApplied",
        )
        .await?;

        Ok(Convergence::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            bucket::{BucketAccess, BucketSpec},
            meta::{Declared, ObjectMeta},
        },
        reconcilers::{Action, reconcile},
        services::{access_policy::PolicyDocument, admin::NO_SUCH_BUCKET},
        testing::{FakeAdmin, memory_store},
    };

    async fn setup(spec: BucketSpec) -> (BucketReconciler, Api<Bucket>, Arc<FakeAdmin>) {
        let buckets = Api::<Bucket>::new(memory_store().await);
        let admin = Arc::new(FakeAdmin::default());
        buckets
            .create(&Bucket::from_spec(ObjectMeta::new(key()), spec))
            .await
            .unwrap();
        (
            BucketReconciler::new(buckets.clone(), admin.clone()),
            buckets,
            admin,
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new("storage", "photos")
    }

    fn public_with_reader() -> BucketSpec {
        BucketSpec {
            public: true,
            retain: false,
            access: vec![BucketAccess {
                user: "alice".into(),
                read: true,
                write: false,
            }],
        }
    }

    #[tokio::test]
    async fn creates_bucket_and_pushes_policy() {
        let (reconciler, buckets, admin) = setup(public_with_reader()).await;

        let action = reconcile(&reconciler, &key()).await.unwrap();
        assert_eq!(action, Action::Requeue { after_secs: 60 });

        let stored = buckets.get(&key()).await.unwrap();
        assert!(stored.metadata.has_finalizer(BUCKET_FINALIZER));
        assert!(stored.status.is_true(BucketCondition::Created));
        assert!(stored.status.is_true(BucketCondition::PolicyAssigned));

        let policy = admin
            .with(|s| s.buckets.get("photos").cloned())
            .flatten()
            .expect("policy pushed");
        let doc: PolicyDocument = serde_json::from_str(&policy).unwrap();
        assert_eq!(doc.statements.len(), 2);
        assert_eq!(doc.statements[0].principal.aws, vec!["*".to_string()]);
        assert_eq!(doc.statements[0].action, vec!["s3:GetObject".to_string()]);
        assert_eq!(doc.statements[1].principal.aws, vec!["alice".to_string()]);
        assert_eq!(doc.statements[1].action.len(), 5);
    }

    #[tokio::test]
    async fn steady_state_repeats_idempotent_calls_without_status_writes() {
        let (reconciler, buckets, admin) = setup(public_with_reader()).await;
        reconcile(&reconciler, &key()).await.unwrap();
        let version = buckets.get(&key()).await.unwrap().metadata.resource_version;

        reconcile(&reconciler, &key()).await.unwrap();
        assert_eq!(admin.count("make_bucket"), 1);
        assert_eq!(admin.count("bucket_exists"), 2);
        assert_eq!(admin.count("set_bucket_policy"), 2);
        assert_eq!(
            buckets.get(&key()).await.unwrap().metadata.resource_version,
            version
        );
    }

    #[tokio::test]
    async fn missing_record_is_an_error() {
        let buckets = Api::<Bucket>::new(memory_store().await);
        let reconciler = BucketReconciler::new(buckets, Arc::new(FakeAdmin::default()));
        let err = reconcile(&reconciler, &key()).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::GetManifest));
    }

    #[tokio::test]
    async fn failed_creation_leaves_condition_unset() {
        let (reconciler, buckets, admin) = setup(BucketSpec::default()).await;
        admin.fail("make_bucket", "AccessDenied");

        let err = reconcile(&reconciler, &key()).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::CreateBucket));
        let stored = buckets.get(&key()).await.unwrap();
        assert!(stored.metadata.has_finalizer(BUCKET_FINALIZER));
        assert!(!stored.status.is_true(BucketCondition::Created));

        admin.heal("make_bucket");
        reconcile(&reconciler, &key()).await.unwrap();
        assert!(
            buckets
                .get(&key())
                .await
                .unwrap()
                .status
                .is_true(BucketCondition::Created)
        );
    }

    #[tokio::test]
    async fn deletion_removes_bucket_then_finalizer() {
        let (reconciler, buckets, admin) = setup(BucketSpec::default()).await;
        reconcile(&reconciler, &key()).await.unwrap();
        buckets.delete(&key()).await.unwrap();

        let action = reconcile(&reconciler, &key()).await.unwrap();
        assert_eq!(action, Action::AwaitChange);
        assert_eq!(admin.count("remove_bucket"), 1);
        assert!(admin.with(|s| s.buckets.is_empty()));
        assert!(buckets.get_opt(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deletion_tolerates_already_absent_bucket() {
        let (reconciler, buckets, admin) = setup(BucketSpec::default()).await;
        reconcile(&reconciler, &key()).await.unwrap();
        admin.fail("remove_bucket", NO_SUCH_BUCKET);
        buckets.delete(&key()).await.unwrap();

        reconcile(&reconciler, &key()).await.unwrap();
        assert!(buckets.get_opt(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deletion_propagates_other_failures() {
        let (reconciler, buckets, admin) = setup(BucketSpec::default()).await;
        reconcile(&reconciler, &key()).await.unwrap();
        admin.fail("remove_bucket", "AccessDenied");
        buckets.delete(&key()).await.unwrap();

        let err = reconcile(&reconciler, &key()).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::RemoveBucket));
        let stored = buckets.get(&key()).await.unwrap();
        assert!(stored.metadata.has_finalizer(BUCKET_FINALIZER));
    }

    #[tokio::test]
    async fn retained_bucket_skips_teardown() {
        let spec = BucketSpec {
            retain: true,
            ..BucketSpec::default()
        };
        let (reconciler, buckets, admin) = setup(spec).await;
        reconcile(&reconciler, &key()).await.unwrap();
        buckets.delete(&key()).await.unwrap();

        reconcile(&reconciler, &key()).await.unwrap();
        assert_eq!(admin.count("remove_bucket"), 0);
        assert!(admin.with(|s| s.buckets.contains_key("photos")));
        assert!(buckets.get_opt(&key()).await.unwrap().is_none());
    }
}
