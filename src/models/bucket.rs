//! Represents a declared storage bucket and who may access it.

use super::{
    conditions::{ConditionKind, Conditions, HasConditions},
    meta::{Declared, ObjectMeta, Resource},
};
use serde::{Deserialize, Serialize};

/// A bucket the operator keeps present on the storage service.
///
/// The bucket name on the service is the record's name.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Bucket {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: BucketSpec,

    #[serde(default)]
    pub status: Conditions<BucketCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BucketSpec {
    /// Anonymous read of objects (get only, no listing).
    #[serde(default)]
    pub public: bool,

    /// Keep the bucket on the service when the record is deleted.
    #[serde(default)]
    pub retain: bool,

    /// Per-user grants, applied in declared order.
    #[serde(default)]
    pub access: Vec<BucketAccess>,
}

/// Grant for one user. Read and write together mean full access.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BucketAccess {
    pub user: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketCondition {
    Created,
    PolicyAssigned,
}

impl ConditionKind for BucketCondition {
    fn as_str(self) -> &'static str {
        match self {
            BucketCondition::Created => "bucketCreated",
            BucketCondition::PolicyAssigned => "bucketPolicyAssigned",
        }
    }
}

impl Resource for Bucket {
    const KIND: &'static str = "Bucket";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Declared for Bucket {
    type Spec = BucketSpec;

    fn from_spec(metadata: ObjectMeta, spec: BucketSpec) -> Self {
        Self {
            metadata,
            spec,
            status: Conditions::default(),
        }
    }

    fn set_spec(&mut self, spec: BucketSpec) {
        self.spec = spec;
    }
}

impl HasConditions for Bucket {
    type Kind = BucketCondition;

    fn conditions(&self) -> &Conditions<BucketCondition> {
        &self.status
    }

    fn conditions_mut(&mut self) -> &mut Conditions<BucketCondition> {
        &mut self.status
    }
}
