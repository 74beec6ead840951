//! Represents a named access policy granted to a single user.

use super::{
    conditions::{ConditionKind, Conditions, HasConditions},
    meta::{Declared, ObjectMeta, Resource},
};
use serde::{Deserialize, Serialize};

/// A canned policy registered under the record's name and attached to `spec.user`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Policy {
    pub metadata: ObjectMeta,

    pub spec: PolicySpec,

    #[serde(default)]
    pub status: Conditions<PolicyCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PolicySpec {
    /// Access key of the user the policy is attached to.
    pub user: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyCondition {
    Created,
    Assigned,
}

impl ConditionKind for PolicyCondition {
    fn as_str(self) -> &'static str {
        match self {
            PolicyCondition::Created => "policyCreated",
            PolicyCondition::Assigned => "policyAssigned",
        }
    }
}

impl Resource for Policy {
    const KIND: &'static str = "Policy";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Declared for Policy {
    type Spec = PolicySpec;

    fn from_spec(metadata: ObjectMeta, spec: PolicySpec) -> Self {
        Self {
            metadata,
            spec,
            status: Conditions::default(),
        }
    }

    fn set_spec(&mut self, spec: PolicySpec) {
        self.spec = spec;
    }
}

impl HasConditions for Policy {
    type Kind = PolicyCondition;

    fn conditions(&self) -> &Conditions<PolicyCondition> {
        &self.status
    }

    fn conditions_mut(&mut self) -> &mut Conditions<PolicyCondition> {
        &mut self.status
    }
}
