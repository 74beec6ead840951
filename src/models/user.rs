//! Represents a storage-service user account.
//!
//! The record carries identity only. Credential material lives in the
//! companion [`SecretRecord`](super::secret::SecretRecord) owned by the user.

use super::{
    conditions::{ConditionKind, Conditions, HasConditions},
    meta::{Declared, ObjectMeta, Resource},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: UserSpec,

    #[serde(default)]
    pub status: Conditions<UserCondition>,
}

/// Users have no tunable fields; the record name is the access key.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserSpec {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCondition {
    Created,
    SecretCreated,
}

impl ConditionKind for UserCondition {
    fn as_str(self) -> &'static str {
        match self {
            UserCondition::Created => "userCreated",
            UserCondition::SecretCreated => "userSecretCreated",
        }
    }
}

impl User {
    /// Name of the secret record holding this user's credentials.
    pub fn secret_name(&self) -> String {
        format!("{}-credentials", self.metadata.name)
    }
}

impl Resource for User {
    const KIND: &'static str = "User";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Declared for User {
    type Spec = UserSpec;

    fn from_spec(metadata: ObjectMeta, spec: UserSpec) -> Self {
        Self {
            metadata,
            spec,
            status: Conditions::default(),
        }
    }

    fn set_spec(&mut self, spec: UserSpec) {
        self.spec = spec;
    }
}

impl HasConditions for User {
    type Kind = UserCondition;

    fn conditions(&self) -> &Conditions<UserCondition> {
        &self.status
    }

    fn conditions_mut(&mut self) -> &mut Conditions<UserCondition> {
        &mut self.status
    }
}
