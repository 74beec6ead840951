//! Key-value credential envelope consumed by workloads.

use super::meta::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ACCESS_KEY_FIELD: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_FIELD: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SecretRecord {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl SecretRecord {
    pub fn access_key(&self) -> Option<&str> {
        self.data.get(ACCESS_KEY_FIELD).map(String::as_str)
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.data.get(SECRET_KEY_FIELD).map(String::as_str)
    }

    /// Overwrite both credential fields.
    pub fn set_credentials(&mut self, access_key: &str, secret_key: &str) {
        self.data = BTreeMap::from([
            (ACCESS_KEY_FIELD.to_string(), access_key.to_string()),
            (SECRET_KEY_FIELD.to_string(), secret_key.to_string()),
        ]);
    }
}

impl Resource for SecretRecord {
    const KIND: &'static str = "Secret";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
