//! Converts declared read/write/public flags into storage-service policy documents.
//!
//! Output is deterministic: statements follow declared order and action lists
//! are fixed, so re-pushing an unchanged spec produces byte-identical JSON.

use crate::models::{bucket::BucketSpec, policy::PolicySpec};
use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "2012-10-17";

const WILDCARD_PRINCIPAL: &str = "*";

const READ_ACTIONS: [&str; 5] = [
    "s3:GetBucketLocation",
    "s3:GetObject",
    "s3:ListBucket",
    "s3:ListenBucketNotification",
    "s3:ListenNotification",
];
const WRITE_ACTIONS: [&str; 1] = ["s3:PutObject"];
const FULL_ACTIONS: [&str; 1] = ["s3:*"];
const PUBLIC_ACTIONS: [&str; 1] = ["s3:GetObject"];

/// Access level derived from a `(read, write)` flag pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    None,
    ReadOnly,
    WriteOnly,
    Full,
}

impl AccessLevel {
    pub fn from_flags(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => AccessLevel::Full,
            (true, false) => AccessLevel::ReadOnly,
            (false, true) => AccessLevel::WriteOnly,
            (false, false) => AccessLevel::None,
        }
    }

    /// `None` grants nothing but still yields a statement.
    pub fn actions(self) -> &'static [&'static str] {
        match self {
            AccessLevel::None => &[],
            AccessLevel::ReadOnly => &READ_ACTIONS,
            AccessLevel::WriteOnly => &WRITE_ACTIONS,
            AccessLevel::Full => &FULL_ACTIONS,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: String,
    pub principal: Principal,
    pub action: Vec<String>,
    pub resource: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    #[serde(rename = "AWS")]
    pub aws: Vec<String>,
}

impl Statement {
    fn allow(principal: &str, actions: &[&str], resource: &str) -> Self {
        Self {
            effect: "Allow".to_string(),
            principal: Principal {
                aws: vec![principal.to_string()],
            },
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: vec![resource.to_string()],
        }
    }
}

impl PolicyDocument {
    fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Resource pattern covering every object under `name`.
pub fn object_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}/*", name)
}

/// Bucket policy: an optional anonymous-read statement, then one statement
/// per access entry.
pub fn bucket_policy(bucket: &str, spec: &BucketSpec) -> PolicyDocument {
    let resource = object_arn(bucket);
    let public = spec
        .public
        .then(|| Statement::allow(WILDCARD_PRINCIPAL, &PUBLIC_ACTIONS, &resource));

    let grants = spec.access.iter().map(|entry| {
        let level = AccessLevel::from_flags(entry.read, entry.write);
        Statement::allow(&entry.user, level.actions(), &resource)
    });

    PolicyDocument::new(public.into_iter().chain(grants).collect())
}

/// Canned policy scoped to the single user named by the policy record.
pub fn user_policy(policy: &str, spec: &PolicySpec) -> PolicyDocument {
    let level = AccessLevel::from_flags(spec.read, spec.write);
    PolicyDocument::new(vec![Statement::allow(
        &spec.user,
        level.actions(),
        &object_arn(policy),
    )])
}
