//! Storage-service admin API as consumed by the reconcilers.
//!
//! Errors from the service carry a machine-readable code. Three codes are
//! matched explicitly: a missing policy or bucket on removal, and a missing
//! user on removal or policy attachment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

pub const NO_SUCH_USER: &str = "XMinioAdminNoSuchUser";
pub const NO_SUCH_POLICY: &str = "XMinioAdminNoSuchPolicy";
pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
pub const BUCKET_ALREADY_OWNED: &str = "BucketAlreadyOwnedByYou";

#[derive(Debug, Error)]
pub enum AdminError {
    /// The service answered with an error code.
    #[error("{code}: {message}")]
    Response { code: String, message: String },
    /// The service could not be reached or failed internally.
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

impl AdminError {
    pub fn response(code: &str, message: impl Into<String>) -> Self {
        AdminError::Response {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            AdminError::Response { code, .. } => Some(code),
            AdminError::Backend(_) => None,
        }
    }

    pub fn is_no_such_user(&self) -> bool {
        self.code() == Some(NO_SUCH_USER)
    }

    pub fn is_no_such_policy(&self) -> bool {
        self.code() == Some(NO_SUCH_POLICY)
    }

    pub fn is_no_such_bucket(&self) -> bool {
        self.code() == Some(NO_SUCH_BUCKET)
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Enabled,
    Disabled,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub status: AccountStatus,
    pub policies: Vec<String>,
}

#[async_trait]
pub trait StorageAdmin: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> AdminResult<bool>;

    async fn make_bucket(&self, bucket: &str) -> AdminResult<()>;

    /// Force removal: the bucket goes away together with its contents.
    async fn remove_bucket(&self, bucket: &str) -> AdminResult<()>;

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> AdminResult<()>;

    /// Create or replace the canned policy `name`.
    async fn add_canned_policy(&self, name: &str, policy: &str) -> AdminResult<()>;

    async fn remove_canned_policy(&self, name: &str) -> AdminResult<()>;

    async fn attach_policy(&self, policy: &str, user: &str) -> AdminResult<()>;

    async fn add_user(&self, access_key: &str, secret_key: &str) -> AdminResult<()>;

    async fn set_user(
        &self,
        access_key: &str,
        secret_key: &str,
        status: AccountStatus,
    ) -> AdminResult<()>;

    async fn remove_user(&self, access_key: &str) -> AdminResult<()>;

    async fn user_info(&self, access_key: &str) -> AdminResult<UserInfo>;
}
