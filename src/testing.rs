//! Shared fixtures for unit tests.

use crate::{
    db,
    services::{
        admin::{
            AccountStatus, AdminError, AdminResult, NO_SUCH_BUCKET, NO_SUCH_POLICY, NO_SUCH_USER,
            StorageAdmin, UserInfo,
        },
        credentials::{EntropyError, EntropySource},
        record_store::{RecordStore, SqliteRecordStore},
    },
};
use async_trait::async_trait;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

/// Single-connection in-memory database with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    db::run_migrations(&pool).await.expect("apply schema");
    Arc::new(pool)
}

pub async fn memory_store() -> Arc<dyn RecordStore> {
    Arc::new(SqliteRecordStore::new(memory_pool().await))
}

pub struct SeededEntropy(Mutex<StdRng>);

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl EntropySource for SeededEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        self.0.lock().unwrap().fill_bytes(buf);
        Ok(())
    }
}

pub struct FailingEntropy;

impl EntropySource for FailingEntropy {
    fn fill(&self, _buf: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError("device unavailable".into()))
    }
}

#[derive(Default)]
pub struct FakeState {
    pub buckets: BTreeMap<String, Option<String>>,
    pub policies: BTreeMap<String, String>,
    pub users: BTreeMap<String, (String, AccountStatus)>,
    pub attachments: BTreeSet<(String, String)>,
    pub calls: Vec<&'static str>,
    pub failures: HashMap<&'static str, String>,
}

/// In-memory admin API that records every call.
#[derive(Default)]
pub struct FakeAdmin {
    state: Mutex<FakeState>,
}

impl FakeAdmin {
    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| **call == op)
            .count()
    }

    /// Make every later `op` call fail with `code`.
    pub fn fail(&self, op: &'static str, code: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op, code.to_string());
    }

    pub fn heal(&self, op: &'static str) {
        self.state.lock().unwrap().failures.remove(op);
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut FakeState) -> AdminResult<T>,
    ) -> AdminResult<T> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if let Some(code) = state.failures.get(op) {
            return Err(AdminError::response(code, format!("injected {op} failure")));
        }
        f(&mut state)
    }
}

fn missing(code: &str, what: &str) -> AdminError {
    AdminError::response(code, format!("{what} does not exist"))
}

#[async_trait]
impl StorageAdmin for FakeAdmin {
    async fn bucket_exists(&self, bucket: &str) -> AdminResult<bool> {
        self.call("bucket_exists", |s| Ok(s.buckets.contains_key(bucket)))
    }

    async fn make_bucket(&self, bucket: &str) -> AdminResult<()> {
        self.call("make_bucket", |s| {
            s.buckets.insert(bucket.to_string(), None);
            Ok(())
        })
    }

    async fn remove_bucket(&self, bucket: &str) -> AdminResult<()> {
        self.call("remove_bucket", |s| match s.buckets.remove(bucket) {
            Some(_) => Ok(()),
            None => Err(missing(NO_SUCH_BUCKET, bucket)),
        })
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> AdminResult<()> {
        self.call("set_bucket_policy", |s| match s.buckets.get_mut(bucket) {
            Some(slot) => {
                *slot = Some(policy.to_string());
                Ok(())
            }
            None => Err(missing(NO_SUCH_BUCKET, bucket)),
        })
    }

    async fn add_canned_policy(&self, name: &str, policy: &str) -> AdminResult<()> {
        self.call("add_canned_policy", |s| {
            s.policies.insert(name.to_string(), policy.to_string());
            Ok(())
        })
    }

    async fn remove_canned_policy(&self, name: &str) -> AdminResult<()> {
        self.call("remove_canned_policy", |s| match s.policies.remove(name) {
            Some(_) => {
                s.attachments.retain(|(policy, _)| policy != name);
                Ok(())
            }
            None => Err(missing(NO_SUCH_POLICY, name)),
        })
    }

    async fn attach_policy(&self, policy: &str, user: &str) -> AdminResult<()> {
        self.call("attach_policy", |s| {
            if !s.policies.contains_key(policy) {
                return Err(missing(NO_SUCH_POLICY, policy));
            }
            if !s.users.contains_key(user) {
                return Err(missing(NO_SUCH_USER, user));
            }
            s.attachments.insert((policy.to_string(), user.to_string()));
            Ok(())
        })
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> AdminResult<()> {
        self.call("add_user", |s| {
            s.users.insert(
                access_key.to_string(),
                (secret_key.to_string(), AccountStatus::Enabled),
            );
            Ok(())
        })
    }

    async fn set_user(
        &self,
        access_key: &str,
        secret_key: &str,
        status: AccountStatus,
    ) -> AdminResult<()> {
        self.call("set_user", |s| match s.users.get_mut(access_key) {
            Some(entry) => {
                *entry = (secret_key.to_string(), status);
                Ok(())
            }
            None => Err(missing(NO_SUCH_USER, access_key)),
        })
    }

    async fn remove_user(&self, access_key: &str) -> AdminResult<()> {
        self.call("remove_user", |s| match s.users.remove(access_key) {
            Some(_) => Ok(()),
            None => Err(missing(NO_SUCH_USER, access_key)),
        })
    }

    async fn user_info(&self, access_key: &str) -> AdminResult<UserInfo> {
        self.call("user_info", |s| match s.users.get(access_key) {
            Some((_, status)) => Ok(UserInfo {
                status: *status,
                policies: s
                    .attachments
                    .iter()
                    .filter(|(_, user)| user == access_key)
                    .map(|(policy, _)| policy.clone())
                    .collect(),
            }),
            None => Err(missing(NO_SUCH_USER, access_key)),
        })
    }
}
