//! Companion credential records for users.
//!
//! A valid secret is never rotated by reconciliation; material is only
//! regenerated when the record is missing or malformed.

use super::{
    credentials::{CredentialGenerator, EntropyError},
    record_store::{Api, StoreError},
};
use crate::models::{
    meta::{ObjectKey, ObjectMeta, Resource},
    secret::SecretRecord,
    user::User,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Entropy(#[from] EntropyError),
}

/// Secret key material and whether it was generated by this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Material {
    Reused(String),
    Generated(String),
}

impl Material {
    pub fn secret_key(&self) -> &str {
        match self {
            Material::Reused(key) | Material::Generated(key) => key,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Material::Generated(_))
    }
}

#[derive(Clone)]
pub struct SecretManager {
    secrets: Api<SecretRecord>,
    generator: CredentialGenerator,
}

impl SecretManager {
    pub fn new(secrets: Api<SecretRecord>, generator: CredentialGenerator) -> Self {
        Self { secrets, generator }
    }

    /// Make sure `user` has a well-formed credential record and return its
    /// secret key.
    pub async fn ensure(&self, user: &User) -> Result<Material, SecretError> {
        let access_key = &user.metadata.name;
        let key = ObjectKey::new(&user.metadata.namespace, user.secret_name());

        match self.secrets.get_opt(&key).await? {
            Some(existing) if self.is_well_formed(&existing) => {
                debug!(secret = %key, "reusing existing credentials");
                Ok(Material::Reused(
                    existing.secret_key().unwrap_or_default().to_string(),
                ))
            }
            Some(mut existing) => {
                let secret_key = self.generator.generate()?;
                existing.set_credentials(access_key, &secret_key);
                self.secrets.replace(&existing).await?;
                info!(secret = %key, "regenerated malformed credentials");
                Ok(Material::Generated(secret_key))
            }
            None => {
                let secret_key = self.generator.generate()?;
                let mut metadata = ObjectMeta::new(key.clone());
                metadata.owner_references.extend(user.owner_reference());
                let mut secret = SecretRecord {
                    metadata,
                    data: BTreeMap::new(),
                };
                secret.set_credentials(access_key, &secret_key);
                self.secrets.create(&secret).await?;
                info!(secret = %key, "created credentials");
                Ok(Material::Generated(secret_key))
            }
        }
    }

    /// Both keys present and a secret of the generated length. The alphabet
    /// is not checked, so hand-provisioned keys of the right size are kept.
    fn is_well_formed(&self, secret: &SecretRecord) -> bool {
        secret.access_key().is_some()
            && secret
                .secret_key()
                .is_some_and(|value| value.len() == self.generator.encoded_len())
    }
}
