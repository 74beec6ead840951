//! `StorageAdmin` over a MinIO deployment.
//!
//! Bucket operations go through the S3 API (`aws-sdk-s3`). Policy and account
//! operations use the MinIO admin API under `/minio/admin/v3`, signed with
//! SigV4. Account secrets travel encrypted (see `admin_payload`).

use crate::services::{
    admin::{
        AccountStatus, AdminError, AdminResult, BUCKET_ALREADY_OWNED, StorageAdmin, UserInfo,
    },
    admin_payload,
    credentials::{EntropySource, OsEntropy},
    sigv4::{self, CanonicalRequest, Credentials},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{BehaviorVersion, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::debug;

const ADMIN_PREFIX: &str = "/minio/admin/v3";
const SIGNING_SERVICE: &str = "s3";
const DEFAULT_REGION: &str = "us-east-1";
const FORCE_DELETE_HEADER: &str = "x-minio-force-delete";

pub struct MinioAdmin {
    s3: S3Client,
    http: reqwest::Client,
    endpoint: Url,
    host: String,
    region: String,
    credentials: Credentials,
    entropy: Arc<dyn EntropySource>,
}

impl fmt::Debug for MinioAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioAdmin")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Error body of the admin API.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfoBody {
    #[serde(default)]
    policy_name: String,
    status: AccountStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest<'a> {
    secret_key: &'a str,
    status: AccountStatus,
}

fn backend(err: impl fmt::Display) -> AdminError {
    AdminError::Backend(err.to_string().into())
}

/// Service errors keep their S3 code; transport failures become `Backend`.
fn s3_error<E>(err: SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> AdminError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err.code() {
        Some(code) => {
            AdminError::response(code, err.message().unwrap_or_default().to_string())
        }
        None => backend(DisplayErrorContext(&err)),
    }
}

fn split_policies(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl MinioAdmin {
    pub fn new(endpoint: &str, region: &str, credentials: Credentials) -> AdminResult<Self> {
        Self::with_entropy(endpoint, region, credentials, Arc::new(OsEntropy))
    }

    pub fn with_entropy(
        endpoint: &str,
        region: &str,
        credentials: Credentials,
        entropy: Arc<dyn EntropySource>,
    ) -> AdminResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(backend)?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(backend(format!("endpoint `{}` has no host", endpoint))),
        };
        let base = endpoint.as_str().trim_end_matches('/').to_string();

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(base)
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                credentials.access_key.clone(),
                credentials.secret_key.clone(),
                None,
                None,
                "storage-operator",
            ))
            .force_path_style(true)
            .build();

        Ok(Self {
            s3: S3Client::from_conf(config),
            http: reqwest::Client::new(),
            endpoint,
            host,
            region: region.to_string(),
            credentials,
            entropy,
        })
    }

    /// Send a signed admin API request and return the response body.
    async fn admin(
        &self,
        method: Method,
        action: &str,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> AdminResult<Vec<u8>> {
        let path = format!("{}/{}", ADMIN_PREFIX, action);
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let canonical_query = sigv4::canonical_query(&query);

        let mut url = self.endpoint.clone();
        url.set_path(&path);
        url.set_query(if canonical_query.is_empty() {
            None
        } else {
            Some(canonical_query.as_str())
        });

        let now = chrono::Utc::now();
        let payload_sha256 = sigv4::sha256_hex(&body);
        let headers = [
            ("host", self.host.clone()),
            ("x-amz-content-sha256", payload_sha256.clone()),
            ("x-amz-date", sigv4::amz_date(now)),
        ];
        let authorization = sigv4::authorization(
            &self.credentials,
            &self.region,
            SIGNING_SERVICE,
            now,
            &CanonicalRequest {
                method: method.as_str(),
                path: &path,
                query: &query,
                headers: &headers,
                payload_sha256: &payload_sha256,
            },
        )
        .map_err(|err| AdminError::Backend(Box::new(err)))?;

        debug!(%method, %path, "admin request");
        let mut request = self
            .http
            .request(method, url)
            .header("authorization", authorization)
            .body(body);
        for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
            request = request.header(*name, value.as_str());
        }
        let response = request.send().await.map_err(backend)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(backend)?.to_vec();
        if status.is_success() {
            return Ok(bytes);
        }
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(error) => Err(AdminError::response(&error.code, error.message)),
            Err(_) => Err(backend(format!(
                "admin API answered {}: {}",
                status,
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    async fn put_user(
        &self,
        access_key: &str,
        secret_key: &str,
        status: AccountStatus,
    ) -> AdminResult<()> {
        let plain = serde_json::to_vec(&UserRequest { secret_key, status }).map_err(backend)?;
        let sealed = admin_payload::encrypt(
            self.entropy.as_ref(),
            &self.credentials.secret_key,
            &plain,
        )
        .map_err(|err| AdminError::Backend(Box::new(err)))?;
        self.admin(Method::PUT, "add-user", &[("accessKey", access_key)], sealed)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdmin for MinioAdmin {
    async fn bucket_exists(&self, bucket: &str) -> AdminResult<bool> {
        match self.s3.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .raw_response()
                    .is_some_and(|raw| raw.status().as_u16() == 404)
                    || err.as_service_error().is_some_and(|e| e.is_not_found());
                if not_found { Ok(false) } else { Err(s3_error(err)) }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str) -> AdminResult<()> {
        let mut request = self.s3.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await.map_err(s3_error) {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some(BUCKET_ALREADY_OWNED) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove_bucket(&self, bucket: &str) -> AdminResult<()> {
        self.s3
            .delete_bucket()
            .bucket(bucket)
            .customize()
            .mutate_request(|request| {
                request.headers_mut().insert(FORCE_DELETE_HEADER, "true");
            })
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> AdminResult<()> {
        self.s3
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn add_canned_policy(&self, name: &str, policy: &str) -> AdminResult<()> {
        self.admin(
            Method::PUT,
            "add-canned-policy",
            &[("name", name)],
            policy.as_bytes().to_vec(),
        )
        .await?;
        Ok(())
    }

    async fn remove_canned_policy(&self, name: &str) -> AdminResult<()> {
        self.admin(
            Method::DELETE,
            "remove-canned-policy",
            &[("name", name)],
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    /// Adds `policy` to the user's current set; other attachments stay.
    async fn attach_policy(&self, policy: &str, user: &str) -> AdminResult<()> {
        let mut policies = self.user_info(user).await?.policies;
        if policies.iter().any(|name| name == policy) {
            return Ok(());
        }
        policies.push(policy.to_string());
        let joined = policies.join(",");
        self.admin(
            Method::PUT,
            "set-user-or-group-policy",
            &[
                ("isGroup", "false"),
                ("policyName", &joined),
                ("userOrGroup", user),
            ],
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> AdminResult<()> {
        self.put_user(access_key, secret_key, AccountStatus::Enabled)
            .await
    }

    async fn set_user(
        &self,
        access_key: &str,
        secret_key: &str,
        status: AccountStatus,
    ) -> AdminResult<()> {
        self.put_user(access_key, secret_key, status).await
    }

    async fn remove_user(&self, access_key: &str) -> AdminResult<()> {
        self.admin(
            Method::DELETE,
            "remove-user",
            &[("accessKey", access_key)],
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn user_info(&self, access_key: &str) -> AdminResult<UserInfo> {
        let body = self
            .admin(
                Method::GET,
                "user-info",
                &[("accessKey", access_key)],
                Vec::new(),
            )
            .await?;
        let info: UserInfoBody = serde_json::from_slice(&body).map_err(backend)?;
        Ok(UserInfo {
            status: info.status,
            policies: split_policies(&info.policy_name),
        })
    }
}
