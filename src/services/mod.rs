pub mod access_policy;
pub mod admin;
pub mod admin_payload;
pub mod credentials;
pub mod minio_admin;
pub mod record_store;
pub mod secret_manager;
pub mod sigv4;
