//! Declared-record models reconciled by the operator.
//!
//! Every record shares the [`meta::ObjectMeta`] envelope and serializes as
//! JSON via `serde`; the record store keeps them as documents.

pub mod bucket;
pub mod conditions;
pub mod meta;
pub mod policy;
pub mod secret;
pub mod user;
