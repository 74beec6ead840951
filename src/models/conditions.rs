//! Typed status conditions.
//!
//! Each resource kind declares a small enum of the convergence steps it
//! tracks. The status block stores them as named boolean conditions so
//! readiness checks can read them without knowing the enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, marker::PhantomData};

/// A convergence step recorded in a resource's status.
pub trait ConditionKind: Copy + fmt::Debug + Send + Sync + 'static {
    /// Wire name of the condition (its `type`).
    fn as_str(self) -> &'static str;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Short machine-readable label for the last transition.
    pub reason: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Status block of conditions keyed by `K`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Conditions<K> {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(skip)]
    kind: PhantomData<fn() -> K>,
}

impl<K: ConditionKind> Conditions<K> {
    pub fn get(&self, kind: K) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == kind.as_str())
    }

    pub fn is_true(&self, kind: K) -> bool {
        self.get(kind)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Record `kind` as satisfied or not.
    ///
    /// Returns true when the stored status changed; the transition time only
    /// moves on a change.
    pub fn set(&mut self, kind: K, status: bool, reason: &str) -> bool {
        let status = ConditionStatus::from(status);
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == kind.as_str())
        {
            Some(existing) if existing.status == status => {
                existing.reason = reason.to_string();
                false
            }
            Some(existing) => {
                existing.status = status;
                existing.reason = reason.to_string();
                existing.last_transition_time = Utc::now();
                true
            }
            None => {
                self.conditions.push(Condition {
                    type_: kind.as_str().to_string(),
                    status,
                    reason: reason.to_string(),
                    last_transition_time: Utc::now(),
                });
                true
            }
        }
    }
}

impl<K> Default for Conditions<K> {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            kind: PhantomData,
        }
    }
}

impl<K> Clone for Conditions<K> {
    fn clone(&self) -> Self {
        Self {
            conditions: self.conditions.clone(),
            kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for Conditions<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("conditions", &self.conditions)
            .finish()
    }
}

/// Resources whose status is a typed condition block.
pub trait HasConditions {
    type Kind: ConditionKind;

    fn conditions(&self) -> &Conditions<Self::Kind>;

    fn conditions_mut(&mut self) -> &mut Conditions<Self::Kind>;
}
