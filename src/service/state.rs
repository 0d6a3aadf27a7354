//! Service state management.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::feed::DocumentRegistry;
use crate::policy::AnalyticsPolicyV1;
use crate::store::{InMemoryRevisionStore, PostgresRevisionStore, RevisionSource};
use crate::store::postgres::PoolStats;

/// Reference to the analytics policy by hash.
///
/// Lets clients tell whether two responses were computed with the same
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    /// Policy type identifier (e.g., "analytics_policy_v1")
    pub policy_id: String,
    /// xxHash64 of the quantized policy JSON
    pub params_hash: String,
}

impl PolicyRef {
    /// Create a policy reference from an AnalyticsPolicyV1.
    pub fn from_policy(policy: &AnalyticsPolicyV1) -> Self {
        Self {
            policy_id: policy.policy_id().to_string(),
            params_hash: policy.params_hash(),
        }
    }
}

/// Store checks behind the health endpoints.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    /// Whether the store answers queries.
    async fn is_healthy(&self) -> bool;

    /// Connection pool statistics, for stores that pool connections.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

#[async_trait]
impl StoreHealth for PostgresRevisionStore {
    async fn is_healthy(&self) -> bool {
        PostgresRevisionStore::is_healthy(self).await
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PostgresRevisionStore::pool_stats(self))
    }
}

#[async_trait]
impl StoreHealth for InMemoryRevisionStore {
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Shared service state.
///
/// Contains the document registry and the reference of the policy it runs.
pub struct ServiceState<S> {
    /// Tracked documents and their workers.
    pub registry: DocumentRegistry<S>,
    /// Policy every document is analyzed with.
    pub policy_ref: PolicyRef,
}

impl<S: RevisionSource + StoreHealth + 'static> ServiceState<S> {
    /// Create service state around a registry.
    pub fn new(registry: DocumentRegistry<S>) -> Self {
        let policy_ref = PolicyRef::from_policy(registry.policy());
        Self {
            registry,
            policy_ref,
        }
    }

    /// The store behind the registry.
    pub fn store(&self) -> &S {
        self.registry.source()
    }
}

impl<S> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            policy_ref: self.policy_ref.clone(),
        }
    }
}
