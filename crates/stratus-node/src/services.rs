//! Cluster services exposed by a node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use stratus_rpc::{impl_rpc_return, MethodTable, Opaque, RpcClass};
use tracing::info;

/// Point-in-time description of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub services: usize,
}

impl_rpc_return!(NodeSnapshot);

/// Identity of the running node.
pub struct NodeInfo {
    name: String,
    started_at: DateTime<Utc>,
    registry: Arc<ServiceRegistry>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            registry,
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            services: self.registry.running().len(),
        }
    }
}

impl RpcClass for NodeInfo {
    const NAME: &'static str = "NodeInfo";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .method("name", |node: &Self, (): ()| node.name.clone())
            .method("info", |node: &Self, (): ()| node.snapshot())
            .method("uptime_secs", |node: &Self, (): ()| {
                (Utc::now() - node.started_at).num_seconds()
            })
            .build()
    }
}

/// A service hosted on the node.
pub struct CloudService {
    name: String,
    running: AtomicBool,
}

impl CloudService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the service; returns false if it was already stopped.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!(service = %self.name, "Service stopped");
        }
        was_running
    }
}

impl RpcClass for CloudService {
    const NAME: &'static str = "CloudService";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .method("name", |service: &Self, (): ()| service.name.clone())
            .method("is_running", |service: &Self, (): ()| service.is_running())
            .method("stop", |service: &Self, (): ()| service.stop())
            .build()
    }
}

/// Services of the node, by name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<CloudService>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, service: CloudService) -> Arc<CloudService> {
        let service = Arc::new(service);
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.name.clone(), Arc::clone(&service));
        service
    }

    pub fn get(&self, name: &str) -> Option<Arc<CloudService>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of the services that are still running.
    pub fn running(&self) -> Vec<String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|service| service.is_running())
            .map(|service| service.name.clone())
            .collect()
    }
}

impl RpcClass for ServiceRegistry {
    const NAME: &'static str = "ServiceRegistry";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .method("list", |registry: &Self, (): ()| registry.running())
            .method("get", |registry: &Self, (name,): (String,)| {
                registry.get(&name).map(Opaque)
            })
            .build()
    }
}
