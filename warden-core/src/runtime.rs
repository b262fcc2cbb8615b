//! Startup wiring
//!
//! The order is fixed: store, governance service, live registry with its
//! built-ins, bridge, then a full sync. Only after [`Warden::bootstrap`]
//! returns may callers dispatch.

use crate::admin::ToolAdmin;
use crate::bridge::RegistryBridge;
use crate::builtin::register_builtins;
use crate::client::ToolConnector;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::governance::{FileToolStore, GovernanceService, InMemoryToolStore, ToolStore};
use crate::registry::{DispatchEnvelope, LiveRegistry, ToolCall};
use std::sync::Arc;

/// A fully wired governance core
pub struct Warden {
    config: WardenConfig,
    governance: Arc<GovernanceService>,
    registry: Arc<LiveRegistry>,
    bridge: Arc<RegistryBridge>,
    admin: ToolAdmin,
}

impl Warden {
    /// Wire every component over the given store and connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, built-in
    /// registration fails, or the initial sync cannot read the store.
    pub async fn bootstrap(
        config: WardenConfig,
        store: Arc<dyn ToolStore>,
        connector: Arc<dyn ToolConnector>,
    ) -> Result<Self> {
        config.validate()?;

        let governance = Arc::new(GovernanceService::new(
            store,
            connector,
            config.governance.clone(),
            config.adapter.clone(),
        ));

        let registry = Arc::new(LiveRegistry::new(&config.registry));
        let builtins = register_builtins(&registry).await?;

        let bridge = Arc::new(RegistryBridge::new(
            Arc::clone(&governance),
            Arc::clone(&registry),
            config.registry.external_prefix.clone(),
        ));
        let governed = bridge.full_sync().await?;

        tracing::info!(builtins, governed, "Warden ready");

        let admin = ToolAdmin::new(Arc::clone(&governance), Arc::clone(&bridge));
        Ok(Self {
            config,
            governance,
            registry,
            bridge,
            admin,
        })
    }

    /// Bootstrap over the JSON file store under `config.store.data_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read, or as
    /// [`Warden::bootstrap`].
    pub async fn open(config: WardenConfig, connector: Arc<dyn ToolConnector>) -> Result<Self> {
        let store = FileToolStore::open(config.store.tools_path()).await?;
        Self::bootstrap(config, Arc::new(store), connector).await
    }

    /// Bootstrap over a fresh in-memory store
    ///
    /// # Errors
    ///
    /// As [`Warden::bootstrap`].
    pub async fn in_memory(config: WardenConfig, connector: Arc<dyn ToolConnector>) -> Result<Self> {
        Self::bootstrap(config, Arc::new(InMemoryToolStore::new()), connector).await
    }

    /// Effective configuration
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Governance service
    pub fn governance(&self) -> &Arc<GovernanceService> {
        &self.governance
    }

    /// Live registry
    pub fn registry(&self) -> &Arc<LiveRegistry> {
        &self.registry
    }

    /// Registry bridge
    pub fn bridge(&self) -> &Arc<RegistryBridge> {
        &self.bridge
    }

    /// Administrative surface
    pub fn admin(&self) -> &ToolAdmin {
        &self.admin
    }

    /// Dispatch through the live registry
    pub async fn dispatch(&self, key: &str, call: ToolCall) -> DispatchEnvelope {
        self.registry.dispatch(key, call).await
    }
}
