//! Read-only JSON routes
//!
//! The presentation layer looks up handlers by path. Core routes are always
//! present; integrations add their own through their descriptor's
//! `register_routes` hook. Handlers get a [`BridgeContext`] instead of
//! reaching for shared globals.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::{RegistryHandle, DESCRIPTORS};
use crate::state::StateHandle;

/// Everything a route handler may look at
#[derive(Debug, Clone)]
pub struct BridgeContext {
    pub state: StateHandle,
    pub registry: RegistryHandle,
    pub config: watch::Receiver<BridgeConfig>,
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: &BridgeContext) -> Result<Value, BridgeError>;
}

/// Path to handler lookup
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Arc<dyn RouteHandler>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.routes.keys()).finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core routes plus whatever the registered descriptors add
    pub fn build() -> Self {
        let mut table = Self::new();
        table.insert("/api/rig/state", RigStateRoute);
        table.insert("/api/config", ConfigRoute);
        table.insert("/api/adapters", AdaptersRoute);
        for descriptor in DESCRIPTORS {
            if let Some(register) = descriptor.register_routes {
                register(&mut table);
            }
        }
        table
    }

    /// Add or replace a route
    pub fn insert<H: RouteHandler + 'static>(&mut self, path: &str, handler: H) {
        self.routes.insert(path.to_string(), Arc::new(handler));
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub async fn dispatch(&self, path: &str, ctx: &BridgeContext) -> Result<Value, BridgeError> {
        let handler = self
            .routes
            .get(path)
            .ok_or_else(|| BridgeError::RouteNotFound(path.to_string()))?;
        handler.handle(ctx).await
    }
}

struct RigStateRoute;

#[async_trait]
impl RouteHandler for RigStateRoute {
    async fn handle(&self, ctx: &BridgeContext) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(ctx.state.snapshot().await?)?)
    }
}

struct ConfigRoute;

#[async_trait]
impl RouteHandler for ConfigRoute {
    async fn handle(&self, ctx: &BridgeContext) -> Result<Value, BridgeError> {
        let mut config = ctx.config.borrow().clone();
        // Never hand out secrets
        if !config.wsjtx_relay.key.is_empty() {
            config.wsjtx_relay.key = "********".into();
        }
        if !config.n3fjp.api_key.is_empty() {
            config.n3fjp.api_key = "********".into();
        }
        Ok(serde_json::to_value(config)?)
    }
}

struct AdaptersRoute;

#[async_trait]
impl RouteHandler for AdaptersRoute {
    async fn handle(&self, ctx: &BridgeContext) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(ctx.registry.adapters().await?)?)
    }
}

/// Status of one integration, by id
pub struct IntegrationStatusRoute(pub &'static str);

#[async_trait]
impl RouteHandler for IntegrationStatusRoute {
    async fn handle(&self, ctx: &BridgeContext) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(ctx.registry.integration_status(self.0).await?)?)
    }
}

/// `register_routes` hook of the WSJT-X relay
pub fn register_relay_routes(table: &mut RouteTable) {
    table.insert("/api/wsjtx/status", IntegrationStatusRoute("wsjtx-relay"));
}

/// `register_routes` hook of the N3FJP integration
pub fn register_n3fjp_routes(table: &mut RouteTable) {
    table.insert("/api/n3fjp/status", IntegrationStatusRoute("n3fjp"));
}
