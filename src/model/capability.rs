//! Optional model capabilities: persistence and inherited behavior.
//!
//! A schema may declare, through its `x-persist` and `x-parent` extension
//! keys, that its instances can be loaded from / saved to an external store,
//! or that they expose methods from a named base behavior. The engine only
//! defines the attachment points; the host application supplies the
//! implementations through a [`CapabilityResolver`] at load time. A declared
//! capability the resolver cannot supply is a capability error at load time,
//! never at use time.

use crate::error::Result;
use crate::model::{ModelInstance, Value};
use std::sync::Arc;

/// Persistence hooks for one schema's instances.
///
/// Both hooks are required by construction; there is no partially-persistent
/// attachment.
pub trait ModelStore: Send + Sync {
    /// Factory-style load; may legitimately return several instances
    fn load_from_store(&self, key: &Value) -> Result<Vec<ModelInstance>>;

    /// Persist one instance
    fn save_to_store(&self, instance: &ModelInstance) -> Result<()>;
}

/// Named methods mixed into a schema's instances from an external base type.
///
/// Schema fields always shadow behavior methods on name conflicts: field
/// access never consults the behavior.
pub trait ModelBehavior: Send + Sync {
    /// Invoke a named method against an instance
    fn invoke(&self, instance: &ModelInstance, method: &str) -> Result<Value>;
}

/// Supplies capability implementations for the extension names a spec
/// declares. Returning `None` for a declared name fails the load.
pub trait CapabilityResolver: Send + Sync {
    fn resolve_store(&self, name: &str) -> Option<Arc<dyn ModelStore>>;

    fn resolve_behavior(&self, name: &str) -> Option<Arc<dyn ModelBehavior>>;
}

/// Resolver that knows no capabilities; loads fail as soon as a spec
/// declares one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilityResolver for NoCapabilities {
    fn resolve_store(&self, _name: &str) -> Option<Arc<dyn ModelStore>> {
        None
    }

    fn resolve_behavior(&self, _name: &str) -> Option<Arc<dyn ModelBehavior>> {
        None
    }
}

/// Simple map-backed resolver for hosts that register capabilities by name.
#[derive(Default)]
pub struct CapabilityMap {
    stores: std::collections::HashMap<String, Arc<dyn ModelStore>>,
    behaviors: std::collections::HashMap<String, Arc<dyn ModelBehavior>>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store<S: Into<String>>(mut self, name: S, store: Arc<dyn ModelStore>) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    pub fn behavior<S: Into<String>>(mut self, name: S, behavior: Arc<dyn ModelBehavior>) -> Self {
        self.behaviors.insert(name.into(), behavior);
        self
    }
}

impl CapabilityResolver for CapabilityMap {
    fn resolve_store(&self, name: &str) -> Option<Arc<dyn ModelStore>> {
        self.stores.get(name).cloned()
    }

    fn resolve_behavior(&self, name: &str) -> Option<Arc<dyn ModelBehavior>> {
        self.behaviors.get(name).cloned()
    }
}
