// The host storage layer looks drivers up by name instead of linking them
// in statically. A registry starts out with the quorum driver and can take
// more.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use super::{
    child::ChildDevice, device::QuorumDevice, error::ConfigError, options,
};

/// Turns a child descriptor from an option string into an opened device.
pub trait ChildResolver {
    fn resolve(
        &self,
        descriptor: &str,
    ) -> Result<Arc<dyn ChildDevice>, ConfigError>;
}

impl<F> ChildResolver for F
where
    F: Fn(&str) -> Result<Arc<dyn ChildDevice>, ConfigError>,
{
    fn resolve(
        &self,
        descriptor: &str,
    ) -> Result<Arc<dyn ChildDevice>, ConfigError> {
        self(descriptor)
    }
}

/// Builds a device from an option string.
pub trait DriverFactory: Send + Sync {
    fn open(
        &self,
        node_name: &str,
        options: &str,
        resolver: &dyn ChildResolver,
    ) -> Result<QuorumDevice, ConfigError>;
}

/// The `quorum` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuorumDriver;

impl DriverFactory for QuorumDriver {
    fn open(
        &self,
        node_name: &str,
        options: &str,
        resolver: &dyn ChildResolver,
    ) -> Result<QuorumDevice, ConfigError> {
        let parsed = options::parse(options)?;
        let children = parsed
            .children
            .iter()
            .map(|descriptor| resolver.resolve(descriptor))
            .collect::<Result<Vec<_>, _>>()?;
        QuorumDevice::new(node_name, &parsed.options, children)
    }
}

pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// A registry with no drivers at all.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// A registry holding the built-in `quorum` driver.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("quorum", Arc::new(QuorumDriver));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous driver.
    pub fn register(&mut self, name: &str, factory: Arc<dyn DriverFactory>) {
        debug!(driver = name, "registering driver");
        self.drivers.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn open(
        &self,
        driver: &str,
        node_name: &str,
        options: &str,
        resolver: &dyn ChildResolver,
    ) -> Result<QuorumDevice, ConfigError> {
        let factory = self
            .drivers
            .get(driver)
            .ok_or_else(|| ConfigError::UnknownDriver(driver.to_string()))?;
        factory.open(node_name, options, resolver)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
