//! Device identification and binding
//!
//! Chargers and meters are chosen once, at setup, by matching an opaque device
//! record against registered implementations. The engine itself only sees the
//! resulting `Charger` / `Meter` trait objects.

use crate::charger::Charger;
use crate::error::{FuseguardError, Result};
use crate::meter::Meter;
use serde::{Deserialize, Serialize};

/// Identifier domain used by the built-in simulated devices
pub const SIMULATED_DOMAIN: &str = "simulated";

/// `(domain, id)` pair naming a device within an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    pub domain: String,
    pub id: String,
}

/// Opaque description of a device as supplied by the host setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceRecord {
    pub identifiers: Vec<DeviceIdentifier>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceRecord {
    /// Record for a built-in simulated device
    pub fn simulated(id: &str) -> Self {
        Self {
            identifiers: vec![DeviceIdentifier {
                domain: SIMULATED_DOMAIN.to_string(),
                id: id.to_string(),
            }],
            manufacturer: Some("Fuseguard".to_string()),
            model: Some("Simulator".to_string()),
            name: Some(id.to_string()),
        }
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.identifiers.iter().any(|i| i.domain == domain)
    }

    pub fn manufacturer_is(&self, manufacturer: &str) -> bool {
        self.manufacturer
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(manufacturer))
    }

    fn describe(&self) -> String {
        let name = self.name.as_deref().unwrap_or("unnamed");
        let ids: Vec<String> = self
            .identifiers
            .iter()
            .map(|i| format!("{}:{}", i.domain, i.id))
            .collect();
        format!("{} [{}]", name, ids.join(", "))
    }
}

type Matcher = Box<dyn Fn(&DeviceRecord) -> bool + Send + Sync>;
type Factory<T> = Box<dyn Fn(&DeviceRecord) -> Result<Box<T>> + Send + Sync>;

struct Binding<T: ?Sized> {
    name: String,
    matches: Matcher,
    build: Factory<T>,
}

/// Ordered list of implementations; the first match wins
pub struct DeviceRegistry<T: ?Sized> {
    bindings: Vec<Binding<T>>,
}

pub type ChargerRegistry = DeviceRegistry<dyn Charger>;
pub type MeterRegistry = DeviceRegistry<dyn Meter>;

impl<T: ?Sized> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }
}

impl<T: ?Sized> DeviceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation
    pub fn register<M, F>(&mut self, name: &str, matches: M, build: F)
    where
        M: Fn(&DeviceRecord) -> bool + Send + Sync + 'static,
        F: Fn(&DeviceRecord) -> Result<Box<T>> + Send + Sync + 'static,
    {
        self.bindings.push(Binding {
            name: name.to_string(),
            matches: Box::new(matches),
            build: Box::new(build),
        });
    }

    /// Name of the implementation that would handle `record`
    pub fn identify(&self, record: &DeviceRecord) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| (b.matches)(record))
            .map(|b| b.name.as_str())
    }

    /// Build the implementation for `record`
    pub fn bind(&self, record: &DeviceRecord) -> Result<Box<T>> {
        match self.bindings.iter().find(|b| (b.matches)(record)) {
            Some(binding) => (binding.build)(record),
            None => Err(FuseguardError::config(format!(
                "Unsupported device: {}",
                record.describe()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
