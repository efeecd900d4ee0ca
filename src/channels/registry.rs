use crate::channels::{FrozenChannel, GatedChannel, IonChannel};
use crate::error::TreeError;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Constructor = Arc<dyn Fn() -> IonChannel + Send + Sync>;

#[derive(Clone)]
struct RegistryEntry {
    constructor: Constructor,
    e_rev: f64,
}

/// Channel factory addressed by channel name
///
/// Every tree owns a registry and instantiates channels from it the first time a name is
/// referenced. [ChannelRegistry::default] provides the stock channels `Na_Ta`, `Kv3_3`, `h`,
/// `Ca_HVA` and `SK`.
#[derive(Clone)]
pub struct ChannelRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ChannelRegistry {
    /// Registry without any channel
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a channel prototype with its default reversal potential (mV)
    pub fn register(
        &mut self,
        name: impl Into<String>,
        e_rev: f64,
        channel: impl Into<IonChannel>,
    ) -> &mut Self {
        let prototype = channel.into();
        self.register_with(name, e_rev, move || prototype.clone())
    }

    /// Register a channel constructor with its default reversal potential (mV)
    pub fn register_with(
        &mut self,
        name: impl Into<String>,
        e_rev: f64,
        constructor: impl Fn() -> IonChannel + Send + Sync + 'static,
    ) -> &mut Self {
        self.entries.insert(
            name.into(),
            RegistryEntry {
                constructor: Arc::new(constructor),
                e_rev,
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn instantiate(&self, name: &str) -> Result<IonChannel, TreeError> {
        self.entry(name).map(|entry| (entry.constructor)())
    }

    pub fn default_reversal(&self, name: &str) -> Result<f64, TreeError> {
        self.entry(name).map(|entry| entry.e_rev)
    }

    fn entry(&self, name: &str) -> Result<&RegistryEntry, TreeError> {
        self.entries.get(name).ok_or_else(|| TreeError::UnknownChannel {
            name: name.to_owned(),
        })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("Na_Ta", 50.0, GatedChannel::na_ta())
            .register("Kv3_3", -85.0, GatedChannel::kv3_3())
            .register("h", -43.0, GatedChannel::h())
            .register("Ca_HVA", 50.0, GatedChannel::ca_hva())
            .register("SK", -85.0, GatedChannel::sk())
            .register("shunt", 0.0, FrozenChannel::ohmic(""));
        registry
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, entry)| (name, entry.e_rev)))
            .finish()
    }
}

/// Channels instantiated for one tree
#[derive(Clone, Debug, Default)]
pub struct ChannelStorage {
    channels: BTreeMap<String, IonChannel>,
}

impl ChannelStorage {
    pub fn get(&self, name: &str) -> Result<&IonChannel, TreeError> {
        self.channels
            .get(name)
            .ok_or_else(|| TreeError::UnknownChannel {
                name: name.to_owned(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Instantiate `name` from `registry` unless it is already stored
    pub(crate) fn ensure(&mut self, registry: &ChannelRegistry, name: &str) -> Result<(), TreeError> {
        if !self.channels.contains_key(name) {
            let channel = registry.instantiate(name)?;
            self.channels.insert(name.to_owned(), channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channels::IonChannelTrait;

    #[test]
    fn default_registry_contains_stock_channels() {
        let registry = ChannelRegistry::default();
        for name in ["Na_Ta", "Kv3_3", "h", "Ca_HVA", "SK"] {
            assert!(registry.contains(name), "{name} is missing");
        }
        assert_eq!(registry.default_reversal("Kv3_3"), Ok(-85.0));
        assert_eq!(registry.instantiate("SK").unwrap().ion(), "k");
    }

    #[test]
    fn unknown_channel() {
        let registry = ChannelRegistry::empty();
        assert_eq!(
            registry.instantiate("Na_Ta").err(),
            Some(TreeError::UnknownChannel {
                name: "Na_Ta".into()
            })
        );
    }

    #[test]
    fn storage_is_populated_once() {
        let mut registry = ChannelRegistry::empty();
        registry.register("frozen", 0.0, FrozenChannel::new("k", 0.5, 1e-3));
        let mut storage = ChannelStorage::default();
        assert!(storage.get("frozen").is_err());
        storage.ensure(&registry, "frozen").unwrap();
        storage.ensure(&registry, "frozen").unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get("frozen").unwrap().open_probability(-75.0, None), Ok(0.5));
    }
}
