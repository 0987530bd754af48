use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::format::Dataset;
use crate::materialize::{Materialized, Materializer};
use crate::qc::FlagVocabulary;
use crate::schema::VariableDescriptor;

/// Lifecycle of one logical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// Known, but its container has not been created yet.
    Declared,
    Materialized,
}

#[derive(Debug, Clone)]
struct Entry {
    descriptor: VariableDescriptor,
    state: RegistrationState,
}

/// Maps logical keys to descriptors and creates their containers at most once.
#[derive(Debug, Clone)]
pub struct Registry {
    materializer: Materializer,
    entries: BTreeMap<String, Entry>,
    dimensions: BTreeMap<String, VariableDescriptor>,
}

impl Registry {
    pub fn new(vocabulary: FlagVocabulary, time_dimension: impl Into<String>) -> Self {
        Self {
            materializer: Materializer::new(vocabulary, time_dimension),
            entries: BTreeMap::new(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn time_dimension(&self) -> &str {
        self.materializer.time_dimension()
    }

    pub fn state(&self, key: &str) -> RegistrationState {
        self.entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(RegistrationState::Unregistered)
    }

    pub fn get(&self, key: &str) -> Option<&VariableDescriptor> {
        self.entries.get(key).map(|e| &e.descriptor)
    }

    /// Descriptor of a registered fixed dimension.
    pub fn dimension(&self, key: &str) -> Option<&VariableDescriptor> {
        self.dimensions.get(key)
    }

    /// Registered keys and descriptors in key order.
    pub fn descriptors(&self) -> impl Iterator<Item = (&str, &VariableDescriptor)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.as_str(), &e.descriptor))
    }

    /// Descriptors whose containers exist, in key order.
    pub fn materialized(&self) -> impl Iterator<Item = (&str, &VariableDescriptor)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == RegistrationState::Materialized)
            .map(|(k, e)| (k.as_str(), &e.descriptor))
    }

    /// Record `key` without touching the file. Returns `false` for dimension
    /// descriptors, which are not insertable.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidDescriptor`: the descriptor is empty or incomplete
    pub fn declare(&mut self, key: &str, desc: VariableDescriptor) -> Result<bool> {
        if desc.is_empty() {
            return Err(Error::invalid_descriptor(key, "empty descriptor"));
        }
        desc.validate(key)?;
        if desc.is_dimension {
            self.dimensions.insert(key.to_string(), desc);
            return Ok(false);
        }
        self.entries.entry(key.to_string()).or_insert(Entry {
            descriptor: desc,
            state: RegistrationState::Declared,
        });
        Ok(true)
    }

    /// Declare `key` and create its container. Dimension descriptors create
    /// their dimension; an existing physical name is left untouched.
    pub fn register(&mut self, ds: &mut Dataset, key: &str, desc: VariableDescriptor) -> Result<()> {
        if desc.is_dimension {
            self.materializer.declare_dimension(ds, key, &desc)?;
        }
        if self.declare(key, desc)? {
            self.materialize(ds, key)?;
        }
        Ok(())
    }

    /// Register every descriptor in key order, dimensions first so that
    /// variables over them can be created. With `lazy` set, variables are
    /// only declared unless their container is already in the file. Empty
    /// entries are skipped with a warning.
    pub fn register_all(
        &mut self,
        ds: &mut Dataset,
        descriptors: &BTreeMap<String, VariableDescriptor>,
        lazy: bool,
    ) -> Result<()> {
        for (key, desc) in descriptors.iter().filter(|(_, d)| d.is_dimension) {
            self.register(ds, key, desc.clone())?;
        }
        for (key, desc) in descriptors.iter().filter(|(_, d)| !d.is_dimension) {
            if desc.is_empty() {
                log::warn!("{key}: empty descriptor skipped");
                continue;
            }
            if lazy && !ds.contains(&desc.name) {
                self.declare(key, desc.clone())?;
            } else {
                self.register(ds, key, desc.clone())?;
            }
        }
        Ok(())
    }

    /// Descriptor for `key`, creating its container on first use.
    pub fn resolve(&mut self, ds: &mut Dataset, key: &str) -> Result<&VariableDescriptor> {
        match self.state(key) {
            RegistrationState::Unregistered => Err(Error::UnknownDatatype(key.to_string())),
            RegistrationState::Declared => {
                self.materialize(ds, key)?;
                Ok(&self.entries[key].descriptor)
            }
            RegistrationState::Materialized => Ok(&self.entries[key].descriptor),
        }
    }

    fn materialize(&mut self, ds: &mut Dataset, key: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::UnknownDatatype(key.to_string()))?;
        if entry.state == RegistrationState::Materialized {
            return Ok(());
        }
        if self.materializer.materialize(ds, key, &entry.descriptor)? == Materialized::Existing {
            log::debug!("{key}: `{}` already in file", entry.descriptor.name);
        }
        entry.state = RegistrationState::Materialized;
        Ok(())
    }
}
