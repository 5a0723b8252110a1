//! The three-stage filter pipeline.
//!
//! Filters decide, as early as possible, which work to skip: compartments
//! right after enumeration, resource types before any probe is dispatched,
//! and resource names after a record is constructed but before any
//! enrichment call is issued. Regular expressions compile once at engine
//! start; a compile failure is a configuration error.

use std::collections::HashSet;

use regex::Regex;

use crate::config::{ConfigError, EffectiveConfig};
use crate::types::ResourceType;

/// Compiled predicate set applied by the discovery engine.
///
/// Empty allow lists mean "no allow-list constraint", never "allow nothing".
#[derive(Debug, Clone)]
pub struct FilterSet {
    include_compartments: HashSet<String>,
    exclude_compartments: HashSet<String>,
    include_types: HashSet<ResourceType>,
    exclude_types: HashSet<ResourceType>,
    name_pattern: Option<Regex>,
    exclude_name_pattern: Option<Regex>,
}

impl FilterSet {
    /// Compile the filter set from the effective configuration.
    pub fn compile(config: &EffectiveConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            include_compartments: config.compartments.iter().cloned().collect(),
            exclude_compartments: config.exclude_compartments.iter().cloned().collect(),
            include_types: config.resource_types.iter().copied().collect(),
            exclude_types: config.exclude_resource_types.iter().copied().collect(),
            name_pattern: compile_pattern(config.name_pattern.as_deref())?,
            exclude_name_pattern: compile_pattern(config.exclude_name_pattern.as_deref())?,
        })
    }

    /// A filter set that passes everything.
    pub fn allow_all() -> Self {
        Self {
            include_compartments: HashSet::new(),
            exclude_compartments: HashSet::new(),
            include_types: HashSet::new(),
            exclude_types: HashSet::new(),
            name_pattern: None,
            exclude_name_pattern: None,
        }
    }

    /// Stage 1: should this compartment be traversed at all?
    pub fn compartment_allowed(&self, id: &str) -> bool {
        if self.exclude_compartments.contains(id) {
            return false;
        }
        self.include_compartments.is_empty() || self.include_compartments.contains(id)
    }

    /// Stage 2: should probes for this resource type be dispatched?
    pub fn resource_type_enabled(&self, kind: ResourceType) -> bool {
        if self.exclude_types.contains(&kind) {
            return false;
        }
        self.include_types.is_empty() || self.include_types.contains(&kind)
    }

    /// The resource types surviving stage 2, in catalog order.
    pub fn enabled_types(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|t| self.resource_type_enabled(*t))
            .collect()
    }

    /// Stage 3: should a record with this display name be kept?
    pub fn name_allowed(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude_name_pattern
            && exclude.is_match(name)
        {
            return false;
        }
        match &self.name_pattern {
            Some(include) => include.is_match(name),
            None => true,
        }
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|source| ConfigError::BadPattern {
                pattern: p.to_string(),
                source,
            }),
    }
}
