//! Interns `(name, properties)` block-state pairs into dense `u16` ids.
//! Properties are stored sorted by key so two logically equal states hash
//! identically.

use std::collections::{BTreeMap, HashMap};

/// A parsed block state: a namespaced name plus a property bag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockState {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parses `name` plus a `k1=v1;k2=v2` (or `-` for none) variant string,
    /// the format used by the atlas metadata file.
    pub fn parse(name: &str, variant: &str) -> Self {
        let mut state = Self::new(name);
        if variant == "-" {
            return state;
        }
        for pair in variant.split(';') {
            if pair.is_empty() {
                continue;
            }
            if let Some((k, v)) = pair.split_once('=') {
                state.properties.insert(k.to_string(), v.to_string());
            }
        }
        state
    }

    /// Renders back to the `k1=v1;k2=v2` form, properties sorted by key
    /// since `properties` is a `BTreeMap`.
    pub fn format_variant(&self) -> String {
        if self.properties.is_empty() {
            return "-".to_string();
        }
        self.properties
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Fills in any property keys this block name is known to have but
    /// that `self` doesn't carry, using `default` for each missing key.
    fn canonicalize(&mut self, known_keys: &[String], default: &str) {
        for key in known_keys {
            self.properties.entry(key.clone()).or_insert_with(|| default.to_string());
        }
    }
}

/// Sentinel id for air-like defaults.
pub const AIR_ID: u16 = 0;

/// Interns block states into dense, process-stable `u16` ids.
#[derive(Debug, Default)]
pub struct BlockStateRegistry {
    states: Vec<BlockState>,
    ids: HashMap<BlockState, u16>,
    /// Property keys known to be recognized per block name, used to
    /// canonicalize states missing a key to its default value.
    known_properties: HashMap<String, Vec<String>>,
}

impl BlockStateRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        // id 0 is reserved for the air-like default.
        let air = BlockState::new("minecraft:air");
        registry.states.push(air.clone());
        registry.ids.insert(air, AIR_ID);
        registry
    }

    pub fn add_known_property(&mut self, name: &str, key: &str) {
        let keys = self.known_properties.entry(name.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Idempotent interning: the same logical state always yields the same id.
    pub fn get_id(&mut self, mut state: BlockState) -> u16 {
        if let Some(known) = self.known_properties.get(&state.name) {
            let known = known.clone();
            state.canonicalize(&known, "");
        }
        if let Some(&id) = self.ids.get(&state) {
            return id;
        }
        let id = self.states.len() as u16;
        self.states.push(state.clone());
        self.ids.insert(state, id);
        id
    }

    /// Looks up an id without inserting; used by render-time code paths
    /// that must never mutate the registry.
    pub fn find_id(&self, state: &BlockState) -> Option<u16> {
        self.ids.get(state).copied()
    }

    pub fn get_state(&self, id: u16) -> Option<&BlockState> {
        self.states.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut reg = BlockStateRegistry::new();
        let a = reg.get_id(BlockState::new("minecraft:stone"));
        let b = reg.get_id(BlockState::new("minecraft:stone"));
        assert_eq!(a, b);
    }

    #[test]
    fn air_is_id_zero() {
        let reg = BlockStateRegistry::new();
        assert_eq!(reg.find_id(&BlockState::new("minecraft:air")), Some(AIR_ID));
    }

    #[test]
    fn distinct_properties_get_distinct_ids() {
        let mut reg = BlockStateRegistry::new();
        let a = reg.get_id(BlockState::new("minecraft:oak_log").with_property("axis", "x"));
        let b = reg.get_id(BlockState::new("minecraft:oak_log").with_property("axis", "y"));
        assert_ne!(a, b);
    }

    #[test]
    fn block_state_variant_roundtrip() {
        let state = BlockState::new("minecraft:oak_fence")
            .with_property("waterlogged", "true")
            .with_property("west", "false");
        let variant = state.format_variant();
        let parsed = BlockState::parse(&state.name, &variant);
        assert_eq!(state, parsed);
    }

    #[test]
    fn dash_variant_means_no_properties() {
        let state = BlockState::parse("minecraft:stone", "-");
        assert!(state.properties.is_empty());
    }

    #[test]
    fn canonicalization_fills_missing_known_keys() {
        let mut reg = BlockStateRegistry::new();
        reg.add_known_property("minecraft:oak_fence", "waterlogged");
        let partial = reg.get_id(BlockState::new("minecraft:oak_fence"));
        let explicit = reg.get_id(BlockState::new("minecraft:oak_fence").with_property("waterlogged", ""));
        assert_eq!(partial, explicit);
    }
}
