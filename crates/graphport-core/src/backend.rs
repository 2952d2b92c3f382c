use crate::abi::{ONNXIFI_BACKEND_PROPERTY_NONE, ONNXIFI_CAPABILITY_THREAD_SAFE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Concurrent runs on one graph handle are allowed.
    pub thread_safe: bool,
    pub bits: u64,
}

impl BackendCapabilities {
    pub fn from_bits(bits: u64) -> Self {
        Self {
            thread_safe: bits & ONNXIFI_CAPABILITY_THREAD_SAFE != 0,
            bits,
        }
    }
}

/// A typed backend-selection hint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackendProperty {
    Int { key: u64, value: i64 },
    Float { key: u64, value: f64 },
}

impl BackendProperty {
    pub fn key(&self) -> u64 {
        match self {
            BackendProperty::Int { key, .. } | BackendProperty::Float { key, .. } => *key,
        }
    }

    fn value_bits(&self) -> u64 {
        match self {
            BackendProperty::Int { value, .. } => *value as u64,
            BackendProperty::Float { value, .. } => value.to_bits(),
        }
    }
}

/// Properties handed to `onnxInitBackend`. Empty means "no special property".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyList {
    properties: Vec<BackendProperty>,
}

impl PropertyList {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn push(&mut self, property: BackendProperty) {
        self.properties.push(property);
    }

    pub fn properties(&self) -> &[BackendProperty] {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Native encoding: `[key, value-bits]*` followed by the NONE terminator.
    pub fn encode(&self) -> Vec<u64> {
        let mut words = Vec::with_capacity(self.properties.len() * 2 + 1);
        for property in &self.properties {
            words.push(property.key());
            words.push(property.value_bits());
        }
        words.push(ONNXIFI_BACKEND_PROPERTY_NONE);
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_policy_is_single_none_marker() {
        assert_eq!(PropertyList::none().encode(), vec![ONNXIFI_BACKEND_PROPERTY_NONE]);
    }

    #[test]
    fn typed_properties_encode_as_key_value_words() {
        let mut list = PropertyList::none();
        list.push(BackendProperty::Int { key: 7, value: -1 });
        list.push(BackendProperty::Float { key: 9, value: 0.5 });
        assert_eq!(list.encode(), vec![7, u64::MAX, 9, 0.5f64.to_bits(), 0]);
    }
}
