use thiserror::Error;

use crate::slot::{
    FIELD_CACHE_SIZE, METHOD_CACHE_SIZE, METHOD_TYPE_CACHE_SIZE, STRING_CACHE_SIZE,
    TYPE_CACHE_SIZE,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} cache capacity {capacity} must be a power of two and at least 2")]
    InvalidCapacity { kind: &'static str, capacity: usize },
}

// every field overrides the matching default in DexCacheSettings
#[derive(Debug, Default, Clone)]
pub struct DexCacheCreateInfo {
    pub string_cache_size: Option<usize>,
    pub type_cache_size: Option<usize>,
    pub method_type_cache_size: Option<usize>,
    pub field_cache_size: Option<usize>,
    pub method_cache_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexCacheSettings {
    pub string_cache_size: usize,
    pub type_cache_size: usize,
    pub method_type_cache_size: usize,
    pub field_cache_size: usize,
    pub method_cache_size: usize,
}

impl Default for DexCacheSettings {
    fn default() -> Self {
        Self {
            string_cache_size: STRING_CACHE_SIZE,
            type_cache_size: TYPE_CACHE_SIZE,
            method_type_cache_size: METHOD_TYPE_CACHE_SIZE,
            field_cache_size: FIELD_CACHE_SIZE,
            method_cache_size: METHOD_CACHE_SIZE,
        }
    }
}

impl DexCacheSettings {
    pub fn from_info(info: &DexCacheCreateInfo) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        info.string_cache_size
            .inspect(|&val| settings.string_cache_size = val);
        info.type_cache_size
            .inspect(|&val| settings.type_cache_size = val);
        info.method_type_cache_size
            .inspect(|&val| settings.method_type_cache_size = val);
        info.field_cache_size
            .inspect(|&val| settings.field_cache_size = val);
        info.method_cache_size
            .inspect(|&val| settings.method_cache_size = val);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity("string", self.string_cache_size)?;
        check_capacity("type", self.type_cache_size)?;
        check_capacity("method type", self.method_type_cache_size)?;
        check_capacity("field", self.field_cache_size)?;
        check_capacity("method", self.method_cache_size)
    }
}

fn check_capacity(kind: &'static str, capacity: usize) -> Result<(), ConfigError> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(ConfigError::InvalidCapacity { kind, capacity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = DexCacheSettings::from_info(&DexCacheCreateInfo::default())
            .expect("defaults must validate");
        assert_eq!(settings, DexCacheSettings::default());
        assert_eq!(settings.string_cache_size, STRING_CACHE_SIZE);
    }

    #[test]
    fn overrides_are_applied() {
        let info = DexCacheCreateInfo {
            type_cache_size: Some(64),
            field_cache_size: Some(2),
            ..Default::default()
        };
        let settings = DexCacheSettings::from_info(&info).unwrap();
        assert_eq!(settings.type_cache_size, 64);
        assert_eq!(settings.field_cache_size, 2);
        assert_eq!(settings.method_cache_size, METHOD_CACHE_SIZE);
    }

    #[test]
    fn rejects_bad_capacities() {
        for bad in [0usize, 1, 3, 1000] {
            let info = DexCacheCreateInfo {
                method_type_cache_size: Some(bad),
                ..Default::default()
            };
            assert_eq!(
                DexCacheSettings::from_info(&info),
                Err(ConfigError::InvalidCapacity {
                    kind: "method type",
                    capacity: bad
                })
            );
        }
    }

    #[test]
    fn error_message_names_the_kind() {
        let err = ConfigError::InvalidCapacity {
            kind: "string",
            capacity: 3,
        };
        assert_eq!(
            err.to_string(),
            "string cache capacity 3 must be a power of two and at least 2"
        );
    }
}
