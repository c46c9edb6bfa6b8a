use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

/// Default bound on the length of an effective chain
pub const DEFAULT_MAX_PROGS: usize = 64;

/// Raw `key = value` settings of one section of a configuration file.
///
/// Values are parsed on access, so a bad value is reported with the key it
/// was found under.
#[derive(Debug, Clone, Default)]
pub struct SectionConfig {
    values: HashMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {err}")]
    InvalidValue {
        key: String,
        value: String,
        err: String,
    },
    #[error("{key} must be at least {min}, got {value}")]
    OutOfRange { key: String, value: usize, min: usize },
}

impl SectionConfig {
    pub fn insert(&mut self, key: String, value: String) {
        self.values.insert(key, value);
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse the value of `key`, falling back to `default` when it's missing.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.values.get(key) {
            Some(value) => parse(key, value),
            None => Ok(default),
        }
    }

    /// Parse a comma separated list, empty if `key` is missing.
    pub fn parse_list<T>(&self, key: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.values.get(key) else {
            return Ok(Vec::new());
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| parse(key, item))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SectionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Settings of a [`CgroupBpf`](crate::CgroupBpf) engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest effective chain an attach may produce
    pub max_progs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_progs: DEFAULT_MAX_PROGS,
        }
    }
}

impl TryFrom<&SectionConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let max_progs = config.parse_or("max_progs", DEFAULT_MAX_PROGS)?;
        if max_progs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_progs".to_string(),
                value: max_progs,
                min: 1,
            });
        }
        Ok(Self { max_progs })
    }
}
