//! Log Config
//! The settings a segment needs to open its files. Only the index capacity is consumed so far, the
//! store and the base offset are owned by the segment itself.

use crate::common::config_def::{ConfigDef, ConfigDefImportance};
use crate::log::offset_index::ENTRY_WIDTH;
use enum_iterator::IntoEnumIterator;
use fs_err::File;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufReader};
use std::num;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, trace};

// Config Keys
pub const SEGMENT_INDEX_MAX_BYTES_PROP: &str = "segment.index.max.bytes";

// Documentation
pub const SEGMENT_INDEX_MAX_BYTES_DOC: &str =
    "The maximum size in bytes of the offset index of a segment. The index file is preallocated \
     to this size when it is opened and trimmed back to its used size when it is closed. Values \
     that are not a multiple of the index entry width are rounded down.";

// Defaults
pub const DEFAULT_SEGMENT_INDEX_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// `ConfigError` is a custom error that is returned when properties are invalid, unknown,
/// missing or the config file is not readable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Property error: {0}")]
    Property(#[from] java_properties::PropertiesError),
    #[error("ParseInt error: {0}")]
    ParseInt(#[from] num::ParseIntError),
    #[error("Missing Key error: {0:?}")]
    MissingKey(String),
    #[error("Invalid Value: {0}")]
    InvalidValue(String),
    #[error("Unknown Key: {0}")]
    UnknownKey(String),
    #[error("Attempt to compare a value that is not provided and has no default: {0}")]
    ComparisonOnNone(String),
}

/// This implementation is only for testing, for example any I/O error is considered equal
impl PartialEq for ConfigError {
    fn eq(&self, rhs: &Self) -> bool {
        match self {
            Self::Io(_) => matches!(rhs, Self::Io(_)),
            Self::Property(lhs) => {
                matches!(rhs, Self::Property(rhs) if lhs.line_number() == rhs.line_number())
            },
            Self::ParseInt(lhs) => matches!(rhs, Self::ParseInt(rhs) if lhs == rhs),
            Self::MissingKey(lhs) => matches!(rhs, Self::MissingKey(rhs) if lhs == rhs),
            Self::InvalidValue(lhs) => matches!(rhs, Self::InvalidValue(rhs) if lhs == rhs),
            Self::UnknownKey(lhs) => matches!(rhs, Self::UnknownKey(rhs) if lhs == rhs),
            Self::ComparisonOnNone(lhs) => matches!(rhs, Self::ComparisonOnNone(rhs) if lhs == rhs),
        }
    }
}

/// A set of functions that the different configuration sets must implement, including building,
/// parsing, returning keys, etc.
pub trait ConfigSet {
    type ConfigKey;
    type ConfigType;
    /// `try_set_property` transforms a string value from the config into our actual types
    fn try_set_property(
        &mut self,
        property_name: &str,
        property_value: &str,
    ) -> Result<(), ConfigError>;
    /// `resolve` builds every ConfigDef of the set into its ConfigType.
    fn resolve(&mut self) -> Result<Self::ConfigType, ConfigError>;
    /// `describe` renders every property of the set with its current value and documentation
    fn describe(&self) -> Vec<String>;
    /// `build` calls `resolve` and once value resolution is done, validate_values makes sure that
    /// variables are compatible with each-other
    fn build(&mut self) -> Result<Self::ConfigType, ConfigError> {
        let res = self.resolve()?;
        self.validate_values(&res)?;
        Ok(res)
    }
    /// `config_names` returns a list of config keys used
    fn config_names() -> Vec<String>
    where
        Self::ConfigKey: IntoEnumIterator + fmt::Display,
    {
        Self::ConfigKey::into_enum_iter().map(|val| val.to_string()).collect()
    }
    /// `validate_values` ensures values are compatible with others and within limits not provided
    /// by the per-property validators.
    fn validate_values(&self, _cfg: &Self::ConfigType) -> Result<(), ConfigError> {
        Ok(())
    }
}

#[derive(Debug, IntoEnumIterator)]
pub enum SegmentConfigKey {
    SegmentIndexMaxBytes,
}

impl fmt::Display for SegmentConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentIndexMaxBytes => write!(f, "{}", SEGMENT_INDEX_MAX_BYTES_PROP),
        }
    }
}

impl FromStr for SegmentConfigKey {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            SEGMENT_INDEX_MAX_BYTES_PROP => Ok(Self::SegmentIndexMaxBytes),
            _ => Err(ConfigError::UnknownKey(input.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct SegmentConfigProperties {
    segment_index_max_bytes: ConfigDef<u64>,
}

impl Default for SegmentConfigProperties {
    fn default() -> Self {
        Self {
            segment_index_max_bytes: ConfigDef::default()
                .with_key(SEGMENT_INDEX_MAX_BYTES_PROP)
                .with_importance(ConfigDefImportance::High)
                .with_doc(SEGMENT_INDEX_MAX_BYTES_DOC)
                .with_default(DEFAULT_SEGMENT_INDEX_MAX_BYTES)
                .with_validator(Box::new(|data: Option<&u64>| {
                    // An index must at least hold one entry
                    ConfigDef::at_least(data, &(ENTRY_WIDTH as u64), SEGMENT_INDEX_MAX_BYTES_PROP)
                })),
        }
    }
}

impl ConfigSet for SegmentConfigProperties {
    type ConfigKey = SegmentConfigKey;
    type ConfigType = SegmentConfig;

    fn try_set_property(
        &mut self,
        property_name: &str,
        property_value: &str,
    ) -> Result<(), ConfigError> {
        match Self::ConfigKey::from_str(property_name)? {
            Self::ConfigKey::SegmentIndexMaxBytes => {
                self.segment_index_max_bytes.try_set_parsed_value(property_value)?
            },
        };
        Ok(())
    }

    fn resolve(&mut self) -> Result<Self::ConfigType, ConfigError> {
        trace!("SegmentConfigProperties::resolve()");
        let max_index_bytes = self.segment_index_max_bytes.build()?;
        Ok(Self::ConfigType { max_index_bytes })
    }

    fn describe(&self) -> Vec<String> {
        vec![self.segment_index_max_bytes.describe()]
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct SegmentConfig {
    /// Upper bound of the index file, once reached the segment must be rolled
    pub max_index_bytes: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { max_index_bytes: DEFAULT_SEGMENT_INDEX_MAX_BYTES }
    }
}

#[derive(Debug, Default)]
pub struct ConfigProperties {
    segment: SegmentConfigProperties,
}

impl ConfigProperties {
    pub fn try_set_property(
        &mut self,
        property_name: &str,
        property_value: &str,
    ) -> Result<(), ConfigError> {
        self.segment.try_set_property(property_name, property_value)
    }

    /// `config_names` returns a list of config keys known to ConfigProperties
    pub fn config_names() -> Vec<String> {
        SegmentConfigProperties::config_names()
    }

    pub fn describe(&self) -> Vec<String> {
        self.segment.describe()
    }

    /// `build` validates and resolves the properties into a Config
    pub fn build(&mut self) -> Result<Config, ConfigError> {
        trace!("ConfigProperties::build() INIT");
        let segment = self.segment.build()?;
        trace!("ConfigProperties::build() DONE");
        Ok(Config { segment })
    }

    /// Transforms from a HashMap of configs into a ConfigProperties object
    /// This may return ConfigError::UnknownKey errors
    pub fn from_properties_hashmap(
        input_config: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config_builder = Self::default();
        for (property, property_value) in &input_config {
            debug!("from_properties_hashmap: {} = {}", property, property_value);
            config_builder.try_set_property(property, property_value)?;
        }
        Ok(config_builder)
    }

    /// `read_config_file` reads a java properties file.
    pub fn read_config_file<P: AsRef<Path>>(filename: P) -> Result<Self, ConfigError> {
        debug!("read_config_file: Reading {}", filename.as_ref().display());
        let config_file_content = File::open(filename.as_ref())?;
        let input_config = java_properties::read(BufReader::new(config_file_content))?;
        Self::from_properties_hashmap(input_config)
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Config {
    pub segment: SegmentConfig,
}
