//! This module is used for specifying the set of expected configurations.
use crate::log::log_config::ConfigError;
use std::fmt;
use std::str::FromStr;
use tracing::{error, trace};

/// `ConfigDefImportance` provides the levels of importance that different java_properties
/// have.
#[derive(Debug, PartialEq, Clone)]
pub enum ConfigDefImportance {
    High,
    Medium,
    Low,
}

/// `ConfigDef` defines a configuration property, its documentation, default and validation.
pub struct ConfigDef<T> {
    /// The configuration key that is used to apply this value
    pub key: String,
    /// How important the configuration definition is
    importance: ConfigDefImportance,
    /// `default` of the value, used when the property is not provided
    default: Option<T>,
    /// The documentation of the field, used for showing errors
    doc: &'static str,
    /// Whether or not this variable was provided by the configuration file.
    provided: bool,
    /// The current value, be it the default or overwritten by config
    value: Option<T>,
    /// A validator to ensure the new field value is correct
    validator: Option<Box<dyn Fn(Option<&T>) -> Result<(), ConfigError>>>,
}

impl<T> fmt::Debug for ConfigDef<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDef")
            .field("key", &self.key)
            .field("importance", &self.importance)
            .field("default", &self.default)
            .field("doc", &self.doc)
            .field("provided", &self.provided)
            .field("value", &self.value)
            .field("validator_exists", &self.validator.is_some())
            .finish()
    }
}

impl<T> Default for ConfigDef<T> {
    fn default() -> Self {
        Self {
            importance: ConfigDefImportance::Low,
            doc: "",
            key: String::from("unset.key"),
            default: None,
            provided: false,
            value: None,
            validator: None,
        }
    }
}

impl<T> ConfigDef<T>
where
    T: FromStr,
    ConfigError: From<<T as FromStr>::Err>,
    <T as FromStr>::Err: fmt::Display,
    T: fmt::Debug,
{
    /// Sets the `key` value, this comes from const &str values in the calling modules
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    /// Sets the documentation field for the current ConfigDef
    pub fn with_doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    pub fn with_importance(mut self, importance: ConfigDefImportance) -> Self {
        self.importance = importance;
        self
    }

    /// Sets the default value
    pub fn with_default(mut self, default: T) -> Self
    where
        T: Clone,
    {
        self.value = Some(default.clone());
        self.default = Some(default);
        self
    }

    pub fn with_validator(
        mut self,
        validator: Box<dyn Fn(Option<&T>) -> Result<(), ConfigError>>,
    ) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn set_value(&mut self, value: T) {
        self.value = Some(value);
        self.provided = true;
    }

    pub fn try_set_parsed_value(&mut self, value: &str) -> Result<(), ConfigError> {
        match value.parse::<_>() {
            Ok(val) => {
                self.set_value(val);
                Ok(())
            },
            Err(err) => {
                error!("Unable to parse property {:?} : {}. Doc: {}", value, err, self.doc);
                Err(ConfigError::from(err))
            },
        }
    }

    /// Checks a value is at least the lower bound (inclusive)
    pub fn at_least(data: Option<&T>, min: &T, key: &str) -> Result<(), ConfigError>
    where
        T: PartialOrd + fmt::Display,
    {
        match data {
            Some(val) => {
                if val < min {
                    Err(ConfigError::InvalidValue(format!(
                        "{}: '{}' should be at least {}",
                        key, val, min
                    )))
                } else {
                    Ok(())
                }
            },
            None => {
                error!("Running at_least() with no value provided for ConfigDef {}", key);
                Err(ConfigError::ComparisonOnNone(key.to_string()))
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.validator {
            Some(validator) => (validator)(self.value.as_ref()),
            None => Ok(()),
        }
    }

    /// build() does not consume self, a property may be read initially from a .properties file
    /// and later on be overridden from the command line, the validator and the default must be
    /// kept around to be re-used.
    pub fn build(&mut self) -> Result<T, ConfigError>
    where
        T: Clone,
    {
        self.validate()?;
        trace!("ConfigDef::build() {} = {:?}", self.key, self.value);
        match &self.value {
            Some(value) => Ok(value.clone()),
            None => Err(ConfigError::MissingKey(self.key.to_string())),
        }
    }
}

impl<T> ConfigDef<T>
where
    T: fmt::Display,
{
    /// Where the current value comes from, the config file or command line, the default, or
    /// nowhere yet.
    fn origin(&self) -> &'static str {
        if self.provided {
            "provided"
        } else if self.default.is_some() {
            "default"
        } else {
            "unset"
        }
    }

    /// Renders the property for listings: key, value, origin and importance, then its doc.
    pub fn describe(&self) -> String {
        let value = match &self.value {
            Some(value) => value.to_string(),
            None => String::from("<none>"),
        };
        format!(
            "{} = {} ({}, {:?} importance)\n    {}",
            self.key,
            value,
            self.origin(),
            self.importance,
            self.doc
        )
    }
}
