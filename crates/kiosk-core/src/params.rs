//! Driver parameter schema and driver path helpers
//!
//! Every driver is addressed by a hierarchical path of the form
//! `<App>.Driver.<Category>.<InteractionType>[.<Series>[.<SubSeries>]]`,
//! for example `Common.Driver.FiscalRegistrator.COM.Shtrih`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known parameter names shared by the loader, the manager and drivers
pub mod keys {
    /// Handle of the required resource device (set by the manager)
    pub const REQUIRED_DEVICE: &str = "required_device";
    /// Driver path of the required resource
    pub const REQUIRED_RESOURCE: &str = "required_resource";
    /// Model names supported by a driver
    pub const MODEL_NAME: &str = "model_name";
    /// Protocol name of a driver family
    pub const PROTOCOL_NAME: &str = "protocol_name";
    /// Detection priority of a driver
    pub const DETECT_PRIORITY: &str = "detect_priority";
    /// OS-level resource the device binds to
    pub const SYSTEM_NAME: &str = "system_name";
    /// How the device is being searched
    pub const SEARCHING_TYPE: &str = "searching_type";
    /// Whether several devices of one driver may coexist
    pub const EXISTENCE: &str = "existence";
    /// Interaction type override
    pub const INTERACTION_TYPE: &str = "interaction_type";
    /// Network address of a TCP-backed resource
    pub const REMOTE_IP: &str = "remote_ip";
    /// Network port of a TCP-backed resource
    pub const REMOTE_PORT: &str = "remote_port";
    /// Serial baud rate
    pub const BAUD_RATE: &str = "baud_rate";
}

/// Values of the `searching_type` parameter
pub mod searching_type {
    /// Device is being loaded from a stored configuration
    pub const LOADING: &str = "loading";
    /// Device is being probed during detection
    pub const AUTO_DETECTING: &str = "auto_detecting";
}

/// Interaction types that name a dedicated log-sink shape
pub mod interaction {
    pub const COM: &str = "COM";
    pub const USB: &str = "USB";
    pub const TCP: &str = "TCP";
    pub const SYSTEM: &str = "System";
    pub const OPOS: &str = "OPOS";
}

/// Kind of value a parameter carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Bool,
    Int,
    String,
    /// Handle of another device
    Device,
}

/// One entry of a driver parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: String,
    /// Value kind
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Enumerated values the parameter may take
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_values: Vec<Value>,
}

impl ParameterSpec {
    pub fn new(name: &str, kind: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: None,
            possible_values: Vec::new(),
        }
    }

    /// String parameter with a default value
    pub fn string(name: &str, default: &str) -> Self {
        Self::new(name, ParameterType::String).with_default(Value::from(default))
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_possible_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.possible_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Possible values rendered as strings
    pub fn possible_strings(&self) -> Vec<String> {
        self.possible_values.iter().map(value_to_string).collect()
    }
}

/// Detection priority of a driver; higher values are probed first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectPriority {
    /// Accepted only when nothing better satisfied the category
    Fallback,
    Low,
    #[default]
    Normal,
    High,
}

impl DetectPriority {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "fallback" => Self::Fallback,
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fallback => "fallback",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Whether a detected device excludes siblings of its category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Existence {
    #[default]
    Unique,
    Multiple,
}

impl Existence {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("multiple") {
            Self::Multiple
        } else {
            Self::Unique
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Multiple => "multiple",
        }
    }
}

/// Parsed view of a hierarchical driver path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPath<'a> {
    raw: &'a str,
    sections: Vec<&'a str>,
}

impl<'a> DriverPath<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            sections: raw.split('.').collect(),
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    /// Section at `index`, empty if absent
    pub fn section(&self, index: usize) -> &'a str {
        self.sections.get(index).copied().unwrap_or_default()
    }

    /// Device category (e.g. `FiscalRegistrator`)
    pub fn category(&self) -> &'a str {
        self.section(2)
    }

    /// Interaction type (e.g. `COM`, `USB`, `TCP`, `System`)
    pub fn interaction_type(&self) -> &'a str {
        self.section(3)
    }

    /// Driver series (e.g. `Shtrih`)
    pub fn series(&self) -> &'a str {
        self.section(4)
    }

    /// Whether the path belongs to a system (resource) driver
    pub fn is_system(&self) -> bool {
        self.interaction_type() == interaction::SYSTEM
            || self.sections.iter().skip(4).any(|s| *s == interaction::SYSTEM)
    }
}

/// Instance paths carry a `#<suffix>` after the driver path
pub const INSTANCE_SEPARATOR: char = '#';

/// Driver path part of an instance path
pub fn driver_path_of(instance_path: &str) -> &str {
    instance_path
        .split(INSTANCE_SEPARATOR)
        .next()
        .unwrap_or(instance_path)
}

/// Schema and static facts about one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Hierarchical driver path
    pub path: String,
    /// Ordered parameter specs
    pub parameters: Vec<ParameterSpec>,
}

impl DriverDescriptor {
    pub fn new(path: &str, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            path: path.to_string(),
            parameters,
        }
    }

    pub fn driver_path(&self) -> DriverPath<'_> {
        DriverPath::new(&self.path)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Declared parameter names
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Required resource path, empty when the driver needs none
    pub fn required_resource(&self) -> String {
        self.parameter(keys::REQUIRED_RESOURCE)
            .and_then(|p| p.default.as_ref())
            .map(value_to_string)
            .unwrap_or_default()
    }

    /// Whether the driver binds to a system name
    pub fn binds_system_name(&self) -> bool {
        self.parameter(keys::SYSTEM_NAME).is_some()
    }

    /// Candidate system names; `None` if the driver binds no system name
    pub fn system_names(&self) -> Option<Vec<String>> {
        self.parameter(keys::SYSTEM_NAME)
            .map(ParameterSpec::possible_strings)
    }

    /// Models served by the driver
    pub fn models(&self) -> Vec<String> {
        self.parameter(keys::MODEL_NAME)
            .map(ParameterSpec::possible_strings)
            .unwrap_or_default()
    }

    pub fn detect_priority(&self) -> DetectPriority {
        self.parameter(keys::DETECT_PRIORITY)
            .and_then(|p| p.default.as_ref())
            .map(|v| DetectPriority::parse(&value_to_string(v)))
            .unwrap_or_default()
    }

    pub fn existence(&self) -> Existence {
        self.parameter(keys::EXISTENCE)
            .and_then(|p| p.default.as_ref())
            .map(|v| Existence::parse(&value_to_string(v)))
            .unwrap_or_default()
    }

    /// Default configuration built from declared defaults
    pub fn default_configuration(&self) -> crate::Config {
        self.parameters
            .iter()
            .filter(|p| p.name != keys::REQUIRED_RESOURCE)
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect()
    }
}

/// Render a JSON scalar the way it is shown in names and logs
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
