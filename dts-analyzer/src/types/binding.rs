use std::{collections::BTreeMap, fmt, fs, io, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("unable to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid binding {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The contents of a binding file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Binding {
    pub description: Option<String>,
    pub compatible: Option<String>,
    pub include: Option<Includes>,
    pub properties: Option<BTreeMap<String, PropertySpec>>,
    pub bus: Option<OneOrMany>,
    pub on_bus: Option<String>,
    pub child_binding: Option<Box<Binding>>,
    /// Everything else, including the `<specifier>-cells` name lists.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Binding {
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes as null.
        if text.trim().is_empty() {
            return Ok(Binding::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, BindingError> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => return Err(BindingError::Io { path, source }),
        };
        Self::parse(&text).map_err(|source| BindingError::Yaml { path, source })
    }

    /// Included bindings, in order.
    pub fn includes(&self) -> Vec<FilteredInclude> {
        match &self.include {
            None => Vec::new(),
            Some(Includes::One(name)) => vec![FilteredInclude::named(name)],
            Some(Includes::Many(list)) => list
                .iter()
                .map(|include| match include {
                    Include::Name(name) => FilteredInclude::named(name),
                    Include::Filtered(filtered) => filtered.clone(),
                })
                .collect(),
        }
    }

    /// The `<specifier>-cells` lists, keyed by specifier.
    pub fn cells(&self) -> BTreeMap<String, Vec<String>> {
        self.extra
            .iter()
            .filter_map(|(key, value)| {
                let specifier = key.strip_suffix("-cells")?;
                let names = value
                    .as_sequence()?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Some((specifier.to_string(), names))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Includes {
    One(String),
    Many(Vec<Include>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Include {
    Name(String),
    Filtered(FilteredInclude),
}

/// An include with optional property filters.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilteredInclude {
    pub name: String,
    pub property_allowlist: Option<Vec<String>>,
    pub property_blocklist: Option<Vec<String>>,
}

impl FilteredInclude {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn allows(&self, property: &str) -> bool {
        let allowed = self
            .property_allowlist
            .as_ref()
            .map_or(true, |list| list.iter().any(|p| p == property));
        let blocked = self
            .property_blocklist
            .as_ref()
            .map_or(false, |list| list.iter().any(|p| p == property));
        allowed && !blocked
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// A property declaration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PropertySpec {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
    #[serde(rename = "enum")]
    pub enumeration: Option<Vec<Scalar>>,
    #[serde(rename = "const")]
    pub constant: Option<Scalar>,
    pub default: Option<serde_yaml::Value>,
    pub specifier_space: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

/// A single integer or string, as used by `enum` and `const`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_binding() {
        let binding = Binding::parse(
            r#"
description: Test sensor
compatible: "vnd,sensor"
include: [base.yaml, {name: "pinctrl-device.yaml", property-allowlist: [pinctrl-0]}]
on-bus: i2c
properties:
  reg:
    required: true
  mode:
    type: int
    enum: [1, 2, 4]
  label:
    type: string
    const: "sensor"
    deprecated: true
gpio-cells:
  - pin
  - flags
child-binding:
  description: Channel
  properties:
    channel:
      type: int
"#,
        )
        .unwrap();

        assert_eq!(binding.compatible.as_deref(), Some("vnd,sensor"));
        assert_eq!(binding.on_bus.as_deref(), Some("i2c"));

        let includes = binding.includes();
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].name, "base.yaml");
        assert!(includes[0].allows("anything"));
        assert!(includes[1].allows("pinctrl-0"));
        assert!(!includes[1].allows("pinctrl-names"));

        let properties = binding.properties.as_ref().unwrap();
        assert!(properties["reg"].required);
        assert_eq!(properties["mode"].ty.as_deref(), Some("int"));
        assert_eq!(
            properties["mode"].enumeration,
            Some(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(4)])
        );
        assert_eq!(properties["label"].constant, Some(Scalar::Str("sensor".into())));
        assert!(properties["label"].deprecated);

        assert_eq!(
            binding.cells().get("gpio"),
            Some(&vec!["pin".to_string(), "flags".to_string()])
        );

        let child = binding.child_binding.unwrap();
        assert!(child.properties.unwrap().contains_key("channel"));
    }

    #[test]
    fn parse_edge_cases() {
        assert!(Binding::parse("").unwrap().compatible.is_none());
        assert!(Binding::parse("properties:\n").unwrap().properties.is_none());
        assert!(Binding::parse("compatible: [").is_err());

        let binding = Binding::parse("include: base.yaml\nbus: [i2c, i3c]\n").unwrap();
        assert_eq!(binding.includes()[0].name, "base.yaml");
        assert_eq!(
            binding.bus.map(|b| b.to_vec()),
            Some(vec!["i2c".to_string(), "i3c".to_string()])
        );
    }
}
