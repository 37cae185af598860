//! Fully Qualified Board Name.
//!
//! `package:architecture:board[:key=value,...]`

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::BuildError;

/// A parsed, immutable board identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fqbn {
    package: String,
    architecture: String,
    board_id: String,
    /// Menu options in the order they were written.
    config: IndexMap<String, String>,
}

fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl Fqbn {
    /// Parse an FQBN string.
    pub fn parse(s: &str) -> Result<Self, BuildError> {
        let invalid = |reason: &str| BuildError::InvalidFqbn {
            fqbn: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.splitn(4, ':').collect();
        if parts.len() < 3 {
            return Err(invalid("expected package:architecture:board"));
        }
        for (label, id) in [("package", parts[0]), ("architecture", parts[1]), ("board", parts[2])] {
            if !is_valid_id(id) {
                return Err(invalid(&format!("invalid {} `{}`", label, id)));
            }
        }

        let mut config = IndexMap::new();
        if let Some(options) = parts.get(3) {
            if options.is_empty() {
                return Err(invalid("empty board options"));
            }
            for option in options.split(',') {
                let (key, value) = option
                    .split_once('=')
                    .ok_or_else(|| invalid(&format!("option `{}` is not key=value", option)))?;
                if !is_valid_id(key) || value.is_empty() || value.contains(':') {
                    return Err(invalid(&format!("invalid option `{}`", option)));
                }
                if config.insert(key.to_string(), value.to_string()).is_some() {
                    return Err(invalid(&format!("duplicate option `{}`", key)));
                }
            }
        }

        Ok(Fqbn {
            package: parts[0].to_string(),
            architecture: parts[1].to_string(),
            board_id: parts[2].to_string(),
            config,
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Menu options as written.
    pub fn config(&self) -> &IndexMap<String, String> {
        &self.config
    }

    /// The FQBN without menu options.
    pub fn without_config(&self) -> String {
        format!("{}:{}:{}", self.package, self.architecture, self.board_id)
    }
}

impl fmt::Display for Fqbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.without_config())?;
        if !self.config.is_empty() {
            let options: Vec<String> = self
                .config
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, ":{}", options.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for Fqbn {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fqbn::parse(s)
    }
}

impl Serialize for Fqbn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fqbn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fqbn::parse(&s).map_err(serde::de::Error::custom)
    }
}
