//! JSON schema configuration.
//!
//! ```json
//! {
//!   "collections": {
//!     "accounts": {
//!       "accountNumber": { "strategy": "equality" },
//!       "balance": { "strategy": "range", "min": 0, "max": 10000000, "precision": 2 },
//!       "email": { "strategy": "none" }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::schema::{FieldSchema, RangeDomain, SchemaRegistry, Strategy};

/// Strategy of one field as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Stored in clear
    None,
    /// Deterministic equality encryption
    Equality,
    /// Order-preserving range encryption
    Range {
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
        /// Decimal places kept
        precision: u32,
    },
    /// Randomized, non-queryable encryption
    Randomized,
}

impl StrategyConfig {
    fn to_strategy(&self) -> Result<Strategy, Error> {
        Ok(match self {
            Self::None => Strategy::None,
            Self::Equality => Strategy::Equality,
            Self::Range {
                min,
                max,
                precision,
            } => Strategy::Range(RangeDomain::new(*min, *max, *precision)?),
            Self::Randomized => Strategy::Randomized,
        })
    }
}

impl From<&Strategy> for StrategyConfig {
    fn from(strategy: &Strategy) -> Self {
        match strategy {
            Strategy::None => Self::None,
            Strategy::Equality => Self::Equality,
            Strategy::Range(domain) => Self::Range {
                min: domain.min(),
                max: domain.max(),
                precision: domain.precision(),
            },
            Strategy::Randomized => Self::Randomized,
        }
    }
}

/// Collections and their field strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    /// Field strategies keyed by collection, then field name
    pub collections: BTreeMap<String, BTreeMap<String, StrategyConfig>>,
}

impl SchemaConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(invalid_config)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            Error::InvalidSchema(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Serializes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if a bound is not representable in
    /// JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(invalid_config)
    }

    /// Validates the configuration and builds a registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` if a declaration is invalid.
    pub fn to_registry(&self) -> Result<SchemaRegistry, Error> {
        let mut builder = SchemaRegistry::builder();
        for (collection, fields) in &self.collections {
            let fields = fields
                .iter()
                .map(|(field, strategy)| {
                    let strategy = strategy.to_strategy()?;
                    Ok(FieldSchema::new(collection.as_str(), field.as_str(), strategy))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            builder = builder.collection(collection.as_str(), fields);
        }
        builder.build()
    }
}

fn invalid_config(err: serde_json::Error) -> Error {
    Error::InvalidSchema(format!("schema config: {err}"))
}

impl From<&SchemaRegistry> for SchemaConfig {
    fn from(registry: &SchemaRegistry) -> Self {
        let collections = registry
            .collections()
            .map(|collection| {
                let fields = collection
                    .fields()
                    .map(|field| {
                        let strategy = StrategyConfig::from(field.strategy());
                        (field.name().to_string(), strategy)
                    })
                    .collect();
                (collection.name().to_string(), fields)
            })
            .collect();
        Self { collections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::financial_schema;

    const ACCOUNTS: &str = r#"{
        "collections": {
            "accounts": {
                "accountNumber": { "strategy": "equality" },
                "balance": { "strategy": "range", "min": 0, "max": 10000000, "precision": 2 },
                "pin": { "strategy": "randomized" },
                "email": { "strategy": "none" }
            }
        }
    }"#;

    #[test]
    fn test_parse_and_build() {
        let config = SchemaConfig::from_json(ACCOUNTS).unwrap();
        let registry = config.to_registry().unwrap();
        let accounts = registry.collection("accounts").unwrap();

        assert_eq!(accounts.strategy_of("accountNumber"), Strategy::Equality);
        assert_eq!(accounts.strategy_of("pin"), Strategy::Randomized);
        assert_eq!(accounts.strategy_of("email"), Strategy::None);
        assert_eq!(
            accounts.strategy_of("balance"),
            Strategy::Range(RangeDomain::new(0.0, 10_000_000.0, 2).unwrap())
        );
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let json = r#"{ "collections": { "a": { "x": {
            "strategy": "range", "min": 5, "max": 1, "precision": 0
        } } } }"#;
        let result = SchemaConfig::from_json(json).unwrap().to_registry();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let json = r#"{ "collections": { "a": { "x": { "strategy": "fuzzy" } } } }"#;
        let result = SchemaConfig::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{ "collections": {}, "extra": true }"#;
        let result = SchemaConfig::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = financial_schema().unwrap();
        let json = SchemaConfig::from(&registry).to_json().unwrap();
        let rebuilt = SchemaConfig::from_json(&json)
            .unwrap()
            .to_registry()
            .unwrap();
        assert_eq!(rebuilt, registry);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, ACCOUNTS).unwrap();

        let registry = SchemaConfig::load(&path)
            .unwrap()
            .to_registry()
            .unwrap();
        assert_eq!(registry.encrypted_fields().count(), 3);

        let missing = SchemaConfig::load(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(Error::InvalidSchema(_))));
    }
}
