//! Registry of per-country tax rule sets

use crate::tax::rules::{TaxRuleSet, WithholdingKind};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BUILTIN_RULES: &[(&str, &str)] = &[
    ("ie.json", include_str!("../rules/ie.json")),
    ("uk.json", include_str!("../rules/uk.json")),
];

pub const BUILTIN_DEFAULT_COUNTRY: &str = "ie";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read rules from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rule set {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no rule sets found in {0}")]
    Empty(PathBuf),
    #[error("default country '{0}' has no rule set")]
    MissingDefault(String),
}

/// Loaded rule sets keyed by lower-case country code
#[derive(Debug, Clone)]
pub struct Config {
    default_country: String,
    rulesets: HashMap<String, Arc<TaxRuleSet>>,
}

impl Config {
    /// Rule sets compiled into the binary
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut rulesets = Vec::with_capacity(BUILTIN_RULES.len());
        for (file, json) in BUILTIN_RULES {
            let rules = TaxRuleSet::from_json(json).map_err(|source| ConfigError::Parse {
                file: file.to_string(),
                source,
            })?;
            rulesets.push(rules);
        }
        Config::with_rulesets(BUILTIN_DEFAULT_COUNTRY, rulesets)
    }

    /// Load every `*.json` rule file in `dir`
    pub fn from_dir(dir: &Path, default_country: &str) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut rulesets = Vec::with_capacity(paths.len());
        for path in paths {
            let json = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let rules = TaxRuleSet::from_json(&json).map_err(|source| ConfigError::Parse {
                file: path.display().to_string(),
                source,
            })?;
            log::debug!("loaded {} rules from {}", rules.country, path.display());
            rulesets.push(rules);
        }
        if rulesets.is_empty() {
            return Err(ConfigError::Empty(dir.to_path_buf()));
        }
        Config::with_rulesets(default_country, rulesets)
    }

    pub fn with_rulesets<I>(default_country: &str, rulesets: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = TaxRuleSet>,
    {
        let rulesets: HashMap<_, _> = rulesets
            .into_iter()
            .map(|rules| (rules.country.to_lowercase(), Arc::new(rules)))
            .collect();
        let default_country = default_country.to_lowercase();
        if !rulesets.contains_key(&default_country) {
            return Err(ConfigError::MissingDefault(default_country));
        }
        Ok(Config {
            default_country,
            rulesets,
        })
    }

    pub fn default_country(&self) -> &str {
        &self.default_country
    }

    pub fn ruleset(&self, country: &str) -> Option<Arc<TaxRuleSet>> {
        self.rulesets.get(&country.to_lowercase()).cloned()
    }

    pub fn default_ruleset(&self) -> Arc<TaxRuleSet> {
        // presence checked in `with_rulesets`
        Arc::clone(&self.rulesets[&self.default_country])
    }

    pub fn countries(&self) -> Vec<&str> {
        let mut countries: Vec<_> = self.rulesets.keys().map(String::as_str).collect();
        countries.sort_unstable();
        countries
    }

    /// Rate withheld at source on `kind` income from assets in `country`.
    /// Unknown countries withhold nothing.
    pub fn withholding_rate(&self, country: &str, kind: WithholdingKind) -> Decimal {
        match self.ruleset(country) {
            Some(rules) => rules.withholding_rate(kind),
            None => {
                log::warn!("no rule set for asset country '{}', assuming no withholding", country);
                Decimal::ZERO
            }
        }
    }
}
