use std::{env, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    address::{Address, AddressError},
    ledger::{Amount, TokenMetadata, DECIMALS, TOTAL_SUPPLY_TOKENS},
};

/// Environment variable holding the initial holder's address.
pub const INITIAL_HOLDER_ENV: &str = "INIT_DAO_WALLET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("initial holder not given and INIT_DAO_WALLET is not set")]
    MissingHolder,
    #[error("invalid initial holder address: {0}")]
    InvalidHolder(#[from] AddressError),
    #[error("supply of {supply_tokens} tokens with {decimals} decimals overflows")]
    SupplyOverflow { supply_tokens: u128, decimals: u8 },
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Supply in whole tokens.
    pub supply_tokens: u128,
}

impl Default for TokenConfig {
    fn default() -> Self {
        let meta = TokenMetadata::default();
        Self {
            name: meta.name,
            symbol: meta.symbol,
            decimals: DECIMALS,
            supply_tokens: TOTAL_SUPPLY_TOKENS,
        }
    }
}

impl TokenConfig {
    /// Reads a JSON config; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }

    /// Supply in smallest units.
    pub fn total_supply(&self) -> Result<Amount, ConfigError> {
        10u128
            .checked_pow(self.decimals as u32)
            .and_then(|scale| self.supply_tokens.checked_mul(scale))
            .ok_or(ConfigError::SupplyOverflow {
                supply_tokens: self.supply_tokens,
                decimals: self.decimals,
            })
    }
}

/// Picks the explicit holder if given, otherwise `INIT_DAO_WALLET`.
pub fn resolve_initial_holder(explicit: Option<&str>) -> Result<Address, ConfigError> {
    let from_env = env::var(INITIAL_HOLDER_ENV).ok();
    holder_from(explicit, from_env.as_deref())
}

fn holder_from(explicit: Option<&str>, from_env: Option<&str>) -> Result<Address, ConfigError> {
    let present = |s: &&str| !s.trim().is_empty();
    let raw = explicit
        .filter(present)
        .or(from_env.filter(present))
        .ok_or(ConfigError::MissingHolder)?;
    Ok(raw.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::ledger::TOTAL_SUPPLY;

    const HOLDER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn defaults_match_the_issued_token() {
        let config = TokenConfig::default();
        assert_eq!(config.name, "BLPToken");
        assert_eq!(config.symbol, "BLP");
        assert_eq!(config.total_supply().unwrap(), TOTAL_SUPPLY);
    }

    #[test]
    fn oversized_supply_is_rejected() {
        let config = TokenConfig {
            decimals: 40,
            ..TokenConfig::default()
        };
        assert!(matches!(
            config.total_supply(),
            Err(ConfigError::SupplyOverflow { decimals: 40, .. })
        ));
    }

    #[test]
    fn explicit_holder_wins_over_environment() {
        let other = "0x2222222222222222222222222222222222222222";
        let holder = holder_from(Some(HOLDER), Some(other)).unwrap();
        assert_eq!(holder, HOLDER.parse::<Address>().unwrap());
        let holder = holder_from(None, Some(other)).unwrap();
        assert_eq!(holder, other.parse::<Address>().unwrap());
    }

    #[test]
    fn blank_explicit_holder_falls_back_to_environment() {
        let holder = holder_from(Some(""), Some(HOLDER)).unwrap();
        assert_eq!(holder, HOLDER.parse::<Address>().unwrap());
        let holder = holder_from(Some("   "), Some(HOLDER)).unwrap();
        assert_eq!(holder, HOLDER.parse::<Address>().unwrap());
        assert!(matches!(holder_from(Some(""), Some(" ")), Err(ConfigError::MissingHolder)));
    }

    #[test]
    fn missing_or_bad_holder_fails() {
        assert!(matches!(holder_from(None, None), Err(ConfigError::MissingHolder)));
        assert!(matches!(holder_from(None, Some("  ")), Err(ConfigError::MissingHolder)));
        assert!(matches!(
            holder_from(Some("0x12"), None),
            Err(ConfigError::InvalidHolder(_))
        ));
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"symbol":"TST","supply_tokens":5}}"#).unwrap();
        let config = TokenConfig::load(file.path()).unwrap();
        assert_eq!(config.symbol, "TST");
        assert_eq!(config.name, "BLPToken");
        assert_eq!(config.total_supply().unwrap(), 5 * 10u128.pow(18));
    }
}
