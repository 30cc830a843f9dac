// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! Configuration of the marshaling layer, read from a TOML file.

use std::env;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use toml;

#[cfg(not(test))]
const DEFAULT_CONF_DIR: &str = {
    match option_env!("CONFDIR") {
        Some(p) => p,
        None => "/usr/local/etc",
    }
};
#[cfg(test)]
const DEFAULT_CONF_DIR: &str = "testdata";

pub const DEFAULT_CONF_NAME: &str = "ckbridge.conf";

/// Default capacity of the per-session EC parameters cache
pub const DEFAULT_EC_PARAMS_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Path of the vendor code quirks file
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    /// Use the legacy (Latin-1) encoding for char-string attributes
    pub legacy_text_encoding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixupsConfig {
    /// Trust the first observed repair outcome for the rest of the
    /// module lifetime. When false every output is run through repair.
    pub adaptive: bool,
    pub ec_params_cache_size: usize,
}

impl Default for FixupsConfig {
    fn default() -> FixupsConfig {
        FixupsConfig {
            adaptive: true,
            ec_params_cache_size: DEFAULT_EC_PARAMS_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vendor: VendorConfig,
    pub attributes: AttributesConfig,
    pub fixups: FixupsConfig,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Locates the configuration file
    pub fn find_conf() -> Option<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("CKBRIDGE_CONF") {
            return Some(var);
        }
        let datafile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/ckbridge/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/ckbridge/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => format!(
                    "{}/ckbridge/{}",
                    DEFAULT_CONF_DIR, DEFAULT_CONF_NAME
                ),
            },
        };
        if Path::new(&datafile).is_file() {
            Some(datafile)
        } else {
            None
        }
    }

    pub fn from_toml(config_str: &str) -> Result<Config> {
        let mut conf: Config = toml::from_str(config_str)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Self::from_toml(&config_str)
    }

    /// Loads the configuration from the default locations, falling back
    /// to defaults when no file is found. Environment overrides are
    /// applied last.
    pub fn load() -> Result<Config> {
        let mut conf = match Self::find_conf() {
            Some(filename) => Self::from_file(&filename)?,
            None => Config::default(),
        };
        if let Ok(var) = env::var("CKBRIDGE_VENDORCODE") {
            conf.vendor.file = Some(var);
        }
        Ok(conf)
    }

    fn validate(&mut self) -> Result<()> {
        if self.fixups.ec_params_cache_size == 0 {
            return Err(Error::config_error(
                "fixups.ec_params_cache_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let conf = Config::from_toml("").unwrap();
        assert!(conf.vendor.file.is_none());
        assert!(!conf.attributes.legacy_text_encoding);
        assert!(conf.fixups.adaptive);
        assert_eq!(
            conf.fixups.ec_params_cache_size,
            DEFAULT_EC_PARAMS_CACHE_SIZE
        );
    }

    #[test]
    fn full_file() {
        let conf = Config::from_file("testdata/ckbridge.conf").unwrap();
        assert_eq!(
            conf.vendor.file.as_deref(),
            Some("testdata/vendorcode.conf")
        );
        assert!(conf.attributes.legacy_text_encoding);
        assert!(!conf.fixups.adaptive);
        assert_eq!(conf.fixups.ec_params_cache_size, 16);
    }

    #[test]
    fn invalid() {
        let err = Config::from_toml("[fixups]\nec_params_cache_size = 0\n")
            .unwrap_err();
        assert!(err.is_config());
        let err = Config::from_toml("[fixups\n").unwrap_err();
        assert!(err.is_config());
    }
}
