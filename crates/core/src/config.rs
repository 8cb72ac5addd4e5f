use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{PlacementError, Result};
use crate::model::{Policy, Share};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapacityBackendKind {
    /// `stat -f` and `du --apparent-size` through the executor.
    #[default]
    Command,
    /// In-process `statvfs` plus a directory walk.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    #[serde(default = "default_shares_config")]
    pub shares_config: PathBuf,
    #[serde(default = "default_true")]
    pub sparsed_volumes: bool,
    #[serde(default = "default_used_ratio")]
    pub used_ratio: f64,
    #[serde(default = "default_oversub_ratio")]
    pub oversub_ratio: f64,
    #[serde(default = "default_mount_point_base")]
    pub mount_point_base: PathBuf,
    #[serde(default)]
    pub mount_options: Option<String>,
    #[serde(default)]
    pub qcow2_volumes: bool,
    #[serde(default)]
    pub root_helper: Option<String>,
    #[serde(default)]
    pub capacity_backend: CapacityBackendKind,
    #[serde(default)]
    pub reserved_percentage: u8,
    #[serde(default = "default_backend_name")]
    pub volume_backend_name: String,
}

fn default_shares_config() -> PathBuf {
    PathBuf::from("/etc/cinder/smbfs_shares")
}

fn default_true() -> bool {
    true
}

fn default_used_ratio() -> f64 {
    0.95
}

fn default_oversub_ratio() -> f64 {
    1.0
}

fn default_mount_point_base() -> PathBuf {
    PathBuf::from("/var/lib/cinder/mnt")
}

fn default_backend_name() -> String {
    "Generic_SMBFS".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            shares_config: default_shares_config(),
            sparsed_volumes: default_true(),
            used_ratio: default_used_ratio(),
            oversub_ratio: default_oversub_ratio(),
            mount_point_base: default_mount_point_base(),
            mount_options: None,
            qcow2_volumes: false,
            root_helper: None,
            capacity_backend: CapacityBackendKind::Command,
            reserved_percentage: 0,
            volume_backend_name: default_backend_name(),
        }
    }
}

impl DriverConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| PlacementError::io(path, source))?;
        toml::from_str(&raw).map_err(|err| {
            PlacementError::config(format!("failed to parse {}: {err}", path.display()))
        })
    }

    pub fn policy(&self) -> Policy {
        Policy {
            used_ratio: self.used_ratio,
            oversub_ratio: self.oversub_ratio,
        }
    }

    /// Checks the shares file and the policy knobs. Run once at setup.
    pub fn validate(&self) -> Result<()> {
        if self.shares_config.as_os_str().is_empty() {
            return Err(config_error(
                "there's no shares config file configured (shares_config)".to_string(),
            ));
        }
        if !self.shares_config.exists() {
            return Err(config_error(format!(
                "shares config file at {} doesn't exist",
                self.shares_config.display()
            )));
        }
        // Written as negations so NaN is rejected too.
        if !(self.oversub_ratio > 0.0) {
            return Err(config_error(format!(
                "oversub_ratio invalid, must be > 0: {}",
                self.oversub_ratio
            )));
        }
        if !(self.used_ratio > 0.0 && self.used_ratio <= 1.0) {
            return Err(config_error(format!(
                "used_ratio invalid, must be > 0 and <= 1.0: {}",
                self.used_ratio
            )));
        }
        if self.reserved_percentage > 100 {
            return Err(config_error(format!(
                "reserved_percentage invalid, must be <= 100: {}",
                self.reserved_percentage
            )));
        }
        Ok(())
    }
}

fn config_error(details: String) -> PlacementError {
    error!("{details}");
    PlacementError::config(details)
}

pub fn load_shares(path: impl AsRef<Path>) -> Result<Vec<Share>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| PlacementError::io(path, source))?;
    Ok(parse_shares(&raw))
}

/// Parses `<address> [options]` lines, keeping file order. A repeated address
/// keeps its first position and takes the later options.
pub fn parse_shares(raw: &str) -> Vec<Share> {
    let mut shares: Vec<Share> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (address, options) = match line.split_once(char::is_whitespace) {
            Some((address, rest)) => (address, Some(rest.trim())),
            None => (line, None),
        };
        if !is_share_address(address) {
            warn!("share {address} ignored due to invalid format");
            continue;
        }
        let options = options
            .filter(|options| !options.is_empty())
            .map(str::to_string);

        match shares.iter_mut().find(|share| share.address == address) {
            Some(existing) => existing.mount_options = options,
            None => shares.push(Share {
                address: address.to_string(),
                mount_options: options,
            }),
        }
    }
    shares
}

fn is_share_address(address: &str) -> bool {
    if let Some(rest) = address.strip_prefix("//") {
        return matches!(rest.split_once('/'), Some((host, path)) if !host.is_empty() && !path.is_empty());
    }
    matches!(address.split_once(":/"), Some((host, path)) if !host.is_empty() && !path.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{parse_shares, CapacityBackendKind, DriverConfig};
    use crate::error::PlacementError;

    fn config_with_shares_file() -> (tempfile::TempDir, DriverConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let shares = dir.path().join("shares");
        fs::write(&shares, "//127.0.0.1/volumes\n").expect("write shares");
        let config = DriverConfig {
            shares_config: shares,
            ..DriverConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn parse_shares_skips_comments_and_invalid_lines() {
        let raw = "\
# primary pool
//10.0.0.5/volumes -o username=svc

not-a-share
//10.0.0.6/archive
nfs-host:/export/vols
";
        let shares = parse_shares(raw);
        let addresses = shares
            .iter()
            .map(|share| share.address.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            addresses,
            vec!["//10.0.0.5/volumes", "//10.0.0.6/archive", "nfs-host:/export/vols"]
        );
        assert_eq!(shares[0].mount_options.as_deref(), Some("-o username=svc"));
        assert_eq!(shares[1].mount_options, None);
    }

    #[test]
    fn duplicate_share_keeps_position_and_takes_latest_options() {
        let shares = parse_shares("//a/one opt1\n//b/two\n//a/one opt2\n");
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].address, "//a/one");
        assert_eq!(shares[0].mount_options.as_deref(), Some("opt2"));
    }

    #[test]
    fn toml_defaults_fill_missing_keys() {
        let config: DriverConfig =
            toml::from_str("used_ratio = 0.8\ncapacity_backend = \"native\"\n").expect("parse");
        assert_eq!(config.used_ratio, 0.8);
        assert_eq!(config.oversub_ratio, 1.0);
        assert!(config.sparsed_volumes);
        assert!(!config.qcow2_volumes);
        assert_eq!(config.capacity_backend, CapacityBackendKind::Native);
        assert_eq!(config.volume_backend_name, "Generic_SMBFS");
    }

    #[test]
    fn validate_accepts_defaults_with_existing_shares_file() {
        let (_dir, config) = config_with_shares_file();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_shares_file() {
        let config = DriverConfig {
            shares_config: "/nonexistent/share-placer/shares".into(),
            ..DriverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PlacementError::Configuration { .. })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_ratios() {
        let (_dir, base) = config_with_shares_file();
        for (used_ratio, oversub_ratio) in [
            (0.0, 1.0),
            (-0.5, 1.0),
            (1.5, 1.0),
            (f64::NAN, 1.0),
            (0.9, 0.0),
            (0.9, -1.0),
        ] {
            let config = DriverConfig {
                used_ratio,
                oversub_ratio,
                ..base.clone()
            };
            assert!(
                config.validate().is_err(),
                "used={used_ratio} oversub={oversub_ratio} should be rejected"
            );
        }

        let boundary = DriverConfig {
            used_ratio: 1.0,
            oversub_ratio: 20.0,
            ..base
        };
        assert!(boundary.validate().is_ok());
    }
}
