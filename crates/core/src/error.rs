use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid configuration: {details}")]
    Configuration { details: String },

    #[error("capacity query failed for {share}: {details}")]
    CapacityQuery { share: String, details: String },

    #[error("no shares are mounted")]
    NoSharesMounted,

    #[error("no suitable share found for a {volume_size} GiB volume")]
    NoSuitableShareFound { volume_size: u64 },

    #[error("volume file already exists at {path}")]
    VolumeAlreadyExists { path: PathBuf },

    #[error("invalid volume name {name:?}: must be a single file name")]
    InvalidVolumeName { name: String },

    #[error("unsupported volume type: {name}")]
    UnsupportedVolumeType { name: String },

    #[error("failed to mount {share}: {details}")]
    Mount { share: String, details: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlacementError {
    /// Stable machine-readable identifier, used in CLI JSON output.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::CapacityQuery { .. } => "capacity_query",
            Self::NoSharesMounted => "no_shares_mounted",
            Self::NoSuitableShareFound { .. } => "no_suitable_share_found",
            Self::VolumeAlreadyExists { .. } => "volume_already_exists",
            Self::InvalidVolumeName { .. } => "invalid_volume_name",
            Self::UnsupportedVolumeType { .. } => "unsupported_volume_type",
            Self::Mount { .. } => "mount",
            Self::CommandFailed { .. } => "command_failed",
            Self::Io { .. } => "io",
        }
    }

    pub fn config(details: impl Into<String>) -> Self {
        Self::Configuration {
            details: details.into(),
        }
    }

    pub fn capacity(share: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::CapacityQuery {
            share: share.into(),
            details: details.to_string(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PlacementError;

    #[test]
    fn no_suitable_share_message_carries_requested_size() {
        let err = PlacementError::NoSuitableShareFound { volume_size: 42 };
        assert_eq!(err.code(), "no_suitable_share_found");
        assert!(err.to_string().contains("42 GiB"));
    }

    #[test]
    fn capacity_helper_formats_details() {
        let err = PlacementError::capacity("//host/share", "stat exited with 1");
        assert!(matches!(err, PlacementError::CapacityQuery { .. }));
        assert_eq!(
            err.to_string(),
            "capacity query failed for //host/share: stat exited with 1"
        );
    }
}
