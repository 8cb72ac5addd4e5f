use serde::{Deserialize, Serialize};

pub const GIB: f64 = 1_073_741_824.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub address: String,
    #[serde(default)]
    pub mount_options: Option<String>,
}

impl Share {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            mount_options: None,
        }
    }

    /// Per-share mount flags, split on whitespace.
    pub fn mount_flags(&self) -> Vec<String> {
        self.mount_options
            .as_deref()
            .map(|options| options.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Live capacity of one share, in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CapacityInfo {
    pub total_size: f64,
    pub total_available: f64,
    pub total_allocated: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub used_ratio: f64,
    pub oversub_ratio: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Eligible {
        apparent_available: f64,
    },
    ZeroCapacity,
    UsedRatioExceeded {
        used_fraction: f64,
        used_ratio: f64,
    },
    InsufficientApparentSpace {
        apparent_available: f64,
        requested: f64,
    },
    ReservedAboveOversub {
        reserved_ratio: f64,
        oversub_ratio: f64,
    },
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareAssessment {
    pub share: String,
    pub mount_point: String,
    pub capacity: Option<CapacityInfo>,
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementReport {
    pub generated_at: String,
    pub requested_size_gib: u64,
    pub policy: Policy,
    pub assessments: Vec<ShareAssessment>,
    pub selected: Option<String>,
}

/// Backend-level capacity summary handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeStats {
    pub volume_backend_name: String,
    pub vendor_name: String,
    pub driver_version: String,
    pub storage_protocol: String,
    pub total_capacity_gb: f64,
    pub free_capacity_gb: f64,
    pub reserved_percentage: u8,
    pub mounted_shares: usize,
}
