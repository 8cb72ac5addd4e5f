pub mod capacity;
pub mod config;
pub mod doctor;
pub mod error;
pub mod exec;
pub mod model;
pub mod remotefs;
pub mod selector;
pub mod usage;
pub mod volume;

pub use capacity::{
    build_probe, BlockStats, CapacityInspector, CapacityProbe, CommandProbe, NativeProbe,
};
pub use config::{load_shares, parse_shares, CapacityBackendKind, DriverConfig};
pub use doctor::{collect_doctor_info, DoctorInfo, NetworkMount};
pub use error::{PlacementError, Result};
pub use exec::{CommandOutput, Executor, ProcessExecutor};
pub use model::{
    CapacityInfo, PlacementReport, Policy, Share, ShareAssessment, Verdict, VolumeStats, GIB,
};
pub use remotefs::{CifsClient, RemoteFsClient};
pub use selector::{evaluate, ShareSelector};
pub use usage::{apparent_usage, SNAPSHOT_PATTERN};
pub use volume::{resolve_format, VolumeFileCreator, VolumeFormat};
