use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::Disks;

use crate::config::DriverConfig;

const NETWORK_FILE_SYSTEMS: &[&str] = &["cifs", "smb3", "smbfs", "nfs", "nfs4"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub mount_point_base: String,
    pub mount_point_base_exists: bool,
    pub shares_config: String,
    pub shares_config_exists: bool,
    pub network_mounts: Vec<NetworkMount>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkMount {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total_space_bytes: u64,
    pub available_space_bytes: u64,
    /// Mounted below the driver's mount point base.
    pub managed: bool,
}

pub fn collect_doctor_info(config: &DriverConfig) -> DoctorInfo {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());

    let network_mounts = enumerate_network_mounts(&config.mount_point_base);
    let mut notes = vec![format!(
        "Capacity backend: {:?}; snapshot files are excluded from allocation.",
        config.capacity_backend
    )];
    if config.root_helper.is_none() {
        notes.push(
            "No root_helper configured; mount and inspection commands run unprivileged."
                .to_string(),
        );
    }
    if !network_mounts.iter().any(|mount| mount.managed) {
        notes.push("No network shares are mounted below the mount point base.".to_string());
    }

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        mount_point_base: config.mount_point_base.to_string_lossy().to_string(),
        mount_point_base_exists: config.mount_point_base.is_dir(),
        shares_config: config.shares_config.to_string_lossy().to_string(),
        shares_config_exists: config.shares_config.is_file(),
        network_mounts,
        notes,
    }
}

fn enumerate_network_mounts(mount_point_base: &Path) -> Vec<NetworkMount> {
    let disks = Disks::new_with_refreshed_list();
    let mut mounts = disks
        .list()
        .iter()
        .filter_map(|disk| {
            let file_system = disk.file_system().to_string_lossy().to_string();
            if !is_network_file_system(&file_system) {
                return None;
            }
            Some(NetworkMount {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: disk.mount_point().to_string_lossy().to_string(),
                managed: disk.mount_point().starts_with(mount_point_base),
                file_system,
                total_space_bytes: disk.total_space(),
                available_space_bytes: disk.available_space(),
            })
        })
        .collect::<Vec<_>>();
    mounts.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    mounts
}

fn is_network_file_system(file_system: &str) -> bool {
    let lowered = file_system.to_lowercase();
    NETWORK_FILE_SYSTEMS.contains(&lowered.as_str())
}
