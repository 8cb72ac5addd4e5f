use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{PlacementError, Result};
use crate::exec::Executor;

const MOUNTS_TABLE: &str = "/proc/mounts";

/// The two operations the driver needs from a remote filesystem client.
pub trait RemoteFsClient: Send + Sync {
    fn mount(&self, share: &str, flags: &[String]) -> Result<()>;

    fn mount_point(&self, share: &str) -> PathBuf;
}

/// Kernel CIFS client driven through `mount -t cifs`.
pub struct CifsClient {
    executor: Arc<dyn Executor>,
    mount_type: String,
    mount_point_base: PathBuf,
    mount_options: Option<String>,
    mounts_table: PathBuf,
}

impl CifsClient {
    pub fn new(
        executor: Arc<dyn Executor>,
        mount_point_base: impl Into<PathBuf>,
        mount_options: Option<String>,
    ) -> Self {
        Self {
            executor,
            mount_type: "cifs".to_string(),
            mount_point_base: mount_point_base.into(),
            mount_options: mount_options.filter(|options| !options.trim().is_empty()),
            mounts_table: PathBuf::from(MOUNTS_TABLE),
        }
    }

    pub fn with_mounts_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_table = path.into();
        self
    }

    fn is_mounted(&self, mount_point: &Path) -> bool {
        match fs::read_to_string(&self.mounts_table) {
            Ok(raw) => mounted_paths(&raw).iter().any(|path| path == mount_point),
            Err(err) => {
                debug!(
                    "could not read {}: {err}; assuming not mounted",
                    self.mounts_table.display()
                );
                false
            }
        }
    }

    fn mount_args(&self, share: &str, mount_point: &str, flags: &[String]) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.mount_type.clone()];
        if let Some(options) = &self.mount_options {
            args.push("-o".to_string());
            args.push(options.clone());
        }
        args.extend(flags.iter().cloned());
        args.push(share.to_string());
        args.push(mount_point.to_string());
        args
    }
}

impl RemoteFsClient for CifsClient {
    fn mount(&self, share: &str, flags: &[String]) -> Result<()> {
        let mount_point = self.mount_point(share);
        if self.is_mounted(&mount_point) {
            debug!("{share} is already mounted on {}", mount_point.display());
            return Ok(());
        }

        let mount_path = mount_point.to_string_lossy().to_string();
        self.executor
            .execute("mkdir", &["-p", &mount_path], true)
            .map_err(|err| PlacementError::Mount {
                share: share.to_string(),
                details: err.to_string(),
            })?;

        let args = self.mount_args(share, &mount_path, flags);
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        self.executor
            .execute("mount", &args, true)
            .map_err(|err| PlacementError::Mount {
                share: share.to_string(),
                details: err.to_string(),
            })?;

        info!("mounted {share} on {mount_path}");
        Ok(())
    }

    fn mount_point(&self, share: &str) -> PathBuf {
        self.mount_point_base.join(share_digest(share))
    }
}

/// Stable directory name for a share address.
pub fn share_digest(share: &str) -> String {
    let hex = blake3::hash(share.as_bytes()).to_hex();
    hex.as_str()[..32].to_string()
}

fn mounted_paths(raw: &str) -> Vec<PathBuf> {
    raw.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(field.replace("\\040", " ")))
        .collect()
}
