use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::CapacityBackendKind;
use crate::error::{PlacementError, Result};
use crate::exec::Executor;
use crate::model::CapacityInfo;
use crate::remotefs::RemoteFsClient;
use crate::usage::{apparent_usage, SNAPSHOT_PATTERN};

/// Filesystem block statistics, as reported by `stat -f -c '%S %b %a'`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockStats {
    pub block_size: f64,
    pub total_blocks: f64,
    pub available_blocks: f64,
}

/// Read-only inspection of a mounted filesystem.
pub trait CapacityProbe: Send + Sync {
    fn kind(&self) -> CapacityBackendKind;

    fn block_stats(&self, mount_point: &Path) -> Result<BlockStats>;

    /// Apparent bytes under the mount point, snapshot artifacts excluded.
    fn apparent_usage(&self, mount_point: &Path) -> Result<f64>;
}

pub fn build_probe(
    kind: CapacityBackendKind,
    executor: Arc<dyn Executor>,
) -> Box<dyn CapacityProbe> {
    match kind {
        CapacityBackendKind::Command => Box::new(CommandProbe::new(executor)),
        CapacityBackendKind::Native => Box::new(NativeProbe),
    }
}

/// Resolves shares to mount points and measures them.
pub struct CapacityInspector<'a> {
    client: &'a dyn RemoteFsClient,
    probe: &'a dyn CapacityProbe,
}

impl<'a> CapacityInspector<'a> {
    pub fn new(client: &'a dyn RemoteFsClient, probe: &'a dyn CapacityProbe) -> Self {
        Self { client, probe }
    }

    pub fn mount_point(&self, share: &str) -> String {
        self.client.mount_point(share).to_string_lossy().to_string()
    }

    pub fn capacity_info(&self, share: &str) -> Result<CapacityInfo> {
        let mount_point = self.client.mount_point(share);
        let stats = self
            .probe
            .block_stats(&mount_point)
            .map_err(|err| as_capacity_error(share, err))?;
        let total_allocated = self
            .probe
            .apparent_usage(&mount_point)
            .map_err(|err| as_capacity_error(share, err))?;

        let info = CapacityInfo {
            total_size: stats.block_size * stats.total_blocks,
            total_available: stats.block_size * stats.available_blocks,
            total_allocated,
        };
        debug!(
            "capacity of {share} ({:?} backend): size={} available={} allocated={}",
            self.probe.kind(),
            info.total_size,
            info.total_available,
            info.total_allocated
        );
        Ok(info)
    }
}

fn as_capacity_error(share: &str, err: PlacementError) -> PlacementError {
    match err {
        PlacementError::CapacityQuery { details, .. } => PlacementError::capacity(share, details),
        other => PlacementError::capacity(share, other),
    }
}

/// Shells out to `stat` and `du`, as root when a root helper is configured.
pub struct CommandProbe {
    executor: Arc<dyn Executor>,
}

impl CommandProbe {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl CapacityProbe for CommandProbe {
    fn kind(&self) -> CapacityBackendKind {
        CapacityBackendKind::Command
    }

    fn block_stats(&self, mount_point: &Path) -> Result<BlockStats> {
        let mount = mount_point.to_string_lossy();
        let output = self
            .executor
            .execute("stat", &["-f", "-c", "%S %b %a", &mount], true)?;
        parse_block_stats(&output.stdout)
            .map_err(|details| PlacementError::capacity(mount.to_string(), details))
    }

    fn apparent_usage(&self, mount_point: &Path) -> Result<f64> {
        let mount = mount_point.to_string_lossy();
        let output = self.executor.execute(
            "du",
            &["-sb", "--apparent-size", "--exclude", SNAPSHOT_PATTERN, &mount],
            true,
        )?;
        parse_du_bytes(&output.stdout)
            .map_err(|details| PlacementError::capacity(mount.to_string(), details))
    }
}

/// In-process inspection: `statvfs` and a directory walk.
pub struct NativeProbe;

impl CapacityProbe for NativeProbe {
    fn kind(&self) -> CapacityBackendKind {
        CapacityBackendKind::Native
    }

    #[cfg(unix)]
    fn block_stats(&self, mount_point: &Path) -> Result<BlockStats> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(|err| {
            PlacementError::capacity(mount_point.display().to_string(), err)
        })?;
        Ok(BlockStats {
            block_size: stat.fragment_size() as f64,
            total_blocks: stat.blocks() as f64,
            available_blocks: stat.blocks_available() as f64,
        })
    }

    #[cfg(not(unix))]
    fn block_stats(&self, mount_point: &Path) -> Result<BlockStats> {
        Err(PlacementError::capacity(
            mount_point.display().to_string(),
            "native block statistics need statvfs; use the command backend",
        ))
    }

    fn apparent_usage(&self, mount_point: &Path) -> Result<f64> {
        apparent_usage(mount_point).map(|bytes| bytes as f64)
    }
}

pub fn parse_block_stats(raw: &str) -> std::result::Result<BlockStats, String> {
    let values = raw
        .split_whitespace()
        .map(parse_count)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [block_size, total_blocks, available_blocks] => Ok(BlockStats {
            block_size: *block_size,
            total_blocks: *total_blocks,
            available_blocks: *available_blocks,
        }),
        _ => Err(format!(
            "expected `<block size> <total blocks> <available blocks>`, got {:?}",
            raw.trim()
        )),
    }
}

pub fn parse_du_bytes(raw: &str) -> std::result::Result<f64, String> {
    let first = raw
        .split_whitespace()
        .next()
        .ok_or_else(|| "du produced no output".to_string())?;
    parse_count(first)
}

fn parse_count(token: &str) -> std::result::Result<f64, String> {
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(format!("unparseable byte/block count {token:?}")),
    }
}
