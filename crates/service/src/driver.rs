use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use share_placer_core::{
    build_probe, load_shares, resolve_format, CapacityInspector, CapacityProbe, CifsClient,
    DriverConfig, Executor, PlacementError, PlacementReport, ProcessExecutor, RemoteFsClient,
    Result, Share, ShareSelector, VolumeFileCreator, VolumeFormat, VolumeStats, GIB,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DRIVER_VERSION: &str = "1.1.0";
const STORAGE_PROTOCOL: &str = "smbfs";
const VENDOR_NAME: &str = "Open Source";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub size_gib: u64,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub provider_location: Option<String>,
}

impl Volume {
    pub fn new(size_gib: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            size_gib,
            volume_type: None,
            provider_location: None,
        }
    }

    /// File name on the share; `volume-<id>` unless named explicitly.
    /// Explicit names must be one plain path component.
    pub fn file_name(&self) -> Result<String> {
        let Some(name) = &self.name else {
            return Ok(format!("volume-{}", self.id));
        };
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == name.as_str() => Ok(name.clone()),
            _ => Err(PlacementError::InvalidVolumeName { name: name.clone() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedVolume {
    pub provider_location: String,
    pub path: PathBuf,
    pub format: VolumeFormat,
}

pub fn load_volume(path: impl AsRef<Path>) -> AnyResult<Volume> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read volume request {}", path.display()))?;
    let volume: Volume = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(volume)
}

/// Places volume files on network shares.
pub struct ShareDriver {
    config: DriverConfig,
    client: Box<dyn RemoteFsClient>,
    probe: Box<dyn CapacityProbe>,
    creator: VolumeFileCreator,
    shares: Vec<Share>,
    mounted_shares: Vec<Share>,
    // Held from share selection until the volume file exists.
    placement: Mutex<()>,
}

impl ShareDriver {
    pub fn new(
        config: DriverConfig,
        client: Box<dyn RemoteFsClient>,
        probe: Box<dyn CapacityProbe>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            config,
            client,
            probe,
            creator: VolumeFileCreator::new(executor),
            shares: Vec::new(),
            mounted_shares: Vec::new(),
            placement: Mutex::new(()),
        }
    }

    /// Wires the real CIFS client, process executor and configured probe.
    pub fn from_config(config: DriverConfig) -> Self {
        let executor: Arc<dyn Executor> =
            Arc::new(ProcessExecutor::new(config.root_helper.as_deref()));
        let client = CifsClient::new(
            Arc::clone(&executor),
            config.mount_point_base.clone(),
            config.mount_options.clone(),
        );
        let probe = build_probe(config.capacity_backend, Arc::clone(&executor));
        Self::new(config, Box::new(client), probe, executor)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    pub fn mounted_shares(&self) -> &[Share] {
        &self.mounted_shares
    }

    /// Validates configuration, loads the shares file and mounts every share.
    pub fn do_setup(&mut self) -> Result<()> {
        self.config.validate()?;
        self.shares = load_shares(&self.config.shares_config)?;
        if self.shares.is_empty() {
            warn!(
                "no valid shares found in {}",
                self.config.shares_config.display()
            );
        }
        self.ensure_shares_mounted();
        Ok(())
    }

    /// Mounts every configured share, keeping the ones that succeed in
    /// configuration order.
    pub fn ensure_shares_mounted(&mut self) {
        let mut mounted = Vec::with_capacity(self.shares.len());
        for share in &self.shares {
            match self.client.mount(&share.address, &share.mount_flags()) {
                Ok(()) => mounted.push(share.clone()),
                Err(err) => error!("exception during mounting {}: {err}", share.address),
            }
        }
        debug!(
            "available shares: {:?}",
            mounted.iter().map(|share| &share.address).collect::<Vec<_>>()
        );
        self.mounted_shares = mounted;
    }

    pub fn ensure_share_mounted(&self, address: &str) -> Result<()> {
        let flags = self
            .shares
            .iter()
            .find(|share| share.address == address)
            .map(Share::mount_flags)
            .unwrap_or_default();
        self.client.mount(address, &flags)
    }

    pub fn find_share(&self, requested_size_gib: u64) -> Result<Share> {
        self.selector()
            .find_share(&self.mounted_shares, requested_size_gib)
    }

    pub fn placement_report(&self, requested_size_gib: u64) -> PlacementReport {
        self.selector()
            .placement_report(&self.mounted_shares, requested_size_gib)
    }

    pub fn volume_path(&self, share: &str, volume: &Volume) -> Result<PathBuf> {
        Ok(self.client.mount_point(share).join(volume.file_name()?))
    }

    pub fn local_path(&self, volume: &Volume) -> Result<Option<PathBuf>> {
        volume
            .provider_location
            .as_deref()
            .filter(|location| !location.is_empty())
            .map(|location| self.volume_path(location, volume))
            .transpose()
    }

    pub fn create_volume(&self, volume: &Volume) -> Result<CreatedVolume> {
        let format = resolve_format(volume.volume_type.as_deref(), &self.config)?;
        let file_name = volume.file_name()?;

        let _guard = self
            .placement
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let share = self.find_share(volume.size_gib)?;
        let path = self.client.mount_point(&share.address).join(&file_name);
        debug!("creating new volume at {}", path.display());
        self.creator
            .create(&path, volume.size_gib, format)
            .map_err(|err| {
                error!("volume creation failed at {}: {err}", path.display());
                err
            })?;

        info!(
            "created {} GiB {format:?} volume {file_name} on {}",
            volume.size_gib, share.address
        );
        Ok(CreatedVolume {
            provider_location: share.address,
            path,
            format,
        })
    }

    /// Removes the volume file. A volume that was never placed is a no-op.
    pub fn delete_volume(&self, volume: &Volume) -> Result<()> {
        let file_name = volume.file_name()?;
        let Some(location) = volume
            .provider_location
            .as_deref()
            .filter(|location| !location.is_empty())
        else {
            warn!("volume {file_name} does not have provider_location specified, skipping");
            return Ok(());
        };

        self.ensure_share_mounted(location)?;
        let path = self.client.mount_point(location).join(file_name);
        self.creator.remove(&path)?;
        info!("deleted volume {}", path.display());
        Ok(())
    }

    /// Sums live capacity across mounted shares.
    pub fn volume_stats(&self) -> Result<VolumeStats> {
        let inspector = CapacityInspector::new(self.client.as_ref(), self.probe.as_ref());
        let mut total_size = 0.0;
        let mut total_available = 0.0;
        for share in &self.mounted_shares {
            let capacity = inspector.capacity_info(&share.address)?;
            total_size += capacity.total_size;
            total_available += capacity.total_available;
        }

        Ok(VolumeStats {
            volume_backend_name: self.config.volume_backend_name.clone(),
            vendor_name: VENDOR_NAME.to_string(),
            driver_version: DRIVER_VERSION.to_string(),
            storage_protocol: STORAGE_PROTOCOL.to_string(),
            total_capacity_gb: total_size / GIB,
            free_capacity_gb: total_available / GIB,
            reserved_percentage: self.config.reserved_percentage,
            mounted_shares: self.mounted_shares.len(),
        })
    }

    fn selector(&self) -> ShareSelector<'_> {
        ShareSelector::new(
            self.config.policy(),
            self.client.as_ref(),
            self.probe.as_ref(),
        )
    }
}

/// JSON-friendly result of a create request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreateOutcome {
    Created(CreatedVolume),
    Failed { code: String, message: String },
}

impl From<PlacementError> for CreateOutcome {
    fn from(err: PlacementError) -> Self {
        CreateOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
