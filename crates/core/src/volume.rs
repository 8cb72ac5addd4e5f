use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DriverConfig;
use crate::error::{PlacementError, Result};
use crate::exec::Executor;

const VPC_TYPE_NAMES: &[&str] = &["vpc", "vhd", "vhdx"];
const GIB_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VolumeFormat {
    RawSparse,
    RawRegular,
    Qcow2,
    Vpc,
}

/// Picks the on-disk format from the volume type, then the driver flags.
pub fn resolve_format(volume_type: Option<&str>, config: &DriverConfig) -> Result<VolumeFormat> {
    match volume_type {
        Some(name) if VPC_TYPE_NAMES.contains(&name) => Ok(VolumeFormat::Vpc),
        Some(name) => Err(PlacementError::UnsupportedVolumeType {
            name: name.to_string(),
        }),
        None if config.qcow2_volumes => Ok(VolumeFormat::Qcow2),
        None if config.sparsed_volumes => Ok(VolumeFormat::RawSparse),
        None => Ok(VolumeFormat::RawRegular),
    }
}

pub struct VolumeFileCreator {
    executor: Arc<dyn Executor>,
}

impl VolumeFileCreator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Creates a volume file of `size_gib` and opens it read-write for everyone.
    pub fn create(&self, path: &Path, size_gib: u64, format: VolumeFormat) -> Result<()> {
        if path.exists() {
            return Err(PlacementError::VolumeAlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let target = path.to_string_lossy();
        debug!("creating {format:?} volume file at {target}");
        let bytes = size_gib.saturating_mul(GIB_BYTES).to_string();
        match format {
            VolumeFormat::RawSparse => {
                let size = format!("{size_gib}G");
                self.executor
                    .execute("truncate", &["-s", &size, &target], true)?;
            }
            VolumeFormat::RawRegular => {
                let output = format!("of={target}");
                let count = format!("count={}", size_gib.saturating_mul(1024));
                self.executor.execute(
                    "dd",
                    &["if=/dev/zero", &output, "bs=1M", &count],
                    true,
                )?;
            }
            VolumeFormat::Qcow2 => {
                self.executor.execute(
                    "qemu-img",
                    &[
                        "create",
                        "-f",
                        "qcow2",
                        "-o",
                        "preallocation=metadata",
                        &target,
                        &bytes,
                    ],
                    true,
                )?;
            }
            VolumeFormat::Vpc => {
                self.executor
                    .execute("qemu-img", &["create", "-f", "vpc", &target, &bytes], true)?;
            }
        }

        self.executor.execute("chmod", &["ugo+rw", &target], true)?;
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        self.executor.execute("rm", &["-f", &target], true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{resolve_format, VolumeFileCreator, VolumeFormat};
    use crate::config::DriverConfig;
    use crate::error::{PlacementError, Result};
    use crate::exec::{CommandOutput, Executor};

    #[derive(Default)]
    struct RecordingExecutor(Mutex<Vec<String>>);

    impl Executor for RecordingExecutor {
        fn execute(&self, program: &str, args: &[&str], _run_as_root: bool) -> Result<CommandOutput> {
            self.0
                .lock()
                .expect("calls lock")
                .push(format!("{program} {}", args.join(" ")));
            Ok(CommandOutput::default())
        }
    }

    #[test]
    fn format_follows_type_then_flags() {
        let config = DriverConfig::default();
        assert_eq!(
            resolve_format(Some("vhdx"), &config).expect("vpc"),
            VolumeFormat::Vpc
        );
        assert!(matches!(
            resolve_format(Some("gold"), &config),
            Err(PlacementError::UnsupportedVolumeType { ref name }) if name == "gold"
        ));
        assert_eq!(
            resolve_format(None, &config).expect("sparse"),
            VolumeFormat::RawSparse
        );

        let regular = DriverConfig {
            sparsed_volumes: false,
            ..DriverConfig::default()
        };
        assert_eq!(
            resolve_format(None, &regular).expect("regular"),
            VolumeFormat::RawRegular
        );

        let qcow2 = DriverConfig {
            qcow2_volumes: true,
            ..DriverConfig::default()
        };
        assert_eq!(
            resolve_format(None, &qcow2).expect("qcow2"),
            VolumeFormat::Qcow2
        );
    }

    #[test]
    fn creation_runs_tool_then_opens_permissions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("volume-1");
        let executor = Arc::new(RecordingExecutor::default());
        let creator = VolumeFileCreator::new(executor.clone());

        creator.create(&path, 2, VolumeFormat::Vpc).expect("create");
        creator
            .create(&path, 2, VolumeFormat::RawRegular)
            .expect("create");

        let calls = executor.0.lock().expect("calls lock").clone();
        let target = path.display().to_string();
        assert_eq!(
            calls,
            vec![
                format!("qemu-img create -f vpc {target} 2147483648"),
                format!("chmod ugo+rw {target}"),
                format!("dd if=/dev/zero of={target} bs=1M count=2048"),
                format!("chmod ugo+rw {target}"),
            ]
        );
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("volume-1");
        std::fs::write(&path, b"data").expect("write");
        let executor = Arc::new(RecordingExecutor::default());
        let creator = VolumeFileCreator::new(executor.clone());

        assert!(matches!(
            creator.create(&path, 1, VolumeFormat::RawSparse),
            Err(PlacementError::VolumeAlreadyExists { .. })
        ));
        assert!(executor.0.lock().expect("calls lock").is_empty());
    }
}
