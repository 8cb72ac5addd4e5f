#![cfg(unix)]

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use share_placer_core::{
    DriverConfig, NativeProbe, PlacementError, ProcessExecutor, RemoteFsClient, Result,
};
use share_placer_service::{ShareDriver, Volume};

/// Treats plain directories as already-mounted shares.
struct DirClient {
    root: PathBuf,
}

impl RemoteFsClient for DirClient {
    fn mount(&self, share: &str, _flags: &[String]) -> Result<()> {
        let mount_point = self.mount_point(share);
        fs::create_dir_all(&mount_point).map_err(|err| PlacementError::io(&mount_point, err))
    }

    fn mount_point(&self, share: &str) -> PathBuf {
        self.root
            .join(share.trim_start_matches('/').replace(&['/', ':'][..], "_"))
    }
}

fn driver_for(dir: &tempfile::TempDir, shares: &str) -> ShareDriver {
    let shares_config = dir.path().join("shares");
    fs::write(&shares_config, shares).expect("write shares file");
    let config = DriverConfig {
        shares_config,
        mount_point_base: dir.path().join("mnt"),
        // The host filesystem's real usage is unknown; only allocation decides.
        used_ratio: 1.0,
        oversub_ratio: 1_000_000.0,
        ..DriverConfig::default()
    };
    ShareDriver::new(
        config,
        Box::new(DirClient {
            root: dir.path().join("mnt"),
        }),
        Box::new(NativeProbe),
        Arc::new(ProcessExecutor::new(None)),
    )
}

#[test]
fn sparse_volume_lands_on_least_allocated_share_and_is_deleted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut driver = driver_for(&dir, "//files-a/vol\n//files-b/vol\n");
    driver.do_setup().expect("setup");
    assert_eq!(driver.mounted_shares().len(), 2);

    // Share A already hosts a 10 GiB sparse volume.
    let busy = driver
        .volume_path("//files-a/vol", &Volume::new(0))
        .expect("volume path");
    File::create(&busy)
        .and_then(|file| file.set_len(10 * 1_073_741_824))
        .expect("sparse file");

    let volume = Volume {
        name: Some("volume-lifecycle".to_string()),
        ..Volume::new(1)
    };
    let created = driver.create_volume(&volume).expect("create volume");
    assert_eq!(created.provider_location, "//files-b/vol");
    let metadata = fs::metadata(&created.path).expect("volume file exists");
    assert_eq!(metadata.len(), 1_073_741_824);

    // Same name, same target share: never overwritten.
    assert!(matches!(
        driver.create_volume(&volume),
        Err(PlacementError::VolumeAlreadyExists { .. })
    ));

    let placed = Volume {
        provider_location: Some(created.provider_location.clone()),
        ..volume
    };
    driver.delete_volume(&placed).expect("delete volume");
    assert!(!created.path.exists());
}

#[test]
fn snapshot_files_do_not_count_as_allocation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut driver = driver_for(&dir, "//files-a/vol\n//files-b/vol\n");
    driver.do_setup().expect("setup");

    // A only holds a huge snapshot, B holds a small real volume.
    let snapshot = Volume {
        name: Some("volume-1.snapshot-7".to_string()),
        ..Volume::new(0)
    };
    File::create(driver.volume_path("//files-a/vol", &snapshot).expect("volume path"))
        .and_then(|file| file.set_len(50 * 1_073_741_824))
        .expect("snapshot file");
    let small = Volume {
        name: Some("volume-2".to_string()),
        ..Volume::new(0)
    };
    File::create(driver.volume_path("//files-b/vol", &small).expect("volume path"))
        .and_then(|file| file.set_len(1_073_741_824))
        .expect("volume file");

    let picked = driver.find_share(1).expect("eligible share");
    assert_eq!(picked.address, "//files-a/vol");

    let report = driver.placement_report(1);
    assert_eq!(report.selected.as_deref(), Some("//files-a/vol"));
}

#[test]
fn missing_shares_file_fails_setup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut driver = driver_for(&dir, "");
    fs::remove_file(dir.path().join("shares")).expect("remove shares file");
    assert!(matches!(
        driver.do_setup(),
        Err(PlacementError::Configuration { .. })
    ));
}
