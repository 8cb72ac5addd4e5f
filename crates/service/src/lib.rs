pub mod driver;

pub use driver::{
    load_volume, CreateOutcome, CreatedVolume, ShareDriver, Volume, DRIVER_VERSION,
};
