use device::Device;

pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod scan;
pub mod signal;

pub mod prelude {
    pub use crate::{
        config::*, device::*, error::*, manager::*, metadata::*, registry::*, scan::*, signal::*,
    };
    pub use crate::DeviceEvent;
}

/// Everything the presentation layer gets told about
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    /// A device was seen for the first time
    Found(Device),
    /// A device went quiet for too long and was dropped
    Lost(Device),
    /// The ranked list changed, re-read the registry snapshot
    Changed,
}
