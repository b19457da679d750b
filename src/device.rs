//! Devices and the driver interface the session core consumes.

use crate::error::Result;
use crate::trigger::ChannelId;

/// Driver hooks a device attaches to the session with. A device with no
/// driver is virtual: it is attached without ever being opened.
pub trait Driver {
    fn dev_open(&mut self) -> Result<()>;
    /// Commits pending configuration before acquisition starts.
    fn commit_config(&mut self) -> Result<()>;
    fn acquisition_start(&mut self) -> Result<()>;
    /// Optional: the default no-op matches "if the driver provides one".
    fn acquisition_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct Device {
    pub driver: Option<Box<dyn Driver>>,
    pub channels: Vec<ChannelId>,
}

impl Device {
    pub fn virtual_device(channels: Vec<ChannelId>) -> Device {
        Device {
            driver: None,
            channels,
        }
    }

    pub fn with_driver(driver: Box<dyn Driver>, channels: Vec<ChannelId>) -> Device {
        Device {
            driver: Some(driver),
            channels,
        }
    }
}
