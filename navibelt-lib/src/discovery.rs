//! Locating a belt among the devices known to the host.
//!
//! Paired belts advertise a name containing "naviGuertel". Enumerating
//! Bluetooth devices is left to the operating system; what is exposed here
//! is the lookup over whatever a [`BeltDiscovery`] implementation reports.

use tokio_serial::SerialPortType;
use tracing::{debug, info};

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_BELT_NAME};
use crate::error::{BeltError, Result};
use crate::transport::BeltAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBelt {
    pub name: String,
    pub address: BeltAddress,
}

pub trait BeltDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredBelt>>;
}

/// Lists serial ports, including bound RFCOMM channels.
#[derive(Debug, Clone)]
pub struct SerialPortDiscovery {
    pub baud_rate: u32,
}

impl Default for SerialPortDiscovery {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl BeltDiscovery for SerialPortDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredBelt>> {
        let ports = tokio_serial::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let name = match &port.port_type {
                    SerialPortType::UsbPort(usb) => [usb.manufacturer.as_deref(), usb.product.as_deref()]
                        .into_iter()
                        .flatten()
                        .chain(std::iter::once(port.port_name.as_str()))
                        .collect::<Vec<_>>()
                        .join(" "),
                    _ => port.port_name.clone(),
                };
                DiscoveredBelt {
                    name,
                    address: BeltAddress::Serial {
                        path: port.port_name,
                        baud_rate: self.baud_rate,
                    },
                }
            })
            .collect())
    }
}

/// First discovered device whose name contains `name` (default
/// "naviGuertel").
pub fn find_belt_address(discovery: &dyn BeltDiscovery, name: Option<&str>) -> Result<BeltAddress> {
    let name = name.unwrap_or(DEFAULT_BELT_NAME);
    let devices = discovery.discover()?;
    debug!(count = devices.len(), "Discovered devices");
    devices
        .into_iter()
        .find(|device| device.name.contains(name))
        .map(|device| {
            info!(name = %device.name, address = %device.address, "Found belt");
            device.address
        })
        .ok_or_else(|| BeltError::DeviceNotFound(name.to_string()))
}
