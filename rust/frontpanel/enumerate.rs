//! USB enumeration of attached FrontPanel hardware.
//!
//! Works without the vendor runtime, so "nothing plugged in" can be told apart
//! from "runtime not loaded" or "runtime cannot see the device".

use nusb::MaybeFuture;
use pyo3::prelude::*;

use crate::frontpanel::{FrontPanelError, Result};

/// USB vendor ID of FrontPanel-enabled boards.
pub const FRONTPANEL_VENDOR_ID: u16 = 0x151F;

/// An attached USB device.
#[pyclass(frozen)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsbDevice {
    #[pyo3(get)]
    pub vendor_id: u16,

    #[pyo3(get)]
    pub product_id: u16,

    #[pyo3(get)]
    pub serial_number: String,

    #[pyo3(get)]
    pub product_string: String,

    #[pyo3(get)]
    pub bus_number: u8,

    #[pyo3(get)]
    pub device_address: u8,
}

#[pymethods]
impl UsbDevice {
    fn __repr__(&self) -> String {
        format!(
            "UsbDevice(vendor_id=0x{:04x}, product_id=0x{:04x}, serial_number={:?})",
            self.vendor_id, self.product_id, self.serial_number
        )
    }
}

impl UsbDevice {
    #[cfg(target_os = "linux")]
    fn from_nusb(dev: &nusb::DeviceInfo) -> Self {
        Self {
            vendor_id: dev.vendor_id(),
            product_id: dev.product_id(),
            serial_number: dev.serial_number().unwrap_or_default().to_string(),
            product_string: dev.product_string().unwrap_or_default().to_string(),
            bus_number: dev.busnum(),
            device_address: dev.device_address(),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn from_nusb(dev: &nusb::DeviceInfo) -> Self {
        Self {
            vendor_id: dev.vendor_id(),
            product_id: dev.product_id(),
            serial_number: dev.serial_number().unwrap_or_default().to_string(),
            product_string: dev.product_string().unwrap_or_default().to_string(),
            bus_number: 0, // Not available on non-Linux
            device_address: dev.device_address(),
        }
    }
}

/// Keep FrontPanel devices, ordered by bus and address.
fn frontpanel_devices(mut devices: Vec<UsbDevice>) -> Vec<UsbDevice> {
    devices.retain(|d| d.vendor_id == FRONTPANEL_VENDOR_ID);
    devices.sort_by_key(|d| (d.bus_number, d.device_address));
    devices
}

/// List FrontPanel devices attached over USB.
///
/// Does not need `load_library()`.
#[pyfunction]
pub fn enumerate_usb_devices() -> Result<Vec<UsbDevice>> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| FrontPanelError::Connection {
            operation: "enumerate_usb_devices",
            serial: None,
            cause: e.to_string(),
        })?
        .map(|d| UsbDevice::from_nusb(&d))
        .collect();

    Ok(frontpanel_devices(devices))
}
