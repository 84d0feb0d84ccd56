//! Device metadata read when a session opens

use pyo3::prelude::*;

/// Metadata of an open device.
#[pyclass(frozen)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    #[pyo3(get)]
    pub serial: String,

    /// Board model name, e.g. "XEM7310-A75".
    #[pyo3(get)]
    pub product_name: String,

    /// Vendor board-model code.
    #[pyo3(get)]
    pub product_id: i32,

    /// User-assigned device identifier string.
    #[pyo3(get)]
    pub device_id: String,

    #[pyo3(get)]
    pub firmware_major: i32,

    #[pyo3(get)]
    pub firmware_minor: i32,

    // Capability flags
    #[pyo3(get)]
    pub is_high_speed: bool,

    #[pyo3(get)]
    pub host_interface_width: i32,
}

#[pymethods]
impl DeviceInfo {
    fn __repr__(&self) -> String {
        format!(
            "DeviceInfo(serial={:?}, product_name={:?}, device_id={:?}, firmware={})",
            self.serial,
            self.product_name,
            self.device_id,
            self.firmware_version()
        )
    }

    /// Firmware version as "major.minor".
    #[getter]
    pub fn firmware_version(&self) -> String {
        format!("{}.{}", self.firmware_major, self.firmware_minor)
    }
}
