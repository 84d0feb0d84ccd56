//! Native Rust bindings for FrontPanel FPGA devices
//!
//! - Run-time loading of the vendor FrontPanel runtime
//! - Device sessions with a checked open/configure/close lifecycle
//! - Wire, trigger and pipe endpoint access on configured designs
//! - SDK-independent USB enumeration (nusb)

use pyo3::prelude::*;

pub mod config;
pub mod frontpanel;
pub mod runtime;

pub use frontpanel::{Device, DeviceInfo, FrontPanelError, Library, Session, SessionState};

#[pymodule(name = "okfp")]
fn okfp(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Runtime lifecycle
    m.add_function(wrap_pyfunction!(frontpanel::library::load_library, m)?)?;
    m.add_function(wrap_pyfunction!(frontpanel::library::free_library, m)?)?;
    m.add_function(wrap_pyfunction!(frontpanel::library::get_version, m)?)?;
    m.add_function(wrap_pyfunction!(frontpanel::library::device_serials, m)?)?;
    #[cfg(feature = "mock-runtime")]
    m.add_function(wrap_pyfunction!(frontpanel::library::load_mock_library, m)?)?;

    // Sessions
    m.add_class::<frontpanel::FrontPanel>()?;
    m.add_class::<frontpanel::DeviceInfo>()?;
    m.add_class::<frontpanel::SessionState>()?;

    // USB enumeration
    m.add_class::<frontpanel::UsbDevice>()?;
    m.add_function(wrap_pyfunction!(frontpanel::enumerate_usb_devices, m)?)?;
    m.add("FRONTPANEL_VENDOR_ID", frontpanel::enumerate::FRONTPANEL_VENDOR_ID)?;

    frontpanel::exceptions::register(m)?;

    Ok(())
}
