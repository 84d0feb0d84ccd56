//! FrontPanel device sessions
//!
//! Library lifecycle, typestate sessions and the Python-facing device class.

pub mod device;
pub mod device_info;
pub mod endpoint;
pub mod enumerate;
pub mod error;
pub mod exceptions;
pub mod library;
pub mod session;

pub use device::{Device, FrontPanel};
pub use device_info::DeviceInfo;
pub use endpoint::EndpointKind;
pub use enumerate::{enumerate_usb_devices, UsbDevice};
pub use error::{ErrorKind, FrontPanelError, Result};
pub use library::{Library, Registry};
pub use session::{Session, SessionState};
