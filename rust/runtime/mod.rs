//! Seam between the session manager and the FrontPanel runtime.
//!
//! [`Runtime`] covers the process-wide calls (version, enumeration, open) and
//! [`DeviceLink`] covers everything done through one open device handle. The
//! production implementation is [`vendor::VendorRuntime`]; tests drive the
//! same session code through [`mock::MockRuntime`].

pub mod ffi;
#[cfg(any(test, feature = "mock-runtime"))]
pub mod mock;
pub mod vendor;

use std::fmt;
use std::path::Path;

use crate::frontpanel::DeviceInfo;

/// Error code reported by the runtime for a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Failed,
    Timeout,
    DoneNotHigh,
    TransferError,
    CommunicationError,
    InvalidBitstream,
    FileError,
    DeviceNotOpen,
    InvalidEndpoint,
    InvalidBlockSize,
    I2cRestrictedAddress,
    I2cBitError,
    I2cNack,
    I2cUnknownStatus,
    UnsupportedFeature,
    FifoUnderflow,
    FifoOverflow,
    DataAlignmentError,
    InvalidResetProfile,
    InvalidParameter,
    Unknown(i32),
}

impl ErrorCode {
    /// Turn a raw `ok_ErrorCode` into a `Result`. Non-negative codes are success.
    pub fn check(code: i32) -> RuntimeResult<()> {
        if code >= ffi::OK_NO_ERROR {
            Ok(())
        } else {
            Err(Self::from(code))
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            ErrorCode::Failed => ffi::OK_FAILED,
            ErrorCode::Timeout => ffi::OK_TIMEOUT,
            ErrorCode::DoneNotHigh => ffi::OK_DONE_NOT_HIGH,
            ErrorCode::TransferError => ffi::OK_TRANSFER_ERROR,
            ErrorCode::CommunicationError => ffi::OK_COMMUNICATION_ERROR,
            ErrorCode::InvalidBitstream => ffi::OK_INVALID_BITSTREAM,
            ErrorCode::FileError => ffi::OK_FILE_ERROR,
            ErrorCode::DeviceNotOpen => ffi::OK_DEVICE_NOT_OPEN,
            ErrorCode::InvalidEndpoint => ffi::OK_INVALID_ENDPOINT,
            ErrorCode::InvalidBlockSize => ffi::OK_INVALID_BLOCK_SIZE,
            ErrorCode::I2cRestrictedAddress => ffi::OK_I2C_RESTRICTED_ADDRESS,
            ErrorCode::I2cBitError => ffi::OK_I2C_BIT_ERROR,
            ErrorCode::I2cNack => ffi::OK_I2C_NACK,
            ErrorCode::I2cUnknownStatus => ffi::OK_I2C_UNKNOWN_STATUS,
            ErrorCode::UnsupportedFeature => ffi::OK_UNSUPPORTED_FEATURE,
            ErrorCode::FifoUnderflow => ffi::OK_FIFO_UNDERFLOW,
            ErrorCode::FifoOverflow => ffi::OK_FIFO_OVERFLOW,
            ErrorCode::DataAlignmentError => ffi::OK_DATA_ALIGNMENT_ERROR,
            ErrorCode::InvalidResetProfile => ffi::OK_INVALID_RESET_PROFILE,
            ErrorCode::InvalidParameter => ffi::OK_INVALID_PARAMETER,
            ErrorCode::Unknown(code) => code,
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            ffi::OK_FAILED => ErrorCode::Failed,
            ffi::OK_TIMEOUT => ErrorCode::Timeout,
            ffi::OK_DONE_NOT_HIGH => ErrorCode::DoneNotHigh,
            ffi::OK_TRANSFER_ERROR => ErrorCode::TransferError,
            ffi::OK_COMMUNICATION_ERROR => ErrorCode::CommunicationError,
            ffi::OK_INVALID_BITSTREAM => ErrorCode::InvalidBitstream,
            ffi::OK_FILE_ERROR => ErrorCode::FileError,
            ffi::OK_DEVICE_NOT_OPEN => ErrorCode::DeviceNotOpen,
            ffi::OK_INVALID_ENDPOINT => ErrorCode::InvalidEndpoint,
            ffi::OK_INVALID_BLOCK_SIZE => ErrorCode::InvalidBlockSize,
            ffi::OK_I2C_RESTRICTED_ADDRESS => ErrorCode::I2cRestrictedAddress,
            ffi::OK_I2C_BIT_ERROR => ErrorCode::I2cBitError,
            ffi::OK_I2C_NACK => ErrorCode::I2cNack,
            ffi::OK_I2C_UNKNOWN_STATUS => ErrorCode::I2cUnknownStatus,
            ffi::OK_UNSUPPORTED_FEATURE => ErrorCode::UnsupportedFeature,
            ffi::OK_FIFO_UNDERFLOW => ErrorCode::FifoUnderflow,
            ffi::OK_FIFO_OVERFLOW => ErrorCode::FifoOverflow,
            ffi::OK_DATA_ALIGNMENT_ERROR => ErrorCode::DataAlignmentError,
            ffi::OK_INVALID_RESET_PROFILE => ErrorCode::InvalidResetProfile,
            ffi::OK_INVALID_PARAMETER => ErrorCode::InvalidParameter,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unknown(code) => write!(f, "unknown error (code {code})"),
            other => write!(f, "{other:?} (code {})", other.raw()),
        }
    }
}

pub type RuntimeResult<T> = std::result::Result<T, ErrorCode>;

/// Build date and time reported by the loaded runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub date: String,
    pub time: String,
}

/// Process-wide entry points of a FrontPanel runtime.
pub trait Runtime: Send + Sync {
    /// Where the runtime came from, for diagnostics.
    fn name(&self) -> &str;

    fn version(&self) -> Version;

    /// Serial numbers of all devices the runtime can currently see.
    fn device_serials(&self) -> RuntimeResult<Vec<String>>;

    /// Open the device with exactly this serial.
    fn open(&self, serial: &str) -> RuntimeResult<Box<dyn DeviceLink>>;
}

/// One open device handle.
///
/// A link is owned by a single session and never used from two threads at
/// once, so it only needs to be `Send`.
pub trait DeviceLink: Send {
    fn device_info(&mut self) -> RuntimeResult<DeviceInfo>;

    /// Stream a bitstream file to the FPGA. Blocks for the whole transfer.
    fn configure_fpga(&mut self, bitfile: &Path) -> RuntimeResult<()>;

    fn is_front_panel_enabled(&mut self) -> bool;

    fn set_wire_in_value(&mut self, addr: u8, value: u32, mask: u32) -> RuntimeResult<()>;
    fn update_wire_ins(&mut self) -> RuntimeResult<()>;
    fn update_wire_outs(&mut self) -> RuntimeResult<()>;
    fn wire_out_value(&mut self, addr: u8) -> u32;

    fn activate_trigger_in(&mut self, addr: u8, bit: u8) -> RuntimeResult<()>;
    fn update_trigger_outs(&mut self) -> RuntimeResult<()>;
    fn is_triggered(&mut self, addr: u8, mask: u32) -> bool;

    /// Returns the number of bytes written.
    fn write_to_pipe_in(&mut self, addr: u8, data: &[u8]) -> RuntimeResult<usize>;
    /// Returns the number of bytes read into `buf`.
    fn read_from_pipe_out(&mut self, addr: u8, buf: &mut [u8]) -> RuntimeResult<usize>;

    fn close(&mut self);
}
