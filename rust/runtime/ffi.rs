//! Raw C signatures of the FrontPanel runtime (`okFrontPanel` C API).
//!
//! Only the entry points used by the session manager are listed. Everything is
//! resolved by name at load time, nothing is linked statically.

use std::ffi::{c_char, c_int, c_long, c_uchar, c_ulong, c_void};

/// Opaque `okFrontPanel_HANDLE`.
pub type Handle = *mut c_void;

/// `Bool` in the C API is a plain `int`.
pub type Bool = c_int;

/// `ok_ErrorCode`.
pub type RawErrorCode = c_int;

// ok_ErrorCode values
pub const OK_NO_ERROR: RawErrorCode = 0;
pub const OK_FAILED: RawErrorCode = -1;
pub const OK_TIMEOUT: RawErrorCode = -2;
pub const OK_DONE_NOT_HIGH: RawErrorCode = -3;
pub const OK_TRANSFER_ERROR: RawErrorCode = -4;
pub const OK_COMMUNICATION_ERROR: RawErrorCode = -5;
pub const OK_INVALID_BITSTREAM: RawErrorCode = -6;
pub const OK_FILE_ERROR: RawErrorCode = -7;
pub const OK_DEVICE_NOT_OPEN: RawErrorCode = -8;
pub const OK_INVALID_ENDPOINT: RawErrorCode = -9;
pub const OK_INVALID_BLOCK_SIZE: RawErrorCode = -10;
pub const OK_I2C_RESTRICTED_ADDRESS: RawErrorCode = -11;
pub const OK_I2C_BIT_ERROR: RawErrorCode = -12;
pub const OK_I2C_NACK: RawErrorCode = -13;
pub const OK_I2C_UNKNOWN_STATUS: RawErrorCode = -14;
pub const OK_UNSUPPORTED_FEATURE: RawErrorCode = -15;
pub const OK_FIFO_UNDERFLOW: RawErrorCode = -16;
pub const OK_FIFO_OVERFLOW: RawErrorCode = -17;
pub const OK_DATA_ALIGNMENT_ERROR: RawErrorCode = -18;
pub const OK_INVALID_RESET_PROFILE: RawErrorCode = -19;
pub const OK_INVALID_PARAMETER: RawErrorCode = -20;

// String buffer sizes from okFrontPanelDLL.h, plus the terminating NUL.
pub const MAX_SERIAL_NUMBER_LENGTH: usize = 10 + 1;
pub const MAX_DEVICE_ID_LENGTH: usize = 32 + 1;
pub const MAX_BOARD_MODEL_STRING_LENGTH: usize = 128;
pub const VERSION_STRING_LENGTH: usize = 64;

// Library
pub type FnGetVersion = unsafe extern "C" fn(date: *mut c_char, time: *mut c_char);

// Handle lifecycle and enumeration
pub type FnConstruct = unsafe extern "C" fn() -> Handle;
pub type FnDestruct = unsafe extern "C" fn(hnd: Handle);
pub type FnGetDeviceCount = unsafe extern "C" fn(hnd: Handle) -> c_int;
pub type FnGetDeviceListSerial = unsafe extern "C" fn(hnd: Handle, num: c_int, buf: *mut c_char);
pub type FnOpenBySerial = unsafe extern "C" fn(hnd: Handle, serial: *const c_char) -> RawErrorCode;
pub type FnClose = unsafe extern "C" fn(hnd: Handle);

// Metadata
pub type FnGetString = unsafe extern "C" fn(hnd: Handle, buf: *mut c_char);
pub type FnGetBoardModel = unsafe extern "C" fn(hnd: Handle) -> c_int;
pub type FnGetBoardModelString = unsafe extern "C" fn(hnd: Handle, model: c_int, buf: *mut c_char);
pub type FnGetInt = unsafe extern "C" fn(hnd: Handle) -> c_int;
pub type FnGetBool = unsafe extern "C" fn(hnd: Handle) -> Bool;

// Configuration
pub type FnConfigureFpga = unsafe extern "C" fn(hnd: Handle, filename: *const c_char) -> RawErrorCode;

// Endpoints
pub type FnSetWireInValue =
    unsafe extern "C" fn(hnd: Handle, ep: c_int, val: c_ulong, mask: c_ulong) -> RawErrorCode;
pub type FnUpdate = unsafe extern "C" fn(hnd: Handle) -> RawErrorCode;
pub type FnGetWireOutValue = unsafe extern "C" fn(hnd: Handle, ep: c_int) -> c_ulong;
pub type FnActivateTriggerIn = unsafe extern "C" fn(hnd: Handle, ep: c_int, bit: c_int) -> RawErrorCode;
pub type FnIsTriggered = unsafe extern "C" fn(hnd: Handle, ep: c_int, mask: c_ulong) -> Bool;
pub type FnPipeTransfer =
    unsafe extern "C" fn(hnd: Handle, ep: c_int, length: c_long, data: *mut c_uchar) -> c_long;
