//! FrontPanel runtime loaded from the vendor shared library.
//!
//! The library is opened with `dlopen` and every entry point the session
//! manager needs is resolved up front, so a missing or incompatible runtime is
//! reported once at load time instead of on the first device call.

use std::ffi::{c_char, c_int, c_long, c_ulong, CStr, CString};
use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::frontpanel::{DeviceInfo, FrontPanelError, Result};
use crate::runtime::ffi;
use crate::runtime::{DeviceLink, ErrorCode, Runtime, RuntimeResult, Version};

/// Resolved function table of the runtime.
#[derive(Clone, Copy)]
struct Api {
    get_version: ffi::FnGetVersion,
    construct: ffi::FnConstruct,
    destruct: ffi::FnDestruct,
    get_device_count: ffi::FnGetDeviceCount,
    get_device_list_serial: ffi::FnGetDeviceListSerial,
    open_by_serial: ffi::FnOpenBySerial,
    close: ffi::FnClose,
    get_serial_number: ffi::FnGetString,
    get_device_id: ffi::FnGetString,
    get_board_model: ffi::FnGetBoardModel,
    get_board_model_string: ffi::FnGetBoardModelString,
    get_device_major_version: ffi::FnGetInt,
    get_device_minor_version: ffi::FnGetInt,
    get_host_interface_width: ffi::FnGetInt,
    is_high_speed: ffi::FnGetBool,
    configure_fpga: ffi::FnConfigureFpga,
    is_front_panel_enabled: ffi::FnGetBool,
    set_wire_in_value: ffi::FnSetWireInValue,
    update_wire_ins: ffi::FnUpdate,
    update_wire_outs: ffi::FnUpdate,
    get_wire_out_value: ffi::FnGetWireOutValue,
    activate_trigger_in: ffi::FnActivateTriggerIn,
    update_trigger_outs: ffi::FnUpdate,
    is_triggered: ffi::FnIsTriggered,
    write_to_pipe_in: ffi::FnPipeTransfer,
    read_from_pipe_out: ffi::FnPipeTransfer,
}

impl Api {
    fn resolve(library: &Library, path: &str) -> Result<Self> {
        Ok(Self {
            get_version: resolve_required(library, path, "okFrontPanelDLL_GetVersion")?,
            construct: resolve_required(library, path, "okFrontPanel_Construct")?,
            destruct: resolve_required(library, path, "okFrontPanel_Destruct")?,
            get_device_count: resolve_required(library, path, "okFrontPanel_GetDeviceCount")?,
            get_device_list_serial: resolve_required(
                library,
                path,
                "okFrontPanel_GetDeviceListSerial",
            )?,
            open_by_serial: resolve_required(library, path, "okFrontPanel_OpenBySerial")?,
            close: resolve_required(library, path, "okFrontPanel_Close")?,
            get_serial_number: resolve_required(library, path, "okFrontPanel_GetSerialNumber")?,
            get_device_id: resolve_required(library, path, "okFrontPanel_GetDeviceID")?,
            get_board_model: resolve_required(library, path, "okFrontPanel_GetBoardModel")?,
            get_board_model_string: resolve_required(
                library,
                path,
                "okFrontPanel_GetBoardModelString",
            )?,
            get_device_major_version: resolve_required(
                library,
                path,
                "okFrontPanel_GetDeviceMajorVersion",
            )?,
            get_device_minor_version: resolve_required(
                library,
                path,
                "okFrontPanel_GetDeviceMinorVersion",
            )?,
            get_host_interface_width: resolve_required(
                library,
                path,
                "okFrontPanel_GetHostInterfaceWidth",
            )?,
            is_high_speed: resolve_required(library, path, "okFrontPanel_IsHighSpeed")?,
            configure_fpga: resolve_required(library, path, "okFrontPanel_ConfigureFPGA")?,
            is_front_panel_enabled: resolve_required(
                library,
                path,
                "okFrontPanel_IsFrontPanelEnabled",
            )?,
            set_wire_in_value: resolve_required(library, path, "okFrontPanel_SetWireInValue")?,
            update_wire_ins: resolve_required(library, path, "okFrontPanel_UpdateWireIns")?,
            update_wire_outs: resolve_required(library, path, "okFrontPanel_UpdateWireOuts")?,
            get_wire_out_value: resolve_required(library, path, "okFrontPanel_GetWireOutValue")?,
            activate_trigger_in: resolve_required(
                library,
                path,
                "okFrontPanel_ActivateTriggerIn",
            )?,
            update_trigger_outs: resolve_required(
                library,
                path,
                "okFrontPanel_UpdateTriggerOuts",
            )?,
            is_triggered: resolve_required(library, path, "okFrontPanel_IsTriggered")?,
            write_to_pipe_in: resolve_required(library, path, "okFrontPanel_WriteToPipeIn")?,
            read_from_pipe_out: resolve_required(library, path, "okFrontPanel_ReadFromPipeOut")?,
        })
    }
}

/// Resolve a symbol the session manager cannot work without.
fn resolve_required<T: Copy>(library: &Library, path: &str, name: &str) -> Result<T> {
    log::trace!("resolving symbol '{name}'");

    // SAFETY: `T` is one of the `ffi::Fn*` aliases, which mirror the C
    // declarations in okFrontPanelDLL.h for `name`.
    unsafe {
        let sym: Symbol<T> =
            library
                .get(name.as_bytes())
                .map_err(|e| FrontPanelError::LibraryLoad {
                    path: path.to_string(),
                    cause: format!("missing symbol '{name}': {e}"),
                })?;
        Ok(*sym)
    }
}

/// Decode a NUL-terminated string written by the runtime into `buf`.
fn read_c_string(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(buf).into_owned())
}

/// Encode a filesystem path for the runtime's `char*` file arguments.
///
/// `None` if the path holds an interior NUL, or on non-Unix hosts if it is not
/// valid Unicode.
fn path_to_c_string(path: &Path) -> Option<CString> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        CString::new(path.as_os_str().as_bytes()).ok()
    }

    #[cfg(not(unix))]
    {
        path.to_str().and_then(|s| CString::new(s).ok())
    }
}

/// FrontPanel runtime backed by the vendor shared library.
pub struct VendorRuntime {
    library: Arc<Library>,
    path: String,
    api: Api,
}

impl VendorRuntime {
    /// Open the shared library at `path` and resolve its entry points.
    ///
    /// # Errors
    ///
    /// Returns [`FrontPanelError::LibraryLoad`] if `dlopen` fails or any
    /// required symbol is missing.
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path.display().to_string();

        // SAFETY: loading runs the library's initializers. The path comes from
        // the caller or the configured runtime location and is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| FrontPanelError::LibraryLoad {
            path: path_str.clone(),
            cause: e.to_string(),
        })?;

        let api = Api::resolve(&library, &path_str)?;
        log::info!("loaded FrontPanel runtime from '{path_str}'");

        Ok(Self {
            library: Arc::new(library),
            path: path_str,
            api,
        })
    }

    /// Construct a handle that is destructed when the guard drops.
    fn construct(&self) -> RuntimeResult<HandleGuard> {
        // SAFETY: `construct` takes no arguments and returns an owned handle.
        let handle = unsafe { (self.api.construct)() };
        if handle.is_null() {
            return Err(ErrorCode::Failed);
        }
        Ok(HandleGuard {
            api: self.api,
            handle,
        })
    }
}

impl std::fmt::Debug for VendorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorRuntime")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Runtime for VendorRuntime {
    fn name(&self) -> &str {
        &self.path
    }

    fn version(&self) -> Version {
        let mut date = vec![0u8; ffi::VERSION_STRING_LENGTH];
        let mut time = vec![0u8; ffi::VERSION_STRING_LENGTH];
        // SAFETY: both buffers are larger than the strings the runtime writes.
        unsafe {
            (self.api.get_version)(date.as_mut_ptr().cast(), time.as_mut_ptr().cast());
        }
        Version {
            date: read_c_string(&date),
            time: read_c_string(&time),
        }
    }

    fn device_serials(&self) -> RuntimeResult<Vec<String>> {
        let guard = self.construct()?;

        // SAFETY: the handle is valid for the lifetime of `guard`.
        let count = unsafe { (self.api.get_device_count)(guard.handle) };
        ErrorCode::check(count)?;
        Ok((0..count)
            .map(|i| {
                let mut buf = vec![0u8; ffi::MAX_SERIAL_NUMBER_LENGTH];
                // SAFETY: `buf` holds a maximum-length serial plus NUL.
                unsafe {
                    (self.api.get_device_list_serial)(guard.handle, i, buf.as_mut_ptr().cast());
                }
                read_c_string(&buf)
            })
            .collect())
    }

    fn open(&self, serial: &str) -> RuntimeResult<Box<dyn DeviceLink>> {
        let serial = CString::new(serial).map_err(|_| ErrorCode::InvalidParameter)?;
        let guard = self.construct()?;

        // SAFETY: valid handle and NUL-terminated serial.
        let ret = unsafe { (self.api.open_by_serial)(guard.handle, serial.as_ptr()) };
        ErrorCode::check(ret)?;

        Ok(Box::new(VendorDevice {
            _library: self.library.clone(),
            guard,
        }))
    }
}

/// Owned `okFrontPanel_HANDLE`.
struct HandleGuard {
    api: Api,
    handle: ffi::Handle,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        // SAFETY: the handle came from `construct` and is destructed once.
        unsafe { (self.api.destruct)(self.handle) };
    }
}

/// An open device on the vendor runtime.
struct VendorDevice {
    guard: HandleGuard,
    // Dropped after `guard` so the runtime is still mapped for `Destruct`.
    _library: Arc<Library>,
}

// SAFETY: the handle is owned exclusively by this link and the session layer
// never uses a link from two threads at once.
unsafe impl Send for VendorDevice {}

impl VendorDevice {
    fn api(&self) -> &Api {
        &self.guard.api
    }

    fn handle(&self) -> ffi::Handle {
        self.guard.handle
    }

    fn read_string(&self, f: ffi::FnGetString, len: usize) -> String {
        let mut buf = vec![0u8; len];
        // SAFETY: `len` is the documented maximum for this getter.
        unsafe { f(self.handle(), buf.as_mut_ptr().cast::<c_char>()) };
        read_c_string(&buf)
    }

    fn transfer_len(len: usize) -> RuntimeResult<c_long> {
        c_long::try_from(len).map_err(|_| ErrorCode::InvalidBlockSize)
    }

    fn transfer_result(ret: c_long) -> RuntimeResult<usize> {
        if ret < 0 {
            Err(ErrorCode::from(i32::try_from(ret).unwrap_or(ffi::OK_FAILED)))
        } else {
            Ok(ret as usize)
        }
    }
}

impl DeviceLink for VendorDevice {
    fn device_info(&mut self) -> RuntimeResult<DeviceInfo> {
        let api = *self.api();
        let hnd = self.handle();

        // SAFETY: all getters below take a valid, open handle.
        let (model, major, minor, width, high_speed) = unsafe {
            (
                (api.get_board_model)(hnd),
                (api.get_device_major_version)(hnd),
                (api.get_device_minor_version)(hnd),
                (api.get_host_interface_width)(hnd),
                (api.is_high_speed)(hnd) != 0,
            )
        };

        let mut model_buf = vec![0u8; ffi::MAX_BOARD_MODEL_STRING_LENGTH];
        // SAFETY: buffer matches OK_MAX_BOARDMODELSTRING_LENGTH.
        unsafe { (api.get_board_model_string)(hnd, model, model_buf.as_mut_ptr().cast()) };

        Ok(DeviceInfo {
            serial: self.read_string(api.get_serial_number, ffi::MAX_SERIAL_NUMBER_LENGTH),
            product_name: read_c_string(&model_buf),
            product_id: model,
            device_id: self.read_string(api.get_device_id, ffi::MAX_DEVICE_ID_LENGTH),
            firmware_major: major,
            firmware_minor: minor,
            is_high_speed: high_speed,
            host_interface_width: width,
        })
    }

    fn configure_fpga(&mut self, bitfile: &Path) -> RuntimeResult<()> {
        let name = path_to_c_string(bitfile).ok_or(ErrorCode::InvalidParameter)?;
        // SAFETY: valid handle and NUL-terminated path.
        let ret = unsafe { (self.api().configure_fpga)(self.handle(), name.as_ptr()) };
        ErrorCode::check(ret)
    }

    fn is_front_panel_enabled(&mut self) -> bool {
        // SAFETY: valid handle.
        unsafe { (self.api().is_front_panel_enabled)(self.handle()) != 0 }
    }

    fn set_wire_in_value(&mut self, addr: u8, value: u32, mask: u32) -> RuntimeResult<()> {
        // SAFETY: valid handle; address range checked by the caller.
        let ret = unsafe {
            (self.api().set_wire_in_value)(
                self.handle(),
                c_int::from(addr),
                c_ulong::from(value),
                c_ulong::from(mask),
            )
        };
        ErrorCode::check(ret)
    }

    fn update_wire_ins(&mut self) -> RuntimeResult<()> {
        // SAFETY: valid handle.
        ErrorCode::check(unsafe { (self.api().update_wire_ins)(self.handle()) })
    }

    fn update_wire_outs(&mut self) -> RuntimeResult<()> {
        // SAFETY: valid handle.
        ErrorCode::check(unsafe { (self.api().update_wire_outs)(self.handle()) })
    }

    fn wire_out_value(&mut self, addr: u8) -> u32 {
        // SAFETY: valid handle.
        let value = unsafe { (self.api().get_wire_out_value)(self.handle(), c_int::from(addr)) };
        // Wires are 32 bits wide even where `unsigned long` is 64.
        value as u32
    }

    fn activate_trigger_in(&mut self, addr: u8, bit: u8) -> RuntimeResult<()> {
        // SAFETY: valid handle.
        let ret = unsafe {
            (self.api().activate_trigger_in)(self.handle(), c_int::from(addr), c_int::from(bit))
        };
        ErrorCode::check(ret)
    }

    fn update_trigger_outs(&mut self) -> RuntimeResult<()> {
        // SAFETY: valid handle.
        ErrorCode::check(unsafe { (self.api().update_trigger_outs)(self.handle()) })
    }

    fn is_triggered(&mut self, addr: u8, mask: u32) -> bool {
        // SAFETY: valid handle.
        unsafe {
            (self.api().is_triggered)(self.handle(), c_int::from(addr), c_ulong::from(mask)) != 0
        }
    }

    fn write_to_pipe_in(&mut self, addr: u8, data: &[u8]) -> RuntimeResult<usize> {
        let len = Self::transfer_len(data.len())?;
        // SAFETY: the runtime only reads `len` bytes from `data`; the C
        // signature is not const-qualified.
        let ret = unsafe {
            (self.api().write_to_pipe_in)(
                self.handle(),
                c_int::from(addr),
                len,
                data.as_ptr().cast_mut(),
            )
        };
        Self::transfer_result(ret)
    }

    fn read_from_pipe_out(&mut self, addr: u8, buf: &mut [u8]) -> RuntimeResult<usize> {
        let len = Self::transfer_len(buf.len())?;
        // SAFETY: the runtime writes at most `len` bytes into `buf`.
        let ret = unsafe {
            (self.api().read_from_pipe_out)(
                self.handle(),
                c_int::from(addr),
                len,
                buf.as_mut_ptr(),
            )
        };
        Self::transfer_result(ret)
    }

    fn close(&mut self) {
        // SAFETY: closing an already closed handle is a no-op in the runtime.
        unsafe { (self.api().close)(self.handle()) };
    }
}
