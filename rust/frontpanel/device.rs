//! Runtime-checked device facade and its Python class.
//!
//! Python cannot express the session typestate, so [`Device`] keeps the
//! current [`Session`] in a slot and rejects calls that are not valid in the
//! current state with `InvalidState`.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3_async_runtimes::tokio::future_into_py;
use tokio::sync::Mutex;

use crate::frontpanel::library::{Library, REGISTRY};
use crate::frontpanel::session::{Configured, Open, Session, SessionState, Unopened};
use crate::frontpanel::{DeviceInfo, FrontPanelError, Result};

enum Slot {
    Unopened(Session<Unopened>),
    Open(Session<Open>),
    Configured(Session<Configured>),
    Closed,
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Unopened(_) => SessionState::Unopened,
            Slot::Open(_) => SessionState::Open,
            Slot::Configured(_) => SessionState::Configured,
            Slot::Closed => SessionState::Closed,
        }
    }
}

/// One device session with the state machine checked at run time.
pub struct Device {
    slot: Slot,
}

impl Device {
    pub fn new(library: Library) -> Self {
        Self {
            slot: Slot::Unopened(Session::new(library)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.slot.state()
    }

    /// Serial of the connected device, if any.
    pub fn serial(&self) -> Option<&str> {
        match &self.slot {
            Slot::Open(s) => Some(s.serial()),
            Slot::Configured(s) => Some(s.serial()),
            Slot::Unopened(_) | Slot::Closed => None,
        }
    }

    fn invalid(&self, operation: &'static str) -> FrontPanelError {
        FrontPanelError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    pub fn open_by_serial(&mut self, serial: Option<&str>) -> Result<()> {
        const OPERATION: &str = "open_by_serial";

        match mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Unopened(session) => match session.open_by_serial(serial) {
                Ok(open) => {
                    self.slot = Slot::Open(open);
                    Ok(())
                }
                Err(failed) => {
                    self.slot = Slot::Unopened(failed.session);
                    Err(failed.error)
                }
            },
            other => {
                self.slot = other;
                Err(self.invalid(OPERATION))
            }
        }
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        match &self.slot {
            Slot::Open(s) => Ok(s.device_info().clone()),
            Slot::Configured(s) => Ok(s.device_info().clone()),
            Slot::Unopened(_) | Slot::Closed => Err(self.invalid("get_device_info")),
        }
    }

    /// Load a bitstream. On failure the device is left open and unconfigured.
    pub fn configure_fpga(&mut self, bitfile: &Path) -> Result<()> {
        const OPERATION: &str = "configure_fpga";

        let attempt = match mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Open(session) => session.configure_fpga(bitfile),
            Slot::Configured(session) => session.configure_fpga(bitfile),
            other => {
                self.slot = other;
                return Err(self.invalid(OPERATION));
            }
        };

        match attempt {
            Ok(configured) => {
                self.slot = Slot::Configured(configured);
                Ok(())
            }
            Err(failed) => {
                self.slot = Slot::Open(failed.session);
                Err(failed.error)
            }
        }
    }

    pub fn is_front_panel_enabled(&mut self) -> Result<bool> {
        Ok(self.configured("is_front_panel_enabled")?.is_front_panel_enabled())
    }

    /// Close the device. Repeated calls are no-ops.
    pub fn close(&mut self) {
        if let Some(serial) = self.serial() {
            log::debug!("closing session on '{serial}'");
        }
        self.slot = Slot::Closed;
    }

    fn configured(&mut self, operation: &'static str) -> Result<&mut Session<Configured>> {
        let state = self.state();
        match &mut self.slot {
            Slot::Configured(session) => Ok(session),
            _ => Err(FrontPanelError::InvalidState { operation, state }),
        }
    }

    pub fn set_wire_in_value(&mut self, addr: u32, value: u32, mask: u32) -> Result<()> {
        self.configured("set_wire_in_value")?
            .set_wire_in_value(addr, value, mask)
    }

    pub fn update_wire_ins(&mut self) -> Result<()> {
        self.configured("update_wire_ins")?.update_wire_ins()
    }

    pub fn update_wire_outs(&mut self) -> Result<()> {
        self.configured("update_wire_outs")?.update_wire_outs()
    }

    pub fn wire_out_value(&mut self, addr: u32) -> Result<u32> {
        self.configured("get_wire_out_value")?.wire_out_value(addr)
    }

    pub fn activate_trigger_in(&mut self, addr: u32, bit: u32) -> Result<()> {
        self.configured("activate_trigger_in")?
            .activate_trigger_in(addr, bit)
    }

    pub fn update_trigger_outs(&mut self) -> Result<()> {
        self.configured("update_trigger_outs")?.update_trigger_outs()
    }

    pub fn is_triggered(&mut self, addr: u32, mask: u32) -> Result<bool> {
        self.configured("is_triggered")?.is_triggered(addr, mask)
    }

    pub fn write_to_pipe_in(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        self.configured("write_to_pipe_in")?
            .write_to_pipe_in(addr, data)
    }

    pub fn read_from_pipe_out(&mut self, addr: u32, length: usize) -> Result<Vec<u8>> {
        self.configured("read_from_pipe_out")?
            .read_from_pipe_out(addr, length)
    }
}

/// Run `f` on the device from the tokio blocking pool.
async fn run_blocking<T, F>(device: Arc<Mutex<Device>>, f: F) -> PyResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Device) -> Result<T> + Send + 'static,
{
    let mut guard = device.lock_owned().await;
    let result = tokio::task::spawn_blocking(move || f(&mut *guard))
        .await
        .map_err(|e| PyRuntimeError::new_err(format!("device task failed: {e}")))?;
    Ok(result?)
}

/// Session with one FrontPanel device.
///
/// Requires `load_library()` to have been called. Usable as a context manager;
/// leaving the `with` block closes the device.
#[pyclass(name = "FrontPanel")]
pub struct FrontPanel {
    device: Arc<Mutex<Device>>,
}

impl FrontPanel {
    /// Run `f` with the GIL released.
    fn with_device<T, F>(&self, py: Python<'_>, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Device) -> Result<T> + Send,
    {
        py.detach(|| f(&mut self.device.blocking_lock()))
    }
}

#[pymethods]
impl FrontPanel {
    #[new]
    fn new() -> Result<Self> {
        let library = REGISTRY.current("FrontPanel")?;
        Ok(Self {
            device: Arc::new(Mutex::new(Device::new(library))),
        })
    }

    /// Connect to a device (blocking).
    ///
    /// Args:
    ///     serial: Device serial. Empty or omitted opens the first free device.
    #[pyo3(signature = (serial=None))]
    fn open_by_serial(&self, py: Python<'_>, serial: Option<String>) -> Result<()> {
        self.with_device(py, |d| d.open_by_serial(serial.as_deref()))
    }

    /// Connect to a device (async).
    #[pyo3(signature = (serial=None))]
    fn open_by_serial_async<'py>(
        &self,
        py: Python<'py>,
        serial: Option<String>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let device = self.device.clone();
        future_into_py(py, async move {
            run_blocking(device, move |d| d.open_by_serial(serial.as_deref())).await
        })
    }

    /// Metadata of the connected device.
    fn get_device_info(&self, py: Python<'_>) -> Result<DeviceInfo> {
        self.with_device(py, |d| d.device_info())
    }

    /// Load a bitfile into the FPGA (blocking).
    ///
    /// On failure the device stays open but unconfigured.
    fn configure_fpga(&self, py: Python<'_>, bitfile: PathBuf) -> Result<()> {
        self.with_device(py, |d| d.configure_fpga(&bitfile))
    }

    /// Load a bitfile into the FPGA (async).
    fn configure_fpga_async<'py>(
        &self,
        py: Python<'py>,
        bitfile: PathBuf,
    ) -> PyResult<Bound<'py, PyAny>> {
        let device = self.device.clone();
        future_into_py(py, async move {
            run_blocking(device, move |d| d.configure_fpga(&bitfile)).await
        })
    }

    /// Whether the configured design exposes FrontPanel endpoints.
    fn is_front_panel_enabled(&self, py: Python<'_>) -> Result<bool> {
        self.with_device(py, |d| d.is_front_panel_enabled())
    }

    /// Close the device. Safe to call more than once.
    fn close(&self, py: Python<'_>) {
        py.detach(|| self.device.blocking_lock().close());
    }

    #[getter]
    fn state(&self, py: Python<'_>) -> SessionState {
        py.detach(|| self.device.blocking_lock().state())
    }

    #[getter]
    fn is_open(&self, py: Python<'_>) -> bool {
        matches!(
            self.state(py),
            SessionState::Open | SessionState::Configured
        )
    }

    #[getter]
    fn serial(&self, py: Python<'_>) -> Option<String> {
        py.detach(|| self.device.blocking_lock().serial().map(str::to_string))
    }

    #[pyo3(signature = (ep_addr, value, mask=0xFFFF_FFFF))]
    fn set_wire_in_value(&self, py: Python<'_>, ep_addr: u32, value: u32, mask: u32) -> Result<()> {
        self.with_device(py, |d| d.set_wire_in_value(ep_addr, value, mask))
    }

    fn update_wire_ins(&self, py: Python<'_>) -> Result<()> {
        self.with_device(py, |d| d.update_wire_ins())
    }

    fn update_wire_outs(&self, py: Python<'_>) -> Result<()> {
        self.with_device(py, |d| d.update_wire_outs())
    }

    fn get_wire_out_value(&self, py: Python<'_>, ep_addr: u32) -> Result<u32> {
        self.with_device(py, |d| d.wire_out_value(ep_addr))
    }

    fn activate_trigger_in(&self, py: Python<'_>, ep_addr: u32, bit: u32) -> Result<()> {
        self.with_device(py, |d| d.activate_trigger_in(ep_addr, bit))
    }

    fn update_trigger_outs(&self, py: Python<'_>) -> Result<()> {
        self.with_device(py, |d| d.update_trigger_outs())
    }

    #[pyo3(signature = (ep_addr, mask=0xFFFF_FFFF))]
    fn is_triggered(&self, py: Python<'_>, ep_addr: u32, mask: u32) -> Result<bool> {
        self.with_device(py, |d| d.is_triggered(ep_addr, mask))
    }

    /// Write bytes to a pipe-in endpoint.
    ///
    /// Returns:
    ///     Number of bytes written
    fn write_to_pipe_in(&self, py: Python<'_>, ep_addr: u32, data: Vec<u8>) -> Result<usize> {
        self.with_device(py, |d| d.write_to_pipe_in(ep_addr, &data))
    }

    /// Read `length` bytes from a pipe-out endpoint.
    fn read_from_pipe_out(&self, py: Python<'_>, ep_addr: u32, length: usize) -> Result<Vec<u8>> {
        self.with_device(py, |d| d.read_from_pipe_out(ep_addr, length))
    }

    fn __enter__(slf: Py<Self>) -> Py<Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc_value=None, _traceback=None))]
    fn __exit__(
        &self,
        py: Python<'_>,
        _exc_type: Option<Bound<'_, PyAny>>,
        _exc_value: Option<Bound<'_, PyAny>>,
        _traceback: Option<Bound<'_, PyAny>>,
    ) -> bool {
        self.close(py);
        false
    }

    fn __repr__(&self) -> String {
        match self.device.try_lock() {
            Ok(device) => match device.serial() {
                Some(serial) => format!("FrontPanel(serial={serial:?}, state={})", device.state()),
                None => format!("FrontPanel(state={})", device.state()),
            },
            Err(_) => "FrontPanel(<busy>)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontpanel::ErrorKind;
    use crate::runtime::mock::{MockDevice, MockRuntime};
    use crate::runtime::ErrorCode;

    fn device(runtime: MockRuntime) -> Device {
        Device::new(Library::from_runtime(runtime))
    }

    fn one_device() -> Device {
        device(MockRuntime::new().with_device(MockDevice::new("ABC123")))
    }

    fn write_bitfile(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn assert_invalid_state<T: std::fmt::Debug>(result: Result<T>) {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_unopened_rejects_everything_but_open_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);
        let mut dev = one_device();

        assert_invalid_state(dev.device_info());
        assert_invalid_state(dev.configure_fpga(&bitfile));
        assert_invalid_state(dev.is_front_panel_enabled());
        assert_invalid_state(dev.set_wire_in_value(0, 1, 1));
        assert_invalid_state(dev.read_from_pipe_out(0xA0, 4));

        // No side effects: the session is still unopened and can open.
        assert_eq!(dev.state(), SessionState::Unopened);
        dev.open_by_serial(None).unwrap();
        assert_eq!(dev.state(), SessionState::Open);
    }

    #[test]
    fn test_open_with_no_devices() {
        let mut dev = device(MockRuntime::new());
        let err = dev.open_by_serial(Some("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
        assert_eq!(dev.state(), SessionState::Unopened);
    }

    #[test]
    fn test_open_by_serial_reports_serial() {
        let mut dev = device(
            MockRuntime::new()
                .with_device(MockDevice::new("XYZ789"))
                .with_device(MockDevice::new("ABC123")),
        );
        dev.open_by_serial(Some("ABC123")).unwrap();
        assert_eq!(dev.device_info().unwrap().serial, "ABC123");
        assert_eq!(dev.serial(), Some("ABC123"));
    }

    #[test]
    fn test_open_twice_is_invalid() {
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();
        assert_invalid_state(dev.open_by_serial(None));
        assert_eq!(dev.state(), SessionState::Open);
    }

    #[test]
    fn test_second_session_on_same_device_is_busy() {
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let mut first = Device::new(lib.clone());
        let mut second = Device::new(lib);

        first.open_by_serial(Some("ABC123")).unwrap();
        let err = second.open_by_serial(Some("ABC123")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);

        first.close();
        second.open_by_serial(Some("ABC123")).unwrap();
    }

    #[test]
    fn test_session_surviving_free_keeps_device_busy_after_reload() {
        let registry = crate::frontpanel::library::Registry::new();
        let load = || -> Result<MockRuntime> {
            Ok(MockRuntime::new().with_device(MockDevice::new("ABC123")))
        };

        let mut first = Device::new(registry.load_with(load).unwrap());
        first.open_by_serial(Some("ABC123")).unwrap();
        assert!(registry.free("free_library").unwrap());

        let mut second = Device::new(registry.load_with(load).unwrap());
        let err = second.open_by_serial(Some("ABC123")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
        assert_eq!(second.state(), SessionState::Unopened);
        assert_eq!(first.state(), SessionState::Open);

        first.close();
        second.open_by_serial(Some("ABC123")).unwrap();
    }

    #[test]
    fn test_read_length_checked_before_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();
        dev.configure_fpga(&bitfile).unwrap();

        let err = dev.read_from_pipe_out(0xA0, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
        let err = dev.read_from_pipe_out(0xA0, 1 << 40).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
        assert_eq!(dev.state(), SessionState::Configured);
    }

    #[test]
    fn test_missing_bitfile_keeps_session_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();

        let err = dev
            .configure_fpga(&dir.path().join("design.bit"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(dev.state(), SessionState::Open);
        assert!(dev.device_info().is_ok());
    }

    #[test]
    fn test_failed_configuration_reverts_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);
        let mut dev = device(
            MockRuntime::new()
                .with_device(MockDevice::new("ABC123").failing_configure(ErrorCode::DoneNotHigh)),
        );
        dev.open_by_serial(None).unwrap();

        let err = dev.configure_fpga(&bitfile).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(dev.state(), SessionState::Open);
        assert_eq!(dev.device_info().unwrap().serial, "ABC123");
        assert_invalid_state(dev.is_front_panel_enabled());
    }

    #[test]
    fn test_front_panel_probe_after_configure() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);

        let mut enabled = one_device();
        enabled.open_by_serial(None).unwrap();
        assert_invalid_state(enabled.is_front_panel_enabled());
        enabled.configure_fpga(&bitfile).unwrap();
        assert!(enabled.is_front_panel_enabled().unwrap());

        let mut plain = device(
            MockRuntime::new().with_device(MockDevice::new("ABC123").without_front_panel()),
        );
        plain.open_by_serial(None).unwrap();
        plain.configure_fpga(&bitfile).unwrap();
        assert!(!plain.is_front_panel_enabled().unwrap());
    }

    #[test]
    fn test_reconfigure_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_bitfile(&dir, "first.bit", &[1; 8]);
        let second = write_bitfile(&dir, "second.bit", &[2; 8]);
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();

        dev.configure_fpga(&first).unwrap();
        dev.configure_fpga(&second).unwrap();
        assert_eq!(dev.state(), SessionState::Configured);
    }

    #[test]
    fn test_close_is_idempotent_from_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);

        let mut unopened = one_device();
        unopened.close();
        unopened.close();
        assert_eq!(unopened.state(), SessionState::Closed);

        let mut open = one_device();
        open.open_by_serial(None).unwrap();
        open.close();
        open.close();
        assert_eq!(open.state(), SessionState::Closed);

        let mut configured = one_device();
        configured.open_by_serial(None).unwrap();
        configured.configure_fpga(&bitfile).unwrap();
        configured.close();
        configured.close();
        assert_eq!(configured.state(), SessionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();
        dev.close();

        assert_invalid_state(dev.open_by_serial(None));
        assert_invalid_state(dev.device_info());
        assert_eq!(dev.state(), SessionState::Closed);
    }

    #[test]
    fn test_endpoints_after_configure() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);
        let mut dev = one_device();
        dev.open_by_serial(None).unwrap();
        assert_invalid_state(dev.update_wire_ins());
        dev.configure_fpga(&bitfile).unwrap();

        dev.set_wire_in_value(0x00, 0x1234, 0xFFFF_FFFF).unwrap();
        dev.update_wire_ins().unwrap();
        dev.update_wire_outs().unwrap();
        assert_eq!(dev.wire_out_value(0x20).unwrap(), 0x1234);

        dev.activate_trigger_in(0x40, 0).unwrap();
        dev.update_trigger_outs().unwrap();
        assert!(dev.is_triggered(0x60, 0x1).unwrap());

        assert_eq!(dev.write_to_pipe_in(0x81, &[9, 8, 7]).unwrap(), 3);
        assert_eq!(dev.read_from_pipe_out(0xA1, 3).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_endpoints_without_front_panel_are_connection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "design.bit", &[1; 8]);
        let mut dev = device(
            MockRuntime::new().with_device(MockDevice::new("ABC123").without_front_panel()),
        );
        dev.open_by_serial(None).unwrap();
        dev.configure_fpga(&bitfile).unwrap();

        let err = dev.update_wire_ins().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("update_wire_ins"));
    }

    #[test]
    fn test_smoke_sequence() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let bitfile = write_bitfile(&dir, "foobar.bit", &[0xFF; 32]);

        let registry = crate::frontpanel::library::Registry::new();
        let lib = registry
            .load_with(|| Ok(MockRuntime::new().with_device(MockDevice::new("ABC123"))))
            .unwrap();
        assert!(!lib.version().date.is_empty());

        let mut dev = Device::new(registry.current("FrontPanel").unwrap());
        dev.open_by_serial(None).unwrap();
        assert_eq!(dev.device_info().unwrap().serial, "ABC123");
        dev.configure_fpga(&bitfile).unwrap();
        assert!(dev.is_front_panel_enabled().unwrap());
        dev.close();

        drop(lib);
        assert!(registry.free("free_library").unwrap());
        assert!(!registry.is_loaded());
    }
}
