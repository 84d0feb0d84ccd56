//! Device session as a typestate.
//!
//! ```text
//!   Session<Unopened> --open_by_serial--> Session<Open> --configure_fpga--> Session<Configured>
//!                                              ^                                 |
//!                                              +------ configure_fpga fails -----+
//!
//!   close() from any state --> Session<Closed>
//! ```
//!
//! Transitions consume the session. A failed transition hands the session back
//! in the state it was left in, inside [`Failed`], so the caller can retry or
//! close it. Dropping an open session closes the device and releases its claim.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pyo3::prelude::*;

use crate::frontpanel::endpoint::{check_transfer_length, check_trigger_bit, EndpointKind};
use crate::frontpanel::library::{Claim, Library};
use crate::frontpanel::{DeviceInfo, FrontPanelError, Result};
use crate::runtime::{DeviceLink, ErrorCode, RuntimeResult};

/// Observable session state.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Configured,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Open => "open",
            SessionState::Configured => "open+configured",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Marker for the type-level session states.
pub trait State: sealed::Sealed {
    const STATE: SessionState;
}

/// States with a live device link.
pub trait Connected: State {
    #[doc(hidden)]
    fn connection(&self) -> &Open;
    #[doc(hidden)]
    fn into_connection(self) -> Open;
}

/// Created, not yet connected to a device.
pub struct Unopened(());

/// Connected to a device; metadata is available.
pub struct Open {
    link: Box<dyn DeviceLink>,
    claim: Claim,
    info: DeviceInfo,
}

/// Connected, with a bitstream successfully loaded.
pub struct Configured {
    open: Open,
    bitfile: PathBuf,
}

/// Terminal state.
pub struct Closed(());

impl sealed::Sealed for Unopened {}
impl sealed::Sealed for Open {}
impl sealed::Sealed for Configured {}
impl sealed::Sealed for Closed {}

impl State for Unopened {
    const STATE: SessionState = SessionState::Unopened;
}
impl State for Open {
    const STATE: SessionState = SessionState::Open;
}
impl State for Configured {
    const STATE: SessionState = SessionState::Configured;
}
impl State for Closed {
    const STATE: SessionState = SessionState::Closed;
}

impl Connected for Open {
    fn connection(&self) -> &Open {
        self
    }

    fn into_connection(self) -> Open {
        self
    }
}

impl Connected for Configured {
    fn connection(&self) -> &Open {
        &self.open
    }

    fn into_connection(self) -> Open {
        self.open
    }
}

impl Drop for Open {
    fn drop(&mut self) {
        self.link.close();
        log::debug!("closed device '{}'", self.claim.serial());
    }
}

impl Open {
    fn serial(&self) -> &str {
        self.claim.serial()
    }

    fn connection_error(&self, operation: &'static str, code: ErrorCode) -> FrontPanelError {
        FrontPanelError::Connection {
            operation,
            serial: Some(self.serial().to_string()),
            cause: code.to_string(),
        }
    }
}

/// A session on one device, in state `S`.
pub struct Session<S: State> {
    state: S,
    library: Library,
}

/// A transition that did not happen, with the session in the state it was
/// left in.
pub struct Failed<S: State> {
    pub session: Session<S>,
    pub error: FrontPanelError,
}

impl<S: State> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &S::STATE)
            .field("library", &self.library)
            .finish()
    }
}

impl<S: State> fmt::Debug for Failed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failed")
            .field("state", &S::STATE)
            .field("error", &self.error)
            .finish()
    }
}

impl<S: State> From<Failed<S>> for FrontPanelError {
    fn from(failed: Failed<S>) -> Self {
        failed.error
    }
}

impl<S: State> Session<S> {
    pub fn state(&self) -> SessionState {
        S::STATE
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Close the device if one is open. Closing a closed session is a no-op.
    pub fn close(self) -> Session<Closed> {
        let Session { state, library } = self;
        drop(state);
        Session {
            state: Closed(()),
            library,
        }
    }
}

impl Session<Unopened> {
    pub fn new(library: Library) -> Self {
        Self {
            state: Unopened(()),
            library,
        }
    }

    /// Connect to the device with `serial`, or the first free device when
    /// `serial` is `None` or empty.
    pub fn open_by_serial(
        self,
        serial: Option<&str>,
    ) -> std::result::Result<Session<Open>, Failed<Unopened>> {
        match connect(&self.library, serial) {
            Ok(open) => Ok(Session {
                state: open,
                library: self.library,
            }),
            Err(error) => Err(Failed {
                session: self,
                error,
            }),
        }
    }
}

fn connect(library: &Library, serial: Option<&str>) -> Result<Open> {
    const OPERATION: &str = "open_by_serial";

    let claim = library.claim(OPERATION, serial)?;
    let mut link = library
        .runtime()
        .open(claim.serial())
        .map_err(|code| FrontPanelError::Connection {
            operation: OPERATION,
            serial: Some(claim.serial().to_string()),
            cause: code.to_string(),
        })?;

    let info = match link.device_info() {
        Ok(info) => info,
        Err(code) => {
            link.close();
            return Err(FrontPanelError::Connection {
                operation: OPERATION,
                serial: Some(claim.serial().to_string()),
                cause: format!("reading device info: {code}"),
            });
        }
    };

    log::debug!(
        "opened device '{}' ({}, firmware {})",
        claim.serial(),
        info.product_name,
        info.firmware_version()
    );
    Ok(Open { link, claim, info })
}

impl<S: Connected> Session<S> {
    pub fn serial(&self) -> &str {
        self.state.connection().serial()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.state.connection().info
    }

    /// Load a bitstream into the FPGA.
    ///
    /// On any failure the session is returned as [`Open`]: a partially
    /// programmed device must not be treated as configured. Nothing is retried.
    pub fn configure_fpga(
        self,
        bitfile: impl AsRef<Path>,
    ) -> std::result::Result<Session<Configured>, Failed<Open>> {
        let Session { state, library } = self;
        let mut open = state.into_connection();
        let bitfile = bitfile.as_ref();

        match program(&mut open, bitfile) {
            Ok(()) => Ok(Session {
                state: Configured {
                    open,
                    bitfile: bitfile.to_path_buf(),
                },
                library,
            }),
            Err(error) => Err(Failed {
                session: Session {
                    state: open,
                    library,
                },
                error,
            }),
        }
    }
}

/// Check that `path` names a readable regular file.
fn check_bitfile(path: &Path) -> io::Result<()> {
    let file = std::fs::File::open(path)?;
    if file.metadata()?.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ))
    }
}

fn program(open: &mut Open, bitfile: &Path) -> Result<()> {
    const OPERATION: &str = "configure_fpga";

    check_bitfile(bitfile).map_err(|source| FrontPanelError::FileNotFound {
        operation: OPERATION,
        path: bitfile.to_path_buf(),
        source,
    })?;

    let started = Instant::now();
    log::debug!("configuring device '{}' with {bitfile:?}", open.serial());

    open.link.configure_fpga(bitfile).map_err(|code| match code {
        ErrorCode::FileError => FrontPanelError::FileNotFound {
            operation: OPERATION,
            path: bitfile.to_path_buf(),
            source: io::Error::other(code.to_string()),
        },
        code => FrontPanelError::Configuration {
            operation: OPERATION,
            serial: open.serial().to_string(),
            path: bitfile.to_path_buf(),
            code,
        },
    })?;

    log::info!(
        "configured device '{}' with {bitfile:?} in {:?}",
        open.serial(),
        started.elapsed()
    );
    Ok(())
}

impl Session<Configured> {
    /// The bitfile currently loaded.
    pub fn bitfile(&self) -> &Path {
        &self.state.bitfile
    }

    /// Whether the loaded design exposes FrontPanel endpoints. `false` is a
    /// normal answer for designs built without the FrontPanel host interface.
    pub fn is_front_panel_enabled(&mut self) -> bool {
        self.state.open.link.is_front_panel_enabled()
    }

    fn transfer<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn DeviceLink) -> RuntimeResult<T>,
    ) -> Result<T> {
        let open = &mut self.state.open;
        f(&mut *open.link).map_err(|code| open.connection_error(operation, code))
    }

    pub fn set_wire_in_value(&mut self, addr: u32, value: u32, mask: u32) -> Result<()> {
        const OPERATION: &str = "set_wire_in_value";
        let addr = EndpointKind::WireIn.check(OPERATION, addr)?;
        self.transfer(OPERATION, |link| link.set_wire_in_value(addr, value, mask))
    }

    pub fn update_wire_ins(&mut self) -> Result<()> {
        self.transfer("update_wire_ins", |link| link.update_wire_ins())
    }

    pub fn update_wire_outs(&mut self) -> Result<()> {
        self.transfer("update_wire_outs", |link| link.update_wire_outs())
    }

    /// Value latched by the last `update_wire_outs`.
    pub fn wire_out_value(&mut self, addr: u32) -> Result<u32> {
        let addr = EndpointKind::WireOut.check("get_wire_out_value", addr)?;
        Ok(self.state.open.link.wire_out_value(addr))
    }

    pub fn activate_trigger_in(&mut self, addr: u32, bit: u32) -> Result<()> {
        const OPERATION: &str = "activate_trigger_in";
        let addr = EndpointKind::TriggerIn.check(OPERATION, addr)?;
        let bit = check_trigger_bit(OPERATION, bit)?;
        self.transfer(OPERATION, |link| link.activate_trigger_in(addr, bit))
    }

    pub fn update_trigger_outs(&mut self) -> Result<()> {
        self.transfer("update_trigger_outs", |link| link.update_trigger_outs())
    }

    /// Whether any bit in `mask` fired before the last `update_trigger_outs`.
    pub fn is_triggered(&mut self, addr: u32, mask: u32) -> Result<bool> {
        let addr = EndpointKind::TriggerOut.check("is_triggered", addr)?;
        Ok(self.state.open.link.is_triggered(addr, mask))
    }

    pub fn write_to_pipe_in(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        const OPERATION: &str = "write_to_pipe_in";
        let addr = EndpointKind::PipeIn.check(OPERATION, addr)?;
        check_transfer_length(OPERATION, data.len())?;
        self.transfer(OPERATION, |link| link.write_to_pipe_in(addr, data))
    }

    pub fn read_from_pipe_out(&mut self, addr: u32, length: usize) -> Result<Vec<u8>> {
        const OPERATION: &str = "read_from_pipe_out";
        let addr = EndpointKind::PipeOut.check(OPERATION, addr)?;
        let length = check_transfer_length(OPERATION, length)?;
        let mut buf = vec![0u8; length];
        let read = self.transfer(OPERATION, |link| link.read_from_pipe_out(addr, &mut buf))?;
        buf.truncate(read);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontpanel::ErrorKind;
    use crate::runtime::mock::{MockDevice, MockRuntime};
    use tempfile::TempDir;

    fn bitfile(dir: &TempDir, contents: &[u8]) -> PathBuf {
        let path = dir.path().join("design.bit");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_open_reads_metadata() {
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let session = Session::new(lib).open_by_serial(Some("ABC123")).unwrap();

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.serial(), "ABC123");
        assert_eq!(session.device_info().serial, "ABC123");
    }

    #[test]
    fn test_open_failure_returns_unopened_session() {
        let lib = Library::from_runtime(MockRuntime::new());
        let failed = Session::new(lib).open_by_serial(None).unwrap_err();

        assert_eq!(failed.error.kind(), ErrorKind::DeviceNotFound);
        assert_eq!(failed.session.state(), SessionState::Unopened);
    }

    #[test]
    fn test_runtime_open_error_is_connection_error() {
        let lib = Library::from_runtime(
            MockRuntime::new()
                .with_device(MockDevice::new("ABC123").failing_open(ErrorCode::CommunicationError)),
        );
        let failed = Session::new(lib.clone()).open_by_serial(None).unwrap_err();
        assert_eq!(failed.error.kind(), ErrorKind::Connection);

        // The claim was released with the failed attempt.
        let err = lib.claim("test", Some("ABC123"));
        assert!(err.is_ok());
    }

    #[test]
    fn test_configure_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));

        let mut session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&path)
            .unwrap();

        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.bitfile(), path.as_path());
        assert!(session.is_front_panel_enabled());
    }

    #[test]
    fn test_configure_missing_file_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let session = Session::new(lib).open_by_serial(None).unwrap();

        let failed = session
            .configure_fpga(dir.path().join("design.bit"))
            .unwrap_err();
        assert_eq!(failed.error.kind(), ErrorKind::FileNotFound);
        assert_eq!(failed.session.state(), SessionState::Open);
        assert_eq!(failed.session.device_info().serial, "ABC123");
    }

    #[test]
    fn test_configure_directory_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let session = Session::new(lib).open_by_serial(None).unwrap();

        let failed = session.configure_fpga(dir.path()).unwrap_err();
        assert_eq!(failed.error.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_rejected_bitstream_reverts_configured_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let good = bitfile(&dir, &[0xAA; 64]);
        let empty = dir.path().join("empty.bit");
        std::fs::write(&empty, b"").unwrap();

        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&good)
            .unwrap();

        let failed = session.configure_fpga(&empty).unwrap_err();
        assert_eq!(failed.error.kind(), ErrorKind::Configuration);
        assert_eq!(failed.session.state(), SessionState::Open);

        // Reprogramming after a failure is allowed.
        let session = failed.session.configure_fpga(&good).unwrap();
        assert_eq!(session.state(), SessionState::Configured);
    }

    #[test]
    fn test_close_releases_device() {
        let runtime = MockRuntime::new().with_device(MockDevice::new("ABC123"));
        let links = runtime.open_links_counter();
        let lib = Library::from_runtime(runtime);

        let session = Session::new(lib.clone()).open_by_serial(None).unwrap();
        assert_eq!(links.load(std::sync::atomic::Ordering::SeqCst), 1);

        let closed = session.close().close();
        assert_eq!(closed.state(), SessionState::Closed);
        assert_eq!(links.load(std::sync::atomic::Ordering::SeqCst), 0);

        let again = Session::new(lib).open_by_serial(Some("ABC123"));
        assert!(again.is_ok());
    }

    #[test]
    fn test_drop_closes_device() {
        let runtime = MockRuntime::new().with_device(MockDevice::new("ABC123"));
        let links = runtime.open_links_counter();
        let lib = Library::from_runtime(runtime);

        {
            let _session = Session::new(lib.clone()).open_by_serial(None).unwrap();
            assert_eq!(links.load(std::sync::atomic::Ordering::SeqCst), 1);
        }
        assert_eq!(links.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(lib.claim("test", Some("ABC123")).is_ok());
    }

    #[test]
    fn test_endpoint_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let mut session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&path)
            .unwrap();

        session.set_wire_in_value(0x03, 0xDEAD_BEEF, 0x0000_FFFF).unwrap();
        session.update_wire_ins().unwrap();
        session.update_wire_outs().unwrap();
        assert_eq!(session.wire_out_value(0x23).unwrap(), 0x0000_BEEF);

        assert_eq!(session.write_to_pipe_in(0x80, b"hello").unwrap(), 5);
        assert_eq!(session.read_from_pipe_out(0xA0, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_endpoint_address_checked_before_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let mut session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&path)
            .unwrap();

        let err = session.set_wire_in_value(0x20, 1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
        let err = session.activate_trigger_in(0x40, 40).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
    }

    #[test]
    fn test_oversized_read_is_rejected_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let mut session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&path)
            .unwrap();

        let err = session.read_from_pipe_out(0xA0, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);

        // The session is still usable afterwards.
        session.write_to_pipe_in(0x80, b"ok").unwrap();
        assert_eq!(session.read_from_pipe_out(0xA0, 2).unwrap(), b"ok");
    }

    #[test]
    fn test_invalid_parameter_during_configure_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(
            MockRuntime::new()
                .with_device(MockDevice::new("ABC123").failing_configure(ErrorCode::InvalidParameter)),
        );
        let session = Session::new(lib).open_by_serial(None).unwrap();

        let failed = session.configure_fpga(&path).unwrap_err();
        assert_eq!(failed.error.kind(), ErrorKind::Configuration);
        assert_eq!(failed.session.state(), SessionState::Open);
    }

    #[test]
    fn test_pipe_underflow_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = bitfile(&dir, &[0xAA; 64]);
        let lib = Library::from_runtime(MockRuntime::new().with_device(MockDevice::new("ABC123")));
        let mut session = Session::new(lib)
            .open_by_serial(None)
            .unwrap()
            .configure_fpga(&path)
            .unwrap();

        let err = session.read_from_pipe_out(0xA1, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("FifoUnderflow"));
    }
}
