//! Process-wide FrontPanel runtime handle.
//!
//! [`Library`] is a cheap, cloneable handle to a loaded runtime. Every session
//! holds a clone, so the runtime stays mapped until the last session is gone
//! even if the registry has already released it.
//!
//! The Python surface has no place to hold a handle between calls, so
//! `load_library`/`free_library` go through the process-wide [`REGISTRY`],
//! which reference counts loads. Device claims belong to the registry rather
//! than to one loaded runtime: a session that outlives `free_library` keeps its
//! device reserved against sessions opened after the next `load_library`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pyo3::prelude::*;

use crate::config;
use crate::frontpanel::{FrontPanelError, Result};
use crate::runtime::vendor::VendorRuntime;
use crate::runtime::{Runtime, Version};

type ClaimSet = Arc<Mutex<HashSet<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    runtime: Box<dyn Runtime>,
    claims: ClaimSet,
}

/// Handle to a loaded FrontPanel runtime.
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

impl Library {
    /// Wrap a runtime with a claim set of its own.
    pub fn from_runtime(runtime: impl Runtime + 'static) -> Self {
        Self::with_claims(Box::new(runtime), ClaimSet::default())
    }

    fn with_claims(runtime: Box<dyn Runtime>, claims: ClaimSet) -> Self {
        Self {
            inner: Arc::new(Inner { runtime, claims }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.runtime.name()
    }

    pub fn version(&self) -> Version {
        self.inner.runtime.version()
    }

    /// Serials of the devices the runtime can see.
    ///
    /// A runtime that cannot enumerate at all is a `Connection` error, not an
    /// empty list.
    pub fn device_serials(&self, operation: &'static str) -> Result<Vec<String>> {
        self.inner
            .runtime
            .device_serials()
            .map_err(|code| FrontPanelError::Connection {
                operation,
                serial: None,
                cause: format!("listing devices: {code}"),
            })
    }

    pub(crate) fn runtime(&self) -> &dyn Runtime {
        self.inner.runtime.as_ref()
    }

    /// Number of live handles to this runtime, including `self`.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Reserve a device for one session.
    ///
    /// With a serial, that exact device must be attached and unclaimed. Without
    /// one, the first attached device no other session holds is chosen.
    pub(crate) fn claim(&self, operation: &'static str, serial: Option<&str>) -> Result<Claim> {
        let attached = self.device_serials(operation)?;
        let mut claims = lock(&self.inner.claims);

        let serial = match serial.filter(|s| !s.is_empty()) {
            Some(wanted) => {
                if !attached.iter().any(|s| s == wanted) {
                    return Err(FrontPanelError::DeviceNotFound {
                        operation,
                        serial: Some(wanted.to_string()),
                    });
                }
                if claims.contains(wanted) {
                    return Err(FrontPanelError::DeviceBusy {
                        operation,
                        serial: Some(wanted.to_string()),
                    });
                }
                wanted.to_string()
            }
            None => {
                if attached.is_empty() {
                    return Err(FrontPanelError::DeviceNotFound {
                        operation,
                        serial: None,
                    });
                }
                attached
                    .into_iter()
                    .find(|s| !claims.contains(s))
                    .ok_or(FrontPanelError::DeviceBusy {
                        operation,
                        serial: None,
                    })?
            }
        };

        claims.insert(serial.clone());
        log::debug!("claimed device '{serial}'");
        Ok(Claim {
            claims: self.inner.claims.clone(),
            serial,
        })
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("runtime", &self.name())
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// Exclusive reservation of one device serial, released on drop.
#[derive(Debug)]
pub(crate) struct Claim {
    claims: ClaimSet,
    serial: String,
}

impl Claim {
    pub(crate) fn serial(&self) -> &str {
        &self.serial
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.claims).remove(&self.serial);
        log::debug!("released device '{}'", self.serial);
    }
}

struct RegistryState {
    library: Option<Library>,
    loads: usize,
    claims: Option<ClaimSet>,
}

/// Reference-counted slot for the process-wide runtime.
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                library: None,
                loads: 0,
                claims: None,
            }),
        }
    }

    /// Load a runtime unless one is already active, in which case the active
    /// one is reused and its load count bumped.
    ///
    /// Every runtime loaded here shares the registry's device claims.
    pub fn load_with<R, F>(&self, load: F) -> Result<Library>
    where
        R: Runtime + 'static,
        F: FnOnce() -> Result<R>,
    {
        let mut state = lock(&self.state);
        if let Some(library) = state.library.clone() {
            state.loads += 1;
            log::warn!(
                "FrontPanel runtime already loaded from '{}'; reusing it (load count {})",
                library.name(),
                state.loads
            );
            return Ok(library);
        }

        let runtime = load()?;
        let claims = state.claims.get_or_insert_with(ClaimSet::default).clone();
        let library = Library::with_claims(Box::new(runtime), claims);
        state.library = Some(library.clone());
        state.loads = 1;
        Ok(library)
    }

    /// Undo one load. The runtime is released when the count reaches zero.
    ///
    /// Returns `true` if this call released the registry's handle.
    pub fn free(&self, operation: &'static str) -> Result<bool> {
        let mut state = lock(&self.state);
        if state.library.is_none() {
            return Err(FrontPanelError::NotLoaded { operation });
        }

        state.loads -= 1;
        if state.loads > 0 {
            log::debug!("FrontPanel runtime load count now {}", state.loads);
            return Ok(false);
        }

        if let Some(library) = state.library.take() {
            let outstanding = library.handle_count() - 1;
            if outstanding > 0 {
                log::warn!(
                    "freeing FrontPanel runtime with {outstanding} session(s) still alive; \
                     it stays loaded until they are dropped"
                );
            } else {
                log::info!("freed FrontPanel runtime '{}'", library.name());
            }
        }
        Ok(true)
    }

    pub fn current(&self, operation: &'static str) -> Result<Library> {
        lock(&self.state)
            .library
            .clone()
            .ok_or(FrontPanelError::NotLoaded { operation })
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).library.is_some()
    }
}

/// Registry used by the Python functions.
pub static REGISTRY: Registry = Registry::new();

/// Load the FrontPanel runtime.
///
/// Args:
///     path: Runtime shared library. Defaults to $OKFP_LIBRARY_PATH, then the
///         platform library name.
#[pyfunction]
#[pyo3(signature = (path=None))]
pub fn load_library(py: Python<'_>, path: Option<PathBuf>) -> Result<()> {
    let path = config::library_path(path.as_deref());
    py.detach(|| REGISTRY.load_with(|| VendorRuntime::load(&path)))?;
    Ok(())
}

/// Release the FrontPanel runtime loaded by `load_library`.
#[pyfunction]
pub fn free_library() -> Result<()> {
    REGISTRY.free("free_library")?;
    Ok(())
}

/// Build date and time of the loaded runtime.
#[pyfunction]
pub fn get_version() -> Result<(String, String)> {
    let version = REGISTRY.current("get_version")?.version();
    Ok((version.date, version.time))
}

/// Serial numbers of all devices visible to the runtime.
#[pyfunction]
pub fn device_serials(py: Python<'_>) -> Result<Vec<String>> {
    let library = REGISTRY.current("device_serials")?;
    py.detach(|| library.device_serials("device_serials"))
}

/// Load a simulated runtime with one device per serial.
#[cfg(feature = "mock-runtime")]
#[pyfunction]
pub fn load_mock_library(serials: Vec<String>) -> Result<()> {
    use crate::runtime::mock::{MockDevice, MockRuntime};

    REGISTRY.load_with(|| {
        Ok(serials
            .iter()
            .fold(MockRuntime::new(), |rt, s| rt.with_device(MockDevice::new(s))))
    })?;
    Ok(())
}
