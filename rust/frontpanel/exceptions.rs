//! Python exception hierarchy.
//!
//! Every error raised by the extension derives from `okfp.FrontPanelError`.

use pyo3::create_exception;
use pyo3::exceptions::PyException;
use pyo3::prelude::*;

create_exception!(okfp, FrontPanelError, PyException, "Base class of all FrontPanel errors.");
create_exception!(okfp, LibraryLoadError, FrontPanelError, "The FrontPanel runtime could not be loaded.");
create_exception!(okfp, NotLoadedError, FrontPanelError, "load_library() has not been called.");
create_exception!(okfp, InvalidStateError, FrontPanelError, "Operation not valid in the current session state.");
create_exception!(okfp, DeviceNotFoundError, FrontPanelError, "No matching device is attached.");
create_exception!(okfp, DeviceBusyError, FrontPanelError, "The device is open in another session.");
create_exception!(okfp, ConnectionError, FrontPanelError, "Transport-level failure talking to the device.");
create_exception!(okfp, FileNotFoundError, FrontPanelError, "The bitfile could not be read.");
create_exception!(okfp, ConfigurationError, FrontPanelError, "The device rejected or failed to load the bitstream.");
create_exception!(okfp, InvalidEndpointError, FrontPanelError, "Endpoint address, trigger bit or transfer length out of range.");

pub(crate) fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = m.py();
    m.add("FrontPanelError", py.get_type::<FrontPanelError>())?;
    m.add("LibraryLoadError", py.get_type::<LibraryLoadError>())?;
    m.add("NotLoadedError", py.get_type::<NotLoadedError>())?;
    m.add("InvalidStateError", py.get_type::<InvalidStateError>())?;
    m.add("DeviceNotFoundError", py.get_type::<DeviceNotFoundError>())?;
    m.add("DeviceBusyError", py.get_type::<DeviceBusyError>())?;
    m.add("ConnectionError", py.get_type::<ConnectionError>())?;
    m.add("FileNotFoundError", py.get_type::<FileNotFoundError>())?;
    m.add("ConfigurationError", py.get_type::<ConfigurationError>())?;
    m.add("InvalidEndpointError", py.get_type::<InvalidEndpointError>())?;
    Ok(())
}
