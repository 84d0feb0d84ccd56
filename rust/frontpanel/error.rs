//! Error types for FrontPanel operations

use std::path::PathBuf;

use pyo3::prelude::*;
use thiserror::Error;

use crate::frontpanel::exceptions;
use crate::frontpanel::SessionState;
use crate::runtime::ErrorCode;

#[derive(Error, Debug)]
pub enum FrontPanelError {
    #[error("failed to load FrontPanel library '{path}': {cause}")]
    LibraryLoad { path: String, cause: String },

    #[error("{operation}: FrontPanel library is not loaded")]
    NotLoaded { operation: &'static str },

    #[error("{operation}: not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("{operation}: no device found{}", describe_serial(.serial))]
    DeviceNotFound {
        operation: &'static str,
        serial: Option<String>,
    },

    #[error("{operation}: {}", describe_busy(.serial))]
    DeviceBusy {
        operation: &'static str,
        serial: Option<String>,
    },

    #[error("{operation}: connection{} failed: {cause}", describe_target(.serial))]
    Connection {
        operation: &'static str,
        serial: Option<String>,
        cause: String,
    },

    #[error("{operation}: cannot read bitfile {path:?}: {source}")]
    FileNotFound {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{operation}: device '{serial}' failed to load bitfile {path:?}: {code}")]
    Configuration {
        operation: &'static str,
        serial: String,
        path: PathBuf,
        code: ErrorCode,
    },

    #[error("{operation}: {reason}")]
    InvalidEndpoint {
        operation: &'static str,
        reason: String,
    },
}

fn describe_serial(serial: &Option<String>) -> String {
    match serial {
        Some(serial) => format!(" with serial '{serial}'"),
        None => String::new(),
    }
}

fn describe_target(serial: &Option<String>) -> String {
    match serial {
        Some(serial) => format!(" to device '{serial}'"),
        None => String::new(),
    }
}

fn describe_busy(serial: &Option<String>) -> String {
    match serial {
        Some(serial) => format!("device '{serial}' is already open in another session"),
        None => "every attached device is already open in another session".to_string(),
    }
}

/// Fieldless discriminant of [`FrontPanelError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    LibraryLoad,
    NotLoaded,
    InvalidState,
    DeviceNotFound,
    DeviceBusy,
    Connection,
    FileNotFound,
    Configuration,
    InvalidEndpoint,
}

impl FrontPanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrontPanelError::LibraryLoad { .. } => ErrorKind::LibraryLoad,
            FrontPanelError::NotLoaded { .. } => ErrorKind::NotLoaded,
            FrontPanelError::InvalidState { .. } => ErrorKind::InvalidState,
            FrontPanelError::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            FrontPanelError::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            FrontPanelError::Connection { .. } => ErrorKind::Connection,
            FrontPanelError::FileNotFound { .. } => ErrorKind::FileNotFound,
            FrontPanelError::Configuration { .. } => ErrorKind::Configuration,
            FrontPanelError::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
        }
    }
}

impl From<FrontPanelError> for PyErr {
    fn from(err: FrontPanelError) -> PyErr {
        log::error!("{err}");
        let msg = err.to_string();
        match err.kind() {
            ErrorKind::LibraryLoad => exceptions::LibraryLoadError::new_err(msg),
            ErrorKind::NotLoaded => exceptions::NotLoadedError::new_err(msg),
            ErrorKind::InvalidState => exceptions::InvalidStateError::new_err(msg),
            ErrorKind::DeviceNotFound => exceptions::DeviceNotFoundError::new_err(msg),
            ErrorKind::DeviceBusy => exceptions::DeviceBusyError::new_err(msg),
            ErrorKind::Connection => exceptions::ConnectionError::new_err(msg),
            ErrorKind::FileNotFound => exceptions::FileNotFoundError::new_err(msg),
            ErrorKind::Configuration => exceptions::ConfigurationError::new_err(msg),
            ErrorKind::InvalidEndpoint => exceptions::InvalidEndpointError::new_err(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrontPanelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_operation() {
        let err = FrontPanelError::NotLoaded {
            operation: "get_version",
        };
        assert_eq!(
            err.to_string(),
            "get_version: FrontPanel library is not loaded"
        );

        let err = FrontPanelError::InvalidState {
            operation: "get_device_info",
            state: SessionState::Unopened,
        };
        assert_eq!(
            err.to_string(),
            "get_device_info: not allowed while the session is unopened"
        );
    }

    #[test]
    fn test_not_found_message_with_and_without_serial() {
        let any = FrontPanelError::DeviceNotFound {
            operation: "open_by_serial",
            serial: None,
        };
        assert_eq!(any.to_string(), "open_by_serial: no device found");

        let named = FrontPanelError::DeviceNotFound {
            operation: "open_by_serial",
            serial: Some("ABC123".into()),
        };
        assert_eq!(
            named.to_string(),
            "open_by_serial: no device found with serial 'ABC123'"
        );
    }

    #[cfg(feature = "auto-initialize")]
    #[test]
    fn test_python_exception_types() {
        macro_rules! assert_raises {
            ($err:expr, $exc:ty) => {
                Python::attach(|py| {
                    let err = PyErr::from($err);
                    assert!(err.is_instance_of::<$exc>(py), stringify!($exc));
                    assert!(err.is_instance_of::<exceptions::FrontPanelError>(py));
                    assert!(py
                        .get_type::<$exc>()
                        .is_subclass_of::<exceptions::FrontPanelError>()
                        .unwrap());
                })
            };
        }

        assert_raises!(
            FrontPanelError::LibraryLoad {
                path: "libokFrontPanel.so".into(),
                cause: "not found".into(),
            },
            exceptions::LibraryLoadError
        );
        assert_raises!(
            FrontPanelError::NotLoaded {
                operation: "get_version"
            },
            exceptions::NotLoadedError
        );
        assert_raises!(
            FrontPanelError::InvalidState {
                operation: "configure_fpga",
                state: SessionState::Closed,
            },
            exceptions::InvalidStateError
        );
        assert_raises!(
            FrontPanelError::DeviceNotFound {
                operation: "open_by_serial",
                serial: None,
            },
            exceptions::DeviceNotFoundError
        );
        assert_raises!(
            FrontPanelError::DeviceBusy {
                operation: "open_by_serial",
                serial: Some("ABC123".into()),
            },
            exceptions::DeviceBusyError
        );
        assert_raises!(
            FrontPanelError::Connection {
                operation: "update_wire_ins",
                serial: Some("ABC123".into()),
                cause: "Timeout (code -2)".into(),
            },
            exceptions::ConnectionError
        );
        assert_raises!(
            FrontPanelError::FileNotFound {
                operation: "configure_fpga",
                path: PathBuf::from("design.bit"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            exceptions::FileNotFoundError
        );
        assert_raises!(
            FrontPanelError::Configuration {
                operation: "configure_fpga",
                serial: "ABC123".into(),
                path: PathBuf::from("design.bit"),
                code: ErrorCode::DoneNotHigh,
            },
            exceptions::ConfigurationError
        );
        assert_raises!(
            FrontPanelError::InvalidEndpoint {
                operation: "set_wire_in_value",
                reason: "0x20 is not a wire-in address".into(),
            },
            exceptions::InvalidEndpointError
        );
    }

    #[test]
    fn test_connection_message_with_and_without_serial() {
        let device = FrontPanelError::Connection {
            operation: "update_wire_ins",
            serial: Some("ABC123".into()),
            cause: "Timeout (code -2)".into(),
        };
        assert_eq!(
            device.to_string(),
            "update_wire_ins: connection to device 'ABC123' failed: Timeout (code -2)"
        );

        let runtime = FrontPanelError::Connection {
            operation: "device_serials",
            serial: None,
            cause: "listing devices: Failed (code -1)".into(),
        };
        assert_eq!(
            runtime.to_string(),
            "device_serials: connection failed: listing devices: Failed (code -1)"
        );
    }

    #[test]
    fn test_configuration_message_carries_runtime_code() {
        let err = FrontPanelError::Configuration {
            operation: "configure_fpga",
            serial: "ABC123".into(),
            path: PathBuf::from("design.bit"),
            code: ErrorCode::DoneNotHigh,
        };
        let msg = err.to_string();
        assert!(msg.contains("ABC123"));
        assert!(msg.contains("design.bit"));
        assert!(msg.contains("DoneNotHigh"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
