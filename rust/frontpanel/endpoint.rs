//! FrontPanel endpoint address ranges.
//!
//! A configured design exposes up to 32 endpoints of each kind, at fixed
//! address windows:
//!
//! ```text
//!   0x00-0x1F  wire in
//!   0x20-0x3F  wire out
//!   0x40-0x5F  trigger in
//!   0x60-0x7F  trigger out
//!   0x80-0x9F  pipe in
//!   0xA0-0xBF  pipe out
//! ```

use std::fmt;

use crate::frontpanel::{FrontPanelError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    WireIn,
    WireOut,
    TriggerIn,
    TriggerOut,
    PipeIn,
    PipeOut,
}

impl EndpointKind {
    pub fn base(self) -> u8 {
        match self {
            EndpointKind::WireIn => 0x00,
            EndpointKind::WireOut => 0x20,
            EndpointKind::TriggerIn => 0x40,
            EndpointKind::TriggerOut => 0x60,
            EndpointKind::PipeIn => 0x80,
            EndpointKind::PipeOut => 0xA0,
        }
    }

    /// Validate `addr` for this kind and narrow it to a byte.
    pub fn check(self, operation: &'static str, addr: u32) -> Result<u8> {
        let base = u32::from(self.base());
        if (base..base + 0x20).contains(&addr) {
            Ok(addr as u8)
        } else {
            Err(FrontPanelError::InvalidEndpoint {
                operation,
                reason: format!(
                    "0x{addr:02X} is not a {self} address (0x{base:02X}-0x{:02X})",
                    base + 0x1F
                ),
            })
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::WireIn => "wire-in",
            EndpointKind::WireOut => "wire-out",
            EndpointKind::TriggerIn => "trigger-in",
            EndpointKind::TriggerOut => "trigger-out",
            EndpointKind::PipeIn => "pipe-in",
            EndpointKind::PipeOut => "pipe-out",
        };
        f.write_str(name)
    }
}

/// Trigger bits index a 32-bit trigger word.
pub fn check_trigger_bit(operation: &'static str, bit: u32) -> Result<u8> {
    if bit < 32 {
        Ok(bit as u8)
    } else {
        Err(FrontPanelError::InvalidEndpoint {
            operation,
            reason: format!("trigger bit {bit} is out of range (0-31)"),
        })
    }
}

/// Largest single pipe transfer, in bytes.
pub const MAX_PIPE_TRANSFER: usize = 1 << 28;

/// Bound a pipe transfer length before any buffer is sized from it.
pub fn check_transfer_length(operation: &'static str, length: usize) -> Result<usize> {
    if length <= MAX_PIPE_TRANSFER {
        Ok(length)
    } else {
        Err(FrontPanelError::InvalidEndpoint {
            operation,
            reason: format!(
                "transfer length {length} exceeds the {MAX_PIPE_TRANSFER}-byte limit"
            ),
        })
    }
}
