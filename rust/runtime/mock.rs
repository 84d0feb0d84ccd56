//! Simulated FrontPanel runtime.
//!
//! Devices are plain values configured up front. Each simulated design is a
//! loopback: wire-outs mirror the committed wire-ins at `addr - 0x20`,
//! trigger-outs latch trigger-ins at `addr - 0x20`, and pipe-outs drain what was
//! written to the pipe-in at `addr - 0x20`.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::frontpanel::DeviceInfo;
use crate::runtime::{DeviceLink, ErrorCode, Runtime, RuntimeResult, Version};

/// Description of one simulated device.
#[derive(Clone, Debug)]
pub struct MockDevice {
    info: DeviceInfo,
    front_panel: bool,
    open_error: Option<ErrorCode>,
    configure_error: Option<ErrorCode>,
}

impl MockDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            info: DeviceInfo {
                serial: serial.to_string(),
                product_name: "XEM7310-A75".to_string(),
                product_id: 49,
                device_id: format!("mock-{serial}"),
                firmware_major: 1,
                firmware_minor: 34,
                is_high_speed: true,
                host_interface_width: 32,
            },
            front_panel: true,
            open_error: None,
            configure_error: None,
        }
    }

    /// Designs programmed into this device do not expose FrontPanel endpoints.
    pub fn without_front_panel(mut self) -> Self {
        self.front_panel = false;
        self
    }

    pub fn failing_open(mut self, code: ErrorCode) -> Self {
        self.open_error = Some(code);
        self
    }

    pub fn failing_configure(mut self, code: ErrorCode) -> Self {
        self.configure_error = Some(code);
        self
    }
}

/// In-memory runtime serving a fixed set of [`MockDevice`]s.
#[derive(Debug)]
pub struct MockRuntime {
    devices: Vec<MockDevice>,
    version: Version,
    enumerate_error: Option<ErrorCode>,
    open_links: Arc<AtomicUsize>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            version: Version {
                date: "Jan  1 2024".to_string(),
                time: "00:00:00".to_string(),
            },
            enumerate_error: None,
            open_links: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Device enumeration fails with `code`.
    pub fn failing_enumeration(mut self, code: ErrorCode) -> Self {
        self.enumerate_error = Some(code);
        self
    }

    /// Number of links opened and not yet closed.
    pub fn open_links(&self) -> usize {
        self.open_links.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`MockRuntime::open_links`], usable after the
    /// runtime has been moved into a library handle.
    pub fn open_links_counter(&self) -> Arc<AtomicUsize> {
        self.open_links.clone()
    }
}

impl Runtime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> Version {
        self.version.clone()
    }

    fn device_serials(&self) -> RuntimeResult<Vec<String>> {
        if let Some(code) = self.enumerate_error {
            return Err(code);
        }
        Ok(self.devices.iter().map(|d| d.info.serial.clone()).collect())
    }

    fn open(&self, serial: &str) -> RuntimeResult<Box<dyn DeviceLink>> {
        let device = self
            .devices
            .iter()
            .find(|d| d.info.serial == serial)
            .ok_or(ErrorCode::Failed)?;

        if let Some(code) = device.open_error {
            return Err(code);
        }

        self.open_links.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            device: device.clone(),
            open_links: self.open_links.clone(),
            is_open: true,
            configured: false,
            wire_ins_pending: [0; 32],
            wire_ins: [0; 32],
            wire_outs: [0; 32],
            triggers_pending: [0; 32],
            triggers: [0; 32],
            pipes: HashMap::new(),
        }))
    }
}

struct MockLink {
    device: MockDevice,
    open_links: Arc<AtomicUsize>,
    is_open: bool,
    configured: bool,
    wire_ins_pending: [u32; 32],
    wire_ins: [u32; 32],
    wire_outs: [u32; 32],
    triggers_pending: [u32; 32],
    triggers: [u32; 32],
    pipes: HashMap<u8, VecDeque<u8>>,
}

impl MockLink {
    fn ensure_open(&self) -> RuntimeResult<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(ErrorCode::DeviceNotOpen)
        }
    }

    fn ensure_front_panel(&self) -> RuntimeResult<()> {
        self.ensure_open()?;
        if self.configured && self.device.front_panel {
            Ok(())
        } else {
            Err(ErrorCode::UnsupportedFeature)
        }
    }

    fn slot(addr: u8, base: u8) -> usize {
        usize::from(addr.wrapping_sub(base) & 0x1F)
    }
}

impl DeviceLink for MockLink {
    fn device_info(&mut self) -> RuntimeResult<DeviceInfo> {
        self.ensure_open()?;
        Ok(self.device.info.clone())
    }

    fn configure_fpga(&mut self, bitfile: &Path) -> RuntimeResult<()> {
        self.ensure_open()?;
        self.configured = false;

        let image = std::fs::read(bitfile).map_err(|_| ErrorCode::FileError)?;
        if let Some(code) = self.device.configure_error {
            return Err(code);
        }
        if image.is_empty() {
            return Err(ErrorCode::InvalidBitstream);
        }

        self.configured = true;
        self.wire_ins_pending = [0; 32];
        self.wire_ins = [0; 32];
        self.wire_outs = [0; 32];
        self.triggers_pending = [0; 32];
        self.triggers = [0; 32];
        self.pipes.clear();
        Ok(())
    }

    fn is_front_panel_enabled(&mut self) -> bool {
        self.is_open && self.configured && self.device.front_panel
    }

    fn set_wire_in_value(&mut self, addr: u8, value: u32, mask: u32) -> RuntimeResult<()> {
        self.ensure_front_panel()?;
        let slot = &mut self.wire_ins_pending[Self::slot(addr, 0x00)];
        *slot = (*slot & !mask) | (value & mask);
        Ok(())
    }

    fn update_wire_ins(&mut self) -> RuntimeResult<()> {
        self.ensure_front_panel()?;
        self.wire_ins = self.wire_ins_pending;
        Ok(())
    }

    fn update_wire_outs(&mut self) -> RuntimeResult<()> {
        self.ensure_front_panel()?;
        self.wire_outs = self.wire_ins;
        Ok(())
    }

    fn wire_out_value(&mut self, addr: u8) -> u32 {
        self.wire_outs[Self::slot(addr, 0x20)]
    }

    fn activate_trigger_in(&mut self, addr: u8, bit: u8) -> RuntimeResult<()> {
        self.ensure_front_panel()?;
        self.triggers_pending[Self::slot(addr, 0x40)] |= 1 << (bit & 0x1F);
        Ok(())
    }

    fn update_trigger_outs(&mut self) -> RuntimeResult<()> {
        self.ensure_front_panel()?;
        self.triggers = std::mem::take(&mut self.triggers_pending);
        Ok(())
    }

    fn is_triggered(&mut self, addr: u8, mask: u32) -> bool {
        self.triggers[Self::slot(addr, 0x60)] & mask != 0
    }

    fn write_to_pipe_in(&mut self, addr: u8, data: &[u8]) -> RuntimeResult<usize> {
        self.ensure_front_panel()?;
        self.pipes.entry(addr).or_default().extend(data);
        Ok(data.len())
    }

    fn read_from_pipe_out(&mut self, addr: u8, buf: &mut [u8]) -> RuntimeResult<usize> {
        self.ensure_front_panel()?;
        let len = buf.len();
        let fifo = self.pipes.entry(addr.wrapping_sub(0x20)).or_default();
        if fifo.len() < len {
            return Err(ErrorCode::FifoUnderflow);
        }
        for (dst, src) in buf.iter_mut().zip(fifo.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }

    fn close(&mut self) {
        if self.is_open {
            self.is_open = false;
            self.configured = false;
            self.open_links.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.close();
    }
}
