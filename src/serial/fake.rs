use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use super::device::Device;
use super::errors::SerialFailureKind;

/// Names `LoopbackDevice::open` accepts.
pub const LOOPBACK_PREFIX: &str = "loop";

/// In-memory device whose output is wired straight back into its input.
///
/// Knobs let tests script the awkward cases: partial writes, a full output
/// queue, rejected rates and a device that vanishes mid-session.
#[derive(Debug)]
pub struct LoopbackDevice {
    name: String,
    queue: VecDeque<u8>,
    baud: Option<u32>,
    dtr: bool,
    rts: bool,
    write_limit: Option<usize>,
    write_calls: Vec<usize>,
    rejected_rates: Vec<u32>,
    stalled: bool,
    disconnected: bool,
    drained: usize,
    closed: Arc<AtomicBool>,
}

impl LoopbackDevice {
    /// Cap how many bytes a single underlying write accepts.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        self.write_limit = limit;
    }

    /// While stalled, writes accept nothing and never become writable.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    pub fn reject_rate(&mut self, rate: u32) {
        self.rejected_rates.push(rate);
    }

    /// Every later operation fails as if the adapter was unplugged.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    /// Queue bytes as if the peer had sent them.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }

    /// Sizes of the underlying write calls seen so far.
    pub fn write_calls(&self) -> &[usize] {
        &self.write_calls
    }

    pub fn baud(&self) -> Option<u32> {
        self.baud
    }

    pub fn control_lines(&self) -> (bool, bool) {
        (self.dtr, self.rts)
    }

    pub fn drain_count(&self) -> usize {
        self.drained
    }

    /// Flag flipped once the device has been closed or dropped.
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected {
            return Err(Error::serial(
                SerialFailureKind::Disconnected,
                format!("{} disconnected", self.name),
            ));
        }
        Ok(())
    }
}

impl Device for LoopbackDevice {
    fn list() -> Vec<String> {
        vec![format!("{LOOPBACK_PREFIX}0")]
    }

    fn open(name: &str, baud: Option<u32>) -> Result<Self> {
        if !name.starts_with(LOOPBACK_PREFIX) {
            return Err(Error::serial(
                SerialFailureKind::DeviceMissing,
                format!("unable to open {name}: no such loopback device"),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            queue: VecDeque::new(),
            baud,
            dtr: false,
            rts: false,
            write_limit: None,
            write_calls: Vec::new(),
            rejected_rates: Vec::new(),
            stalled: false,
            disconnected: false,
            drained: 0,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn set_baud(&mut self, rate: u32) -> Result<()> {
        self.ensure_connected()?;
        if self.rejected_rates.contains(&rate) {
            return Err(Error::serial(
                SerialFailureKind::Config,
                format!("unsupported baud rate {rate}"),
            ));
        }
        self.baud = Some(rate);
        Ok(())
    }

    fn set_control(&mut self, dtr: Option<bool>, rts: Option<bool>) -> Result<()> {
        self.ensure_connected()?;
        if let Some(level) = dtr {
            self.dtr = level;
        }
        if let Some(level) = rts {
            self.rts = level;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_connected()?;
        let count = buf.len().min(self.queue.len());
        for (slot, byte) in buf.iter_mut().zip(self.queue.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_connected()?;
        if self.stalled {
            return Ok(0);
        }
        let accepted = buf.len().min(self.write_limit.unwrap_or(usize::MAX));
        self.write_calls.push(accepted);
        self.queue.extend(&buf[..accepted]);
        Ok(accepted)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_connected()?;
        Ok(self.queue.len())
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        self.ensure_connected()?;
        if !self.queue.is_empty() {
            return Ok(true);
        }
        // Nothing can arrive from outside, so the full timeout always elapses.
        std::thread::sleep(timeout);
        Ok(false)
    }

    fn wait_writable(&mut self, _timeout: Duration) -> Result<bool> {
        self.ensure_connected()?;
        Ok(!self.stalled)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.queue.clear();
        Ok(())
    }

    fn drain_output(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.drained += 1;
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

impl Drop for LoopbackDevice {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
