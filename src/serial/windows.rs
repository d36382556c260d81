//! COM port backend on top of `serialport`'s native Win32 port.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serialport::{
    ClearBuffer, COMPort, DataBits, FlowControl, Parity, SerialPort as _, StopBits,
};

use super::device::Device;
use super::errors::{classify_io_error, SerialFailureKind};
use crate::{Error, Result};

/// Win32 needs some rate at open time; 9600 is the COM driver default.
const OPEN_BAUD: u32 = 9_600;
/// `serialport` offers no comm-event wait, so queue counts are polled this often.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    baud: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
}

#[derive(Debug)]
pub struct ComDevice {
    port: COMPort,
    name: String,
    original: Snapshot,
    restored: bool,
}

impl ComDevice {
    fn snapshot(port: &COMPort) -> serialport::Result<Snapshot> {
        Ok(Snapshot {
            baud: port.baud_rate()?,
            data_bits: port.data_bits()?,
            parity: port.parity()?,
            stop_bits: port.stop_bits()?,
            flow_control: port.flow_control()?,
        })
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        let saved = self.original;
        let port = &mut self.port;
        port.set_baud_rate(saved.baud)
            .and_then(|_| port.set_data_bits(saved.data_bits))
            .and_then(|_| port.set_parity(saved.parity))
            .and_then(|_| port.set_stop_bits(saved.stop_bits))
            .and_then(|_| port.set_flow_control(saved.flow_control))
            .map_err(|e| serial_error(format!("unable to restore settings on {}", self.name), e))
    }
}

impl Device for ComDevice {
    fn list() -> Vec<String> {
        super::enumerate::port_list()
    }

    fn open(name: &str, baud: Option<u32>) -> Result<Self> {
        let mut port = serialport::new(name, baud.unwrap_or(OPEN_BAUD))
            .timeout(Duration::ZERO)
            .open_native()
            .map_err(|e| serial_error(format!("unable to open {name}"), e))?;

        // serialport applies its own DCB while opening; what we can capture is
        // the state right after that, before our raw 8N1 baseline.
        let original = Self::snapshot(&port)
            .map_err(|e| serial_error(format!("unable to read settings of {name}"), e))?;

        port.set_data_bits(DataBits::Eight)
            .and_then(|_| port.set_parity(Parity::None))
            .and_then(|_| port.set_stop_bits(StopBits::One))
            .and_then(|_| port.set_flow_control(FlowControl::None))
            .and_then(|_| port.clear(ClearBuffer::Input))
            .map_err(|e| serial_error(format!("unable to configure {name}"), e))?;

        Ok(Self {
            port,
            name: name.to_string(),
            original,
            restored: false,
        })
    }

    fn set_baud(&mut self, rate: u32) -> Result<()> {
        self.port
            .set_baud_rate(rate)
            .map_err(|e| serial_error(format!("unsupported baud rate {rate}"), e))
    }

    fn set_control(&mut self, dtr: Option<bool>, rts: Option<bool>) -> Result<()> {
        if let Some(level) = dtr {
            self.port
                .write_data_terminal_ready(level)
                .map_err(|e| serial_error(format!("unable to set DTR on {}", self.name), e))?;
        }
        if let Some(level) = rts {
            self.port
                .write_request_to_send(level)
                .map_err(|e| serial_error(format!("unable to set RTS on {}", self.name), e))?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let queued = self.bytes_available()?;
        if queued == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(queued);
        match self.port.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(io_error(format!("read from {} failed", self.name), e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.port.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(io_error(format!("write to {} failed", self.name), e)),
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let queued = self.port.bytes_to_read().map_err(|e| {
            serial_error(format!("unable to query input queue of {}", self.name), e)
        })?;
        Ok(queued as usize)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.bytes_available()? > 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_writable(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let pending = self.port.bytes_to_write().map_err(|e| {
                serial_error(format!("unable to query output queue of {}", self.name), e)
            })?;
            if pending == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| serial_error(format!("unable to discard input on {}", self.name), e))
    }

    fn drain_output(&mut self) -> Result<()> {
        self.port
            .flush()
            .map_err(|e| io_error(format!("unable to drain output on {}", self.name), e))
    }

    fn close(mut self) -> Result<()> {
        self.restore()
    }
}

impl Drop for ComDevice {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!("{err}");
        }
        debug!("released {}", self.name);
    }
}

fn serial_error(context: String, err: serialport::Error) -> Error {
    use serialport::ErrorKind;

    let kind = match err.kind() {
        ErrorKind::NoDevice => SerialFailureKind::DeviceMissing,
        ErrorKind::InvalidInput => SerialFailureKind::Config,
        ErrorKind::Io(inner) => classify_io_error(&io::Error::from(inner)),
        ErrorKind::Unknown => SerialFailureKind::Unknown,
    };
    Error::serial(kind, format!("{context}: {err}"))
}

fn io_error(context: String, err: io::Error) -> Error {
    Error::serial(classify_io_error(&err), format!("{context}: {err}"))
}
