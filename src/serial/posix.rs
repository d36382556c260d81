//! termios backend for Linux, macOS and the BSDs.

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rustix::event::{PollFd, PollFlags, Timespec};
use rustix::fs::{FlockOperation, Mode, OFlags};
use rustix::io::Errno;
use rustix::termios::{
    self, ControlModes, InputModes, OptionalActions, QueueSelector, SpecialCodeIndex, Termios,
};

use super::baud;
use super::device::Device;
use super::errors::{classify_io_error, SerialFailureKind};
use crate::{Error, Result};

/// An exclusively locked tty in raw mode.
#[derive(Debug)]
pub struct TtyDevice {
    fd: OwnedFd,
    name: String,
    original: Termios,
    settings: Termios,
    restored: bool,
}

impl TtyDevice {
    /// Settings currently applied to the device.
    pub fn settings(&self) -> &Termios {
        &self.settings
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        if let Err(err) = termios::ioctl_tiocnxcl(&self.fd) {
            debug!("clearing exclusive mode on {} failed: {err}", self.name);
        }
        termios::tcsetattr(&self.fd, OptionalActions::Now, &self.original)
            .map_err(|e| os_error(format!("unable to restore settings on {}", self.name), e))
    }

    fn wait_for(&self, events: PollFlags, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let limit = Timespec {
                tv_sec: remaining.as_secs() as _,
                tv_nsec: remaining.subsec_nanos() as _,
            };
            let mut fds = [PollFd::new(&self.fd, events)];
            match rustix::event::poll(&mut fds, Some(&limit)) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let revents = fds[0].revents();
                    if revents.intersects(events) {
                        return Ok(true);
                    }
                    if revents.intersects(PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL) {
                        return Err(Error::serial(
                            SerialFailureKind::Disconnected,
                            format!("{} hung up", self.name),
                        ));
                    }
                    return Ok(false);
                }
                Err(e) if e == Errno::INTR => {
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(os_error(format!("poll on {} failed", self.name), e)),
            }
        }
    }
}

impl Device for TtyDevice {
    fn list() -> Vec<String> {
        super::enumerate::port_list()
    }

    fn open(name: &str, baud: Option<u32>) -> Result<Self> {
        // Non-blocking so a modem-style device with DCD low cannot stall the open.
        let fd = rustix::fs::open(
            name,
            OFlags::RDWR | OFlags::NOCTTY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| os_error(format!("unable to open {name}"), e))?;

        match rustix::fs::flock(&fd, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {}
            Err(e) if e == Errno::WOULDBLOCK => {
                return Err(Error::serial(
                    SerialFailureKind::Busy,
                    format!("{name} is locked by another process"),
                ));
            }
            Err(e) => return Err(os_error(format!("unable to lock {name}"), e)),
        }

        let original = termios::tcgetattr(&fd)
            .map_err(|e| os_error(format!("unable to read terminal settings of {name}"), e))?;

        let mut device = TtyDevice {
            fd,
            name: name.to_string(),
            settings: original.clone(),
            original,
            restored: false,
        };

        if let Err(err) = termios::ioctl_tiocexcl(&device.fd) {
            debug!("exclusive mode not available on {name}: {err}");
        }

        let mut settings = device.original.clone();
        apply_raw_mode(&mut settings);
        if let Some(rate) = baud {
            settings
                .set_speed(rate)
                .map_err(|e| os_error(format!("unsupported baud rate {rate}"), e))?;
        }
        termios::tcsetattr(&device.fd, OptionalActions::Now, &settings)
            .map_err(|e| os_error(format!("unable to configure {name}"), e))?;
        device.settings = settings;

        if let Err(err) = termios::tcflush(&device.fd, QueueSelector::IFlush) {
            debug!("discarding stale input on {name} failed: {err}");
        }
        Ok(device)
    }

    fn set_baud(&mut self, rate: u32) -> Result<()> {
        let mut next = self.settings.clone();
        next.set_speed(rate)
            .map_err(|e| os_error(format!("unsupported baud rate {rate}"), e))?;
        termios::tcsetattr(&self.fd, OptionalActions::Now, &next)
            .map_err(|e| os_error(format!("unsupported baud rate {rate}"), e))?;
        if !baud::is_standard(rate) {
            debug!("{} using custom rate {rate}", self.name);
        }
        self.settings = next;
        Ok(())
    }

    fn set_control(&mut self, dtr: Option<bool>, rts: Option<bool>) -> Result<()> {
        let raw = self.fd.as_raw_fd();
        let lines = [(dtr, libc::TIOCM_DTR, "DTR"), (rts, libc::TIOCM_RTS, "RTS")];
        for (level, bit, label) in lines {
            let Some(level) = level else { continue };
            let request = if level { libc::TIOCMBIS } else { libc::TIOCMBIC };
            let bits: libc::c_int = bit;
            // SAFETY: `raw` stays open for the lifetime of `self.fd` and `bits` outlives the call.
            let rc = unsafe { libc::ioctl(raw, request, &bits as *const libc::c_int) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                return Err(io_error(format!("unable to set {label} on {}", self.name), err));
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want_any = !buf.is_empty();
        match rustix::io::read(&self.fd, &mut *buf) {
            // A hung-up tty reads as end-of-file; the queue probe fails on it
            // while succeeding on a live device with nothing pending.
            Ok(0) if want_any => match rustix::io::ioctl_fionread(&self.fd) {
                Ok(_) => Ok(0),
                Err(_) => Err(Error::serial(
                    SerialFailureKind::Disconnected,
                    format!("{} hung up", self.name),
                )),
            },
            Ok(n) => Ok(n),
            Err(e) if e == Errno::AGAIN || e == Errno::INTR => Ok(0),
            Err(e) => Err(os_error(format!("read from {} failed", self.name), e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match rustix::io::write(&self.fd, buf) {
            Ok(n) => Ok(n),
            Err(e) if e == Errno::AGAIN || e == Errno::INTR => Ok(0),
            Err(e) => Err(os_error(format!("write to {} failed", self.name), e)),
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let queued = rustix::io::ioctl_fionread(&self.fd)
            .map_err(|e| os_error(format!("unable to query input queue of {}", self.name), e))?;
        Ok(usize::try_from(queued).unwrap_or(usize::MAX))
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_for(PollFlags::IN, timeout)
    }

    fn wait_writable(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_for(PollFlags::OUT, timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        termios::tcflush(&self.fd, QueueSelector::IFlush)
            .map_err(|e| os_error(format!("unable to discard input on {}", self.name), e))
    }

    fn drain_output(&mut self) -> Result<()> {
        termios::tcdrain(&self.fd)
            .map_err(|e| os_error(format!("unable to drain output on {}", self.name), e))
    }

    fn close(mut self) -> Result<()> {
        self.restore()
    }
}

impl Drop for TtyDevice {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!("{err}");
        }
    }
}

/// Raw 8N1: no line editing, echo or signal characters, no flow control,
/// and reads that return whatever is queued without waiting.
fn apply_raw_mode(settings: &mut Termios) {
    settings.make_raw();
    settings
        .control_modes
        .remove(ControlModes::CSIZE | ControlModes::PARENB | ControlModes::CSTOPB);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    settings.control_modes.remove(ControlModes::CRTSCTS);
    settings.control_modes.insert(
        ControlModes::CS8 | ControlModes::CLOCAL | ControlModes::CREAD | ControlModes::HUPCL,
    );
    settings
        .input_modes
        .remove(InputModes::IXON | InputModes::IXOFF | InputModes::IXANY);
    settings
        .input_modes
        .insert(InputModes::IGNBRK | InputModes::IGNPAR);
    settings.special_codes[SpecialCodeIndex::VMIN] = 0;
    settings.special_codes[SpecialCodeIndex::VTIME] = 0;
}

fn os_error(context: String, errno: Errno) -> Error {
    io_error(context, std::io::Error::from(errno))
}

fn io_error(context: String, err: std::io::Error) -> Error {
    Error::serial(classify_io_error(&err), format!("{context}: {err}"))
}
