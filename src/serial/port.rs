use std::time::{Duration, Instant};

use log::{debug, warn};

use super::baud;
use super::device::{Device, NativeDevice};
use super::errors::SerialFailureKind;
use crate::{Error, Result};

/// Largest slice handed to a single underlying write, and the staging size
/// for `read_bytes`.
pub const STAGE_BYTES: usize = 4096;

/// How long `write` waits on a full output queue before returning a short count.
pub const WRITE_STALL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Stateful handle around one serial device.
///
/// Starts closed. Every I/O or configuration call on a closed port fails with
/// [`SerialFailureKind::NotOpen`]. Dropping the handle closes it, which puts
/// the device configuration back the way `open` found it.
///
/// Not internally synchronized: share across threads only behind a lock.
#[derive(Debug)]
pub struct SerialPort<D: Device = NativeDevice> {
    device: Option<D>,
    name: String,
    baud_rate: Option<u32>,
    last_error: String,
}

impl<D: Device> Default for SerialPort<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> SerialPort<D> {
    pub fn new() -> Self {
        Self {
            device: None,
            name: String::new(),
            baud_rate: None,
            last_error: String::new(),
        }
    }

    /// Scan for candidate devices. Never fails; may be empty.
    pub fn port_list() -> Vec<String> {
        D::list()
    }

    /// Open `name`, leaving the line rate as the device had it.
    /// An already open device is closed first.
    pub fn open(&mut self, name: &str) -> Result<()> {
        let result = self.open_device(name, None);
        self.track(result)
    }

    /// Open `name` and apply `rate` as part of the baseline configuration.
    pub fn open_with_baud(&mut self, name: &str, rate: u32) -> Result<()> {
        let result = baud::validate(rate).and_then(|rate| self.open_device(name, Some(rate)));
        self.track(result)
    }

    /// Restore the saved configuration and release the device. Safe to call
    /// on a closed port.
    pub fn close(&mut self) {
        self.last_error.clear();
        if let Some(device) = self.device.take() {
            if let Err(err) = device.close() {
                warn!("{err}");
            }
            debug!("closed {}", self.name);
        }
    }

    pub fn set_baud(&mut self, rate: u32) -> Result<()> {
        let result = self.apply_baud(rate);
        self.track(result)
    }

    /// Same as [`set_baud`](Self::set_baud) with the rate given as text.
    pub fn set_baud_str(&mut self, rate: &str) -> Result<()> {
        match baud::parse(rate) {
            Ok(rate) => self.set_baud(rate),
            Err(err) => self.track(Err(err)),
        }
    }

    /// Drive DTR and RTS. Other settings are left alone.
    pub fn set_control(&mut self, dtr: bool, rts: bool) -> Result<()> {
        self.set_control_lines(Some(dtr), Some(rts))
    }

    /// Like [`set_control`](Self::set_control), with `None` leaving a line as is.
    pub fn set_control_lines(&mut self, dtr: Option<bool>, rts: Option<bool>) -> Result<()> {
        let result = self
            .live_device()
            .and_then(|device| device.set_control(dtr, rts));
        self.track(result)
    }

    /// Copy whatever input is queued into `buf` without waiting.
    /// `Ok(0)` means nothing was pending.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = self.live_device().and_then(|device| device.read(buf));
        self.track(result)
    }

    /// Read up to `max` queued bytes, staged through at most [`STAGE_BYTES`].
    pub fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut stage = vec![0u8; max.min(STAGE_BYTES)];
        let count = self.read(&mut stage)?;
        stage.truncate(count);
        Ok(stage)
    }

    /// Write all of `data`, split into [`STAGE_BYTES`] pieces and looping over
    /// partial writes. Returns the number of bytes the OS accepted, which is
    /// short of `data.len()` only if the output queue stayed full for
    /// [`WRITE_STALL_TIMEOUT`].
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let result = self.write_staged(data);
        self.track(result)
    }

    /// Wait up to `msec` milliseconds for input, then report how many bytes
    /// are queued. Returns as soon as anything arrives; `0` checks without
    /// blocking.
    pub fn input_wait(&mut self, msec: u64) -> Result<usize> {
        let result = self.live_device().and_then(|device| {
            if msec > 0 && device.bytes_available()? == 0 {
                device.wait_readable(Duration::from_millis(msec))?;
            }
            device.bytes_available()
        });
        self.track(result)
    }

    /// Drop queued input without reading it.
    pub fn input_discard(&mut self) -> Result<()> {
        let result = self.live_device().and_then(|device| device.discard_input());
        self.track(result)
    }

    /// Block until everything written so far has left the device.
    pub fn output_flush(&mut self) -> Result<()> {
        let result = self.live_device().and_then(|device| device.drain_output());
        self.track(result)
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Name of the most recently opened device; empty if none was ever opened.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last rate applied through `open_with_baud` or `set_baud`.
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    /// Description of the failure from the previous call; empty after a success.
    pub fn error_message(&self) -> &str {
        &self.last_error
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }

    fn open_device(&mut self, name: &str, rate: Option<u32>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::serial(
                SerialFailureKind::DeviceMissing,
                "device name cannot be empty",
            ));
        }
        if self.is_open() {
            debug!("closing {} before opening {name}", self.name);
            self.close();
        }

        let device = D::open(name, rate)?;
        self.device = Some(device);
        self.name = name.to_string();
        self.baud_rate = rate;
        debug!("opened {name}");
        Ok(())
    }

    fn apply_baud(&mut self, rate: u32) -> Result<()> {
        let rate = baud::validate(rate)?;
        self.live_device()?.set_baud(rate)?;
        self.baud_rate = Some(rate);
        debug!("{} baud rate set to {rate}", self.name);
        Ok(())
    }

    fn write_staged(&mut self, data: &[u8]) -> Result<usize> {
        let device = self.device.as_mut().ok_or_else(not_open)?;
        let mut total = 0;
        for stage in data.chunks(STAGE_BYTES) {
            let mut offset = 0;
            let mut stalled_since: Option<Instant> = None;
            while offset < stage.len() {
                let written = device.write(&stage[offset..])?;
                if written > 0 {
                    offset += written;
                    total += written;
                    stalled_since = None;
                    continue;
                }

                let since = *stalled_since.get_or_insert_with(Instant::now);
                let left = WRITE_STALL_TIMEOUT.saturating_sub(since.elapsed());
                if left.is_zero() || !device.wait_writable(left)? {
                    warn!(
                        "output to {} stalled after {total} of {} bytes",
                        self.name,
                        data.len()
                    );
                    return Ok(total);
                }
            }
        }
        Ok(total)
    }

    fn live_device(&mut self) -> Result<&mut D> {
        self.device.as_mut().ok_or_else(not_open)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error.clear(),
            Err(err) => self.last_error = err.to_string(),
        }
        result
    }
}

impl<D: Device> Drop for SerialPort<D> {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_open() -> Error {
    Error::serial(SerialFailureKind::NotOpen, "serial port is not open")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::LoopbackDevice;
    use std::sync::atomic::Ordering;

    type LoopPort = SerialPort<LoopbackDevice>;

    fn open_loop() -> LoopPort {
        let mut port = LoopPort::new();
        port.open("loop0").unwrap();
        port
    }

    #[test]
    fn starts_closed_and_unnamed() {
        let port = LoopPort::new();
        assert!(!port.is_open());
        assert_eq!(port.name(), "");
        assert_eq!(port.baud_rate(), None);
        assert_eq!(port.error_message(), "");
    }

    #[test]
    fn operations_on_closed_port_fail_cleanly() {
        let mut port = LoopPort::new();
        let mut buf = [0u8; 8];
        assert_eq!(
            port.read(&mut buf).unwrap_err().kind(),
            SerialFailureKind::NotOpen
        );
        assert!(!port.error_message().is_empty());
        assert_eq!(port.write(b"x").unwrap_err().kind(), SerialFailureKind::NotOpen);
        assert_eq!(port.input_wait(0).unwrap_err().kind(), SerialFailureKind::NotOpen);
        assert_eq!(port.set_baud(9_600).unwrap_err().kind(), SerialFailureKind::NotOpen);
        assert!(port.set_control(true, false).is_err());
        assert!(port.input_discard().is_err());
        assert!(port.output_flush().is_err());
        assert_eq!(port.baud_rate(), None);
    }

    #[test]
    fn failed_open_keeps_port_closed_with_message() {
        let mut port = LoopPort::new();
        let err = port.open("/dev/nope").unwrap_err();
        assert_eq!(err.kind(), SerialFailureKind::DeviceMissing);
        assert!(!port.is_open());
        assert!(port.error_message().contains("/dev/nope"));
        assert_eq!(port.name(), "");
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut port = LoopPort::new();
        assert!(port.open("").is_err());
        assert!(port.error_message().contains("cannot be empty"));
    }

    #[test]
    fn error_message_is_cleared_by_next_success() {
        let mut port = LoopPort::new();
        assert!(port.open("nope").is_err());
        assert!(!port.error_message().is_empty());
        port.open("loop0").unwrap();
        assert_eq!(port.error_message(), "");
    }

    #[test]
    fn close_is_idempotent() {
        let mut port = open_loop();
        port.close();
        assert!(!port.is_open());
        port.close();
        assert!(!port.is_open());
        assert_eq!(port.error_message(), "");
        assert_eq!(port.name(), "loop0");
    }

    #[test]
    fn drop_closes_the_device() {
        let port = open_loop();
        let flag = port.device().unwrap().close_flag();
        drop(port);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn reopen_releases_the_previous_device() {
        let mut port = open_loop();
        let first = port.device().unwrap().close_flag();
        port.open("loop1").unwrap();
        assert!(first.load(Ordering::SeqCst));
        assert!(port.is_open());
        assert_eq!(port.name(), "loop1");
    }

    #[test]
    fn round_trip_preserves_bytes_and_order() {
        let mut port = open_loop();
        let payload: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        assert_eq!(port.write(&payload).unwrap(), payload.len());
        assert_eq!(port.input_wait(0).unwrap(), payload.len());
        let echoed = port.read_bytes(STAGE_BYTES).unwrap();
        assert_eq!(echoed, payload);
    }

    #[test]
    fn read_with_nothing_pending_returns_zero() {
        let mut port = open_loop();
        let mut buf = [0u8; 16];
        assert_eq!(port.read(&mut buf).unwrap(), 0);
        assert!(port.read_bytes(16).unwrap().is_empty());
    }

    #[test]
    fn read_respects_the_caller_budget() {
        let mut port = open_loop();
        port.write(b"abcdef").unwrap();
        assert_eq!(port.read_bytes(4).unwrap(), b"abcd");
        assert_eq!(port.read_bytes(4).unwrap(), b"ef");
    }

    #[test]
    fn oversized_write_is_split_into_stages() {
        let mut port = open_loop();
        let payload = vec![0x5a; 10_000];
        assert_eq!(port.write(&payload).unwrap(), 10_000);
        let calls = port.device().unwrap().write_calls().to_vec();
        assert_eq!(calls, vec![4096, 4096, 1808]);
    }

    #[test]
    fn partial_writes_are_accumulated() {
        let mut port = open_loop();
        port.device_mut().unwrap().set_write_limit(Some(1000));
        assert_eq!(port.write(&[1u8; 5000]).unwrap(), 5000);
        let calls = port.device().unwrap().write_calls();
        assert!(calls.iter().all(|n| *n <= 1000));
        assert_eq!(calls.iter().sum::<usize>(), 5000);
    }

    #[test]
    fn stalled_output_returns_short_count() {
        let mut port = open_loop();
        port.device_mut().unwrap().set_stalled(true);
        assert_eq!(port.write(b"blocked").unwrap(), 0);
    }

    #[test]
    fn input_wait_zero_does_not_block() {
        let mut port = open_loop();
        let started = Instant::now();
        assert_eq!(port.input_wait(0).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn input_wait_returns_immediately_when_data_is_queued() {
        let mut port = open_loop();
        port.device_mut().unwrap().inject(b"hi");
        let started = Instant::now();
        assert_eq!(port.input_wait(5_000).unwrap(), 2);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn input_wait_times_out_with_zero() {
        let mut port = open_loop();
        let started = Instant::now();
        assert_eq!(port.input_wait(30).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn input_discard_drops_pending_bytes() {
        let mut port = open_loop();
        port.write(b"stale").unwrap();
        port.input_discard().unwrap();
        assert_eq!(port.input_wait(0).unwrap(), 0);
    }

    #[test]
    fn output_flush_reaches_the_device() {
        let mut port = open_loop();
        port.write(b"x").unwrap();
        port.output_flush().unwrap();
        assert_eq!(port.device().unwrap().drain_count(), 1);
    }

    #[test]
    fn baud_is_tracked_and_parsed_from_text() {
        let mut port = LoopPort::new();
        port.open_with_baud("loop0", 57_600).unwrap();
        assert_eq!(port.baud_rate(), Some(57_600));
        port.set_baud_str("250_000").unwrap();
        assert_eq!(port.baud_rate(), Some(250_000));
        assert_eq!(port.device().unwrap().baud(), Some(250_000));
    }

    #[test]
    fn rejected_baud_leaves_previous_rate() {
        let mut port = LoopPort::new();
        port.open_with_baud("loop0", 9_600).unwrap();
        port.device_mut().unwrap().reject_rate(3_000_000);
        let err = port.set_baud(3_000_000).unwrap_err();
        assert_eq!(err.kind(), SerialFailureKind::Config);
        assert_eq!(port.baud_rate(), Some(9_600));
        assert_eq!(port.device().unwrap().baud(), Some(9_600));
        assert!(port.error_message().contains("3000000"));

        assert!(port.set_baud(0).is_err());
        assert!(port.set_baud_str("fast").is_err());
        assert_eq!(port.baud_rate(), Some(9_600));
    }

    #[test]
    fn open_with_zero_baud_fails_before_touching_the_device() {
        let mut port = LoopPort::new();
        let err = port.open_with_baud("loop0", 0).unwrap_err();
        assert_eq!(err.kind(), SerialFailureKind::Config);
        assert!(!port.is_open());
    }

    #[test]
    fn control_lines_toggle_independently() {
        let mut port = open_loop();
        port.set_control(true, false).unwrap();
        assert_eq!(port.device().unwrap().control_lines(), (true, false));
        port.set_control_lines(None, Some(true)).unwrap();
        assert_eq!(port.device().unwrap().control_lines(), (true, true));
    }

    #[test]
    fn disconnect_is_an_error_not_zero_bytes() {
        let mut port = open_loop();
        port.device_mut().unwrap().disconnect();
        let mut buf = [0u8; 8];
        let err = port.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), SerialFailureKind::Disconnected);
        assert!(err.kind().is_fatal());
        assert!(port.input_wait(10).is_err());
        assert!(port.write(b"x").is_err());
        assert!(port.is_open(), "device loss does not close the handle");
        port.close();
        assert!(!port.is_open());
    }

    #[test]
    fn port_list_comes_from_the_backend() {
        assert_eq!(LoopPort::port_list(), vec!["loop0".to_string()]);
    }
}
