use crate::Result;
use std::time::Duration;

/// One OS serial resource, held exclusively from `open` until `close`.
///
/// Implementations capture the device configuration at open time and put it
/// back when closed or dropped, so the hardware is never left in raw mode for
/// the next process.
pub trait Device: Sized {
    /// Candidate device names for this backend; never fails, may be empty.
    fn list() -> Vec<String>;

    /// Acquire `name`, save its configuration and apply raw 8N1 with
    /// non-blocking reads. `baud` is applied when given.
    fn open(name: &str, baud: Option<u32>) -> Result<Self>;

    fn set_baud(&mut self, rate: u32) -> Result<()>;

    /// `None` leaves the corresponding line untouched.
    fn set_control(&mut self, dtr: Option<bool>, rts: Option<bool>) -> Result<()>;

    /// Never blocks; `Ok(0)` means nothing is queued.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// One underlying write call; may accept fewer bytes than offered,
    /// including zero when the OS buffer is full.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn bytes_available(&mut self) -> Result<usize>;

    /// Block up to `timeout` for input. Returns whether input is ready.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Block up to `timeout` for room in the output queue.
    fn wait_writable(&mut self, timeout: Duration) -> Result<bool>;

    fn discard_input(&mut self) -> Result<()>;

    /// Block until queued output has been transmitted.
    fn drain_output(&mut self) -> Result<()>;

    /// Restore the configuration captured at open and release the resource.
    /// The resource is released even when the restore fails.
    fn close(self) -> Result<()>;
}

#[cfg(unix)]
pub type NativeDevice = super::posix::TtyDevice;

#[cfg(windows)]
pub type NativeDevice = super::windows::ComDevice;
