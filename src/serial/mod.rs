pub mod baud;
pub mod device;
pub mod enumerate;
pub mod errors;
pub mod fake;
pub mod port;
#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

pub use device::{Device, NativeDevice};
pub use enumerate::port_list;
pub use errors::SerialFailureKind;
pub use fake::LoopbackDevice;
pub use port::{SerialPort, STAGE_BYTES};
