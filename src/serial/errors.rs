use crate::Error;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;

/// High-level reason for a serial port failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFailureKind {
    DeviceMissing,
    PermissionDenied,
    Busy,
    Config,
    Transient,
    Disconnected,
    NotOpen,
    Unknown,
}

impl SerialFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialFailureKind::DeviceMissing => "device_missing",
            SerialFailureKind::PermissionDenied => "permission_denied",
            SerialFailureKind::Busy => "busy",
            SerialFailureKind::Config => "config",
            SerialFailureKind::Transient => "transient",
            SerialFailureKind::Disconnected => "disconnected",
            SerialFailureKind::NotOpen => "not_open",
            SerialFailureKind::Unknown => "unknown",
        }
    }

    /// Whether the handle that produced this failure is worth using again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SerialFailureKind::Disconnected | SerialFailureKind::DeviceMissing
        )
    }
}

impl fmt::Display for SerialFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a crate-level error into a serial failure reason.
pub fn classify_error(err: &Error) -> SerialFailureKind {
    match err {
        Error::InvalidArgs(_) => SerialFailureKind::Config,
        Error::Io(io_err) => classify_io_error(io_err),
        Error::Serial { kind, .. } => *kind,
    }
}

/// Classify an std::io::Error into a serial failure reason.
pub fn classify_io_error(err: &std::io::Error) -> SerialFailureKind {
    match err.kind() {
        ErrorKind::NotFound => SerialFailureKind::DeviceMissing,
        ErrorKind::PermissionDenied => SerialFailureKind::PermissionDenied,
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            SerialFailureKind::Transient
        }
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => SerialFailureKind::Disconnected,
        ErrorKind::InvalidInput | ErrorKind::Unsupported => SerialFailureKind::Config,
        _ => err
            .raw_os_error()
            .map(classify_os_code)
            .unwrap_or(SerialFailureKind::Unknown),
    }
}

#[cfg(unix)]
fn classify_os_code(code: i32) -> SerialFailureKind {
    match code {
        libc::EACCES | libc::EPERM => SerialFailureKind::PermissionDenied,
        libc::EBUSY => SerialFailureKind::Busy,
        libc::ENOENT | libc::ENODEV | libc::ENXIO => SerialFailureKind::DeviceMissing,
        libc::EIO | libc::EPIPE => SerialFailureKind::Disconnected,
        libc::EINVAL | libc::ENOTTY => SerialFailureKind::Config,
        libc::EAGAIN | libc::EINTR => SerialFailureKind::Transient,
        _ => SerialFailureKind::Unknown,
    }
}

#[cfg(windows)]
fn classify_os_code(code: i32) -> SerialFailureKind {
    // 2 = FILE_NOT_FOUND, 3 = PATH_NOT_FOUND, 5 = ACCESS_DENIED, 22 = BAD_COMMAND,
    // 31 = GEN_FAILURE, 32 = SHARING_VIOLATION, 87 = INVALID_PARAMETER,
    // 995 = OPERATION_ABORTED, 1167 = DEVICE_NOT_CONNECTED
    match code {
        2 | 3 => SerialFailureKind::DeviceMissing,
        5 => SerialFailureKind::PermissionDenied,
        32 => SerialFailureKind::Busy,
        87 => SerialFailureKind::Config,
        22 | 31 | 1167 => SerialFailureKind::Disconnected,
        995 => SerialFailureKind::Transient,
        _ => SerialFailureKind::Unknown,
    }
}

#[cfg(not(any(unix, windows)))]
fn classify_os_code(_code: i32) -> SerialFailureKind {
    SerialFailureKind::Unknown
}
