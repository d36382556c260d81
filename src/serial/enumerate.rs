//! Fresh scan for candidate serial devices on every call.

#[cfg(unix)]
pub use self::unix::{
    matches_family, needs_probe, port_list, scan_dir, DEVICE_DIR, DEVICE_FAMILIES, PROBED_FAMILIES,
};

#[cfg(windows)]
pub use self::win::{port_list, MAX_COM_INDEX};

#[cfg(unix)]
mod unix {
    use log::debug;
    use rustix::fs::{Mode, OFlags};
    use rustix::io::Errno;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::FileTypeExt;
    use std::path::Path;

    pub const DEVICE_DIR: &str = "/dev";

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub const DEVICE_FAMILIES: &[&str] = &["ttyS", "ttyUSB", "ttyACM", "ttyAMA"];

    // Onboard UART nodes exist whether or not a port is wired up behind them.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub const PROBED_FAMILIES: &[&str] = &["ttyS", "ttyAMA"];

    // Callout devices; the tty.* twins block on open until carrier detect.
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const DEVICE_FAMILIES: &[&str] = &["cu."];

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const PROBED_FAMILIES: &[&str] = &[];

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    pub const DEVICE_FAMILIES: &[&str] = &["cuaU", "cua", "ttyU"];

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    pub const PROBED_FAMILIES: &[&str] = &["cua"];

    /// Serial devices present under `/dev`.
    ///
    /// USB adapters are listed from their device nodes alone: opening one
    /// pulses DTR, which resets many boards. Only onboard UART families are
    /// opened and asked for termios and modem-line state. Nodes we may not
    /// open, or that someone else holds, stay listed so the problem surfaces
    /// on `open` instead of the port silently disappearing.
    pub fn port_list() -> Vec<String> {
        scan_dir(Path::new(DEVICE_DIR), DEVICE_FAMILIES)
            .into_iter()
            .filter(|path| {
                let name = Path::new(path)
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default();
                !needs_probe(name) || probe(path)
            })
            .collect()
    }

    /// Whether `name` belongs to a family that must be opened to tell a real
    /// port from a placeholder node. The first matching family decides, so
    /// `cuaU0` is not taken for an onboard `cua` port.
    pub fn needs_probe(name: &str) -> bool {
        DEVICE_FAMILIES
            .iter()
            .copied()
            .find(|family| matches_family(name, &[*family]))
            .is_some_and(|family| PROBED_FAMILIES.contains(&family))
    }

    /// Open failures that still mean a device is present.
    fn held_or_forbidden(errno: Errno) -> bool {
        errno == Errno::ACCESS || errno == Errno::BUSY
    }

    /// Character devices in `dir` whose names belong to one of `families`.
    /// An unreadable directory yields an empty list.
    pub fn scan_dir(dir: &Path, families: &[&str]) -> Vec<String> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("cannot scan {}: {err}", dir.display());
                return Vec::new();
            }
        };

        let mut found: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| matches_family(name, families))
            })
            // file_type() does not follow symlinks, so aliases such as
            // /dev/serial/by-id links are skipped here.
            .filter(|entry| {
                entry
                    .file_type()
                    .is_ok_and(|kind| kind.is_char_device())
            })
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect();
        found.sort();
        found
    }

    pub fn matches_family(name: &str, families: &[&str]) -> bool {
        families
            .iter()
            .any(|family| name.len() > family.len() && name.starts_with(family))
    }

    fn probe(path: &str) -> bool {
        let fd = match rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::NOCTTY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            Mode::empty(),
        ) {
            Ok(fd) => fd,
            Err(e) => return held_or_forbidden(e),
        };
        if rustix::termios::tcgetattr(&fd).is_err() {
            return false;
        }
        // Pseudo terminals and consoles answer termios but have no modem lines.
        let mut bits: libc::c_int = 0;
        // SAFETY: `fd` is open for the duration of the call and `bits` is a valid out-pointer.
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMGET, &mut bits as *mut libc::c_int) };
        rc >= 0
    }

}

#[cfg(windows)]
mod win {
    use log::debug;

    /// Highest `COMn` index probed.
    pub const MAX_COM_INDEX: u32 = 32;

    /// `COM1..=COM32`, keeping only the names the OS reports as present.
    pub fn port_list() -> Vec<String> {
        let present: Vec<String> = match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|port| port.port_name.to_ascii_uppercase())
                .collect(),
            Err(err) => {
                debug!("COM port query failed: {err}");
                return Vec::new();
            }
        };
        (1..=MAX_COM_INDEX)
            .map(|index| format!("COM{index}"))
            .filter(|name| present.iter().any(|port| port == name))
            .collect()
    }
}
