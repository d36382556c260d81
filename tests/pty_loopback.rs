#![cfg(target_os = "linux")]

use rawserial::serial::{NativeDevice, SerialFailureKind, SerialPort};
use rustix::fs::{Mode, OFlags};
use rustix::pty::OpenptFlags;
use rustix::termios::LocalModes;
use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

type TtyPort = SerialPort<NativeDevice>;

fn open_pty_pair() -> Option<(File, String)> {
    let master = match rustix::pty::openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY) {
        Ok(master) => master,
        Err(err) => {
            eprintln!("skipping PTY test: openpt failed ({err})");
            return None;
        }
    };
    rustix::pty::grantpt(&master).unwrap();
    rustix::pty::unlockpt(&master).unwrap();

    let slave_name: CString = rustix::pty::ptsname(&master, Vec::with_capacity(64)).unwrap();
    let slave_path = slave_name.to_string_lossy().to_string();

    let raw = master.into_raw_fd();
    let master_file = unsafe { File::from_raw_fd(raw) };

    Some((master_file, slave_path))
}

fn open_port(path: &str) -> TtyPort {
    let mut port = TtyPort::new();
    port.open_with_baud(path, 115_200)
        .unwrap_or_else(|err| panic!("open {path} failed: {err}"));
    port
}

/// Forward everything the port writes to a channel.
fn spawn_collector(mut master: File) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match master.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Write back everything the port sends, like a loopback plug.
fn spawn_echo_peer(master: File) {
    let mut reader = master.try_clone().unwrap();
    let mut writer = master;
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if writer.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn collect(rx: &mpsc::Receiver<Vec<u8>>, want: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut got = Vec::new();
    while got.len() < want {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => got.extend(chunk),
            Err(_) => break,
        }
    }
    got
}

fn read_from_port(port: &mut TtyPort, want: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut got = Vec::new();
    while got.len() < want && Instant::now() < deadline {
        if port.input_wait(100).unwrap() == 0 {
            continue;
        }
        got.extend(port.read_bytes(want - got.len()).unwrap());
    }
    got
}

#[test]
fn write_reaches_the_peer_unmodified() {
    let Some((master, slave)) = open_pty_pair() else {
        return;
    };
    let rx = spawn_collector(master);
    let mut port = open_port(&slave);

    let payload: Vec<u8> = (0..=255u8).collect();
    assert_eq!(port.write(&payload).unwrap(), payload.len());
    port.output_flush().unwrap();

    assert_eq!(collect(&rx, payload.len(), Duration::from_secs(2)), payload);
}

#[test]
fn echoed_bytes_round_trip_in_order() {
    let Some((master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    spawn_echo_peer(master);

    let payload: Vec<u8> = (0..4096).map(|i| (i * 7 % 256) as u8).collect();
    assert_eq!(port.write(&payload).unwrap(), payload.len());
    let echoed = read_from_port(&mut port, payload.len(), Duration::from_secs(3));
    assert_eq!(echoed, payload);
}

#[test]
fn read_with_nothing_pending_is_zero() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    let mut buf = [0u8; 64];
    assert_eq!(port.read(&mut buf).unwrap(), 0);
    assert_eq!(port.error_message(), "");
}

#[test]
fn input_wait_zero_returns_immediately() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    let started = Instant::now();
    assert_eq!(port.input_wait(0).unwrap(), 0);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn input_wait_times_out_without_input() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    let started = Instant::now();
    assert_eq!(port.input_wait(150).unwrap(), 0);
    assert!(started.elapsed() >= Duration::from_millis(140));
}

#[test]
fn input_wait_wakes_when_a_byte_arrives() {
    let Some((mut master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        master.write_all(b"!").unwrap();
        master
    });

    let started = Instant::now();
    let queued = port.input_wait(5_000).unwrap();
    let elapsed = started.elapsed();
    assert!(queued > 0);
    assert!(elapsed < Duration::from_secs(2), "woke after {elapsed:?}");
    assert_eq!(port.read_bytes(16).unwrap(), b"!");
    let _master = writer.join().unwrap();
}

#[test]
fn oversized_write_is_fully_transmitted() {
    let Some((master, slave)) = open_pty_pair() else {
        return;
    };
    let rx = spawn_collector(master);
    let mut port = open_port(&slave);

    let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
    assert_eq!(port.write(&payload).unwrap(), payload.len());
    port.output_flush().unwrap();
    assert_eq!(collect(&rx, payload.len(), Duration::from_secs(3)), payload);
}

#[test]
fn input_discard_drops_pending_input() {
    let Some((mut master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    master.write_all(b"stale bytes").unwrap();
    assert!(port.input_wait(1_000).unwrap() > 0);
    port.input_discard().unwrap();
    assert_eq!(port.input_wait(0).unwrap(), 0);
}

#[test]
fn second_open_of_a_locked_device_is_busy() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let _port = open_port(&slave);
    let mut other = TtyPort::new();
    let err = other.open(&slave).unwrap_err();
    assert_eq!(err.kind(), SerialFailureKind::Busy);
    assert!(!other.is_open());
    assert!(!other.error_message().is_empty());
}

#[test]
fn close_restores_original_settings_and_is_idempotent() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    let raw = port.device().unwrap().settings().local_modes;
    assert!(!raw.contains(LocalModes::ICANON));
    assert!(!raw.contains(LocalModes::ECHO));

    port.close();
    port.close();
    assert!(!port.is_open());
    assert_eq!(port.name(), slave);

    let fd = rustix::fs::open(
        slave.as_str(),
        OFlags::RDWR | OFlags::NOCTTY | OFlags::NONBLOCK,
        Mode::empty(),
    )
    .unwrap();
    let restored = rustix::termios::tcgetattr(&fd).unwrap();
    assert!(restored.local_modes.contains(LocalModes::ICANON));
    assert!(restored.local_modes.contains(LocalModes::ECHO));

    // The lock went away with the descriptor, so the port can be reopened.
    drop(fd);
    port.open(&slave).unwrap();
    assert!(port.is_open());
}

#[test]
fn baud_changes_apply_standard_and_custom_rates() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    assert_eq!(port.baud_rate(), Some(115_200));

    port.set_baud(9_600).unwrap();
    assert_eq!(port.baud_rate(), Some(9_600));
    assert_eq!(port.device().unwrap().settings().output_speed(), 9_600);

    port.set_baud_str("250000").unwrap();
    assert_eq!(port.baud_rate(), Some(250_000));
    assert_eq!(port.device().unwrap().settings().output_speed(), 250_000);

    assert!(port.set_baud_str("turbo").is_err());
    assert_eq!(port.baud_rate(), Some(250_000));
}

#[test]
fn control_lines_on_a_pty_fail_without_closing() {
    let Some((_master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    let err = port.set_control(true, true).unwrap_err();
    assert_eq!(err.kind(), SerialFailureKind::Config);
    assert!(port.error_message().contains("DTR"));
    assert!(port.is_open());
    assert_eq!(port.input_wait(0).unwrap(), 0);
}

#[test]
fn peer_hangup_surfaces_as_disconnect() {
    let Some((master, slave)) = open_pty_pair() else {
        return;
    };
    let mut port = open_port(&slave);
    drop(master);

    let mut buf = [0u8; 16];
    let err = port.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), SerialFailureKind::Disconnected);
    assert!(!port.error_message().is_empty());
    assert!(port.input_wait(50).is_err());
    assert!(port.write(b"x").is_err());

    port.close();
    assert!(!port.is_open());
}

#[test]
fn opening_a_missing_device_reports_it() {
    let mut port = TtyPort::new();
    let err = port.open("/dev/rawserial-missing").unwrap_err();
    assert_eq!(err.kind(), SerialFailureKind::DeviceMissing);
    assert!(!port.is_open());
    assert!(port.error_message().contains("/dev/rawserial-missing"));
}
