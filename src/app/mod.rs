use crate::{
    cli::{RunMode, RunOptions},
    config::{Config, LineSetting},
    serial::{fake::LOOPBACK_PREFIX, Device, LoopbackDevice, NativeDevice, SerialPort, STAGE_BYTES},
    Error, Result,
};
use log::{debug, info};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

mod lifecycle;
pub mod logger;

pub use logger::{LogLevel, Logger};

const BYTES_PER_ROW: usize = 16;

/// Config for a single run, merged from the config file and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub mode: RunMode,
    pub device: String,
    pub baud: u32,
    pub dtr: LineSetting,
    pub rts: LineSetting,
    pub wait_ms: u64,
    pub count: Option<usize>,
    pub payload: Vec<u8>,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
    pub syslog: bool,
    pub loopback: bool,
    pub json: bool,
}

impl AppConfig {
    pub fn from_sources(cfg: Config, opts: RunOptions) -> Self {
        let mut device = opts.device.unwrap_or(cfg.device);
        if opts.loopback && !device.starts_with(LOOPBACK_PREFIX) {
            device = format!("{LOOPBACK_PREFIX}0");
        }
        Self {
            mode: opts.mode,
            device,
            baud: opts.baud.unwrap_or(cfg.baud),
            dtr: opts.dtr.unwrap_or(cfg.dtr),
            rts: opts.rts.unwrap_or(cfg.rts),
            wait_ms: opts.wait_ms.unwrap_or(cfg.wait_ms),
            count: opts.count,
            payload: opts.payload.unwrap_or_default(),
            log_level: opts.log_level.unwrap_or(cfg.log_level),
            log_file: opts.log_file,
            syslog: opts.syslog,
            loopback: opts.loopback,
            json: opts.json,
        }
    }
}

pub struct App {
    config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = match opts.config_file.as_deref() {
            Some(path) => Config::load_from_path(Path::new(path))?,
            None => Config::load_or_default()?,
        };
        let merged = AppConfig::from_sources(cfg_file, opts);
        if merged.wait_ms > crate::config::MAX_WAIT_MS {
            return Err(Error::InvalidArgs(format!(
                "wait must be at most {} ms",
                crate::config::MAX_WAIT_MS
            )));
        }
        Ok(Self::new(merged))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Entry point for the binary.
    pub fn run(&self) -> Result<()> {
        if let Err(err) = self.init_logging() {
            eprintln!("warning: logging not initialised: {err}");
        }
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if self.config.loopback {
            self.run_with::<LoopbackDevice>(&mut out)
        } else {
            self.run_with::<NativeDevice>(&mut out)
        }
    }

    fn init_logging(&self) -> Result<()> {
        if self.config.syslog {
            return logger::install_syslog(self.config.log_level);
        }
        Logger::new(self.config.log_level, self.config.log_file.clone()).install()
    }

    fn run_with<D: Device>(&self, out: &mut dyn Write) -> Result<()> {
        match self.config.mode {
            RunMode::List => self.list::<D>(out),
            RunMode::Send => {
                let mut port = self.open_port::<D>()?;
                self.send_on(&mut port, out).map(|_| ())
            }
            RunMode::Monitor => {
                let running = lifecycle::create_shutdown_flag()?;
                let mut port = self.open_port::<D>()?;
                self.monitor_on(&mut port, &running, out).map(|_| ())
            }
        }
    }

    /// Print the devices the backend can see, one per line or as JSON.
    pub fn list<D: Device>(&self, out: &mut dyn Write) -> Result<()> {
        let ports = SerialPort::<D>::port_list();
        debug!("found {} candidate ports", ports.len());
        if self.config.json {
            let json = serde_json::to_string(&ports)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            writeln!(out, "{json}")?;
        } else {
            for name in ports {
                writeln!(out, "{name}")?;
            }
        }
        Ok(())
    }

    /// Open the configured device at the configured rate and drive the
    /// control lines the config asks for.
    pub fn open_port<D: Device>(&self) -> Result<SerialPort<D>> {
        let mut port = SerialPort::<D>::new();
        port.open_with_baud(&self.config.device, self.config.baud)?;
        let (dtr, rts) = (self.config.dtr.level(), self.config.rts.level());
        if dtr.is_some() || rts.is_some() {
            port.set_control_lines(dtr, rts)?;
        }
        info!("opened {} at {} baud", port.name(), self.config.baud);
        Ok(port)
    }

    /// Write the payload, wait for it to drain, then dump whatever reply
    /// shows up within the wait window. Returns the bytes written.
    pub fn send_on<D: Device>(&self, port: &mut SerialPort<D>, out: &mut dyn Write) -> Result<usize> {
        let payload = &self.config.payload;
        let written = port.write(payload)?;
        port.output_flush()?;
        info!("sent {written} of {} bytes to {}", payload.len(), port.name());
        if written < payload.len() {
            return Err(Error::serial(
                crate::serial::SerialFailureKind::Transient,
                format!("{} accepted only {written} of {} bytes", port.name(), payload.len()),
            ));
        }

        if self.config.wait_ms > 0 && port.input_wait(self.config.wait_ms)? > 0 {
            let reply = port.read_bytes(STAGE_BYTES)?;
            write!(out, "{}", hex_dump(0, &reply))?;
        }
        Ok(written)
    }

    /// Poll for input and dump it until `running` is cleared or `count`
    /// bytes have been seen. Returns the number of bytes seen.
    pub fn monitor_on<D: Device>(
        &self,
        port: &mut SerialPort<D>,
        running: &AtomicBool,
        out: &mut dyn Write,
    ) -> Result<usize> {
        let mut seen = 0usize;
        while running.load(Ordering::SeqCst) {
            if self.config.count.is_some_and(|limit| seen >= limit) {
                break;
            }
            if port.input_wait(self.config.wait_ms)? == 0 {
                continue;
            }
            let budget = match self.config.count {
                Some(limit) => limit - seen,
                None => STAGE_BYTES,
            };
            let chunk = port.read_bytes(budget)?;
            write!(out, "{}", hex_dump(seen, &chunk))?;
            out.flush()?;
            seen += chunk.len();
        }
        info!("monitor on {} saw {seen} bytes", port.name());
        Ok(seen)
    }
}

/// Offset, hex and printable-ASCII columns, 16 bytes per row.
pub fn hex_dump(start: usize, bytes: &[u8]) -> String {
    let mut dump = String::new();
    for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        dump.push_str(&format!(
            "{:08x}  {:<width$}  |{ascii}|\n",
            start + row * BYTES_PER_ROW,
            hex.join(" "),
            width = BYTES_PER_ROW * 3 - 1
        ));
    }
    dump
}
