use crate::{app::LogLevel, config::LineSetting, serial::baud, Error, Result};

/// What a run does once the port settings are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    List,
    Send,
    Monitor,
}

/// Options for a run; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub device: Option<String>,
    pub baud: Option<u32>,
    pub dtr: Option<LineSetting>,
    pub rts: Option<LineSetting>,
    pub wait_ms: Option<u64>,
    pub count: Option<usize>,
    pub payload: Option<Vec<u8>>,
    pub config_file: Option<String>,
    pub log_level: Option<LogLevel>,
    pub log_file: Option<String>,
    pub syslog: bool,
    pub loopback: bool,
    pub json: bool,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Box<RunOptions>),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter();
        let mode = match iter.next().map(|s| s.as_str()) {
            None | Some("list") => RunMode::List,
            Some("send") => RunMode::Send,
            Some("monitor") => RunMode::Monitor,
            Some("--help") | Some("-h") => return Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => return Ok(Command::ShowVersion),
            Some(cmd) => {
                return Err(Error::InvalidArgs(format!(
                    "unknown command '{cmd}', try --help"
                )))
            }
        };

        let opts = parse_run_options(mode, &mut iter)?;
        if mode == RunMode::Send && opts.payload.is_none() {
            return Err(Error::InvalidArgs(
                "send needs --hex <bytes> or --text <string>".into(),
            ));
        }
        Ok(Command::Run(Box::new(opts)))
    }

    pub fn help() -> &'static str {
        concat!(
            "rawserial - raw serial port tool\n",
            "\n",
            "USAGE:\n",
            "  rawserial list [--json]\n",
            "  rawserial send --device <path> (--hex <bytes> | --text <string>) [--wait-ms <ms>]\n",
            "  rawserial monitor --device <path> [--wait-ms <ms>] [--count <bytes>]\n",
            "  rawserial --help\n",
            "  rawserial --version\n",
            "\n",
            "PORT OPTIONS:\n",
            "  --device <path>      Serial device (default from config, /dev/ttyUSB0)\n",
            "  --baud <rate>        Line rate, e.g. 115200 or 1_000_000 (default: 115200)\n",
            "  --dtr <on|off>       Drive DTR after open (default: leave as is)\n",
            "  --rts <on|off>       Drive RTS after open (default: leave as is)\n",
            "  --wait-ms <ms>       Input wait per poll; accepts 250 or 250ms (default: 250)\n",
            "  --count <bytes>      monitor: stop after this many bytes\n",
            "  --hex <bytes>        send: payload as hex, e.g. \"de ad be ef\"\n",
            "  --text <string>      send: payload as UTF-8 text\n",
            "\n",
            "GLOBAL OPTIONS:\n",
            "  --config <path>      Config file (default: ~/.rawserial/config.toml)\n",
            "  --log-level <lvl>    error|warn|info|debug|trace\n",
            "  --log-file <path>    Append logs to this file\n",
            "  --syslog             Send logs to syslog instead of stderr\n",
            "  --loopback           Use an in-memory loopback device instead of hardware\n",
            "  --json               list: print a JSON array\n",
            "  -h, --help           Show this help\n",
            "  -V, --version        Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(mode: RunMode, iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions {
        mode,
        ..RunOptions::default()
    };

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--device" => {
                opts.device = Some(take_value(flag, iter)?);
            }
            "--baud" => {
                let raw = take_value(flag, iter)?;
                opts.baud = Some(
                    baud::parse(&raw)
                        .map_err(|_| Error::InvalidArgs("baud must be a positive integer".into()))?,
                );
            }
            "--dtr" => {
                let raw = take_value(flag, iter)?;
                opts.dtr = Some(raw.parse().map_err(|e: String| {
                    Error::InvalidArgs(format!("invalid --dtr: {e}"))
                })?);
            }
            "--rts" => {
                let raw = take_value(flag, iter)?;
                opts.rts = Some(raw.parse().map_err(|e: String| {
                    Error::InvalidArgs(format!("invalid --rts: {e}"))
                })?);
            }
            "--wait-ms" => {
                let raw = take_value(flag, iter)?;
                opts.wait_ms = Some(
                    crate::config::parse_millis(&raw)
                        .map_err(|e| Error::InvalidArgs(format!("invalid --wait-ms: {e}")))?,
                );
            }
            "--count" => {
                let raw = take_value(flag, iter)?;
                opts.count = Some(raw.parse().map_err(|_| {
                    Error::InvalidArgs("count must be a positive integer".into())
                })?);
            }
            "--hex" => {
                let raw = take_value(flag, iter)?;
                opts.payload = Some(parse_hex(&raw)?);
            }
            "--text" => {
                opts.payload = Some(take_value(flag, iter)?.into_bytes());
            }
            "--config" => {
                opts.config_file = Some(take_value(flag, iter)?);
            }
            "--log-level" => {
                let raw = take_value(flag, iter)?;
                opts.log_level = Some(raw.parse().map_err(|_| {
                    Error::InvalidArgs(format!("unknown log level '{raw}'"))
                })?);
            }
            "--log-file" => {
                opts.log_file = Some(take_value(flag, iter)?);
            }
            "--syslog" => opts.syslog = true,
            "--loopback" => opts.loopback = true,
            "--json" => opts.json = true,
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}

/// Parse `"de ad be ef"`, `"deadbeef"` or `"0xde,0xad"` into bytes.
pub fn parse_hex(raw: &str) -> Result<Vec<u8>> {
    let digits: String = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(Error::InvalidArgs(format!(
            "hex payload '{raw}' must have an even, non-zero number of digits"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidArgs(format!("invalid hex byte in '{raw}'")))
        })
        .collect()
}
