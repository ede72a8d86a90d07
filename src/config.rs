//! Command-line flags and the run configuration built from them.
//!
//! Everything the components need is collected once into a [`RunConfig`] and
//! handed down by reference; nothing is read from globals after startup.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fmt;
use std::io::{BufRead, Write};
use std::time::Duration;

pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONTROL_PORT: u16 = 9051;
pub const DEFAULT_SERVICE: &str = "tor.service";
pub const DEFAULT_CHECK_URL: &str = "https://checkip.amazonaws.com";

/// SOCKS endpoints tried in order when `--socks` is not given
pub const SOCKS_CANDIDATES: &[(&str, u16)] = &[("127.0.0.1", 9050), ("192.168.0.1", 9100)];

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Change your IP using Tor at specified intervals (Linux only)",
    long_about = None
)]
pub struct Args {
    /// Seconds between IP changes (e.g. -s 10); prompts when omitted
    #[arg(short, long, allow_negative_numbers = true)]
    pub seconds: Option<i64>,

    /// Number of IP changes (0 or absent: infinite)
    #[arg(short, long, allow_negative_numbers = true)]
    pub times: Option<i64>,

    /// Tor control port
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,

    /// Tor control host
    #[arg(long, default_value = DEFAULT_CONTROL_HOST)]
    pub control_host: String,

    /// SOCKS endpoint to try; repeat to give several. Replaces the built-in list
    #[arg(long = "socks", value_name = "HOST:PORT", value_parser = parse_endpoint)]
    pub socks: Vec<Endpoint>,

    /// Address echo service queried through the proxy
    #[arg(long, default_value = DEFAULT_CHECK_URL)]
    pub check_url: String,

    /// systemd unit of the Tor daemon
    #[arg(long, default_value = DEFAULT_SERVICE)]
    pub service: String,

    /// Do not check for or install curl, tor and netcat
    #[arg(long)]
    pub skip_install: bool,
}

impl Args {
    /// The schedule given on the command line, or `None` when the operator
    /// has to be prompted for it
    pub fn schedule(&self) -> Result<Option<Schedule>> {
        match self.seconds {
            Some(seconds) => Schedule::from_flags(seconds, self.times).map(Some),
            None => Ok(None),
        }
    }

    pub fn control_endpoint(&self) -> Endpoint {
        Endpoint::new(self.control_host.clone(), self.control_port)
    }

    pub fn socks_candidates(&self) -> Vec<Endpoint> {
        if self.socks.is_empty() {
            SOCKS_CANDIDATES
                .iter()
                .map(|(host, port)| Endpoint::new(*host, *port))
                .collect()
        } else {
            self.socks.clone()
        }
    }
}

/// A TCP endpoint on the Tor daemon (SOCKS or control)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn parse_endpoint(value: &str) -> std::result::Result<Endpoint, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got '{value}'"))?;
    if host.is_empty() {
        return Err(format!("missing host in '{value}'"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port in '{value}': {e}"))?;
    Ok(Endpoint::new(host, port))
}

/// How often and how many times to rotate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Number of changes; 0 runs until interrupted
    pub count: u64,
}

impl Schedule {
    pub fn from_flags(seconds: i64, times: Option<i64>) -> Result<Self> {
        if seconds <= 0 {
            bail!("Interval must be a positive number (e.g., -s 10), got {seconds}");
        }
        let times = times.unwrap_or(0);
        if times < 0 {
            bail!("Number of changes must not be negative (e.g., -t 5), got {times}");
        }
        Ok(Self {
            interval: Duration::from_secs(seconds.unsigned_abs()),
            count: times.unsigned_abs(),
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.count == 0
    }
}

/// Ask the operator for interval and count until both are valid.
///
/// Invalid input restarts the dialogue at the interval question. Running out
/// of input is an error.
pub fn prompt_schedule<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Schedule> {
    loop {
        let Ok(seconds) = ask(input, output, "Enter time interval in seconds (e.g., 10): ")?
            .parse::<i64>()
        else {
            writeln!(output, "Error: Enter valid numbers (e.g., 10 for seconds, 5 for times).")?;
            continue;
        };
        if seconds <= 0 {
            writeln!(output, "Please enter a positive number.")?;
            continue;
        }

        let Ok(times) = ask(input, output, "Enter number of changes (0 for infinite): ")?
            .parse::<i64>()
        else {
            writeln!(output, "Error: Enter valid numbers (e.g., 10 for seconds, 5 for times).")?;
            continue;
        };
        if times < 0 {
            writeln!(output, "Please enter a non-negative number.")?;
            continue;
        }

        return Schedule::from_flags(seconds, Some(times));
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "\x1b[34m{question}\x1b[0m")?;
    output.flush()?;

    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .context("Failed to read from standard input")?;
    if read == 0 {
        bail!("Input closed before a schedule was entered");
    }
    Ok(line.trim().to_string())
}

/// Settle delays, timeouts and retry bounds used throughout a run
#[derive(Debug, Clone)]
pub struct Timings {
    /// Wait after `systemctl start` before re-checking the unit
    pub service_settle: Duration,
    /// Wait after a successful NEWNYM signal
    pub signal_settle: Duration,
    /// Wait after the fallback restart
    pub restart_settle: Duration,
    /// Bound on connecting to and reading from the control port
    pub control_timeout: Duration,
    /// Timeout of a single SOCKS connect attempt
    pub connect_timeout: Duration,
    pub ready_attempts: u32,
    pub ready_delay: Duration,
    pub request_timeout: Duration,
    pub request_attempts: u32,
    pub request_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            service_settle: Duration::from_secs(5),
            signal_settle: Duration::from_secs(5),
            restart_settle: Duration::from_secs(10),
            control_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ready_attempts: 10,
            ready_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            request_attempts: 3,
            request_delay: Duration::from_secs(2),
        }
    }
}

/// Immutable configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub schedule: Schedule,
    pub socks: Endpoint,
    pub control: Endpoint,
    pub service: String,
    pub check_url: String,
    pub timings: Timings,
}

impl RunConfig {
    pub fn new(args: &Args, schedule: Schedule, socks: Endpoint, timings: Timings) -> Self {
        Self {
            schedule,
            socks,
            control: args.control_endpoint(),
            service: args.service.clone(),
            check_url: args.check_url.clone(),
            timings,
        }
    }
}
