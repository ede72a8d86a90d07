//! torshift - rotate the external address of a host through Tor
//!
//! The binary drives the local Tor daemon: it makes sure the daemon is
//! installed and running, asks it for a fresh circuit on every cycle, and
//! checks the resulting exit address through the SOCKS port.
//!
//! # Usage
//!
//! ```bash
//! # five changes, ten seconds apart
//! sudo torshift -s 10 -t 5
//!
//! # change forever, prompting for the interval
//! sudo torshift
//! ```

pub mod address;
pub mod config;
pub mod control;
pub mod driver;
pub mod logging;
pub mod provision;
pub mod rotate;
pub mod service;
pub mod system;

pub use address::Address;
pub use config::{Args, Endpoint, RunConfig, Schedule, Timings};
pub use driver::{Cycle, Outcome, Progress, RotationEvent};
pub use rotate::RotationPath;
pub use system::SystemControl;
