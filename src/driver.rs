//! Rotation driver
//!
//! Runs rotate + verify cycles on the configured schedule until the count is
//! reached or `shutdown` resolves. Sleeping happens between cycles only, never
//! after the last one of a bounded run.

use crate::address::{Address, AddressChecker};
use crate::config::{RunConfig, Schedule};
use crate::rotate::{self, RotationPath};
use crate::system::SystemControl;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::future::Future;
use tokio::time;
use tracing::debug;

/// One rotate + verify step
#[async_trait]
pub trait Cycle: Send {
    /// Get a new circuit; an error here ends the run
    async fn rotate(&mut self) -> Result<RotationPath>;

    /// Look up the current address; never fails
    async fn verify(&mut self) -> Address;
}

/// Record of a finished cycle
#[derive(Debug, Clone)]
pub struct RotationEvent {
    /// 1-based ordinal of the cycle
    pub index: u64,
    pub address: Address,
    pub path: RotationPath,
    pub at: DateTime<Local>,
}

/// What the driver reports while it runs
#[derive(Debug, Clone)]
pub enum Progress {
    /// A cycle is about to begin; `total` is 0 for unbounded runs
    Starting { index: u64, total: u64 },
    Finished(RotationEvent),
}

/// How the driver ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed { cycles: u64 },
    Interrupted { cycles: u64 },
}

/// Drive `cycle` according to `schedule`.
///
/// `shutdown` is raced against every phase and polled first; once it resolves
/// the loop stops and [`Outcome::Interrupted`] is returned.
pub async fn run<C, F, R>(cycle: &mut C, schedule: Schedule, shutdown: F, mut report: R) -> Result<Outcome>
where
    C: Cycle,
    F: Future<Output = ()>,
    R: FnMut(&Progress),
{
    tokio::pin!(shutdown);
    let mut cycles = 0;

    loop {
        let index = cycles + 1;
        report(&Progress::Starting {
            index,
            total: schedule.count,
        });

        let event = tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(Outcome::Interrupted { cycles }),
            event = run_cycle(cycle, index) => event?,
        };
        report(&Progress::Finished(event));
        cycles = index;

        if !schedule.is_unbounded() && cycles >= schedule.count {
            return Ok(Outcome::Completed { cycles });
        }

        debug!("Sleeping {:?} before the next change", schedule.interval);
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(Outcome::Interrupted { cycles }),
            _ = time::sleep(schedule.interval) => {},
        }
    }
}

async fn run_cycle<C: Cycle>(cycle: &mut C, index: u64) -> Result<RotationEvent> {
    let path = cycle.rotate().await?;
    let address = cycle.verify().await;
    Ok(RotationEvent {
        index,
        address,
        path,
        at: Local::now(),
    })
}

/// The production cycle: control port rotation, then a proxied address check
pub struct TorCycle<'a> {
    system: &'a dyn SystemControl,
    config: &'a RunConfig,
    checker: AddressChecker,
}

impl<'a> TorCycle<'a> {
    pub fn new(system: &'a dyn SystemControl, config: &'a RunConfig) -> Result<Self> {
        Ok(Self {
            system,
            config,
            checker: AddressChecker::new(config)?,
        })
    }
}

#[async_trait]
impl Cycle for TorCycle<'_> {
    async fn rotate(&mut self) -> Result<RotationPath> {
        rotate::rotate(self.system, self.config).await
    }

    async fn verify(&mut self) -> Address {
        self.checker.current_address().await
    }
}
