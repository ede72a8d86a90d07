use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::Path;
use torshift::config::{prompt_schedule, Timings};
use torshift::driver::{self, TorCycle};
use torshift::system::{self, Systemd};
use torshift::{address, logging, provision, service};
use torshift::{Args, Outcome, Progress, RunConfig};
use tracing::{debug, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    system::ensure_root()?;
    let flag_schedule = args.schedule()?;

    let system = Systemd;
    let timings = Timings::default();

    if args.skip_install {
        info!("Skipping dependency check (--skip-install)");
    } else {
        let distro = provision::detect_distro(Path::new(provision::OS_RELEASE));
        provision::provision(&system, &distro).await?;
    }

    service::ensure_running(&system, &args.service, timings.service_settle).await?;

    let candidates = args.socks_candidates();
    let socks = address::discover(&candidates, timings.connect_timeout)
        .await
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(ToString::to_string).collect();
            anyhow!("No active Tor SOCKS proxy found (tried {})", tried.join(", "))
        })?;

    // clear screen
    print!("\x1b[2J\x1b[H");
    println!("\x1b[32m=== torshift: IP changer over Tor ===\x1b[0m");
    println!("Press Ctrl+C to stop at any time.");
    println!();

    let schedule = match flag_schedule {
        Some(schedule) => schedule,
        None => prompt_schedule(&mut io::stdin().lock(), &mut io::stdout())?,
    };
    let config = RunConfig::new(&args, schedule, socks, timings);

    let secs = config.schedule.interval.as_secs();
    if config.schedule.is_unbounded() {
        println!(
            "Changing IP every {} seconds (infinite mode) using {}...",
            secs, config.socks
        );
    } else {
        println!(
            "Changing IP {} times, every {} seconds using {}...",
            config.schedule.count, secs, config.socks
        );
    }

    let mut cycle = TorCycle::new(&system, &config)?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let outcome = driver::run(&mut cycle, config.schedule, shutdown, report).await?;
    match outcome {
        Outcome::Completed { cycles } => {
            debug!("Finished after {} changes", cycles);
            println!("IP changing complete!");
        },
        Outcome::Interrupted { cycles } => {
            debug!("Interrupted after {} changes", cycles);
            println!();
            println!("Stopped by user.");
        },
    }

    Ok(())
}

fn report(progress: &Progress) {
    if let Progress::Finished(event) = progress {
        debug!("Change {} done via {}", event.index, event.path);
    }
    for line in render(progress) {
        println!("{}", line);
    }
    if let Err(e) = io::stdout().flush() {
        warn!("Failed to flush stdout: {}", e);
    }
}

/// Operator-facing lines for one progress update
fn render(progress: &Progress) -> Vec<String> {
    match progress {
        Progress::Starting { index, total } if *total > 0 => {
            vec![format!("Change {}/{}", index, total)]
        },
        Progress::Starting { .. } => Vec::new(),
        Progress::Finished(event) => vec![
            format!(
                "\x1b[34m[{}] New IP: {}\x1b[0m",
                event.at.format("%H:%M:%S"),
                event.address
            ),
            "Note: Refresh your browser to see the new IP.".to_string(),
        ],
    }
}
