//! Command-line parsing and validation

use clap::Parser;
use std::time::Duration;
use torshift::{Args, Endpoint};

#[test]
fn seconds_and_times_build_a_schedule() {
    let args = Args::parse_from(["torshift", "-s", "10", "-t", "5"]);
    let schedule = args.schedule().unwrap().unwrap();
    assert_eq!(schedule.interval, Duration::from_secs(10));
    assert_eq!(schedule.count, 5);
}

#[test]
fn missing_seconds_means_interactive() {
    let args = Args::parse_from(["torshift", "-t", "5"]);
    assert!(args.schedule().unwrap().is_none());
}

#[test]
fn zero_interval_is_rejected() {
    let args = Args::parse_from(["torshift", "--seconds", "0"]);
    let err = args.schedule().unwrap_err();
    assert!(err.to_string().contains("Interval must be a positive number"));
}

#[test]
fn negative_interval_is_rejected() {
    let args = Args::parse_from(["torshift", "-s", "-10"]);
    assert!(args.schedule().is_err());
}

#[test]
fn defaults_point_at_local_tor() {
    let args = Args::parse_from(["torshift"]);
    assert_eq!(args.control_endpoint(), Endpoint::new("127.0.0.1", 9051));
    assert_eq!(args.service, "tor.service");
    assert_eq!(args.check_url, "https://checkip.amazonaws.com");
    assert!(!args.skip_install);
}

#[test]
fn socks_flags_replace_candidates() {
    let args = Args::parse_from([
        "torshift",
        "--socks",
        "10.0.0.2:9150",
        "--socks",
        "localhost:9050",
        "-c",
        "9151",
    ]);
    assert_eq!(
        args.socks_candidates(),
        [Endpoint::new("10.0.0.2", 9150), Endpoint::new("localhost", 9050)]
    );
    assert_eq!(args.control_endpoint().port, 9151);
}

#[test]
fn malformed_socks_flag_is_a_usage_error() {
    assert!(Args::try_parse_from(["torshift", "--socks", "9050"]).is_err());
}
