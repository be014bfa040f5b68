use clap::Parser;

use ipwatchctl::{Cli, Commands, DiscoverCommands, OpsCommands, ScanCommands};

#[test]
fn parses_discover_run_with_keywords() {
    let cli = Cli::parse_from([
        "ipwatchctl",
        "discover",
        "run",
        "--max-quota",
        "2500",
        "--keyword",
        "superman ai movie",
        "--keyword",
        "batman full film",
    ]);
    match cli.command {
        Commands::Discover(DiscoverCommands::Run(args)) => {
            assert_eq!(args.max_quota, Some(2_500));
            assert_eq!(args.keywords.len(), 2);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_scan_drain_defaults() {
    let cli = Cli::parse_from(["ipwatchctl", "scan", "drain"]);
    match cli.command {
        Commands::Scan(ScanCommands::Drain(args)) => {
            assert_eq!(args.limit, 100);
            assert!(!args.until_empty);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_ops_status_with_json_format() {
    let cli = Cli::parse_from(["ipwatchctl", "--format", "json", "ops", "status"]);
    assert!(matches!(cli.command, Commands::Ops(OpsCommands::Status)));
}

#[test]
fn ops_init_creates_every_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let config_path = dir.path().join("ipwatch.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[system]
node_name = "test-node"
environment = "test"

[paths]
base_dir = "{base}"
data_dir = "{data}"

[discovery]
search_endpoint = "http://127.0.0.1:1/api"

[vision]
model_name = "vision-flash-2.5"
model_region = "test-region"
endpoint = "http://127.0.0.1:1/vision"
"#,
            base = dir.path().display(),
            data = data_dir.display(),
        ),
    )
    .unwrap();

    let cli = Cli::parse_from([
        "ipwatchctl",
        "--config",
        config_path.to_str().unwrap(),
        "ops",
        "init",
    ]);
    ipwatchctl::run(cli).unwrap();

    for store in [
        "videos.sqlite",
        "channels.sqlite",
        "ip_configs.sqlite",
        "history.sqlite",
        "quota.sqlite",
        "budget.sqlite",
        "scans.sqlite",
        "stats.sqlite",
        "events.sqlite",
    ] {
        assert!(data_dir.join(store).exists(), "{store} missing");
    }
}

#[test]
fn config_fixture_parses_and_validates() {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let config =
        ipwatch_core::load_ipwatch_config(manifest.join("../configs/ipwatch.toml")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.discovery.daily_quota_units, 10_000);
}
