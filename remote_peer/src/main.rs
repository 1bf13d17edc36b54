//! # Remote Peer
//!
//! Entry point for both roles of the demo.

use remote_ipc::ConnectionConfig;
use remote_peer::{PeerConfig, PeerRole, PeerRuntime};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().collect();

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(&args[0]);
        process::exit(1);
    });

    init_logging();

    let runtime = PeerRuntime::new(config);
    match runtime.run() {
        Ok(Some(report)) => {
            println!("double = {}", report.doubled);
            println!("add = {}", report.sum);
            println!("echo = {}", report.echoed);
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("Peer error: {}", e);
            process::exit(1);
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(args: &[String]) -> Result<PeerConfig, String> {
    let mut config = PeerConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--role" | "-r" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --role".to_string());
                }
                config.role = match args[i].as_str() {
                    "parent" => PeerRole::Parent,
                    "child" => PeerRole::Child,
                    other => return Err(format!("Invalid role: {}", other)),
                };
            }
            "--value" | "-v" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --value".to_string());
                }
                config.value = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid value: {}", args[i]))?;
            }
            "--call-timeout-ms" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --call-timeout-ms".to_string());
                }
                let millis: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid call timeout: {}", args[i]))?;
                config.call_timeout = (millis > 0).then(|| Duration::from_millis(millis));
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --config".to_string());
                }
                let path = PathBuf::from(&args[i]);
                let text = fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read config file: {}", e))?;
                config.connection = ConnectionConfig::from_json(&text).map_err(|e| e.to_string())?;
                config.config_path = Some(path);
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -r, --role <ROLE>         parent (default) or child");
    eprintln!("  -v, --value <N>           Number the parent asks the child to double (default 21)");
    eprintln!("  --call-timeout-ms <MS>    Per-call timeout, 0 waits forever (default 5000)");
    eprintln!("  -c, --config <FILE>       Connection config as JSON, durations in ms");
    eprintln!("  -h, --help                Show this help message");
    eprintln!();
    eprintln!("Logging is controlled by RUST_LOG and written to stderr.");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --value 21", program);
    eprintln!("  RUST_LOG=remote_ipc=debug {} --config peer.json", program);
}
