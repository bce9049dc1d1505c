//! tcpip-sim: demo topologies for the network stack simulator.

mod config;
mod scenario;

use config::{Config, Scenario};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("try --help");
            std::process::exit(2);
        }
    };
    config.print();

    match config.scenario {
        Scenario::Direct => scenario::run_direct(&config),
        Scenario::Hub => scenario::run_hub(&config),
        Scenario::Switch => scenario::run_switch(&config),
        Scenario::Router => scenario::run_router(&config),
        Scenario::All => {
            scenario::run_direct(&config);
            scenario::run_hub(&config);
            scenario::run_switch(&config);
            scenario::run_router(&config);
        }
    }
}
