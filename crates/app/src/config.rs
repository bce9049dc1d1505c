//! Configuration for the tcpip-sim demo application.
//!
//! Handles parsing command-line arguments with sensible defaults.
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments: it runs every scenario on a
//! seeded topology so two invocations print identical traces.

/// Which demo topology to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Two hosts on one cable
    Direct,
    /// Three hosts on a repeater hub
    Hub,
    /// Three hosts on a learning switch
    Switch,
    /// Two subnets joined by a forwarding stack
    Router,
    /// All of the above, in order
    All,
}

impl Scenario {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "direct" => Ok(Self::Direct),
            "hub" => Ok(Self::Hub),
            "switch" => Ok(Self::Switch),
            "router" => Ok(Self::Router),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown scenario {other:?} (expected direct, hub, switch, router, or all)"
            )),
        }
    }
}

/// Complete configuration for a demo run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Topology to run
    pub scenario: Scenario,

    /// Cable propagation delay in virtual milliseconds
    pub latency_ms: u64,

    /// Seed for generated MAC addresses
    pub seed: u64,

    /// Whether to print the full trace log after each run
    pub print_trace: bool,

    /// Whether to print scheduler counters after each run
    pub print_stats: bool,
}

impl Config {
    /// Parse configuration from command-line arguments.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut scenario = Scenario::All;
        let mut latency_ms: u64 = 1;
        let mut seed: u64 = 42;
        let mut print_trace = true;
        let mut print_stats = true;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--scenario" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("--scenario requires a name".to_string());
                    }
                    scenario = Scenario::parse(&args[i])?;
                }
                "--latency" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("--latency requires a number".to_string());
                    }
                    latency_ms = args[i].parse().map_err(|_| "invalid latency")?;
                }
                "--seed" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("--seed requires a number".to_string());
                    }
                    seed = args[i].parse().map_err(|_| "invalid seed")?;
                }
                "--no-trace" => {
                    print_trace = false;
                }
                "--no-stats" => {
                    print_stats = false;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {
                    return Err(format!("unknown argument: {}", args[i]));
                }
            }
            i += 1;
        }

        Ok(Config {
            scenario,
            latency_ms,
            seed,
            print_trace,
            print_stats,
        })
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Scenario: {:?}", self.scenario);
        println!("Cable latency: {} ms", self.latency_ms);
        println!("Seed: {}", self.seed);
        println!();
    }
}

fn print_help() {
    println!("tcpip-sim: discrete-event demo of a layered network stack");
    println!();
    println!("USAGE:");
    println!("    tcpip-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --scenario <NAME>   direct | hub | switch | router | all (default: all)");
    println!("    --latency <MS>      Cable propagation delay (default: 1)");
    println!("    --seed <N>          Seed for generated MAC addresses (default: 42)");
    println!("    --no-trace          Skip the per-event trace log");
    println!("    --no-stats          Skip the scheduler counters");
    println!("    -h, --help          This message");
}
