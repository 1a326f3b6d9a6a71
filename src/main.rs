//! dbstress CLI Entry Point
//!
//! Provides the command-line interface for stress runs.
//!
//! # Usage
//!
//! ```bash
//! # 200 cooperative workers probing a service for 60 seconds
//! dbstress -c db01:7878 -t 200 -d 60
//!
//! # Every worker performs exactly one round trip
//! dbstress -c db01:7878 -t 50 -o
//!
//! # Slow requests on OS threads against db1..db9, logged to CSV
//! dbstress -c "db{nr}:7878" -n 10 -e slow -l 5 -s -x results.csv -d 120
//!
//! # Settings from a file, with a dry run that never leaves the process
//! dbstress --config stress.yaml --simulate
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info, warn};

use dbstress::config::{read_config, OperationKind, RunConfiguration};
use dbstress::error::{ConfigError, RunError};
use dbstress::operation::Operation;
use dbstress::stats::RunReport;
use dbstress::{
    ExecutionStrategy, RunController, SimulatedOperation, TcpOperation, APP_NAME, VERSION,
};

/// Exit code for unusable arguments or configuration.
const EXIT_USAGE: u8 = 2;

/// Command-line configuration parsed from arguments.
///
/// Every setting is optional so that it only overrides the configuration
/// file (or the defaults) when given.
#[derive(Debug, Default)]
struct Config {
    config_path: Option<PathBuf>,
    target: Option<String>,
    workers: Option<usize>,
    duration_secs: Option<u64>,
    single_pass: bool,
    probe: bool,
    preemptible: bool,
    operation: Option<OperationKind>,
    slow_delay_secs: Option<u64>,
    max_targets: Option<u32>,
    random_wait_ms: Option<u64>,
    result_log: Option<PathBuf>,
    carrier_threads: Option<usize>,
    blocking_threads: Option<usize>,
    simulate: bool,
    report_json: Option<PathBuf>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Concurrent Round-Trip Stress Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: dbstress [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --target ADDR          Target host:port, may contain {{nr}}");
    println!("  -t, --workers N            Number of workers (default: CPUs x 12.5)");
    println!("  -d, --duration SECS        Run for SECS seconds (0: until ENTER)");
    println!("  -o, --single-pass          Every worker runs exactly one iteration");
    println!("  -m, --probe                Monitor target session status");
    println!("  -s, --preemptible          One OS thread per worker (default: tasks)");
    println!("  -e, --operation KIND       fast | slow | noop | mix | numeric code");
    println!("  -l, --slow-delay SECS      Slow operation delay, 1-60 (default: 10)");
    println!("  -n, --max-targets N        Upper bound for {{nr}} (default: 50)");
    println!("  -r, --random-wait-ms MS    Random wait before each iteration");
    println!("  -x, --result-log FILE      Append run events to a CSV file");
    println!("  -w, --carrier-threads N    Async runtime worker threads");
    println!("  -p, --blocking-threads N   Async runtime max blocking threads");
    println!("      --config FILE          Load settings from a YAML file");
    println!("      --simulate             Use the in-process simulated operation");
    println!("      --report-json FILE     Write the final report as JSON");
    println!("  -v, --verbose              Enable debug logging");
    println!("  -h, --help                 Show this help message");
    println!("  -V, --version              Show version information");
    println!();
    println!("Examples:");
    println!("  dbstress -c db01:7878 -t 200 -d 60");
    println!("  dbstress -c \"db{{nr}}:7878\" -n 10 -e slow -l 5 -s -x results.csv -d 120");
}

/// Returns the value following an option.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--single-pass" | "-o" => config.single_pass = true,
            "--probe" | "-m" => config.probe = true,
            "--preemptible" | "-s" => config.preemptible = true,
            "--simulate" => config.simulate = true,
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--target" | "-c" => {
                config.target = Some(option_value(args, &mut i, arg)?.to_string());
            }
            "--workers" | "-t" => {
                config.workers = Some(parse_number(option_value(args, &mut i, arg)?, "workers")?);
            }
            "--duration" | "-d" => {
                config.duration_secs =
                    Some(parse_number(option_value(args, &mut i, arg)?, "duration")?);
            }
            "--operation" | "-e" => {
                let value = option_value(args, &mut i, arg)?;
                config.operation = Some(value.parse().map_err(|e: ConfigError| e.to_string())?);
            }
            "--slow-delay" | "-l" => {
                config.slow_delay_secs =
                    Some(parse_number(option_value(args, &mut i, arg)?, "slow delay")?);
            }
            "--max-targets" | "-n" => {
                config.max_targets =
                    Some(parse_number(option_value(args, &mut i, arg)?, "max targets")?);
            }
            "--random-wait-ms" | "-r" => {
                config.random_wait_ms =
                    Some(parse_number(option_value(args, &mut i, arg)?, "random wait")?);
            }
            "--result-log" | "-x" => {
                config.result_log = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--carrier-threads" | "-w" => {
                config.carrier_threads =
                    Some(parse_number(option_value(args, &mut i, arg)?, "carrier threads")?);
            }
            "--blocking-threads" | "-p" => {
                config.blocking_threads =
                    Some(parse_number(option_value(args, &mut i, arg)?, "blocking threads")?);
            }
            "--report-json" => {
                config.report_json = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {}", other));
            }
            other => return Err(format!("Unexpected argument: {}", other)),
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the run configuration: file (or defaults) first, then flags.
fn build_run_configuration(cli: &Config) -> Result<RunConfiguration, RunError> {
    let mut run = match &cli.config_path {
        Some(path) => {
            info!("Loading configuration: {}", path.display());
            read_config(path)?
        }
        None => RunConfiguration::new(),
    };

    if let Some(target) = &cli.target {
        run.target = target.clone();
    }
    if let Some(workers) = cli.workers {
        run.workers = workers;
    }
    if let Some(secs) = cli.duration_secs {
        run.duration_secs = secs;
    }
    if cli.single_pass {
        run.single_pass = true;
    }
    if cli.probe {
        run.probe = true;
    }
    if cli.preemptible {
        run.strategy = ExecutionStrategy::Preemptible;
    }
    if let Some(kind) = cli.operation {
        run.operation = kind;
    }
    if let Some(secs) = cli.slow_delay_secs {
        run.slow_delay_secs = secs;
    }
    if let Some(max) = cli.max_targets {
        run.max_targets = max;
    }
    if let Some(ms) = cli.random_wait_ms {
        run.random_wait_ms = ms;
    }
    if let Some(path) = &cli.result_log {
        run.result_log = Some(path.clone());
    }
    if cli.carrier_threads.is_some() {
        run.carrier_threads = cli.carrier_threads;
    }
    if cli.blocking_threads.is_some() {
        run.blocking_threads = cli.blocking_threads;
    }

    Ok(run)
}

/// Initializes and executes one run with the given operation.
fn execute_run<O: Operation>(run: RunConfiguration, operation: O) -> Result<RunReport, RunError> {
    let mut handle = RunController::initialize(run, operation)?;
    if let Some(run_id) = handle.run_id() {
        info!("Run id: {}", run_id);
    }
    handle.execute()
}

/// Main application entry point.
fn run() -> Result<(), RunError> {
    let args: Vec<String> = env::args().collect();

    let cli = match parse_arguments(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(i32::from(EXIT_USAGE));
        }
    };

    setup_logging(cli.verbose);
    print_banner();

    let run = build_run_configuration(&cli)?;
    info!("Configuration: {}", run.summary());

    let report = if cli.simulate {
        info!("Mode: SIMULATED (no network traffic)");
        execute_run(run.clone(), SimulatedOperation::new(run.slow_delay()))?
    } else {
        execute_run(run.clone(), TcpOperation::new(run.slow_delay()))?
    };

    println!();
    println!("{}", report);

    if let Some(path) = &cli.report_json {
        let json = report
            .to_json()
            .map_err(|e| RunError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(path, json)?;
        info!("Report written to {}", path.display());
    }

    if report.total_errors > 0 {
        warn!("{} round trips failed", report.total_errors);
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(e)) => {
            error!("Invalid configuration: {}", e);
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_USAGE)
        }
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("dbstress")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_short_flags() {
        let cli = parse_arguments(&args(&[
            "-c", "db{nr}:7878", "-t", "40", "-d", "30", "-s", "-m", "-e", "slow", "-l", "5", "-n",
            "8",
        ]))
        .unwrap();

        assert_eq!(cli.target.as_deref(), Some("db{nr}:7878"));
        assert_eq!(cli.workers, Some(40));
        assert_eq!(cli.duration_secs, Some(30));
        assert!(cli.preemptible);
        assert!(cli.probe);
        assert_eq!(cli.operation, Some(OperationKind::SlowSimulation));
        assert_eq!(cli.slow_delay_secs, Some(5));
        assert_eq!(cli.max_targets, Some(8));
    }

    #[test]
    fn test_numeric_operation_code() {
        let cli = parse_arguments(&args(&["-e", "32767"])).unwrap();
        assert_eq!(cli.operation, Some(OperationKind::WeightedMix));

        let cli = parse_arguments(&args(&["--operation", "9"])).unwrap();
        assert_eq!(cli.operation, Some(OperationKind::Unknown(9)));
    }

    #[test]
    fn test_argument_errors() {
        assert!(parse_arguments(&args(&["-t"])).is_err());
        assert!(parse_arguments(&args(&["-t", "many"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["stray"])).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse_arguments(&args(&["-o", "-x", "out.csv", "-w", "4"])).unwrap();
        let run = build_run_configuration(&cli).unwrap();

        assert!(run.single_pass);
        assert_eq!(run.result_log, Some(PathBuf::from("out.csv")));
        assert_eq!(run.carrier_threads, Some(4));
        assert_eq!(run.strategy, ExecutionStrategy::Cooperative);
    }
}
