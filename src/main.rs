//! BFF primordial soup driver.
//!
//! Pairs and co-executes a population of self-modifying BFF tapes across
//! discrete epochs, mutating between epochs and reporting lineage
//! statistics that reveal emergent self-replication.

mod bff;
mod metrics;
mod pool;
mod rng;
mod runlog;
mod soup;
mod stats;
mod token;

use metrics::{MetricsConfig, MetricsTracker};
use runlog::RunLog;
use serde::{Deserialize, Serialize};
use soup::{Soup, SoupParams, DEFAULT_SOUP_SIZE};
use stats::SoupStats;
use std::env;
use std::io::Write;
use std::process;

/// Runtime configuration (can be loaded from YAML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulation parameters
    pub simulation: SimConfig,
    /// Output settings
    pub output: OutputConfig,
    /// Metrics settings (compression ratio tracking for phase transitions)
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of epochs to simulate
    pub epochs: usize,
    /// Worker thread count; 0 or negative means auto-detect
    pub threads: i64,
    /// RNG seed; 0 means process-derived fallback
    pub seed: u64,
    /// Stats period in epochs
    pub stats_interval: usize,
    /// Per-byte per-epoch mutation rate in [0, 1]
    pub mutation_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Binary run-length log path (empty = disabled)
    pub runlog: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Enable metrics collection (Brotli compression ratio tracking)
    pub enabled: bool,
    /// Collect metrics every N epochs
    pub interval: usize,
    /// Path to CSV output file
    pub output_file: String,
    /// Brotli compression quality (1-11, lower = faster)
    pub brotli_quality: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            epochs: 10000,
            threads: 0,
            seed: 0,
            stats_interval: 100,
            mutation_rate: 0.0,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 1000,
            output_file: String::new(),
            brotli_quality: 4,
        }
    }
}

impl Config {
    /// Load config from a YAML file.
    pub fn from_yaml(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Write a template config with default values.
    pub fn write_template(path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(&Config::default())?;
        let contents = format!(
            "# BFF soup configuration template\n# CLI flags override these values.\n{}",
            yaml
        );
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration. Returns warnings, or an error message for
    /// fatal problems.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.simulation.stats_interval == 0 {
            return Err("stats_interval must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.simulation.mutation_rate) {
            return Err(format!(
                "mutation_rate {} is outside [0, 1]",
                self.simulation.mutation_rate
            ));
        }
        if self.simulation.threads > pool::MAX_THREADS as i64 {
            warnings.push(format!(
                "threads {} exceeds the cap of {} and will be clamped",
                self.simulation.threads,
                pool::MAX_THREADS
            ));
        }
        if self.metrics.enabled {
            if self.metrics.output_file.is_empty() {
                return Err("metrics.enabled requires metrics.output_file".to_string());
            }
            if self.metrics.interval == 0 {
                return Err("metrics.interval must be at least 1".to_string());
            }
            if !(1..=11).contains(&self.metrics.brotli_quality) {
                return Err(format!(
                    "metrics.brotli_quality {} is outside 1..=11",
                    self.metrics.brotli_quality
                ));
            }
        }

        Ok(warnings)
    }
}

/// Resolved command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    epochs: usize,
    threads: i64,
    seed: u64,
    stats_interval: usize,
    mutation_rate: f64,
    runlog: Option<String>,
    metrics_enabled: bool,
    metrics_interval: usize,
    metrics_output_file: String,
    metrics_brotli_quality: u32,
}

impl Default for Args {
    fn default() -> Self {
        Args::from(Config::default())
    }
}

impl From<Config> for Args {
    fn from(c: Config) -> Self {
        Self {
            epochs: c.simulation.epochs,
            threads: c.simulation.threads,
            seed: c.simulation.seed,
            stats_interval: c.simulation.stats_interval,
            mutation_rate: c.simulation.mutation_rate,
            runlog: if c.output.runlog.is_empty() {
                None
            } else {
                Some(c.output.runlog)
            },
            metrics_enabled: c.metrics.enabled,
            metrics_interval: c.metrics.interval,
            metrics_output_file: c.metrics.output_file,
            metrics_brotli_quality: c.metrics.brotli_quality,
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let argv: Vec<String> = env::args().collect();

    // First pass: check for --config or --generate-config
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= argv.len() {
                    eprintln!("--config requires a path");
                    process::exit(1);
                }
                let config_path = &argv[i];
                match Config::from_yaml(config_path) {
                    Ok(config) => {
                        match config.validate() {
                            Ok(warnings) => {
                                for warning in warnings {
                                    eprintln!("Config warning: {}", warning);
                                }
                            }
                            Err(e) => {
                                eprintln!("Config validation error: {}", e);
                                process::exit(1);
                            }
                        }
                        args = Args::from(config);
                    }
                    Err(e) => {
                        eprintln!("Error loading config file '{}': {}", config_path, e);
                        process::exit(1);
                    }
                }
            }
            "--generate-config" => {
                i += 1;
                let output_path = if i < argv.len() && !argv[i].starts_with('-') {
                    argv[i].clone()
                } else {
                    "config.yaml".to_string()
                };
                match Config::write_template(&output_path) {
                    Ok(_) => {
                        println!("Generated config template: {}", output_path);
                        process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("Error writing config template: {}", e);
                        process::exit(1);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    // Second pass: CLI args override config file values
    i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1; // skip, already processed
            }
            "--epochs" => {
                i += 1;
                args.epochs = argv[i].parse().expect("Invalid epochs");
            }
            "--threads" => {
                i += 1;
                args.threads = argv[i].parse().expect("Invalid threads");
            }
            "--seed" => {
                i += 1;
                args.seed = argv[i].parse().expect("Invalid seed");
            }
            "--stats" => {
                i += 1;
                args.stats_interval = argv[i].parse().expect("Invalid stats interval");
            }
            "--mutation" => {
                i += 1;
                args.mutation_rate = argv[i].parse().expect("Invalid mutation rate");
            }
            "--runlog" => {
                i += 1;
                args.runlog = Some(argv[i].clone());
            }
            "--metrics-file" => {
                i += 1;
                args.metrics_output_file = argv[i].clone();
                args.metrics_enabled = true;
            }
            "--metrics-interval" => {
                i += 1;
                args.metrics_interval = argv[i].parse().expect("Invalid metrics interval");
            }
            "--help" => {
                print_help();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn print_help() {
    println!("BFF Primordial Soup with Token Lineage");
    println!();
    println!("USAGE:");
    println!("    bff-soup [OPTIONS]");
    println!("    bff-soup --config config.yaml");
    println!("    bff-soup --generate-config [output.yaml]");
    println!();
    println!("CONFIG FILE:");
    println!("    -c, --config <FILE>       Load settings from YAML config file");
    println!("    --generate-config [FILE]  Generate template config (default: config.yaml)");
    println!();
    println!("OPTIONS (override config file values):");
    println!("    --epochs <N>              Number of epochs (default: 10000)");
    println!("    --threads <N>             Worker threads; <=0 = auto (default: auto)");
    println!("    --seed <N>                RNG seed; 0 = process-derived (default: 0)");
    println!("    --stats <N>               Stats period in epochs (default: 100)");
    println!("    --mutation <R>            Per-byte per-epoch mutation rate (default: 0)");
    println!("    --runlog <PATH>           Binary run-length log (u32 LE, N/2 per epoch)");
    println!();
    println!("METRICS:");
    println!("    --metrics-file <PATH>     Enable Brotli compression-ratio CSV");
    println!("    --metrics-interval <N>    Metrics period in epochs (default: 1000)");
    println!();
    println!("    --help                    Print this help message");
}

/// Worker count: explicit positive value, otherwise the number of online
/// CPUs; always clamped to [1, MAX_THREADS].
fn resolve_threads(requested: i64) -> usize {
    let n = if requested > 0 {
        requested as usize
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };
    n.clamp(1, pool::MAX_THREADS)
}

fn main() {
    let args = parse_args();

    // Sanity checks that need no arena
    if args.stats_interval == 0 {
        eprintln!("stats interval must be at least 1");
        process::exit(1);
    }
    if !(0.0..=1.0).contains(&args.mutation_rate) {
        eprintln!("mutation rate must be within [0, 1]");
        process::exit(1);
    }
    if args.metrics_enabled && args.metrics_interval == 0 {
        eprintln!("metrics interval must be at least 1");
        process::exit(1);
    }

    let num_threads = resolve_threads(args.threads);
    let seed = if args.seed != 0 {
        args.seed
    } else {
        // Process entropy; low bit forced so the xorshift state is non-zero
        rand::random::<u64>() | 1
    };

    eprintln!(
        "BFF soup: {} tapes x {} bytes, {} epochs, {} threads, stats every {}, mutation rate {}",
        DEFAULT_SOUP_SIZE,
        bff::SINGLE_TAPE_SIZE,
        args.epochs,
        num_threads,
        args.stats_interval,
        args.mutation_rate
    );
    eprintln!("Seed: {}", seed);

    // Sinks open before any arena work: a bad path aborts the run up front
    let mut runlog = match args.runlog {
        Some(ref path) => match RunLog::create(path) {
            Ok(log) => {
                eprintln!("Run-length log: {}", path);
                Some(log)
            }
            Err(e) => {
                eprintln!("{}: {}", path, e);
                process::exit(1);
            }
        },
        None => None,
    };

    let mut tracker = if args.metrics_enabled {
        let config = MetricsConfig {
            interval: args.metrics_interval,
            output_path: args.metrics_output_file.clone(),
            brotli_quality: args.metrics_brotli_quality,
        };
        match MetricsTracker::new(config) {
            Ok(t) => Some(t),
            Err(e) => {
                eprintln!("{}: {}", args.metrics_output_file, e);
                process::exit(1);
            }
        }
    } else {
        None
    };

    let params = SoupParams {
        num_tapes: DEFAULT_SOUP_SIZE,
        seed,
        num_threads,
        mutation_rate: args.mutation_rate,
    };
    let mut soup = match Soup::new(params) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to start worker pool: {}", e);
            process::exit(1);
        }
    };

    println!("{}", SoupStats::header());
    println!("{}", stats::collect(soup.shared(), 0, 0.0, 0).to_row());
    let _ = std::io::stdout().flush();

    let mut steps_buf = vec![0u32; soup.shared().num_pairs()];
    for _ in 0..args.epochs {
        soup.run_epoch();
        soup.mutate();
        let epoch = soup.epoch();

        if let Some(ref mut log) = runlog {
            soup.shared().copy_pair_steps(&mut steps_buf);
            if let Err(e) = log.append_epoch(&steps_buf) {
                eprintln!("run-length log write failed: {}", e);
                process::exit(1);
            }
        }

        if let Some(ref mut t) = tracker {
            if t.should_collect(epoch) {
                t.collect(epoch, soup.shared());
            }
        }

        if epoch % args.stats_interval == 0 {
            let (mean_steps, max_steps) = stats::step_summary(soup.shared());
            println!(
                "{}",
                stats::collect(soup.shared(), epoch, mean_steps, max_steps).to_row()
            );
            let _ = std::io::stdout().flush();
        }
    }

    if let Some(log) = runlog {
        if let Err(e) = log.finish() {
            eprintln!("run-length log close failed: {}", e);
            process::exit(1);
        }
    }
    if let Some(t) = tracker {
        if let Some(epoch) = t.phase_transition_epoch() {
            eprintln!("Replicator phase transition first detected at epoch {}", epoch);
        }
    }
    // Worker pool drains when the soup drops
}
