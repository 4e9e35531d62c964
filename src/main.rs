// QuotaGuard - Main Entry Point
//
// Command-line front end for the limiter:
// - configuration checking
// - status reporting
// - admission simulation against a configured resource
// - metrics/status HTTP server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quotaguard::config::Config;
use quotaguard::logging::LogLevel;
use quotaguard::metrics::OperationTimer;
use quotaguard::metrics_server;
use quotaguard::rate_limit::{DashboardBuilder, RateLimitError, RateLimiter, DEFAULT_PRIORITY};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// QuotaGuard: admission control for rate-limited external APIs
#[derive(Parser, Debug)]
#[command(name = "quotaguard")]
#[command(author = "QuotaGuard Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Per-API rate limiting with queuing and exponential backoff", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print the resource table
    CheckConfig,
    /// Print the status dashboard as JSON
    Status,
    /// Issue sequential admission requests against one resource
    Simulate {
        /// Resource to acquire
        #[arg(long)]
        resource: String,

        /// Number of requests to issue
        #[arg(long, default_value_t = 1)]
        requests: u32,

        /// Priority recorded with each request
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u32,

        /// Give up on a single request after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Serve /metrics, /health and /status until interrupted
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    if args.verbose {
        config.logging.level = LogLevel::Debug;
    }
    config.logging.init()?;

    let limiter = RateLimiter::new(config.limiter.clone()).context("Invalid limiter configuration")?;

    match args.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::Status) => print_status(limiter),
        Some(Commands::Simulate {
            resource,
            requests,
            priority,
            timeout_secs,
        }) => simulate(&limiter, &resource, requests, priority, timeout_secs).await,
        Some(Commands::Serve { port }) => {
            serve(limiter, port.unwrap_or(config.metrics.port)).await
        }
        None => {
            info!("No command specified. Use \"quotaguard --help\" for usage.");
            Ok(())
        }
    }
}

/// Print the effective resource table
fn check_config(config: &Config) -> Result<()> {
    println!("Configuration OK");
    println!(
        "{:<12} {:>8} {:>8} {:>10} {:>9}",
        "resource", "per-min", "per-hour", "base-delay", "attempts"
    );
    for (name, limit) in &config.limiter.resources {
        println!(
            "{:<12} {:>8} {:>8} {:>9}s {:>9}",
            name,
            limit.requests_per_minute,
            limit.requests_per_hour,
            limit.base_retry_delay_secs,
            limit.max_retry_attempts
        );
    }
    Ok(())
}

fn print_status(limiter: RateLimiter) -> Result<()> {
    let dashboard = DashboardBuilder::new(limiter).build();
    let json = serde_json::to_string_pretty(&dashboard).context("Failed to serialize dashboard")?;
    println!("{}", json);
    Ok(())
}

/// Drive `requests` sequential acquires and report each outcome
async fn simulate(
    limiter: &RateLimiter,
    resource: &str,
    requests: u32,
    priority: u32,
    timeout_secs: Option<u64>,
) -> Result<()> {
    info!("Simulating {} requests against {}", requests, resource);

    let mut granted = 0;
    let mut skipped = 0;

    for n in 1..=requests {
        let timer = OperationTimer::start(format!("simulate_{}", resource));
        let result = match timeout_secs {
            Some(secs) => {
                limiter
                    .acquire_with_timeout(resource, priority, Duration::from_secs(secs))
                    .await
            }
            None => limiter.acquire(resource, priority).await,
        };

        match result {
            Ok(grant) => {
                timer.succeed();
                granted += 1;
                println!(
                    "request {:>3}: granted after {:.2}s ({} backoffs, minute usage {}, hour usage {})",
                    n,
                    grant.waited.as_secs_f64(),
                    grant.backoffs,
                    grant.minute_usage,
                    grant.hour_usage
                );
                limiter.release(resource);
            }
            Err(e @ RateLimitError::UnknownResource(_)) => {
                timer.fail(&e);
                return Err(e.into());
            }
            Err(e) if e.is_skippable() => {
                timer.fail(&e);
                skipped += 1;
                println!("request {:>3}: skipped ({})", n, e);
            }
            Err(e) => {
                timer.fail(&e);
                return Err(e.into());
            }
        }
    }

    let status = limiter.get_status(resource)?;
    println!(
        "done: {} granted, {} skipped; minute usage {}/{}, hour usage {}/{}",
        granted,
        skipped,
        status.minute_usage,
        status.requests_per_minute,
        status.hour_usage,
        status.requests_per_hour
    );
    Ok(())
}

async fn serve(limiter: RateLimiter, port: u16) -> Result<()> {
    let shutdown_limiter = limiter.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
        shutdown_limiter.shutdown();
    };

    metrics_server::start_metrics_server(port, limiter, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let args = Args::parse_from([
            "quotaguard",
            "simulate",
            "--resource",
            "openai",
            "--requests",
            "3",
        ]);
        match args.command {
            Some(Commands::Simulate {
                resource,
                requests,
                priority,
                timeout_secs,
            }) => {
                assert_eq!(resource, "openai");
                assert_eq!(requests, 3);
                assert_eq!(priority, DEFAULT_PRIORITY);
                assert!(timeout_secs.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_config() {
        let args = Args::parse_from(["quotaguard", "status", "--config", "custom.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(args.command, Some(Commands::Status)));
    }

    #[tokio::test]
    async fn test_simulate_unknown_resource() {
        let limiter = RateLimiter::default_config();
        let result = simulate(&limiter, "bing", 1, DEFAULT_PRIORITY, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_simulate_grants() {
        let limiter = RateLimiter::default_config();
        simulate(&limiter, "youtube", 3, DEFAULT_PRIORITY, None)
            .await
            .unwrap();
        let status = limiter.get_status("youtube").unwrap();
        assert_eq!(status.hour_usage, 3);
        assert_eq!(status.in_flight, 0);
    }
}
