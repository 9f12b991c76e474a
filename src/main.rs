use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use teleping::alerts::{format_check_report, format_single_check, AlertSink, LogSink, TelegramSink};
use teleping::config::{Config, SiteList};
use teleping::monitor::Monitor;
use teleping::probe::WebSocketConnector;
use tokio::sync::watch;

/// Command-line arguments for the site monitor
#[derive(Parser, Debug)]
#[command(
    name = "teleping",
    about = "Distributed website availability monitor",
    long_about = "Probes websites from many vantage points through the 17CE probe service, \
                  aggregates failures by region and operator, and sends alerts to Telegram \
                  when a site looks down."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run one monitoring pass and send alerts
    Once,
    /// Grade every configured site and print the report
    Check,
    /// Probe a single URL and print its report
    Checkone {
        /// URL or bare domain to probe
        url: String,
    },
    /// Add a site to the configuration file
    Add {
        /// URL or bare domain of the site
        url: String,
    },
    /// Remove every site matching a domain, URL or name from the configuration file
    Remove {
        /// Domain, URL or site name
        query: String,
    },
    /// Run a monitoring pass on a fixed interval until Ctrl-C
    Watch {
        /// Minutes between passes
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        interval_minutes: u64,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are allowed and fall back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        match &self.command {
            Command::Checkone { url } | Command::Add { url } if url.trim().is_empty() => {
                return Err("a non-empty URL is required".to_string());
            }
            Command::Remove { query } if query.trim().is_empty() => {
                return Err("remove needs a non-empty domain, URL or name".to_string());
            }
            Command::Add { .. } | Command::Remove { .. } if self.config.is_none() => {
                return Err("editing sites needs --config FILE".to_string());
            }
            _ => {}
        }

        Ok(())
    }
}

/// Telegram when configured, the log otherwise
fn build_sink(config: &Config) -> Arc<dyn AlertSink> {
    match TelegramSink::from_config(&config.alerts) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("{}; alerts will be written to the log", e);
            Arc::new(LogSink)
        }
    }
}

/// Apply an `add` or `remove` command to the configuration file
fn edit_sites(path: &Path, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Add { url } => {
            let site = Config::edit_sites(path, |sites| sites.add(url))
                .with_context(|| format!("Failed to add {}", url))?;
            println!("Added {} ({})", site.name, site.url);
        }
        Command::Remove { query } => {
            let removed = Config::edit_sites(path, |sites| sites.remove_matching(query))
                .with_context(|| format!("Failed to remove {}", query))?;
            if removed.is_empty() {
                bail!("No site matches {}", query);
            }
            for site in removed {
                println!("Removed {} ({})", site.name, site.url);
            }
        }
        _ => bail!("{:?} does not edit the site list", command),
    }
    Ok(())
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    if !config.probe.has_credentials() {
        warn!("Probe credentials missing; set probe.username/probe.token or the TELEPING_PROBE_* variables");
    }

    let monitor = Arc::new(Monitor::new(
        &config,
        Arc::new(WebSocketConnector::default()),
        build_sink(&config),
    ));

    match command {
        Command::Once => {
            if config.sites.is_empty() {
                warn!("No sites configured, nothing to probe");
            }
            let summary = monitor.run_pass(&config.sites).await;
            info!(
                "Pass finished: {} alert(s), {} healthy, {} without data, {} probe failure(s)",
                summary.alerts.len(),
                summary.healthy.len(),
                summary.no_data.len(),
                summary.api_failures.len()
            );
        }
        Command::Check => {
            if config.sites.is_empty() {
                bail!("No sites configured, add [[sites]] entries to the configuration");
            }
            let report = monitor
                .check_all(config.sites.clone(), config.check.deadline())
                .await;
            println!("{}", format_check_report(&report));
        }
        Command::Checkone { url } => {
            let entry = monitor.check_url(&url).await;
            println!("{}", format_single_check(&entry, &Utc::now()));
        }
        Command::Add { .. } | Command::Remove { .. } => {
            bail!("Site edits are applied before the monitor starts")
        }
        Command::Watch { interval_minutes } => {
            let (shutdown_sender, shutdown_receiver) = watch::channel(false);
            ctrlc::set_handler(move || {
                info!("Received interrupt signal (SIGINT), shutting down gracefully...");
                if shutdown_sender.send(true).is_err() {
                    error!("Failed to send shutdown signal");
                }
            })
            .context("Error setting SIGINT handler for graceful shutdown")?;

            let sites = SiteList::new(config.sites.clone());
            info!(
                "Watching {} site(s) every {} minute(s). Press Ctrl+C to stop.",
                sites.len(),
                interval_minutes
            );
            monitor
                .watch(
                    &sites,
                    Duration::from_secs(interval_minutes * 60),
                    shutdown_receiver,
                )
                .await;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Set before the runtime spawns any worker thread
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let (Some(path), Command::Add { .. } | Command::Remove { .. }) = (&cli.config, &cli.command)
    {
        if let Err(e) = edit_sites(path, &cli.command) {
            error!("{:#}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
