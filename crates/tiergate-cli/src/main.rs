//! tiergate - route prompts through a tier chain from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Validate a config and probe every backend
//! tiergate check -c tiers.yaml
//!
//! # Route a single prompt, preferring the search tier
//! tiergate route -c tiers.yaml --order search "What does the pro plan cost?"
//!
//! # Route prompts from stdin, one JSON line each, then a status report
//! cat prompts.txt | tiergate batch -c tiers.yaml
//!
//! # Verbose logging
//! RUST_LOG=tiergate_runtime=debug tiergate route -c tiers.yaml "hi"
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use tiergate_core::RouterConfig;
use tiergate_runtime::{BackendRegistry, Router};

/// Circuit-breaker failover router for AI backends
#[derive(Parser, Debug)]
#[command(name = "tiergate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tier chain configuration (YAML or JSON)
    #[arg(short = 'c', long, env = "TIERGATE_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "TIERGATE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the config, build the chain, and health-check every backend
    Check,

    /// Route one prompt and print the result as JSON
    Route {
        /// Tiers to try first, comma separated
        #[arg(long, value_delimiter = ',')]
        order: Vec<String>,

        /// Prompt to route
        prompt: String,
    },

    /// Route prompts read from stdin, one per line
    Batch,

    /// Print each tier's configured breaker settings and timeout
    ///
    /// Breaker state lives only as long as one process, so a fresh
    /// invocation has nothing but configuration to report. `batch` prints
    /// the live status report after routing.
    Status,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "tiergate={level},tiergate_core={level},tiergate_runtime={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RouterConfig> {
    let path = path.context("no config file given (use --config or TIERGATE_CONFIG)")?;
    RouterConfig::from_path(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn build_router(config: &RouterConfig) -> Result<Router> {
    Router::from_config(config, &BackendRegistry::with_defaults())
        .context("failed to assemble tier chain")
}

/// Effective per-tier settings, defaults applied, in priority order.
fn tier_settings(config: &RouterConfig) -> serde_json::Value {
    let tiers: Vec<_> = config
        .tiers
        .iter()
        .enumerate()
        .map(|(priority, tier)| {
            let breaker = tier.breaker_config(&config.defaults);
            json!({
                "name": tier.name,
                "priority": priority,
                "backend": tier.backend.kind,
                "failure_threshold": breaker.failure_threshold,
                "recovery_timeout": breaker.recovery_timeout.as_secs_f64(),
                "timeout": tier.attempt_timeout(&config.defaults).map(|t| t.as_secs_f64()),
                "exclusive_probe": breaker.exclusive_probe,
            })
        })
        .collect();
    json!({ "tiers": tiers })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn check(router: &Router) -> Result<()> {
    let health = router.admin().health_check_all().await;
    let status = router.admin().status();

    println!(
        "{:<4} {:<20} {:<8} {:>9} {:>10} {:<7}",
        "PRIO", "TIER", "BACKEND", "THRESHOLD", "RECOVERY", "HEALTHY"
    );
    for tier in &status.tiers {
        let healthy = health.get(&tier.name).copied().unwrap_or(false);
        println!(
            "{:<4} {:<20} {:<8} {:>9} {:>9}s {:<7}",
            tier.priority,
            tier.name,
            tier.backend,
            tier.failure_threshold,
            tier.recovery_timeout.as_secs(),
            if healthy { "yes" } else { "no" }
        );
    }

    let unhealthy = health.values().filter(|h| !**h).count();
    if unhealthy > 0 {
        tracing::warn!(unhealthy, "Some backends failed their health check");
    }
    Ok(())
}

async fn route(router: &Router, prompt: &str, order: &[String]) -> Result<()> {
    let result = if order.is_empty() {
        router.route(prompt).await
    } else {
        router.route_with_order(prompt, order).await
    };
    let result = result.context("routing failed")?;
    print_json(&result)
}

async fn batch(router: &Router) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let prompt = line.context("failed to read prompt from stdin")?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            continue;
        }

        let output = match router.route(prompt).await {
            Ok(result) => serde_json::to_value(&result)?,
            Err(e) => json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{}", output)?;
    }
    drop(stdout);

    print_json(&router.admin().status())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.config.as_deref())?;
    let router = build_router(&config)?;

    match cli.command {
        Commands::Check => {
            println!("Config OK: {} tier(s)", router.chain().len());
            check(&router).await
        }
        Commands::Route { order, prompt } => route(&router, &prompt, &order).await,
        Commands::Batch => batch(&router).await,
        Commands::Status => print_json(&tier_settings(&config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_route_order_parsing() {
        let cli = Cli::try_parse_from([
            "tiergate", "route", "-c", "tiers.yaml", "--order", "search,llm", "hello",
        ])
        .unwrap();
        match cli.command {
            Commands::Route { order, prompt } => {
                assert_eq!(order, vec!["search", "llm"]);
                assert_eq!(prompt, "hello");
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, Some(PathBuf::from("tiers.yaml")));
    }

    #[test]
    fn test_missing_config_is_reported() {
        let err = load_config(None).unwrap_err();
        assert!(err.to_string().contains("no config file"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tiers.example.yaml");
        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.tier_names(), vec!["llm", "search", "fallback"]);

        let preferences = config.compile_preferences().unwrap();
        assert_eq!(
            preferences.preferred_order("What do plans cost?"),
            Some(&["search".to_string()][..])
        );
    }

    #[test]
    fn test_tier_settings_apply_defaults() {
        let config = RouterConfig::from_yaml(
            r#"
defaults:
  failure_threshold: 4
  timeout: 10s
tiers:
  - name: primary
    backend: { type: static }
    recovery_timeout: 90
    exclusive_probe: true
  - name: fallback
    backend: { type: static }
"#,
        )
        .unwrap();

        let settings = tier_settings(&config);
        let primary = &settings["tiers"][0];
        assert_eq!(primary["name"], "primary");
        assert_eq!(primary["failure_threshold"], 4);
        assert_eq!(primary["recovery_timeout"], 90.0);
        assert_eq!(primary["timeout"], 10.0);
        assert_eq!(primary["exclusive_probe"], true);

        let fallback = &settings["tiers"][1];
        assert_eq!(fallback["priority"], 1);
        assert_eq!(fallback["recovery_timeout"], 300.0);
        assert!(fallback.get("state").is_none());
    }

    #[tokio::test]
    async fn test_route_from_config() {
        let config = RouterConfig::from_yaml(
            r#"
tiers:
  - name: primary
    backend: { type: static, healthy: false }
  - name: fallback
    backend: { type: static, response: "fallback: {prompt}" }
"#,
        )
        .unwrap();
        let router = build_router(&config).unwrap();
        assert!(route(&router, "hi", &[]).await.is_ok());
        assert!(route(&router, "hi", &["fallback".to_string()]).await.is_ok());
    }
}
