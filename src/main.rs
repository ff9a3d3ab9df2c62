use clap::{Arg, Command};
use junk_rescue::config::Config;
use junk_rescue::resolver;
use junk_rescue::rules::RuleEngine;
use junk_rescue::session;
use log::LevelFilter;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("junk-rescue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Moves wrongly junked mail back to the inbox, driven by allow rules")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("junk-rescue.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a sample configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate rules and account resolution, then exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single pass and exit, ignoring the cron schedule")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        if let Err(e) = Config::sample().to_file(path) {
            eprintln!("Error writing configuration: {e}");
            process::exit(1);
        }
        println!("Sample configuration written to {path}");
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let result = match config
        .cron
        .clone()
        .filter(|expr| !expr.is_empty() && !matches.get_flag("once"))
    {
        Some(expr) => run_scheduled(config_path, &expr).await,
        None => run_once(&config).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// One full pass: compile rules, resolve accounts, walk them sequentially.
/// Rule compilation failure aborts before any account is touched.
async fn run_once(config: &Config) -> anyhow::Result<()> {
    let rules = Arc::new(RuleEngine::compile(&config.notjunkrules)?);
    if rules.is_empty() {
        log::warn!("no usable allow rules configured; every junk message will stay put");
    }
    let accounts = resolver::resolve(config)?;
    let summary = session::run_pass(&accounts, rules).await;
    log::info!(
        "pass finished: {}/{} accounts processed, {} messages rescued",
        summary.succeeded,
        summary.attempted,
        summary.moved
    );
    Ok(())
}

/// Recurring passes on the configured cron cadence until Ctrl-C. The
/// configuration file is re-read before each pass so edits take effect
/// without a restart.
async fn run_scheduled(config_path: &str, expr: &str) -> anyhow::Result<()> {
    let schedule = cron::Schedule::from_str(&normalize_cron(expr))
        .map_err(|e| anyhow::anyhow!("invalid cron expression {expr:?}: {e}"))?;
    log::info!("scheduling passes with cron expression {expr:?}; press Ctrl+C to stop");
    loop {
        let Some(next) = schedule.upcoming(chrono::Utc).next() else {
            anyhow::bail!("cron expression {expr:?} never fires again");
        };
        let wait = (next - chrono::Utc::now()).to_std().unwrap_or_default();
        log::debug!("next pass at {next}");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted; shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }
        let config = Config::from_file(config_path)?;
        run_once(&config).await?;
    }
}

/// The cron crate wants a seconds field; accept standard five-field
/// expressions by pinning seconds to zero.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn test_config(config: &Config) {
    println!("Testing configuration...");
    match RuleEngine::compile(&config.notjunkrules) {
        Ok(engine) => println!("Compiled {} allow rules", engine.len()),
        Err(e) => {
            println!("Rule compilation failed: {e:#}");
            process::exit(1);
        }
    }
    match resolver::resolve(config) {
        Ok(accounts) => {
            println!("Resolved {} accounts:", accounts.len());
            for account in &accounts {
                let proxy = account
                    .proxy
                    .as_ref()
                    .map(|p| format!(" via {} proxy {}", p.kind, p.addr))
                    .unwrap_or_default();
                println!("  {} -> {}{}", account.username, account.imapaddr, proxy);
            }
        }
        Err(e) => {
            println!("Account resolution failed: {e:#}");
            process::exit(1);
        }
    }
    if let Some(expr) = &config.cron {
        match cron::Schedule::from_str(&normalize_cron(expr)) {
            Ok(_) => println!("Cron expression {expr:?} is valid"),
            Err(e) => {
                println!("Invalid cron expression {expr:?}: {e}");
                process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gets_a_seconds_column() {
        assert_eq!(normalize_cron("0 */6 * * *"), "0 0 */6 * * *");
    }

    #[test]
    fn six_field_cron_is_untouched() {
        assert_eq!(normalize_cron("30 0 */6 * * *"), "30 0 */6 * * *");
    }

    #[test]
    fn normalized_expressions_parse() {
        assert!(cron::Schedule::from_str(&normalize_cron("0 */6 * * *")).is_ok());
        assert!(cron::Schedule::from_str(&normalize_cron("*/5 * * * * *")).is_ok());
    }
}
