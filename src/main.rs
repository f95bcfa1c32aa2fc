//! netowner - resolve the autonomous system and netblock owning an address.
//!
//! This is the command-line interface for the netowner library.

use anyhow::{Context, Result};
use clap::Parser;
use netowner::config::{timing, DEFAULT_NETWORKSDB_BASE_URL};
use netowner::datasrcs::networksdb::NETWORKSDB_NAME;
use netowner::whois::merge_domains;
use netowner::{Config, OwnershipRecord, Query, ResolveError, Services, WhoisRequest};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Get the version string for netowner
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the resolver.
#[derive(Parser, Debug)]
#[clap(
    author,
    version = get_version(),
    about = "Resolve the autonomous system and netblock owning IP addresses or AS numbers",
    long_about = None
)]
struct Args {
    /// IP addresses or AS numbers to resolve (e.g. 198.51.100.7, AS64500)
    #[clap(required_unless_present = "domains")]
    targets: Vec<String>,

    /// List domains sharing networks with DOMAIN; may be repeated
    #[clap(long = "domain", value_name = "DOMAIN")]
    domains: Vec<String>,

    /// NetworksDB API key; scraping is used when absent
    #[clap(long, env = "NETWORKSDB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// NetworksDB base URL
    #[clap(long, default_value = DEFAULT_NETWORKSDB_BASE_URL)]
    base_url: String,

    /// Minimum spacing between outbound requests in milliseconds
    #[clap(long, default_value_t = timing::DEFAULT_RATE_LIMIT_MS)]
    rate_limit_ms: u64,

    /// Cache re-check interval while waiting in milliseconds
    #[clap(long, default_value_t = timing::DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Upper bound on resolving one target in milliseconds
    #[clap(long, default_value_t = timing::DEFAULT_RESOLVE_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Output results in JSON format
    #[clap(long)]
    json: bool,

    /// Enable verbose logging on stderr (-v info, -vv debug, -vvv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// JSON output structure for a single target
#[derive(Debug, serde::Serialize)]
struct JsonResult<'a> {
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a OwnershipRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// JSON output structure for a related-domain lookup
#[derive(Debug, serde::Serialize)]
struct JsonDomains<'a> {
    domain: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    related: Option<&'a BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum JsonEntry<'a> {
    Target(JsonResult<'a>),
    Domain(JsonDomains<'a>),
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Reject bad input before any network activity
    let (queries, domains) = match parse_targets(&args.targets)
        .and_then(|queries| Ok((queries, parse_domains(&args.domains)?)))
    {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    match runtime.block_on(async_main(&args, &queries, &domains)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Install the stderr log subscriber; `RUST_LOG` takes precedence
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("netowner={level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .try_init();
}

/// Parse every target, failing on the first one that is invalid
fn parse_targets(targets: &[String]) -> Result<Vec<Query>> {
    targets
        .iter()
        .map(|target| {
            target
                .parse::<Query>()
                .with_context(|| format!("invalid target {:?}", target))
        })
        .collect()
}

/// Normalize every domain, failing on the first one that is invalid
fn parse_domains(domains: &[String]) -> Result<Vec<String>> {
    domains
        .iter()
        .map(|domain| {
            WhoisRequest::new(domain)
                .map(|request| request.domain)
                .with_context(|| format!("invalid domain {:?}", domain))
        })
        .collect()
}

fn build_config(args: &Args) -> Result<Config> {
    let mut builder = Config::builder()
        .networksdb_base_url(args.base_url.clone())
        .rate_limit(Duration::from_millis(args.rate_limit_ms))
        .poll_interval(Duration::from_millis(args.poll_interval_ms))
        .resolve_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(key) = &args.api_key {
        builder = builder.api_key(NETWORKSDB_NAME, key.clone());
    }
    for domain in parse_domains(&args.domains)? {
        builder = builder.domain(domain);
    }
    builder.build().map_err(anyhow::Error::msg)
}

/// Format one resolved record as a text line
fn format_record(target: &str, record: &OwnershipRecord) -> String {
    format!(
        "{}: AS{} {} \"{}\" [{}/{}]",
        target, record.asn, record.prefix, record.description, record.source, record.tag
    )
}

/// Resolve every target and domain and print the results; returns whether
/// all succeeded
async fn async_main(args: &Args, queries: &[Query], domains: &[String]) -> Result<bool> {
    let config = build_config(args)?;
    let services = Services::from_config(&config)?;

    let cancel = services.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let results = services
        .resolver()
        .resolve_many(queries.iter().copied())
        .await;
    let mut related: Vec<(&str, Result<BTreeSet<String>, ResolveError>)> = Vec::new();
    for domain in domains {
        let result = services.domains().related_domains(domain).await;
        related.push((domain.as_str(), result.map(|records| merge_domains(&records))));
    }
    services.shutdown().await;

    let outcomes: Vec<(&str, &Result<OwnershipRecord, ResolveError>)> = args
        .targets
        .iter()
        .zip(queries)
        .filter_map(|(target, query)| results.get(query).map(|r| (target.as_str(), r)))
        .collect();
    let all_ok = outcomes.iter().all(|(_, result)| result.is_ok())
        && related.iter().all(|(_, result)| result.is_ok());

    if args.json {
        let targets = outcomes.iter().map(|&(target, result)| {
            JsonEntry::Target(JsonResult {
                target,
                record: result.as_ref().ok(),
                error: result.as_ref().err().map(ToString::to_string),
            })
        });
        let domains = related.iter().map(|(domain, result)| {
            JsonEntry::Domain(JsonDomains {
                domain,
                related: result.as_ref().ok(),
                error: result.as_ref().err().map(ToString::to_string),
            })
        });
        let json: Vec<JsonEntry<'_>> = targets.chain(domains).collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        for &(target, result) in &outcomes {
            match result {
                Ok(record) => println!("{}", format_record(target, record)),
                Err(e) => eprintln!("{}: {}", target, e),
            }
        }
        for (domain, result) in &related {
            match result {
                Ok(found) => {
                    for name in found {
                        println!("{}: {}", domain, name);
                    }
                }
                Err(e) => eprintln!("{}: {}", domain, e),
            }
        }
    }

    Ok(all_ok)
}
