//! Beacon campaign-analytics materialization engine.
//!
//! Wires configuration, tracing, and the ClickHouse client, then runs the
//! requested materialization domains for one campaign. In production the
//! run trigger arrives from the job queue; this binary is the same boundary
//! driven from the command line.

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use beacon_clickhouse::{ClickHouseClient, ClickHouseConfig, SessionSettings};
use beacon_etl::config::EtlConfig;
use beacon_etl::response::ResponseAnalyticsEtl;
use beacon_etl::schedule::ScheduleAnalyticsEtl;
use beacon_telemetry::init_tracing_from_env;

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    etl: EtlConfig,

    #[serde(default)]
    session: SessionSettings,
}

/// Which materialization domains to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Response,
    Schedule,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing_from_env();

    info!("Starting Beacon ETL v{}", env!("CARGO_PKG_VERSION"));

    let (campaign_id, domain) = parse_args()?;
    let config = load_config()?;

    let client = ClickHouseClient::new(config.clickhouse.clone())
        .context("Failed to create ClickHouse client")?;

    if matches!(domain, Domain::Response | Domain::All) {
        ResponseAnalyticsEtl::new(&client, config.etl.clone(), config.session.clone())
            .run(campaign_id)
            .await
            .context("response-analytics run failed")?;
    }

    if matches!(domain, Domain::Schedule | Domain::All) {
        ScheduleAnalyticsEtl::new(&client, config.etl.clone(), config.session.clone())
            .run(campaign_id)
            .await
            .context("schedule-analytics run failed")?;
    }

    Ok(())
}

/// Parses `beacon <campaign-id> [--domain response|schedule|all]`.
fn parse_args() -> Result<(Uuid, Domain)> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut campaign: Option<Uuid> = None;
    let mut domain = Domain::All;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--domain" => {
                let value = iter
                    .next()
                    .context("--domain requires a value: response, schedule, or all")?;
                domain = match value.as_str() {
                    "response" => Domain::Response,
                    "schedule" => Domain::Schedule,
                    "all" => Domain::All,
                    other => bail!("unknown domain {:?}", other),
                };
            }
            other if campaign.is_none() => {
                campaign = Some(
                    other
                        .parse()
                        .with_context(|| format!("invalid campaign id {:?}", other))?,
                );
            }
            other => bail!("unexpected argument {:?}", other),
        }
    }

    let campaign = campaign.context("usage: beacon <campaign-id> [--domain response|schedule|all]")?;
    Ok((campaign, domain))
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("BEACON")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Manual overrides for nested ClickHouse config from environment
    // The config crate's nested parsing doesn't work reliably with underscored field names
    if let Ok(url) = std::env::var("BEACON_CLICKHOUSE_URL") {
        config.clickhouse.url = url;
    }
    if let Ok(database) = std::env::var("BEACON_CLICKHOUSE_DATABASE") {
        config.clickhouse.database = database;
    }
    if let Ok(username) = std::env::var("BEACON_CLICKHOUSE_USERNAME") {
        config.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("BEACON_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = Some(password);
    }

    Ok(config)
}
