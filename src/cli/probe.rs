//! Probe command implementation

use crate::classifier::EndpointTier;
use crate::cli::output::{format_probe_json, format_probe_table};
use crate::cli::ProbeArgs;
use crate::config::PacerConfig;
use crate::http::{label_for, HttpError, PacedClient};
use crate::limiter::{LimiterError, LimiterStats, RateLimiter};
use serde::Serialize;
use std::time::Instant;

/// Outcome of one probe request.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub index: usize,
    pub status: Option<u16>,
    pub ok: bool,
    /// Error text for failed requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes: usize,
    /// Time from probe start until the request settled
    pub settled_ms: u64,
}

/// Everything a probe run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub endpoint: String,
    pub tier: EndpointTier,
    pub results: Vec<ProbeResult>,
    pub stats: LimiterStats,
    pub total_ms: u64,
}

impl ProbeReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Load configuration with CLI overrides
pub fn load_config_with_overrides(
    args: &ProbeArgs,
) -> Result<PacerConfig, Box<dyn std::error::Error>> {
    // Load from file if it exists, otherwise use defaults
    let mut config = if args.config.exists() {
        PacerConfig::load(Some(&args.config))?
    } else {
        tracing::debug!("Config file not found, using defaults");
        PacerConfig::default()
    };

    config = config.with_env_overrides();

    if let Some(concurrency) = args.concurrency {
        config.limiter.max_concurrent_requests = concurrency;
    }
    if let Some(rps) = args.rps {
        config.limiter.requests_per_second = rps;
    }
    if let Some(ref log_level) = args.log_level {
        config.logging.level = log_level.clone();
    }
    // The probe targets a full URL.
    config.http.base_url = None;

    config.validate()?;
    Ok(config)
}

/// Send `count` GETs to `url` through a fresh limiter and collect the results.
pub async fn run_probe(
    url: &str,
    endpoint: Option<&str>,
    count: usize,
    config: &PacerConfig,
) -> Result<ProbeReport, Box<dyn std::error::Error>> {
    let limiter = RateLimiter::from_config(config);
    let client = PacedClient::new(&config.http, limiter.clone())?;
    let endpoint = endpoint.map(str::to_string).unwrap_or_else(|| label_for(url));
    let tier = config.endpoints.classify(&endpoint);

    tracing::info!(
        url = %url,
        endpoint = %endpoint,
        priority = tier.priority,
        max_retries = tier.max_retries,
        count,
        "Starting probe"
    );

    let started = Instant::now();
    let requests = (0..count).map(|index| {
        let client = client.clone();
        let endpoint = endpoint.clone();
        async move {
            let outcome = client.fetch_as(&endpoint, url).await;
            let settled_ms = started.elapsed().as_millis() as u64;
            to_result(index, outcome, settled_ms)
        }
    });
    let results = futures::future::join_all(requests).await;

    let report = ProbeReport {
        url: url.to_string(),
        endpoint,
        tier,
        results,
        stats: limiter.stats(),
        total_ms: started.elapsed().as_millis() as u64,
    };
    limiter.shutdown();

    Ok(report)
}

fn to_result(
    index: usize,
    outcome: Result<crate::http::FetchOutcome, LimiterError<HttpError>>,
    settled_ms: u64,
) -> ProbeResult {
    match outcome {
        Ok(fetched) => ProbeResult {
            index,
            status: Some(fetched.status),
            ok: true,
            error: None,
            bytes: fetched.bytes,
            settled_ms,
        },
        Err(err) => ProbeResult {
            index,
            status: match &err {
                LimiterError::Request(e) => e.status(),
                LimiterError::Closed | LimiterError::Panicked(_) => None,
            },
            ok: false,
            error: Some(err.to_string()),
            bytes: 0,
            settled_ms,
        },
    }
}

/// Handle `pacer probe` command
pub async fn handle_probe(args: &ProbeArgs) -> Result<String, Box<dyn std::error::Error>> {
    let config = load_config_with_overrides(args)?;
    crate::logging::init_tracing(&config.logging)?;

    let report = run_probe(&args.url, args.endpoint.as_deref(), args.count, &config).await?;

    if args.json {
        Ok(format_probe_json(&report))
    } else {
        Ok(format_probe_table(&report))
    }
}
