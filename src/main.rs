//! dupe-checker: walks the repository and reports suspected duplicate PASS resources

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use dupe_checker_lib::domain::{Resource, VisitEvent, VisitEventKind};
use dupe_checker_lib::infrastructure::{
    AppConfig, Credentials, FedoraRetriever, HttpClient, HttpClientConfig, init_logging,
};
use dupe_checker_lib::query::plan_config::PlanConfig;
use dupe_checker_lib::query::{Match, SearchClient};
use dupe_checker_lib::visit::{EventSender, VisitChannels, VisitError, Visitor};

#[derive(Parser, Debug)]
#[command(name = "dupe-checker", version, about = "Find suspected duplicate PASS resources in a Fedora repository")]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plan file mapping PASS types to duplicate queries
    #[arg(short, long, default_value = "plans.json")]
    plans: PathBuf,

    /// Overrides repository.max_concurrent_requests
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Container to start from; defaults to the repository base URI
    start_uri: Option<String>,
}

/// Outcome of the duplicate checks over every accepted resource
#[derive(Debug, Default)]
struct CheckStats {
    accepted: usize,
    processed: usize,
    skipped: usize,
    without_plan: usize,
    suspected_duplicates: usize,
    query_errors: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("dupe-checker: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(max) = cli.max_concurrent {
        config.repository.max_concurrent_requests = max;
        config.validate()?;
    }
    init_logging(&config.logging)?;

    let plans = PlanConfig::load(&cli.plans)?;
    if plans.is_empty() {
        warn!("📋 {} defines no plans; resources will only be counted", cli.plans.display());
    }

    let http = HttpClient::with_config(HttpClientConfig::from_http_config(&config.http))?;
    let retriever = FedoraRetriever::new(
        http.clone().with_context_label("repository"),
        Some(Credentials {
            user: config.repository.user.clone(),
            password: config.repository.password.clone(),
        }),
    );
    let search = SearchClient::new(
        config.search_target()?,
        Arc::new(http.with_context_label("search")),
    );

    let (visitor, channels) = Visitor::with_channel_capacity(
        Arc::new(retriever),
        config.repository.max_concurrent_requests,
        config.walk.channel_capacity,
    );
    let start_uri = cli
        .start_uri
        .clone()
        .unwrap_or_else(|| config.start_uri().to_string());

    let cancel = visitor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, cancelling walk");
            cancel.cancel();
        }
    });

    let VisitChannels {
        containers,
        errors,
        events,
    } = channels;
    let checker = DupeChecker {
        plans,
        search,
        events: visitor.event_sender(),
        base_uris: config.base_uris().into_iter().map(str::to_string).collect(),
        max_result_size: config.search.max_result_size,
    };

    let walk = tokio::spawn(async move { visitor.walk(&start_uri, None, None).await });
    let checks = tokio::spawn(checker.run(containers));
    let failures = tokio::spawn(log_errors(errors));
    let lifecycle = tokio::spawn(log_events(events));

    let walk_result = walk.await.context("walk task failed")?;
    let stats = checks.await.context("duplicate check task failed")?;
    let error_count = failures.await.context("error logger failed")?;
    let event_count = lifecycle.await.context("event logger failed")?;

    walk_result.context("walk aborted")?;

    info!("📊 Summary");
    info!("   accepted resources:    {}", stats.accepted);
    info!("   processed for dupes:   {}", stats.processed);
    info!("   skipped (missing keys): {}", stats.skipped);
    info!("   without a plan:        {}", stats.without_plan);
    info!("   suspected duplicates:  {}", stats.suspected_duplicates);
    info!("   query errors:          {}", stats.query_errors);
    info!("   traversal errors:      {}", error_count);
    info!("   lifecycle events:      {}", event_count);
    Ok(())
}

struct DupeChecker {
    plans: PlanConfig,
    search: SearchClient,
    events: EventSender,
    base_uris: Vec<String>,
    max_result_size: u64,
}

impl DupeChecker {
    async fn run(self, mut containers: mpsc::Receiver<Resource>) -> CheckStats {
        let mut stats = CheckStats::default();
        while let Some(resource) = containers.recv().await {
            stats.accepted += 1;
            self.check(&resource, &mut stats).await;
            if !self.events.processed(resource.uri()).await {
                debug!("event channel closed before {} was reported", resource.uri());
            }
        }
        stats
    }

    async fn check(&self, resource: &Resource, stats: &mut CheckStats) {
        let Some(plan) = resource.domain_type().and_then(|t| self.plans.plan_for(t)) else {
            debug!("no plan for {} ({:?})", resource.uri(), resource.domain_type());
            stats.without_plan += 1;
            return;
        };

        let bases: Vec<&str> = self.base_uris.iter().map(String::as_str).collect();
        let max_result_size = self.max_result_size;
        let mut suspected = 0;
        let result = plan
            .execute(resource, &self.search, &mut |found: Match| {
                if found.hit_count > max_result_size {
                    warn!(
                        "⚠️ {} reported {} hits, more than the {} the index returns",
                        found.query_url, found.hit_count, max_result_size
                    );
                }
                let duplicates = found.duplicates(&bases);
                if !duplicates.is_empty() {
                    warn!(
                        "🔁 Suspected duplicate(s) of {} {}: {}",
                        found.resource_type,
                        found.resource_uri,
                        duplicates.join(", ")
                    );
                    suspected += duplicates.len();
                }
                Ok(())
            })
            .await;

        stats.suspected_duplicates += suspected;
        match result {
            Ok(()) => stats.processed += 1,
            Err(e) if e.is_missing_keys() => stats.skipped += 1,
            Err(e) => {
                warn!("⚠️ Query failed for {}: {}", resource.uri(), e);
                stats.query_errors += 1;
            }
        }
    }
}

async fn log_errors(mut errors: mpsc::Receiver<VisitError>) -> usize {
    let mut count = 0;
    while let Some(err) = errors.recv().await {
        warn!("⚠️ {:#}", anyhow::Error::from(err));
        count += 1;
    }
    count
}

async fn log_events(mut events: mpsc::Receiver<VisitEvent>) -> usize {
    let mut count = 0;
    while let Some(event) = events.recv().await {
        match event.kind {
            VisitEventKind::DescendStart | VisitEventKind::DescendEnd => debug!("📣 {} {}", event.kind, event.uri),
            VisitEventKind::ProcessedForDupes => debug!("✔️ {} {}", event.kind, event.uri),
        }
        count += 1;
    }
    count
}
