use std::{fmt::Write as _, path::Path};

use {
    anyhow::{Result, bail},
    clap::Args,
    courier_agents::{Pipeline, ReportStatus, ResearchReport},
    courier_channel::ShutdownMode,
    courier_config::{Severity, UnregisteredPolicy, validate},
    tracing::{info, warn},
};

#[derive(Args, Default)]
pub struct RunArgs {
    /// Query to run; repeat for several. Defaults to `pipeline.queries`.
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// Papers fetched per query (overrides `pipeline.max_results`).
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Throw away undelivered messages on exit instead of draining them.
    #[arg(long)]
    pub discard_on_exit: bool,

    /// Messages for agents without a handler: `reject` or `drop`
    /// (overrides `channel.unregistered`).
    #[arg(long, value_parser = parse_unregistered)]
    pub unregistered: Option<UnregisteredPolicy>,
}

fn parse_unregistered(value: &str) -> Result<UnregisteredPolicy, String> {
    UnregisteredPolicy::parse(value)
        .ok_or_else(|| format!("expected `reject` or `drop`, got `{value}`"))
}

pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let mut config = courier_config::load_or_discover(config_path)?;
    if let Some(max_results) = args.max_results {
        config.pipeline.max_results = max_results;
    }
    if let Some(policy) = args.unregistered {
        config.channel.unregistered = policy;
    }

    let result = validate(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => eprintln!("{d}"),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!("configuration has errors; see `courier config check`");
    }

    let queries = if args.queries.is_empty() {
        config.pipeline.queries.clone()
    } else {
        args.queries
    };
    if queries.is_empty() {
        bail!("no queries to run; pass --query or set pipeline.queries");
    }

    let pipeline = Pipeline::from_config(&config)?;
    for query in &queries {
        let report = pipeline.run_query(query).await;
        print!("{}", render_report(&report));
    }

    let mode = if args.discard_on_exit {
        ShutdownMode::Discard
    } else {
        ShutdownMode::Drain
    };
    let shutdown = pipeline.shutdown(mode).await;
    info!(
        queries = queries.len(),
        delivered = shutdown.stats.delivered,
        failed = shutdown.stats.failed,
        dropped = shutdown.stats.dropped,
        "pipeline finished"
    );
    Ok(())
}

fn render_report(report: &ResearchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Processing query: {} ===", report.query);

    match &report.status {
        ReportStatus::NoPapers => {
            let _ = writeln!(out, "No papers found for the query");
        },
        ReportStatus::Completed => {
            let _ = writeln!(out, "Found {} papers", report.papers.len());
            for s in &report.summaries {
                let _ = writeln!(out, "\n* {}\n  {}", s.title, s.url);
                if s.summary.is_empty() {
                    let _ = writeln!(out, "  (no summary)");
                } else {
                    let _ = writeln!(out, "  {}", s.summary);
                }
            }
        },
        ReportStatus::Degraded { reason } => {
            let _ = writeln!(out, "Found {} papers", report.papers.len());
            let _ = writeln!(out, "Summaries unavailable: {reason}");
        },
    }

    let _ = writeln!(out, "\n---");
    out
}
