use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use chainstats_backend::config::AppConfig;
use chainstats_backend::database::{self, PgChainRepository};
use chainstats_backend::reconcile::{AuditReport, DuplicateAuditor};

#[derive(Parser)]
#[command(author, version, about = "Find and remove duplicate chain records")]
struct Cli {
    /// Report the proposed resolution without deleting anything
    #[arg(long)]
    dry_run: bool,
    /// Postgres URL; defaults to CHAINSTATS_DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

async fn run(cli: &Cli) -> anyhow::Result<AuditReport> {
    let config = AppConfig::from_env()?;
    let url = cli
        .database_url
        .clone()
        .or_else(|| config.database.url.clone())
        .ok_or_else(|| anyhow::anyhow!("no database URL given (--database-url or CHAINSTATS_DATABASE_URL)"))?;

    let pool = database::connect(&config.database, &url).await?;
    let auditor = DuplicateAuditor::new(Arc::new(PgChainRepository::new(pool)));
    Ok(auditor.run(cli.dry_run).await?)
}

fn print_report(report: &AuditReport) {
    for cluster in &report.clusters {
        println!("cluster ({:?}): {}", cluster.reason, cluster.members.join(", "));
        println!("  keep:   {}", cluster.keep);
        for key in &cluster.delete {
            println!("  delete: {}", key);
        }
        for key in &cluster.manual_review {
            println!("  review: {}", key);
        }
    }
    println!(
        "{} clusters, {} proposed deletions, {} for manual review, {} deleted{}",
        report.clusters.len(),
        report.proposed_deletions,
        report.manual_review,
        report.deleted,
        if report.dry_run { " (dry run)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(out) => println!("{out}"),
                    Err(e) => {
                        error!("Failed to encode report: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print_report(&report);
            }
            info!("Audit finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Audit failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
