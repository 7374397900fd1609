use anyhow::Context;
use clap::{Parser, Subcommand};
use outbox_relay::config::{Config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use outbox_relay::dlq::AuditKind;
use outbox_relay::telemetry::init_tracing;
use outbox_relay::AppContext;
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "outbox-relay-cli")]
#[command(about = "Operator tooling for the outbox relay", long_about = None)]
struct Cli {
    /// Configuration override file
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and operate the dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },

    /// Inspect stream topics
    Stream {
        #[command(subcommand)]
        command: StreamCommand,
    },

    /// Consumer, breaker and DLQ state in one document
    Snapshot,
}

#[derive(Subcommand)]
enum DlqCommand {
    /// Per-aggregate counts and failure rate
    Stats,

    /// Evaluate alert thresholds
    Alerts,

    /// Entries ready for reprocessing
    Pending {
        #[arg(value_name = "AGGREGATE_TYPE")]
        aggregate_type: String,

        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Entries waiting for operator action
    Manual {
        #[arg(value_name = "AGGREGATE_TYPE")]
        aggregate_type: String,
    },

    /// Reprocess eligible entries once
    Reprocess {
        /// Restrict to one aggregate type
        #[arg(short, long)]
        aggregate_type: Option<String>,

        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Close an entry
    Resolve {
        #[arg(value_name = "AGGREGATE_TYPE")]
        aggregate_type: String,

        #[arg(value_name = "EVENT_ID")]
        event_id: i64,

        #[arg(short, long)]
        resolved_by: Option<String>,
    },

    /// Purge audit records older than the retention window
    Cleanup {
        /// Defaults to the configured audit retention
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// List audit records
    Audit {
        #[arg(value_enum)]
        kind: AuditKind,
    },
}

#[derive(Subcommand)]
enum StreamCommand {
    /// Most recent events on a topic, newest first
    Tail {
        #[arg(value_name = "TOPIC")]
        topic: String,

        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Topic a given aggregate type routes to
    Route {
        #[arg(value_name = "AGGREGATE_TYPE")]
        aggregate_type: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    init_tracing(&config.observability);

    let ctx = AppContext::build(config)
        .await
        .context("failed to connect to relay storage")?;

    match cli.command {
        Commands::Dlq { command } => run_dlq(&ctx, command).await?,
        Commands::Stream { command } => run_stream(&ctx, command).await?,
        Commands::Snapshot => print_json(&ctx.snapshot().await?)?,
    }

    Ok(())
}

async fn run_dlq(ctx: &AppContext, command: DlqCommand) -> anyhow::Result<()> {
    match command {
        DlqCommand::Stats => {
            let total = ctx.outbox_store.count_total().await?;
            print_json(&ctx.dlq.get_dlq_stats(total).await?)?;
        }

        DlqCommand::Alerts => {
            let total = ctx.outbox_store.count_total().await?;
            let stats = ctx.dlq.get_dlq_stats(total).await?;
            print_json(&ctx.dlq.get_alerts(&stats))?;
        }

        DlqCommand::Pending {
            aggregate_type,
            limit,
        } => {
            print_json(&ctx.dlq.get_pending_events(&aggregate_type, limit).await?)?;
        }

        DlqCommand::Manual { aggregate_type } => {
            print_json(&ctx.dlq.list_manual_events(&aggregate_type).await?)?;
        }

        DlqCommand::Reprocess {
            aggregate_type,
            limit,
        } => {
            let result = match aggregate_type {
                Some(aggregate_type) => ctx.dlq.batch_reprocess(&aggregate_type, limit).await?,
                None => ctx.dlq.reprocess_all(limit).await?,
            };
            print_json(&result)?;
        }

        DlqCommand::Resolve {
            aggregate_type,
            event_id,
            resolved_by,
        } => {
            let outcome = ctx
                .dlq
                .mark_event_resolved(event_id, &aggregate_type, resolved_by.as_deref())
                .await?;
            print_json(&json!({
                "event_id": event_id,
                "aggregate_type": aggregate_type,
                "outcome": outcome,
            }))?;
        }

        DlqCommand::Cleanup { days } => {
            let days = days.unwrap_or(ctx.config.dlq.audit_retention_days);
            print_json(&ctx.dlq.cleanup_expired_events(days).await?)?;
        }

        DlqCommand::Audit { kind } => {
            print_json(&ctx.dlq.list_audit(kind).await?)?;
        }
    }

    Ok(())
}

async fn run_stream(ctx: &AppContext, command: StreamCommand) -> anyhow::Result<()> {
    match command {
        StreamCommand::Tail { topic, count } => {
            let events: Vec<_> = ctx
                .producer
                .read_latest(&topic, count)
                .await?
                .into_iter()
                .map(|(id, event)| json!({ "id": id.to_string(), "event": event }))
                .collect();
            print_json(&events)?;
        }

        StreamCommand::Route { aggregate_type } => {
            let topic = ctx.producer.router().topic_for(&aggregate_type, "");
            print_json(&json!({
                "aggregate_type": aggregate_type,
                "topic": topic,
                "stream_key": ctx.producer.stream_key(topic),
            }))?;
        }
    }

    Ok(())
}
