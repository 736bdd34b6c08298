use access_logs_etl::{
    classify, init_tracing_once, load_notifications, plan_aggregate, plan_partition_swap, plan_transform, Environment,
    Job, LocalObjectStore, Outcome, Relocator,
};
use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const USAGE: &str = "usage:
  access-logs-etl classify <key>...
  access-logs-etl plan <transform|aggregate|partitions> [RFC3339 time]
  access-logs-etl relocate <local-root> <events.json>";

fn parse_time(arg: Option<&String>) -> Result<OffsetDateTime> {
    match arg {
        Some(s) => OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("invalid time '{s}'")),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn main() -> Result<()> {
    init_tracing_once();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(cmd) = args.first() else {
        bail!("{USAGE}");
    };

    match cmd.as_str() {
        "classify" => {
            let now = OffsetDateTime::now_utc();
            for key in &args[1..] {
                println!("{}", classify(key, now).destination_key);
            }
        }
        "plan" => {
            let job: Job = args.get(1).ok_or_else(|| anyhow!("{USAGE}"))?.parse()?;
            let now = parse_time(args.get(2))?;
            let env = Environment::from_env()?;
            let streams = env.streams()?;
            let hour = job.partition_hour(now);
            let json = match job {
                Job::Transform => serde_json::to_string_pretty(&plan_transform(&env, &streams, &hour)?)?,
                Job::Aggregate => serde_json::to_string_pretty(&plan_aggregate(&env, &streams, &hour)?)?,
                Job::CreatePartitions => serde_json::to_string_pretty(&plan_partition_swap(&env, &streams, &hour))?,
                Job::Cleanup => bail!("cleanup has no partition plan"),
            };
            println!("{json}");
        }
        "relocate" => {
            let (Some(root), Some(events)) = (args.get(1), args.get(2)) else {
                bail!("{USAGE}");
            };
            let target = std::env::var("TARGET_BUCKET").context("TARGET_BUCKET is not set")?;
            let batch = load_notifications(&PathBuf::from(events))?;
            let store = Arc::new(LocalObjectStore::new(root));
            let moved = Relocator::new(store, target).relocate(&batch, OffsetDateTime::now_utc());

            let failed = moved.iter().filter(|m| !m.outcome.is_ok()).count();
            for m in &moved {
                let status = match &m.outcome {
                    Outcome::Failed(reason) => format!("FAILED {reason}"),
                    _ => "ok".to_string(),
                };
                println!("{}/{} -> {} [{}]", m.source_bucket, m.source_key, m.classified.destination_key, status);
            }
            if failed > 0 {
                tracing::warn!(failed, "some objects were not relocated");
            }
        }
        _ => bail!("{USAGE}"),
    }
    Ok(())
}
