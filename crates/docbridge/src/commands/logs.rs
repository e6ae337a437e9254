//! Execution log command

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use docbridge_core::types::{ExecutionLog, ExecutionStatus};
use tabled::Tabled;

use super::format_time;
use crate::cli::LogsArgs;
use crate::output;
use crate::runtime::Runtime;

/// Maximum error message width before truncation
const ERROR_WIDTH: usize = 80;

#[derive(Tabled)]
struct LogRow {
    started: String,
    status: String,
    document: String,
    event: String,
    duration: String,
    error: String,
}

impl From<&ExecutionLog> for LogRow {
    fn from(log: &ExecutionLog) -> Self {
        Self {
            started: format_time(&log.started_at),
            status: log.status.to_string(),
            document: output::or_dash(log.document.as_deref()),
            event: log
                .event
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string()),
            duration: log
                .duration_ms()
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            error: log
                .error
                .as_deref()
                .map(|e| output::truncate(e, ERROR_WIDTH))
                .unwrap_or_default(),
        }
    }
}

pub async fn run(args: LogsArgs, state: Option<&Utf8Path>) -> Result<()> {
    let runtime = Runtime::open(state).await?;
    let instance = runtime
        .store()
        .get_instance(args.instance)?
        .ok_or_else(|| anyhow!("Instance {} not found", args.instance))?;

    let logs: Vec<ExecutionLog> = runtime
        .store()
        .list_logs(instance.id)?
        .into_iter()
        .take(args.limit)
        .collect();

    if args.json {
        return output::json(&logs);
    }

    output::header(&format!("{} ({})", instance.name, instance.component));
    if logs.is_empty() {
        output::info("No executions recorded");
        return Ok(());
    }
    let failed = logs.iter().filter(|l| l.status == ExecutionStatus::Failed).count();
    output::table(logs.iter().map(LogRow::from).collect());
    if failed > 0 {
        output::warning(&format!("{} of {} executions failed", failed, logs.len()));
    }
    Ok(())
}
