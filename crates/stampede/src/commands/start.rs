//! `stampede start` - drive the simulated fleet
//!
//! Wires the request channel, the aggregator task, the signal watcher, and
//! the HTTP clients together, then hands the scheduler a launch function
//! that spawns one converge run per slot.

use crate::config::Config;
use crate::converge::{self, RunContext};
use crate::error::CliResult;
use crate::request_log::RequestLog;
use crate::scheduler::Scheduler;
use serde_json::{Map, Value};
use stampede_client::{ApiClient, ApiConfig, CollectorClient, CollectorConfig};
use stampede_core::{RequestRecord, RequestTally};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{mpsc, Mutex};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn execute(config: Config) -> CliResult<()> {
    let config = Arc::new(config);

    let (request_tx, request_rx) = mpsc::unbounded_channel::<RequestRecord>();
    let tally = Arc::new(Mutex::new(RequestTally::new()));

    let log = RequestLog::open(Path::new(&config.log_file))?;
    tokio::spawn(aggregate(request_rx, log, tally.clone()));

    let interrupt = signal(SignalKind::interrupt())?;
    let terminate = signal(SignalKind::terminate())?;
    let usr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(watch_signals(interrupt, terminate, usr1, tally.clone()));

    let api = if config.use_server {
        Some(Arc::new(ApiClient::new(
            ApiConfig {
                base_url: config.server_url.clone(),
                client_name: config.client_name.clone(),
                agent_version: config.agent_version.clone(),
                timeout: REQUEST_TIMEOUT,
            },
            request_tx.clone(),
        )?))
    } else {
        None
    };

    let collector = if config.collector_url.is_empty() {
        None
    } else {
        Some(Arc::new(CollectorClient::new(
            CollectorConfig {
                url: config.collector_url.clone(),
                token: config.collector_token.clone(),
                timeout: REQUEST_TIMEOUT,
            },
            request_tx.clone(),
        )?))
    };

    let ctx = Arc::new(RunContext {
        run_list: stampede_core::parse(&config.run_list),
        attributes: load_json_map(&config.node_attributes_file),
        converge: load_json_map(&config.converge_json_file),
        compliance: load_json_map(&config.compliance_json_file),
        config: config.clone(),
        api,
        collector,
    });

    tracing::info!(
        nodes = config.num_nodes,
        interval = config.interval,
        runs = config.runs,
        prefix = %config.node_name_prefix,
        log_file = %config.log_file,
        "Starting stampede"
    );

    let scheduler = Scheduler::new(&config);
    scheduler
        .run(move |runner, slot, done| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                converge::run(&ctx, &runner, slot).await;
                let _ = done.send(slot).await;
            });
        })
        .await;

    // Only a run quota gets here; open-ended loads exit via signal.
    tracing::info!("Run quota exhausted, stopping stampede");
    print!("{}", tally.lock().await.profile());
    Ok(())
}

/// Drain the request channel into the log file and the tally.
async fn aggregate(
    mut requests: UnboundedReceiver<RequestRecord>,
    mut log: RequestLog,
    tally: Arc<Mutex<RequestTally>>,
) {
    while let Some(record) = requests.recv().await {
        if let Err(err) = log.append(&record) {
            tracing::warn!(error = %err, "Failed to append to request log");
        }
        tally.lock().await.record(record);
    }
}

/// INT/TERM print the profile and stop the process; USR1 prints the
/// profile and keeps going.
async fn watch_signals(
    mut interrupt: Signal,
    mut terminate: Signal,
    mut usr1: Signal,
    tally: Arc<Mutex<RequestTally>>,
) {
    loop {
        let stopping = tokio::select! {
            _ = interrupt.recv() => { tracing::info!(signal = "INT", "Signal received"); true }
            _ = terminate.recv() => { tracing::info!(signal = "TERM", "Signal received"); true }
            _ = usr1.recv() => { tracing::info!(signal = "USR1", "Signal received"); false }
        };

        print!("{}", tally.lock().await.profile());
        if stopping {
            tracing::info!("Stopping stampede");
            std::process::exit(0);
        }
    }
}

/// Load a JSON object from an optional file. Failures degrade to an empty
/// map so one bad seed file cannot take the load generator down.
fn load_json_map(path: &str) -> Map<String, Value> {
    if path.is_empty() {
        return Map::new();
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::error!(file = path, error = %err, "Could not read JSON file");
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::error!(file = path, "JSON file is not an object");
            Map::new()
        }
        Err(err) => {
            tracing::error!(file = path, error = %err, "Could not decode JSON file");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_seed_files_degrade_to_empty_maps() {
        assert!(load_json_map("").is_empty());
        assert!(load_json_map("/nonexistent/stampede/seed.json").is_empty());
    }
}
