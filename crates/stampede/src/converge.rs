//! One simulated converge run
//!
//! The strict in-run sequence: register the client on a first run, fetch or
//! create the node, expand the run list, look up the environment, announce
//! the run to reporting and telemetry, solve dependencies, optionally
//! download cookbook files and make the configured extra GETs, sleep to
//! simulate convergence work, save the node, then announce the run end and
//! the compliance report.
//!
//! Errors stay inside the run: transient failures are logged and the run
//! continues where that makes sense; a failed node create or dependency
//! solve aborts this run only, never the scheduler.

use crate::config::Config;
use crate::error::CliResult;
use crate::scheduler::Runner;
use chrono::Utc;
use serde_json::{json, Map, Value};
use stampede_client::{ApiClient, CollectorClient, NodeApi};
use stampede_core::node::automatic_attributes;
use stampede_core::record::{
    compliance_record, reporting_start_record, reporting_stop_record, run_converge_record,
    run_start_record, NodeDetails,
};
use stampede_core::{download_plan, parse, synthetic, Node, RunList};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Everything a converge run needs, shared across all runs.
pub struct RunContext {
    pub config: Arc<Config>,
    pub api: Option<Arc<ApiClient>>,
    pub collector: Option<Arc<CollectorClient>>,
    /// Run list parsed once at startup
    pub run_list: RunList,
    /// Node automatic attributes profile
    pub attributes: Map<String, Value>,
    /// Captured converge status data, replayed verbatim when present
    pub converge: Map<String, Value>,
    /// Captured compliance report, sent when present
    pub compliance: Map<String, Value>,
}

/// Run one converge for `runner`, containing any failure within the run.
pub async fn run(ctx: &RunContext, runner: &Runner, slot: usize) {
    tracing::debug!(node = %runner.node_name, first_run = runner.first_run, "Starting converge run");
    if let Err(err) = converge(ctx, runner, slot).await {
        tracing::error!(node = %runner.node_name, error = %err, "Converge run failed");
    }
}

async fn converge(ctx: &RunContext, runner: &Runner, slot: usize) -> CliResult<()> {
    let config = &ctx.config;
    let node_name = &runner.node_name;

    let run_id = Uuid::new_v4();
    let report_id = Uuid::new_v4();
    let node_id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, node_name.as_bytes());
    let start = Utc::now();
    let server_fqdn = config.server_fqdn();
    let organization = config.organization();

    let mut reporting_available = true;
    let mut collector_available = true;

    let mut node = Node::new(node_name.clone());
    let api = ctx.api.as_ref().map(|api| api.for_node(node_name));

    if let Some(api) = &api {
        if runner.first_run {
            if let Err(err) = api.create_client(config.server_creates_client_key).await {
                tracing::warn!(node = %node_name, error = %err, "Client registration failed");
            }
        }

        node = fetch_or_create_node(api, node_name, config).await?;
    }

    node.environment = config.environment.clone();
    node.automatic = automatic_attributes(node_name, &ctx.attributes);

    let expanded: Vec<String> = if let Some(api) = &api {
        let expanded = ctx
            .run_list
            .expand_lenient(&config.environment, api)
            .await;

        if let Err(err) = api.fetch_environment(&config.environment).await {
            tracing::warn!(node = %node_name, error = %err, "Environment lookup failed");
        }

        if config.enable_reporting {
            let body = reporting_start_record(&run_id, start);
            match api.reporting_run_start(&body).await {
                Ok(response) if response.is_not_found() => reporting_available = false,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(node = %node_name, error = %err, "Reporting run start failed")
                }
            }
        }

        expanded
    } else {
        ctx.run_list.to_string_vec()
    };

    let start_body = run_start_record(
        node_name,
        &server_fqdn,
        &organization,
        &run_id,
        &node_id,
        start,
    );
    send_telemetry(ctx, &api, node_name, &start_body, &mut collector_available).await;

    if let Some(api) = &api {
        let cookbooks = api.solve_cookbooks(&config.environment, &expanded).await?;

        if config.download_cookbooks.applies(runner.first_run) {
            let plan = download_plan(
                &cookbooks,
                config.download_probability,
                &mut rand::thread_rng(),
            );
            for url in plan {
                if let Err(err) = api.download_file(&url).await {
                    tracing::warn!(node = %node_name, url = %url, error = %err, "Cookbook file download failed");
                }
            }
        }

        for request in &config.api_get_requests {
            if let Err(err) = api.get(request).await {
                tracing::warn!(node = %node_name, url = %request, error = %err, "Extra GET request failed");
            }
        }
    }

    if config.sleep_duration > 0 {
        sleep(Duration::from_secs(config.sleep_duration)).await;
    }

    node.run_list = ctx.run_list.to_string_vec();
    node.ensure_tags();
    let end = Utc::now();
    // Make each saved node differ from the previous run's version.
    node.automatic
        .insert("profile_time".to_string(), json!(end.timestamp()));

    if let Some(api) = &api {
        if let Err(err) = api.update_node(&node).await {
            tracing::warn!(node = %node_name, error = %err, "Node save failed");
        }

        if config.enable_reporting && reporting_available {
            let body = reporting_stop_record(&run_id, start, end, &ctx.run_list);
            if let Err(err) = api.reporting_run_stop(&run_id.to_string(), &body).await {
                tracing::warn!(node = %node_name, error = %err, "Reporting run stop failed");
            }
        }
    }

    let converge_body = run_converge_record(
        &config.environment,
        &node,
        &server_fqdn,
        &organization,
        "success",
        &ctx.run_list,
        &parse(&expanded),
        &run_id,
        &node_id,
        start,
        end,
        &ctx.converge,
    );
    send_telemetry(ctx, &api, node_name, &converge_body, &mut collector_available).await;

    if !ctx.compliance.is_empty() {
        // thread_rng is not Send, so keep it out of scope before the await
        let (roles, recipes) = {
            let mut rng = rand::thread_rng();
            (synthetic::role_set(&mut rng), synthetic::recipe_set(&mut rng))
        };
        let details = NodeDetails {
            name: node_name.clone(),
            ip_address: node_ip(slot),
            environment: config.environment.clone(),
            roles,
            recipes,
            node_id,
            source_fqdn: server_fqdn.clone(),
            fqdn: node_name.clone(),
            organization: organization.clone(),
            policy_group: "default_policy_group".to_string(),
            policy_name: "default_policy_name".to_string(),
            tags: vec!["tag1".to_string(), "tag2".to_string(), "tag3".to_string()],
        };
        let body = compliance_record(&details, &report_id, end, &ctx.compliance);
        send_telemetry(ctx, &api, node_name, &body, &mut collector_available).await;
    }

    Ok(())
}

/// Fetch the node object, creating it on 404. A failed create aborts the
/// run; a failed fetch falls back to a fresh node document.
async fn fetch_or_create_node(
    api: &NodeApi<'_>,
    node_name: &str,
    config: &Config,
) -> CliResult<Node> {
    let mut node = Node::new(node_name);

    match api.fetch_node().await {
        Ok(response) if response.is_success() => match serde_json::from_value(response.body) {
            Ok(fetched) => node = fetched,
            Err(err) => {
                tracing::warn!(node = %node_name, error = %err, "Could not decode node, starting fresh")
            }
        },
        Ok(response) if response.is_not_found() => {
            node.environment = config.environment.clone();
            let created = api.create_node(&node).await?;
            if !created.is_success() {
                return Err(crate::error::CliError::Run(format!(
                    "node create for {node_name} returned status {}",
                    created.status
                )));
            }
        }
        Ok(response) => {
            tracing::warn!(node = %node_name, status = response.status, "Unexpected node fetch status");
        }
        Err(err) => {
            tracing::warn!(node = %node_name, error = %err, "Node fetch failed, starting fresh");
        }
    }

    Ok(node)
}

/// Route a telemetry body to the direct collector when configured, else
/// through the server proxy. A 404 from the proxy disables telemetry for
/// the remainder of the run.
async fn send_telemetry(
    ctx: &RunContext,
    api: &Option<NodeApi<'_>>,
    node_name: &str,
    body: &Value,
    collector_available: &mut bool,
) {
    if let Some(collector) = &ctx.collector {
        if let Err(err) = collector.send(node_name, body).await {
            tracing::warn!(node = %node_name, error = %err, "Telemetry send failed");
        }
    } else if let Some(api) = api {
        if !*collector_available {
            return;
        }
        match api.proxy_telemetry(body).await {
            Ok(response) if response.is_not_found() => *collector_available = false,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(node = %node_name, error = %err, "Proxied telemetry send failed")
            }
        }
    }
}

/// Stable per-slot address in the 10.0.0.0/8 range.
fn node_ip(slot: usize) -> String {
    format!(
        "10.{}.{}.{}",
        (slot >> 16) & 0xff,
        (slot >> 8) & 0xff,
        slot & 0xff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ips_are_stable_and_distinct() {
        assert_eq!(node_ip(0), "10.0.0.0");
        assert_eq!(node_ip(5), "10.0.0.5");
        assert_eq!(node_ip(256), "10.0.1.0");
        assert_ne!(node_ip(1), node_ip(2));
    }
}
