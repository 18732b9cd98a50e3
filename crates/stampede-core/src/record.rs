//! Convergence telemetry and reporting record builders
//!
//! Pure functions producing the request bodies a converge run sends: the
//! run-start and run-converge messages for the telemetry collector, the
//! compliance report, and the start/stop bodies for the server reporting
//! endpoint. Callers may supply captured converge data (resources, run
//! list, expanded run list); when present it is used verbatim instead of
//! being derived from the parsed run list, which is how replayed real-run
//! data and synthetic data share one code path.

use crate::node::Node;
use crate::run_list::RunList;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Telemetry message schema version.
pub const MESSAGE_VERSION: &str = "1.1.0";

/// ISO-8601 timestamp, second precision, always UTC.
pub fn iso8601(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Timestamp format expected by the reporting endpoint.
fn reporting_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S %z").to_string()
}

/// One entry of the expanded run list as represented in telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedRunListItem {
    /// Entry kind, `recipe` or `role`
    #[serde(rename = "type")]
    pub kind: String,
    /// Entry name
    pub name: String,
    /// Pinned version, if any
    pub version: Option<String>,
    /// Whether the entry was skipped during the run
    pub skipped: bool,
}

fn expanded_run_list_items(expanded: &RunList) -> Vec<ExpandedRunListItem> {
    expanded
        .iter()
        .map(|item| ExpandedRunListItem {
            kind: item.kind.to_string(),
            name: item.name.clone(),
            version: item.version.clone(),
            skipped: false,
        })
        .collect()
}

/// The run-start telemetry message.
pub fn run_start_record(
    node_name: &str,
    server_fqdn: &str,
    organization: &str,
    run_id: &Uuid,
    node_id: &Uuid,
    start: DateTime<Utc>,
) -> Value {
    json!({
        "server_fqdn": server_fqdn,
        "entity_uuid": node_id.to_string(),
        "id": run_id.to_string(),
        "message_version": MESSAGE_VERSION,
        "message_type": "run_start",
        "node_name": node_name,
        "organization_name": organization,
        "run_id": run_id.to_string(),
        "source": "agent",
        "start_time": iso8601(start),
    })
}

/// The run-converge telemetry message sent when a run finishes.
///
/// If `converge` carries both `run_list` and `expanded_run_list`, those are
/// replayed verbatim; otherwise both representations are derived from the
/// parsed run lists. Resources are taken from `converge` when present.
#[allow(clippy::too_many_arguments)]
pub fn run_converge_record(
    environment: &str,
    node: &Node,
    server_fqdn: &str,
    organization: &str,
    status: &str,
    run_list: &RunList,
    expanded: &RunList,
    run_id: &Uuid,
    node_id: &Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    converge: &Map<String, Value>,
) -> Value {
    let (converged_run_list, converged_expanded) = match (
        converge.get("run_list"),
        converge.get("expanded_run_list"),
    ) {
        (Some(captured_run_list), Some(captured_expanded)) => {
            (captured_run_list.clone(), captured_expanded.clone())
        }
        _ => (
            json!(run_list.to_string_vec()),
            json!({
                "id": environment,
                "run_list": expanded_run_list_items(expanded),
            }),
        ),
    };

    let resources = converge
        .get("resources")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    json!({
        "server_fqdn": server_fqdn,
        "entity_uuid": node_id.to_string(),
        "id": run_id.to_string(),
        "message_version": MESSAGE_VERSION,
        "message_type": "run_converge",
        "node_name": node.name,
        "organization_name": organization,
        "run_id": run_id.to_string(),
        "source": "agent",
        "start_time": iso8601(start),
        "end_time": iso8601(end),
        "status": status,
        "run_list": converged_run_list,
        "expanded_run_list": converged_expanded,
        "node": node,
        "resources": resources,
        "total_resource_count": 0,
        "updated_resource_count": 0,
    })
}

/// Node identity and context attached to a compliance report.
#[derive(Debug, Clone)]
pub struct NodeDetails {
    pub name: String,
    pub ip_address: String,
    pub environment: String,
    pub roles: Vec<String>,
    pub recipes: Vec<String>,
    pub node_id: Uuid,
    pub source_fqdn: String,
    pub fqdn: String,
    pub organization: String,
    pub policy_group: String,
    pub policy_name: String,
    pub tags: Vec<String>,
}

/// The compliance report message: the supplied report decorated with the
/// node's identity and context. Any raw `controls` payload is stripped.
pub fn compliance_record(
    details: &NodeDetails,
    report_id: &Uuid,
    end: DateTime<Utc>,
    compliance: &Map<String, Value>,
) -> Value {
    let mut body = compliance.clone();
    body.insert("type".to_string(), json!("compliance_report"));
    body.insert("node_name".to_string(), json!(details.name));
    body.insert("environment".to_string(), json!(details.environment));
    body.insert("report_uuid".to_string(), json!(report_id.to_string()));
    body.insert("node_uuid".to_string(), json!(details.node_id.to_string()));
    body.insert("roles".to_string(), json!(details.roles));
    body.insert("recipes".to_string(), json!(details.recipes));
    body.insert("end_time".to_string(), json!(iso8601(end)));
    body.insert("source_fqdn".to_string(), json!(details.source_fqdn));
    body.insert("fqdn".to_string(), json!(details.fqdn));
    body.insert(
        "organization_name".to_string(),
        json!(details.organization),
    );
    body.insert("policy_group".to_string(), json!(details.policy_group));
    body.insert("policy_name".to_string(), json!(details.policy_name));
    body.insert("tags".to_string(), json!(details.tags));
    body.insert("ipaddress".to_string(), json!(details.ip_address));
    body.remove("controls");
    Value::Object(body)
}

/// Reporting-endpoint body announcing a run start.
pub fn reporting_start_record(run_id: &Uuid, start: DateTime<Utc>) -> Value {
    json!({
        "action": "start",
        "run_id": run_id.to_string(),
        "start_time": reporting_time(start),
    })
}

/// Reporting-endpoint body announcing a run end.
///
/// The run list travels as a pre-encoded JSON string, an oddity of the
/// reporting wire format.
pub fn reporting_stop_record(
    run_id: &Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    run_list: &RunList,
) -> Value {
    let encoded_run_list = format!("[\"{}\"]", run_list.to_string_vec().join("\",\""));
    json!({
        "action": "end",
        "data": {},
        "end_time": reporting_time(end),
        "resources": [],
        "run_list": encoded_run_list,
        "start_time": reporting_time(start),
        "status": "success",
        "total_res_count": "0",
    })
}
