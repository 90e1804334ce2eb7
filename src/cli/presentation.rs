//! CLI presentation: tables and detail views. Pure formatting.

use crate::error::EngineError;
use crate::operation::{Cluster, Operation};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(header);
    table
}

pub fn format_operation_list(operations: &[Operation]) -> String {
    if operations.is_empty() {
        return "No operations recorded.".to_string();
    }
    let mut table = table(vec!["Operation", "Type", "Cluster", "Status", "Step", "Updated"]);
    for op in operations {
        table.add_row(vec![
            op.id.clone(),
            op.op_type.clone(),
            op.cluster_id.clone(),
            op.status.to_string(),
            format!("{}/{}", op.current_step + 1, op.step_count()),
            op.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table.to_string()
}

pub fn format_cluster_list(clusters: &[Cluster]) -> String {
    if clusters.is_empty() {
        return "No clusters recorded.".to_string();
    }
    let mut table = table(vec!["Cluster", "Name", "Status", "Version", "Nodes", "In flight"]);
    for cluster in clusters {
        let pending: Vec<&str> = cluster.pending_operations.iter().map(String::as_str).collect();
        table.add_row(vec![
            cluster.id.clone(),
            cluster.name.clone(),
            cluster.status.to_string(),
            cluster.version.clone().unwrap_or_else(|| "-".to_string()),
            cluster.nodes.len().to_string(),
            if pending.is_empty() {
                "-".to_string()
            } else {
                pending.join(", ")
            },
        ]);
    }
    table.to_string()
}

pub fn format_operation_detail_text(op: &Operation) -> String {
    let mut out = String::new();
    out.push_str(&format!("Operation {} ({})\n", op.id, op.op_type));
    out.push_str(&format!("Cluster:  {}\n", op.cluster_id));
    out.push_str(&format!("Status:   {}\n", op.status));
    out.push_str(&format!("Step:     {} of {}\n", op.current_step + 1, op.step_count()));
    if !op.operator.is_empty() {
        out.push_str(&format!("Operator: {}\n", op.operator));
    }

    let mut steps = table(vec!["#", "Step", "Node tasks", "Generator", "State"]);
    for (index, step) in &op.steps {
        let state = if *index < op.current_step {
            "done"
        } else if *index == op.current_step {
            op.status.as_str()
        } else {
            "pending"
        };
        steps.add_row(vec![
            index.to_string(),
            step.name.clone(),
            step.node_steps.len().to_string(),
            step.generator.clone().unwrap_or_else(|| "-".to_string()),
            state.to_string(),
        ]);
    }
    out.push_str(&format!("\n{}\n", steps));

    if !op.step_return_data.is_empty() {
        let mut data = table(vec!["Key", "Value"]);
        for (key, value) in &op.step_return_data {
            data.add_row(vec![key.clone(), value.clone()]);
        }
        out.push_str(&format!("\nCarry-over data\n{}\n", data));
    }

    if !op.logs.is_empty() {
        out.push_str("\nLog\n");
        for entry in &op.logs {
            let step = entry.step_index.map(|i| format!("[{}] ", i)).unwrap_or_default();
            let node = entry.node_id.as_deref().map(|n| format!("{}: ", n)).unwrap_or_default();
            out.push_str(&format!(
                "  {} {}{}{}\n",
                entry.at.format("%H:%M:%S"),
                step,
                node,
                entry.message
            ));
        }
    }
    out
}

pub fn format_operation_detail_json(op: &Operation) -> Result<String, EngineError> {
    serde_json::to_string_pretty(op)
        .map_err(|e| EngineError::InvalidOperation(format!("Failed to render operation: {}", e)))
}
