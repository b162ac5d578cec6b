//! CLI presentation: text and json formatters for listings and tree stats.

use crate::node::{Node, NodeKind};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Shape of one persisted tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub tree_id: String,
    pub size: u64,
    pub depth: usize,
    pub root_form: String,
    pub root_buckets: usize,
    pub persisted_trees: u64,
    pub pinned_entries: u64,
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Feature => "feature",
        NodeKind::Tree => "tree",
    }
}

pub fn format_entries(entries: &[Node], format: &str) -> Result<String, serde_json::Error> {
    if format == "json" {
        let rows: Vec<_> = entries
            .iter()
            .map(|n| {
                json!({
                    "name": n.name,
                    "kind": kind_label(n.kind),
                    "object_id": n.object_id.to_hex(),
                })
            })
            .collect();
        return serde_json::to_string_pretty(&rows);
    }

    if entries.is_empty() {
        return Ok("Tree is empty.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Name", "Kind", "Object"]);
    for node in entries {
        let hex = node.object_id.to_hex();
        table.add_row(vec![
            node.name.clone(),
            kind_label(node.kind).to_string(),
            hex[..12].to_string(),
        ]);
    }
    Ok(format!("{}\n{} entries", table, entries.len()))
}

pub fn format_stats(stats: &TreeStats, format: &str) -> Result<String, serde_json::Error> {
    if format == "json" {
        return serde_json::to_string_pretty(stats);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Tree".to_string(), stats.tree_id.clone()]);
    table.add_row(vec!["Entries".to_string(), stats.size.to_string()]);
    table.add_row(vec!["Depth".to_string(), stats.depth.to_string()]);
    table.add_row(vec!["Root form".to_string(), stats.root_form.clone()]);
    table.add_row(vec!["Root buckets".to_string(), stats.root_buckets.to_string()]);
    table.add_row(vec![
        "Persisted trees".to_string(),
        stats.persisted_trees.to_string(),
    ]);
    table.add_row(vec![
        "Pinned entries".to_string(),
        stats.pinned_entries.to_string(),
    ]);
    Ok(table.to_string())
}
