//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{IndexioArgs, OutputFormat};
use crate::error::Result;
use crate::index::{BinaryKind, CodeStorage, Index, IndexBinary, IndexKind};
use crate::invlists::InvertedLists;

/// Decoded structure of one index node.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSummary {
    pub tag: String,
    pub d: u32,
    pub ntotal: u64,
    pub is_trained: bool,
    pub metric: String,
    pub read_only: bool,
    /// `owned`, `mapped`, `not loaded` or absent for variants without codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lists: Option<ListsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_vector_entries: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<IndexSummary>,
}

/// Inverted list state of an IVF node.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListsSummary {
    pub tag: String,
    pub nlist: usize,
    pub code_size: usize,
    pub entries: usize,
    pub loaded: bool,
    pub mapped: bool,
}

/// Result of `probe-mv`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResult {
    pub path: String,
    pub multi_vector: bool,
}

/// Result of `rewrite`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RewriteResult {
    pub input: String,
    pub output: String,
    pub tag: String,
    pub bytes_written: u64,
}

fn codes_state(codes: &CodeStorage) -> String {
    match codes {
        CodeStorage::Owned(_) => "owned",
        CodeStorage::Mapped(_) => "mapped",
        CodeStorage::NotLoaded { .. } => "not loaded",
    }
    .to_string()
}

fn lists_summary(invlists: &InvertedLists) -> ListsSummary {
    ListsSummary {
        tag: invlists.tag().to_string(),
        nlist: invlists.nlist(),
        code_size: invlists.code_size(),
        entries: invlists.total_size(),
        loaded: invlists.is_loaded(),
        mapped: invlists.is_mapped(),
    }
}

impl IndexSummary {
    /// Summarize a float index and its owned children.
    pub fn from_index(index: &Index) -> Self {
        let (codes, lists, transforms) = match &index.kind {
            IndexKind::Flat(flat) => (Some(&flat.codes), None, Vec::new()),
            IndexKind::Pq(pq) => (Some(&pq.codes), None, Vec::new()),
            IndexKind::IvfFlat(ivf) => (None, Some(lists_summary(&ivf.invlists)), Vec::new()),
            IndexKind::IvfPq(ivfpq) => {
                (None, Some(lists_summary(&ivfpq.ivf.invlists)), Vec::new())
            }
            IndexKind::PreTransform(pt) => (
                None,
                None,
                pt.transforms
                    .iter()
                    .map(|t| format!("{} {}->{}", t.tag(), t.d_in, t.d_out))
                    .collect(),
            ),
            _ => (None, None, Vec::new()),
        };

        IndexSummary {
            tag: index.tag().to_string(),
            d: index.header.d,
            ntotal: index.header.ntotal,
            is_trained: index.header.is_trained,
            metric: format!("{:?}", index.header.metric),
            read_only: index.read_only,
            codes: codes.map(codes_state),
            code_bytes: codes.map(|c| c.len() as u64),
            transforms,
            lists,
            multi_vector_entries: index.mv_lims.as_ref().map(Vec::len),
            children: index.children().into_iter().map(IndexSummary::from_index).collect(),
        }
    }

    /// Summarize a binary index and its owned children.
    pub fn from_binary(index: &IndexBinary) -> Self {
        let (codes, lists) = match &index.kind {
            BinaryKind::Flat(codes) => (Some(codes), None),
            BinaryKind::Ivf(ivf) => (None, Some(lists_summary(&ivf.invlists))),
            BinaryKind::Hnsw(_) => (None, None),
        };

        IndexSummary {
            tag: index.tag().to_string(),
            d: index.header.d,
            ntotal: index.header.ntotal,
            is_trained: index.header.is_trained,
            metric: format!("{:?}", index.header.metric),
            read_only: index.read_only,
            codes: codes.map(codes_state),
            code_bytes: codes.map(|c| c.len() as u64),
            transforms: Vec::new(),
            lists,
            multi_vector_entries: None,
            children: index
                .children()
                .into_iter()
                .map(IndexSummary::from_binary)
                .collect(),
        }
    }
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &IndexioArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &IndexioArgs) -> Result<()> {
    if args.verbosity() > 1 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    for line in render_human(&value, 0) {
        println!("{line}");
    }
    Ok(())
}

/// Render a JSON value as indented `key: value` lines.
fn render_human(value: &serde_json::Value, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        lines.push(format!("{indent}{key}:"));
                        lines.extend(render_human(val, depth + 1));
                    }
                    serde_json::Value::Array(items) if items.iter().any(|i| i.is_object()) => {
                        for item in items {
                            lines.push(format!("{indent}{key}:"));
                            lines.extend(render_human(item, depth + 1));
                        }
                    }
                    _ => lines.push(format!("{indent}{key}: {}", format_value(val))),
                }
            }
        }
        other => lines.push(format!("{indent}{}", format_value(other))),
    }
    lines
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &IndexioArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Format a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        let unit = UNITS[unit_index];
        format!("{bytes} {unit}")
    } else {
        let unit = UNITS[unit_index];
        format!("{size:.1} {unit}")
    }
}
