//! Tabular reports printed to stdout. Per-node failures are rows marked
//! `EXCEPTION`, never a process exit code.

use benchfleet_control::services::{BenchmarkReport, Diff, OperationResult, Outcome};
use benchfleet_control::{NodeSpec, ProviderNode};
use std::path::PathBuf;
use tabled::{Table, Tabled};

pub const EXCEPTION: &str = "EXCEPTION";

#[derive(Tabled)]
pub struct NodeRow {
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PUBLIC IP")]
    public_ip: String,
    #[tabled(rename = "PRIVATE IP")]
    private_ip: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

impl From<&ProviderNode> for NodeRow {
    fn from(node: &ProviderNode) -> Self {
        Self {
            state: node.state.clone(),
            id: node.id.clone(),
            name: node.name.clone(),
            public_ip: node.public_addresses.join(", "),
            private_ip: node.private_addresses.join(", "),
            detail: String::new(),
        }
    }
}

impl NodeRow {
    fn marker(state: &str, name: &str, detail: String) -> Self {
        Self {
            state: state.to_string(),
            id: String::new(),
            name: name.to_string(),
            public_ip: String::new(),
            private_ip: String::new(),
            detail,
        }
    }
}

#[derive(Tabled)]
pub struct DestroyRow {
    #[tabled(rename = "DELETE-SUCCESS")]
    success: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

#[derive(Tabled)]
pub struct CommandRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

fn failure_detail<R>(outcome: &Outcome<R>) -> Option<String> {
    match outcome {
        Outcome::Success(_) => None,
        Outcome::Failure { kind, detail } => Some(format!("{}: {}", kind, detail)),
    }
}

pub fn status_table(diff: &Diff) -> String {
    let mut rows: Vec<NodeRow> = diff.matched_nodes().map(NodeRow::from).collect();
    rows.extend(
        diff.missing
            .iter()
            .map(|spec| NodeRow::marker("MISSING", &spec.name, String::new())),
    );
    rows.extend(diff.extra.iter().map(|node| {
        let mut row = NodeRow::from(node);
        row.detail = "not in fleet spec, left untouched".to_string();
        row
    }));
    Table::new(rows).to_string()
}

pub fn create_table(results: &[OperationResult<NodeSpec, ProviderNode>]) -> String {
    let rows: Vec<NodeRow> = results
        .iter()
        .map(|r| match &r.outcome {
            Outcome::Success(node) => NodeRow::from(node),
            failure => NodeRow::marker(
                EXCEPTION,
                &r.item.name,
                failure_detail(failure).unwrap_or_default(),
            ),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn destroy_table(results: &[OperationResult<ProviderNode, bool>]) -> String {
    let rows: Vec<DestroyRow> = results
        .iter()
        .map(|r| match &r.outcome {
            Outcome::Success(accepted) => DestroyRow {
                success: accepted.to_string(),
                id: r.item.id.clone(),
                name: r.item.name.clone(),
                detail: String::new(),
            },
            failure => DestroyRow {
                success: EXCEPTION.to_string(),
                id: r.item.id.clone(),
                name: r.item.name.clone(),
                detail: failure_detail(failure).unwrap_or_default(),
            },
        })
        .collect();
    Table::new(rows).to_string()
}

fn command_rows<R>(
    phase: &str,
    results: &[OperationResult<ProviderNode, R>],
    render: impl Fn(&R) -> String,
) -> Vec<CommandRow> {
    results
        .iter()
        .map(|r| match &r.outcome {
            Outcome::Success(value) => CommandRow {
                node: r.item.name.clone(),
                phase: phase.to_string(),
                outcome: "ok".to_string(),
                detail: render(value),
            },
            failure => CommandRow {
                node: r.item.name.clone(),
                phase: phase.to_string(),
                outcome: EXCEPTION.to_string(),
                detail: failure_detail(failure).unwrap_or_default(),
            },
        })
        .collect()
}

pub fn ssh_test_table(results: &[OperationResult<ProviderNode, String>]) -> String {
    Table::new(command_rows("sshtest", results, |out| out.trim().to_string())).to_string()
}

pub fn benchmark_table(report: &BenchmarkReport) -> String {
    let rows = match report {
        BenchmarkReport::PrimingFailed {
            loader,
            kind,
            detail,
        } => vec![CommandRow {
            node: loader.clone(),
            phase: "priming".to_string(),
            outcome: EXCEPTION.to_string(),
            detail: format!("{}: {}", kind, detail),
        }],
        BenchmarkReport::Completed { primed_on, results } => {
            let mut rows = vec![CommandRow {
                node: primed_on.clone(),
                phase: "priming".to_string(),
                outcome: "ok".to_string(),
                detail: String::new(),
            }];
            rows.extend(command_rows("fan-out", results, |_| String::new()));
            rows
        }
    };
    Table::new(rows).to_string()
}

pub fn results_table(results: &[OperationResult<ProviderNode, PathBuf>]) -> String {
    Table::new(command_rows("results", results, |path| {
        path.display().to_string()
    }))
    .to_string()
}
