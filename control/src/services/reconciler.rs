use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::provider::CloudProvider;
use crate::types::{FleetSpec, NodeSpec, ProviderNode, Role};

/// Result of comparing the expected node set with live inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Expected nodes absent from inventory (create targets).
    pub missing: Vec<NodeSpec>,
    /// Expected nodes present in inventory (destroy targets).
    pub matched: Vec<(NodeSpec, ProviderNode)>,
    /// Live nodes following the naming convention that are not expected.
    /// Reported only, never touched.
    pub extra: Vec<ProviderNode>,
}

impl Diff {
    pub fn matched_nodes(&self) -> impl Iterator<Item = &ProviderNode> {
        self.matched.iter().map(|(_, node)| node)
    }

    pub fn matched_by_role(&self, role: Role) -> Vec<ProviderNode> {
        self.matched
            .iter()
            .filter(|(spec, _)| spec.role == role)
            .map(|(_, node)| node.clone())
            .collect()
    }
}

/// Expand a fleet spec into its planned nodes, role by role in index order.
pub fn expected(spec: &FleetSpec) -> Vec<NodeSpec> {
    spec.role_specs
        .iter()
        .flat_map(|(role, role_spec)| {
            (0..role_spec.count).map(move |index| NodeSpec {
                role: *role,
                name: spec.node_name(*role, index),
                flavor: role_spec.flavor.clone(),
                image: role_spec.image.clone(),
            })
        })
        .collect()
}

/// Compare expected nodes with live inventory by name.
///
/// Pure function of its inputs. A live node appearing under an expected name
/// more than once is matched once per occurrence.
pub fn diff(spec: &FleetSpec, live: &[ProviderNode]) -> Diff {
    let expected = expected(spec);
    let expected_names: HashSet<&str> = expected.iter().map(|n| n.name.as_str()).collect();

    let mut live_by_name: HashMap<&str, Vec<&ProviderNode>> = HashMap::new();
    for node in live {
        live_by_name.entry(node.name.as_str()).or_default().push(node);
    }

    let mut result = Diff::default();
    for node_spec in &expected {
        match live_by_name.get(node_spec.name.as_str()) {
            Some(nodes) => {
                for node in nodes {
                    result.matched.push((node_spec.clone(), (*node).clone()));
                }
            }
            None => result.missing.push(node_spec.clone()),
        }
    }

    result.extra = live
        .iter()
        .filter(|n| !expected_names.contains(n.name.as_str()) && follows_convention(spec, &n.name))
        .cloned()
        .collect();

    result
}

/// Whether `name` has the shape `{prefix}-{role-short}-{index}`.
pub fn follows_convention(spec: &FleetSpec, name: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(spec.name_prefix.as_str())
        .and_then(|r| r.strip_prefix('-'))
    else {
        return false;
    };

    Role::ALL.iter().any(|role| {
        rest.strip_prefix(role.short_name())
            .and_then(|r| r.strip_prefix('-'))
            .is_some_and(|idx| !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()))
    })
}

/// List live inventory and diff it against the fleet spec.
///
/// A failed listing aborts the whole reconcile: no partial diff is computed.
pub async fn reconcile(provider: &dyn CloudProvider, spec: &FleetSpec) -> Result<Diff> {
    let live = provider
        .list_nodes()
        .await
        .map_err(|e| FleetError::InventoryList(e.to_string()))?;
    debug!("Provider reported {} live node(s)", live.len());

    let result = diff(spec, &live);
    info!(
        "Reconciled fleet '{}': {} missing, {} matched, {} extra",
        spec.name_prefix,
        result.missing.len(),
        result.matched.len(),
        result.extra.len()
    );
    Ok(result)
}
