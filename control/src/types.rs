use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Roles and OS families
// ============================================================================

/// Fixed set of node roles in a benchmark fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    DataNode,
    Loader,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::DataNode, Role::Loader];

    /// Short tag used inside node names (`{prefix}-{short}-{index}`).
    pub fn short_name(self) -> &'static str {
        match self {
            Role::DataNode => "cass",
            Role::Loader => "load",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::DataNode => f.write_str("data-node"),
            Role::Loader => f.write_str("loader"),
        }
    }
}

/// Boot-configuration dialect expected by a node image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
    /// Init-system units (`coreos.units`) plus a discovery endpoint.
    UnitBased,
    /// Package list plus an ordered boot-command list.
    PackageBased,
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit-based" => Ok(OsFamily::UnitBased),
            "package-based" => Ok(OsFamily::PackageBased),
            other => Err(format!("unknown OS family: {}", other)),
        }
    }
}

// ============================================================================
// Fleet specification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub count: u32,
    pub flavor: String,
    pub image: String,
}

/// Desired node counts, flavors and images per role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSpec {
    pub role_specs: BTreeMap<Role, RoleSpec>,
    pub name_prefix: String,
}

impl FleetSpec {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            role_specs: BTreeMap::new(),
            name_prefix: name_prefix.into(),
        }
    }

    pub fn with_role(mut self, role: Role, spec: RoleSpec) -> Self {
        self.role_specs.insert(role, spec);
        self
    }

    /// Deterministic node name for `role` at `index`.
    pub fn node_name(&self, role: Role, index: u32) -> String {
        format!("{}-{}-{}", self.name_prefix, role.short_name(), index)
    }
}

/// One planned node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSpec {
    pub role: Role,
    pub name: String,
    pub flavor: String,
    pub image: String,
}

// ============================================================================
// Provider inventory
// ============================================================================

/// A live node as reported by the cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderNode {
    pub id: String,
    pub name: String,
    pub state: String,
    pub public_addresses: Vec<String>,
    pub private_addresses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreateNodeRequest {
    pub name: String,
    pub flavor: String,
    pub image: String,
    pub keypair: String,
    pub user_data: String,
}

// ============================================================================
// Address selection
// ============================================================================

/// Which entry of a node's address list is treated as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicy {
    First,
    #[default]
    Last,
}

impl AddressPolicy {
    pub fn select<'a>(&self, addresses: &'a [String]) -> Option<&'a str> {
        match self {
            AddressPolicy::First => addresses.first().map(String::as_str),
            AddressPolicy::Last => addresses.last().map(String::as_str),
        }
    }
}
