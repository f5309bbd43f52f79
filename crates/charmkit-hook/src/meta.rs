use serde::{Deserialize, Serialize};

/// Which side of a relation this charm plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Provider,
    Requirer,
    Peer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Provider => write!(f, "provider"),
            Role::Requirer => write!(f, "requirer"),
            Role::Peer => write!(f, "peer"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Container,
}

/// A relation the charm takes part in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub interface: String,
    pub role: Role,
    /// Maximum number of related applications, 0 for unlimited.
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub scope: Scope,
}

impl Relation {
    pub fn new(interface: impl Into<String>, role: Role) -> Self {
        Self {
            interface: interface.into(),
            role,
            limit: 0,
            optional: false,
            scope: Scope::Global,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    String,
    Int,
    Float,
    Boolean,
}

/// A configuration option exposed to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "type")]
    pub kind: OptionType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ConfigOption {
    pub fn new(kind: OptionType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "oci-image")]
    OciImage,
}

/// A resource the operator may attach to the deployed charm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default)]
    pub description: String,
}

impl Resource {
    /// A file resource stored at `path` relative to the resource directory.
    pub fn file(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: ResourceType::File,
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Free-text metadata of the bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmInfo {
    pub summary: String,
    pub description: String,
}
