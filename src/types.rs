//! Core data types for the Dagram graph store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The raw token.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a [`Graph`]: "gr-" + 10 hex chars.
    GraphId
);

opaque_id!(
    /// Identifier of a [`Node`]: "nd-" + 10 hex chars.
    NodeId
);

opaque_id!(
    /// Identifier of an [`Edge`]: "ed-" + 10 hex chars.
    EdgeId
);

/// A named container of nodes, unique per owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    pub id: GraphId,

    /// Opaque user identifier
    pub owner: String,

    pub title: String,

    pub created_at: DateTime<Utc>,
}

/// A titled vertex belonging to exactly one graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,

    /// The owning graph
    pub parent: GraphId,

    /// Unique within `parent`
    pub title: String,

    /// Caller payload, stored and returned unchanged
    pub enrichment: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// Last title or enrichment change
    pub updated_at: DateTime<Utc>,
}

/// A directed relation between two nodes of the same graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: EdgeId,

    pub source: NodeId,

    pub target: NodeId,

    /// Caller payload, stored and returned unchanged
    pub enrichment: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

/// Kinds of records held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Graph,
    Node,
    Edge,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Graph => f.write_str("graph"),
            Entity::Node => f.write_str("node"),
            Entity::Edge => f.write_str("edge"),
        }
    }
}

/// Validation errors for caller-supplied names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("title exceeds {0} characters")]
    TitleTooLong(usize),
    #[error("title contains control characters")]
    InvalidCharacters,
    #[error("owner cannot be empty")]
    EmptyOwner,
}

/// Validate a graph or node title.
pub fn validate_title(title: &str, max_len: usize) -> Result<(), ValidationError> {
    // Title: required, 1..=max_len chars, no control characters
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > max_len {
        return Err(ValidationError::TitleTooLong(max_len));
    }
    if title.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Validate a graph owner.
pub fn validate_owner(owner: &str) -> Result<(), ValidationError> {
    if owner.is_empty() {
        return Err(ValidationError::EmptyOwner);
    }
    Ok(())
}
