//! Caller roles carried in identity tokens

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Requests assistance and reviews completed work
    Customer,
    /// Accepts and services requests, identified by provider id
    Mechanic,
    /// Operational access across both surfaces
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Customer => "customer",
            Role::Mechanic => "mechanic",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Role::Customer),
            "mechanic" => Some(Role::Mechanic),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
