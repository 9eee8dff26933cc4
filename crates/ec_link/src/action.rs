//! Action allow-list and per-action positional parameter layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Home,
    Vehicles,
    Vehicle,
    AddVehicle,
    Damage,
    Camera,
    Statement,
    Statements,
    NewStatement,
    Emergency,
    Settings,
    Login,
    // integration-internal
    MasterAuth,
    TokenRefresh,
    SessionSync,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::Home,
        Action::Vehicles,
        Action::Vehicle,
        Action::AddVehicle,
        Action::Damage,
        Action::Camera,
        Action::Statement,
        Action::Statements,
        Action::NewStatement,
        Action::Emergency,
        Action::Settings,
        Action::Login,
        Action::MasterAuth,
        Action::TokenRefresh,
        Action::SessionSync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Home => "home",
            Action::Vehicles => "vehicles",
            Action::Vehicle => "vehicle",
            Action::AddVehicle => "add-vehicle",
            Action::Damage => "damage",
            Action::Camera => "camera",
            Action::Statement => "statement",
            Action::Statements => "statements",
            Action::NewStatement => "new-statement",
            Action::Emergency => "emergency",
            Action::Settings => "settings",
            Action::Login => "login",
            Action::MasterAuth => "master-auth",
            Action::TokenRefresh => "token-refresh",
            Action::SessionSync => "session-sync",
        }
    }

    /// Exact, case-sensitive match against the allow-list.
    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// Named slots filled from the path segments after the action.
    /// `None` means the segments are read as alternating key/value pairs.
    pub fn positional_slots(self) -> Option<&'static [&'static str]> {
        match self {
            Action::Statement => Some(&["statementId", "mode"]),
            Action::Vehicle => Some(&["vehicleId", "action"]),
            Action::Camera => Some(&["type", "returnTo"]),
            Action::Damage => Some(&["vehicleId", "damageType"]),
            Action::Statements => Some(&["filter"]),
            Action::NewStatement => Some(&["vehicleId"]),
            Action::Emergency => Some(&["type"]),
            Action::Settings => Some(&["section"]),
            _ => None,
        }
    }

    pub fn is_integration(self) -> bool {
        matches!(
            self,
            Action::MasterAuth | Action::TokenRefresh | Action::SessionSync
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::from_name(s).ok_or_else(|| format!("unknown action: {s}"))
    }
}
