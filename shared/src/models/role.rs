//! User roles

use serde::{Deserialize, Serialize};

/// Role of a studio or warehouse worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    /// Warehouse clerk receiving products and building photo requests
    Stockman,
    /// Order-control clerk assembling and accepting orders
    Okz,
    Photographer,
    SeniorPhotographer,
    Retoucher,
    SeniorRetoucher,
    RenderChecker,
    Moderator,
}

impl Role {
    pub const ALL: &'static [Role] = &[
        Role::Admin,
        Role::Manager,
        Role::Stockman,
        Role::Okz,
        Role::Photographer,
        Role::SeniorPhotographer,
        Role::Retoucher,
        Role::SeniorRetoucher,
        Role::RenderChecker,
        Role::Moderator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Stockman => "stockman",
            Role::Okz => "okz",
            Role::Photographer => "photographer",
            Role::SeniorPhotographer => "senior_photographer",
            Role::Retoucher => "retoucher",
            Role::SeniorRetoucher => "senior_retoucher",
            Role::RenderChecker => "render_checker",
            Role::Moderator => "moderator",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Role::ALL.iter().copied().find(|r| r.as_str() == s)
    }

    /// Whether this role passes a guard that admits `allowed`.
    ///
    /// Admins pass every guard.
    pub fn is_allowed(&self, allowed: &[Role]) -> bool {
        *self == Role::Admin || allowed.contains(self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
