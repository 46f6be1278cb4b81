use serde::{Deserialize, Serialize};
use std::fmt;

/// The identifiers a data subject is known by across connected systems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserIdentifiers {
    pub user_id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl UserIdentifiers {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            emails: Vec::new(),
            phones: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn with_emails(mut self, emails: Vec<String>) -> Self {
        self.emails = emails;
        self
    }
}

/// Regulatory regime a request is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Jurisdiction {
    Eu,
    Us,
    Other,
}

impl Jurisdiction {
    /// Unknown jurisdictions resolve to `Other` per the policy manager contract.
    pub fn parse_or_other(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "EU" => Jurisdiction::Eu,
            "US" => Jurisdiction::Us,
            _ => Jurisdiction::Other,
        }
    }

    pub fn all() -> [Jurisdiction; 3] {
        [Jurisdiction::Eu, Jurisdiction::Us, Jurisdiction::Other]
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Jurisdiction::Eu => "EU",
            Jurisdiction::Us => "US",
            Jurisdiction::Other => "OTHER",
        };
        write!(f, "{s}")
    }
}

/// The fixed set of external systems the engine drives deletions against.
///
/// Priorities 1-2 are identity-critical, 3-4 are parallel, 5 is background
/// (spec.md §3, "Policy configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    Stripe,
    Database,
    Intercom,
    Sendgrid,
    Crm,
    Analytics,
}

impl System {
    pub const ALL: [System; 6] = [
        System::Stripe,
        System::Database,
        System::Intercom,
        System::Sendgrid,
        System::Crm,
        System::Analytics,
    ];

    pub const IDENTITY_CRITICAL: [System; 2] = [System::Stripe, System::Database];

    pub const NON_CRITICAL: [System; 4] = [
        System::Intercom,
        System::Sendgrid,
        System::Crm,
        System::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            System::Stripe => "stripe",
            System::Database => "database",
            System::Intercom => "intercom",
            System::Sendgrid => "sendgrid",
            System::Crm => "crm",
            System::Analytics => "analytics",
        }
    }

    pub fn deletion_topic(&self) -> String {
        format!("{}-deletion", self.as_str())
    }

    pub fn is_identity_critical(&self) -> bool {
        matches!(self, System::Stripe | System::Database)
    }

    pub fn default_priority(&self) -> u8 {
        match self {
            System::Stripe => 1,
            System::Database => 2,
            System::Intercom => 3,
            System::Sendgrid => 3,
            System::Crm => 4,
            System::Analytics => 5,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stripe" => Some(System::Stripe),
            "database" => Some(System::Database),
            "intercom" => Some(System::Intercom),
            "sendgrid" => Some(System::Sendgrid),
            "crm" => Some(System::Crm),
            "analytics" => Some(System::Analytics),
            _ => None,
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
