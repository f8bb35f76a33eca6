//! Participant model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable participant identifier (UUID text in practice, treated as opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A registered participant
///
/// Created once at registration and never deleted while an event is running;
/// `is_active` is the only lifecycle switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Opaque token printed on the badge QR code
    pub qr_token: String,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub photo_uri: Option<String>,
    /// Free-form medical or organiser notes
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl Participant {
    /// Create an active participant with only the required fields set
    pub fn new(
        id: impl Into<ParticipantId>,
        name: impl Into<String>,
        qr_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            qr_token: qr_token.into(),
            mobile: None,
            emergency_contact: None,
            blood_group: None,
            age: None,
            photo_uri: None,
            notes: None,
            is_active: true,
        }
    }

    /// Badge number encoded in the token, e.g. `PALITANA_YATRA_123` -> 123
    pub fn badge_number(&self, token_prefix: &str) -> Option<u32> {
        badge_number(&self.qr_token, token_prefix)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Parse the badge number out of a `<prefix><number>` token.
pub fn badge_number(token: &str, token_prefix: &str) -> Option<u32> {
    token.trim().strip_prefix(token_prefix)?.parse().ok()
}
