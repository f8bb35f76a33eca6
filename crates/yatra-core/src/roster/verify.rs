//! Roster audits: completeness/validity report and comparison with a
//! reference sheet exported from registration.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{badge_number, Participant, ParticipantId};

const MIN_AGE: u32 = 1;
const MAX_AGE: u32 = 120;

/// Problems found on one participant record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterIssue {
    pub badge: Option<u32>,
    pub participant_id: ParticipantId,
    pub name: String,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterReport {
    pub total_participants: usize,
    pub expected_count: u32,
    /// Badge numbers in `1..=expected_count` no participant carries
    pub missing_badges: Vec<u32>,
    pub incomplete: Vec<RosterIssue>,
    pub invalid: Vec<RosterIssue>,
    pub all_passed: bool,
}

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("Invalid regex")
    })
}

/// Audit `participants` against badge numbers `1..=expected_count`.
pub fn verify_roster(
    participants: &[Participant],
    expected_count: u32,
    token_prefix: &str,
) -> RosterReport {
    let mut by_badge: BTreeMap<u32, &Participant> = BTreeMap::new();
    let mut incomplete = Vec::new();
    let mut invalid = Vec::new();

    for participant in participants {
        let badge = participant.badge_number(token_prefix);

        let mut missing_fields = Vec::new();
        if participant.name.trim().is_empty() {
            missing_fields.push("missing name".to_string());
        }
        if participant.id.as_str().trim().is_empty() {
            missing_fields.push("missing id".to_string());
        }
        if participant.qr_token.trim().is_empty() {
            missing_fields.push("missing qr token".to_string());
        }
        if !missing_fields.is_empty() {
            incomplete.push(issue(participant, badge, missing_fields));
        }

        let mut problems = Vec::new();
        if !uuid_pattern().is_match(participant.id.as_str()) {
            problems.push(format!("invalid id: {}", participant.id));
        }
        match badge {
            Some(number) => {
                let expected = format!("{token_prefix}{number}");
                if participant.qr_token != expected {
                    problems.push(format!(
                        "wrong qr token: expected {expected}, got {}",
                        participant.qr_token
                    ));
                }
                if let Some(holder) = by_badge.insert(number, participant) {
                    problems.push(format!("badge {number} also held by {}", holder.id));
                }
            }
            None if !participant.qr_token.trim().is_empty() => problems.push(format!(
                "qr token {} carries no badge number",
                participant.qr_token
            )),
            None => {}
        }
        if let Some(age) = participant.age {
            if !(MIN_AGE..=MAX_AGE).contains(&age) {
                problems.push(format!("invalid age: {age}"));
            }
        }
        if !problems.is_empty() {
            invalid.push(issue(participant, badge, problems));
        }
    }

    let missing_badges: Vec<u32> = (1..=expected_count)
        .filter(|number| !by_badge.contains_key(number))
        .collect();
    let all_passed = missing_badges.is_empty() && incomplete.is_empty() && invalid.is_empty();

    RosterReport {
        total_participants: participants.len(),
        expected_count,
        missing_badges,
        incomplete,
        invalid,
        all_passed,
    }
}

fn issue(participant: &Participant, badge: Option<u32>, problems: Vec<String>) -> RosterIssue {
    RosterIssue {
        badge,
        participant_id: participant.id.clone(),
        name: participant.name.clone(),
        problems,
    }
}

/// Age as it appears in reference sheets: a number or text like "16 years"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceAge {
    Number(f64),
    Text(String),
}

impl ReferenceAge {
    pub fn years(&self) -> Option<u32> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(text) => {
                let text = text.trim().to_lowercase();
                let text = text.trim_end_matches("years").trim_end_matches("year");
                text.trim().parse::<f64>().ok()?
            }
        };
        if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let years = value.trunc() as u32;
            Some(years)
        } else {
            None
        }
    }
}

/// One row of the registration reference sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecord {
    pub badge: u32,
    pub name: String,
    #[serde(default)]
    pub age: Option<ReferenceAge>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// A difference between the reference sheet and stored participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    #[serde(rename_all = "camelCase")]
    MissingInDatabase { badge: u32, name: String },
    #[serde(rename_all = "camelCase")]
    NameMismatch {
        badge: u32,
        reference: String,
        stored: String,
    },
    #[serde(rename_all = "camelCase")]
    AgeMismatch {
        badge: u32,
        reference: u32,
        stored: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    BloodGroupMismatch {
        badge: u32,
        reference: String,
        stored: String,
    },
    #[serde(rename_all = "camelCase")]
    EmergencyContactMismatch {
        badge: u32,
        reference: String,
        stored: String,
    },
    #[serde(rename_all = "camelCase")]
    PhotoMissing { badge: u32 },
}

impl Discrepancy {
    pub const fn badge(&self) -> u32 {
        match self {
            Self::MissingInDatabase { badge, .. }
            | Self::NameMismatch { badge, .. }
            | Self::AgeMismatch { badge, .. }
            | Self::BloodGroupMismatch { badge, .. }
            | Self::EmergencyContactMismatch { badge, .. }
            | Self::PhotoMissing { badge } => *badge,
        }
    }
}

/// Compare stored participants with reference rows, matched by badge number.
///
/// Blank reference values are not compared.
pub fn compare_with_reference(
    reference: &[ReferenceRecord],
    participants: &[Participant],
    token_prefix: &str,
) -> Vec<Discrepancy> {
    let by_badge: BTreeMap<u32, &Participant> = participants
        .iter()
        .filter_map(|participant| {
            badge_number(&participant.qr_token, token_prefix).map(|badge| (badge, participant))
        })
        .collect();

    let mut discrepancies = Vec::new();
    for row in reference {
        let badge = row.badge;
        let Some(stored) = by_badge.get(&badge) else {
            discrepancies.push(Discrepancy::MissingInDatabase {
                badge,
                name: row.name.trim().to_string(),
            });
            continue;
        };

        if normalize_name(&row.name) != normalize_name(&stored.name) {
            discrepancies.push(Discrepancy::NameMismatch {
                badge,
                reference: row.name.trim().to_string(),
                stored: stored.name.trim().to_string(),
            });
        }

        if let Some(reference_age) = row.age.as_ref().and_then(ReferenceAge::years) {
            if stored.age != Some(reference_age) {
                discrepancies.push(Discrepancy::AgeMismatch {
                    badge,
                    reference: reference_age,
                    stored: stored.age,
                });
            }
        }

        let reference_blood = normalize_blood_group(row.blood_group.as_deref());
        let stored_blood = normalize_blood_group(stored.blood_group.as_deref());
        if !reference_blood.is_empty() && reference_blood != stored_blood {
            discrepancies.push(Discrepancy::BloodGroupMismatch {
                badge,
                reference: reference_blood,
                stored: stored_blood,
            });
        }

        let reference_phone = normalize_phone(row.emergency_contact.as_deref());
        let stored_phone = normalize_phone(stored.emergency_contact.as_deref());
        if !reference_phone.is_empty() && reference_phone != stored_phone {
            discrepancies.push(Discrepancy::EmergencyContactMismatch {
                badge,
                reference: reference_phone,
                stored: stored_phone,
            });
        }

        let has_reference_photo = row
            .photo_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());
        let has_stored_photo = stored
            .photo_uri
            .as_deref()
            .is_some_and(|uri| !uri.trim().is_empty());
        if has_reference_photo && !has_stored_photo {
            discrepancies.push(Discrepancy::PhotoMissing { badge });
        }
    }
    discrepancies
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_blood_group(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Last ten digits, without the +91 country code
fn normalize_phone(value: Option<&str>) -> String {
    let value = value.unwrap_or_default().trim();
    let value = value.strip_prefix("+91").unwrap_or(value);
    let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
    digits[digits.len().saturating_sub(10)..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::DEFAULT_TOKEN_PREFIX;
    use pretty_assertions::assert_eq;

    fn participant(id: &str, name: &str, badge: u32) -> Participant {
        Participant::new(id, name, format!("{DEFAULT_TOKEN_PREFIX}{badge}"))
    }

    fn valid_roster() -> Vec<Participant> {
        vec![
            participant("0b9e4c1a-8f1e-4c43-9f0a-1d2b3c4d5e6f", "Asha Shah", 1),
            participant("7c1d2e3f-4a5b-4c6d-8e9f-a0b1c2d3e4f5", "Bela Mehta", 2),
            participant("a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d", "Chirag Doshi", 3),
        ]
    }

    #[test]
    fn clean_roster_passes() {
        let report = verify_roster(&valid_roster(), 3, DEFAULT_TOKEN_PREFIX);
        assert!(report.all_passed);
        assert!(report.missing_badges.is_empty());
        assert_eq!(report.total_participants, 3);
    }

    #[test]
    fn reports_missing_badges_and_bad_records() {
        let mut participants = valid_roster();
        participants[0].age = Some(130);
        participants[1].name = "  ".to_string();
        participants[2] = participant("not-a-uuid", "Chirag Doshi", 5);

        let report = verify_roster(&participants, 4, DEFAULT_TOKEN_PREFIX);
        assert!(!report.all_passed);
        assert_eq!(report.missing_badges, vec![3, 4]);
        assert_eq!(report.incomplete.len(), 1);
        assert_eq!(report.incomplete[0].badge, Some(2));

        let invalid_badges: Vec<Option<u32>> =
            report.invalid.iter().map(|issue| issue.badge).collect();
        assert_eq!(invalid_badges, vec![Some(1), Some(5)]);
    }

    #[test]
    fn zero_padded_token_is_invalid() {
        let mut participants = valid_roster();
        participants[0].qr_token = format!("{DEFAULT_TOKEN_PREFIX}01");

        let report = verify_roster(&participants, 3, DEFAULT_TOKEN_PREFIX);
        assert!(report.missing_badges.is_empty());
        assert_eq!(report.invalid.len(), 1);
        assert!(report.invalid[0].problems[0].contains("wrong qr token"));
    }

    #[test]
    fn reference_ages_accept_text() {
        assert_eq!(ReferenceAge::Text("16 years".into()).years(), Some(16));
        assert_eq!(ReferenceAge::Text(" 1 Year".into()).years(), Some(1));
        assert_eq!(ReferenceAge::Number(42.0).years(), Some(42));
        assert_eq!(ReferenceAge::Text("unknown".into()).years(), None);
    }

    #[test]
    fn phone_and_blood_group_normalization() {
        assert_eq!(normalize_phone(Some("+91 98765-43210")), "9876543210");
        assert_eq!(normalize_phone(Some("0098765 43210")), "9876543210");
        assert_eq!(normalize_phone(None), "");
        assert_eq!(normalize_blood_group(Some(" o + ")), "O+");
    }

    #[test]
    fn compares_against_reference() {
        let mut participants = valid_roster();
        participants[0].age = Some(16);
        participants[0].blood_group = Some("B+".to_string());
        participants[0].emergency_contact = Some("9876543210".to_string());

        let reference: Vec<ReferenceRecord> = serde_json::from_str(
            r#"[
                {"badge": 1, "name": "asha  SHAH", "age": "16 years", "bloodGroup": "b +", "emergencyContact": "+91 98765 43210"},
                {"badge": 2, "name": "Bela Mehta", "age": 30, "photoUrl": "https://drive.example/b.jpg"},
                {"badge": 3, "name": "Chirag D"},
                {"badge": 9, "name": "Dev Jain"}
            ]"#,
        )
        .unwrap();

        let discrepancies = compare_with_reference(&reference, &participants, DEFAULT_TOKEN_PREFIX);
        assert_eq!(
            discrepancies,
            vec![
                Discrepancy::AgeMismatch {
                    badge: 2,
                    reference: 30,
                    stored: None
                },
                Discrepancy::PhotoMissing { badge: 2 },
                Discrepancy::NameMismatch {
                    badge: 3,
                    reference: "Chirag D".to_string(),
                    stored: "Chirag Doshi".to_string()
                },
                Discrepancy::MissingInDatabase {
                    badge: 9,
                    name: "Dev Jain".to_string()
                },
            ]
        );
    }

    #[test]
    fn discrepancy_serializes_with_kind_tag() {
        let json = serde_json::to_value(Discrepancy::PhotoMissing { badge: 7 }).unwrap();
        assert_eq!(json["kind"], "photoMissing");
        assert_eq!(json["badge"], 7);
    }
}
