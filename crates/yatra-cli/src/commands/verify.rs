use std::path::Path;

use serde::Serialize;
use yatra_core::roster::{
    compare_with_reference, verify_roster, Discrepancy, ReferenceRecord, RosterFile, RosterIssue,
    RosterReport, DEFAULT_TOKEN_PREFIX,
};

use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutput {
    pub report: RosterReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancies: Option<Vec<Discrepancy>>,
}

impl VerifyOutput {
    pub fn problem_count(&self) -> usize {
        self.report.missing_badges.len()
            + self.report.incomplete.len()
            + self.report.invalid.len()
            + self.discrepancies.as_ref().map_or(0, Vec::len)
    }
}

pub fn run_verify(
    roster_path: &Path,
    expected: Option<u32>,
    prefix: Option<&str>,
    reference_path: Option<&Path>,
    as_json: bool,
) -> Result<(), CliError> {
    let output = verify_files(roster_path, expected, prefix, reference_path)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for line in format_verify_lines(&output) {
            println!("{line}");
        }
    }

    match output.problem_count() {
        0 => Ok(()),
        problems => Err(CliError::VerificationFailed(problems)),
    }
}

pub fn verify_files(
    roster_path: &Path,
    expected: Option<u32>,
    prefix: Option<&str>,
    reference_path: Option<&Path>,
) -> Result<VerifyOutput, CliError> {
    let roster = RosterFile::from_json_file(roster_path)?;
    let prefix = prefix.unwrap_or(DEFAULT_TOKEN_PREFIX);
    let expected = match expected {
        Some(expected) => expected,
        None => u32::try_from(roster.participants.len()).map_err(|_| {
            CliError::InvalidArgument("roster is too large to infer --expected".to_string())
        })?,
    };

    let report = verify_roster(&roster.participants, expected, prefix);
    let discrepancies = reference_path
        .map(|path| -> Result<Vec<Discrepancy>, CliError> {
            let raw = std::fs::read_to_string(path)?;
            let reference: Vec<ReferenceRecord> = serde_json::from_str(&raw)?;
            Ok(compare_with_reference(&reference, &roster.participants, prefix))
        })
        .transpose()?;

    Ok(VerifyOutput {
        report,
        discrepancies,
    })
}

pub fn format_verify_lines(output: &VerifyOutput) -> Vec<String> {
    let report = &output.report;
    let mut lines = vec![format!(
        "{} participants, badges 1..={} expected",
        report.total_participants, report.expected_count
    )];

    if !report.missing_badges.is_empty() {
        let badges: Vec<String> = report.missing_badges.iter().map(u32::to_string).collect();
        lines.push(format!("Missing badges: {}", badges.join(", ")));
    }
    for issue in &report.incomplete {
        lines.push(format!("Incomplete {}", issue_line(issue)));
    }
    for issue in &report.invalid {
        lines.push(format!("Invalid {}", issue_line(issue)));
    }
    for discrepancy in output.discrepancies.iter().flatten() {
        lines.push(discrepancy_line(discrepancy));
    }

    if output.problem_count() == 0 {
        lines.push("All checks passed".to_string());
    }
    lines
}

fn issue_line(issue: &RosterIssue) -> String {
    let badge = issue
        .badge
        .map_or_else(|| "no badge".to_string(), |badge| format!("#{badge}"));
    format!(
        "{badge} {} ({}): {}",
        issue.name,
        issue.participant_id,
        issue.problems.join("; ")
    )
}

fn discrepancy_line(discrepancy: &Discrepancy) -> String {
    match discrepancy {
        Discrepancy::MissingInDatabase { badge, name } => {
            format!("#{badge} {name}: in reference sheet but not in roster")
        }
        Discrepancy::NameMismatch {
            badge,
            reference,
            stored,
        } => format!("#{badge} name: reference '{reference}', roster '{stored}'"),
        Discrepancy::AgeMismatch {
            badge,
            reference,
            stored,
        } => {
            let stored = stored.map_or_else(|| "none".to_string(), |age| age.to_string());
            format!("#{badge} age: reference {reference}, roster {stored}")
        }
        Discrepancy::BloodGroupMismatch {
            badge,
            reference,
            stored,
        } => format!("#{badge} blood group: reference {reference}, roster {stored}"),
        Discrepancy::EmergencyContactMismatch {
            badge,
            reference,
            stored,
        } => format!("#{badge} emergency contact: reference {reference}, roster {stored}"),
        Discrepancy::PhotoMissing { badge } => format!("#{badge} photo missing"),
    }
}
