//! Country-specific validation of extracted identity fields.
//!
//! Each scoring check passes or fails independently; the report score is
//! `passed / (passed + failed)`. Warnings never affect the score.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};

use crate::country::{Country, IdNumberRule, DEFAULT_COUNTRY};
use crate::fields::IdentityFields;

pub const CHECK_ID_NUMBER: &str = "id_number";
pub const CHECK_DATE_OF_BIRTH: &str = "date_of_birth";
pub const CHECK_FULL_NAME: &str = "full_name";

/// Minimum length of a plausible date-of-birth string.
pub const MIN_DATE_OF_BIRTH_LEN: usize = 8;

/// Names must be longer than this after trimming.
pub const MIN_FULL_NAME_LEN: usize = 2;

/// Outcome of validating one document's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Country whose rules were applied.
    pub country: Country,
    pub passed_checks: BTreeSet<String>,
    pub failed_checks: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
    /// `passed / (passed + failed)`, 0 when no checks ran.
    pub score: f64,
}

impl ValidationReport {
    fn new(country: Country) -> Self {
        ValidationReport {
            country,
            passed_checks: BTreeSet::new(),
            failed_checks: BTreeSet::new(),
            warnings: BTreeSet::new(),
            score: 0.0,
        }
    }

    fn record(&mut self, check: &str, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.passed_checks.insert(check.to_string());
            }
            Err(detail) => {
                self.failed_checks.insert(check.to_string());
                self.warnings.insert(format!("{}: {}", check, detail));
            }
        }
    }

    fn finish(mut self) -> Self {
        let passed = self.passed_checks.len();
        let total = passed + self.failed_checks.len();
        self.score = if total == 0 {
            0.0
        } else {
            (passed as f64 / total as f64).clamp(0.0, 1.0)
        };
        self
    }

    pub fn passed(&self) -> bool {
        self.failed_checks.is_empty() && !self.passed_checks.is_empty()
    }
}

/// Applies the per-country rule table.
#[derive(Debug, Clone)]
pub struct SadcValidator {
    default_country: Country,
}

impl Default for SadcValidator {
    fn default() -> Self {
        SadcValidator::new(DEFAULT_COUNTRY)
    }
}

impl SadcValidator {
    pub fn new(default_country: Country) -> Self {
        SadcValidator { default_country }
    }

    /// Resolve a country code, falling back to the default country's rules.
    fn resolve(&self, country_code: &str) -> (Country, Option<String>) {
        match Country::from_code(country_code) {
            Some(country) => (country, None),
            None => (
                self.default_country,
                Some(format!(
                    "unknown country code '{}'; applied {} rules",
                    country_code.trim(),
                    self.default_country
                )),
            ),
        }
    }

    /// Validate fields against the rules for `country_code`. Pure.
    pub fn validate(&self, country_code: &str, fields: &IdentityFields) -> ValidationReport {
        let (country, unknown) = self.resolve(country_code);
        let mut report = ValidationReport::new(country);
        if let Some(warning) = unknown {
            report.warnings.insert(warning);
        }

        report.record(CHECK_ID_NUMBER, check_id_number(country, fields));
        report.record(CHECK_DATE_OF_BIRTH, check_date_of_birth(fields));
        report.record(CHECK_FULL_NAME, check_full_name(fields));

        if let Some(gender) = fields.gender.as_deref() {
            let g = gender.trim().to_uppercase();
            if !matches!(g.as_str(), "M" | "F" | "MALE" | "FEMALE") {
                report
                    .warnings
                    .insert(format!("gender '{}' is not M or F", gender.trim()));
            }
        }
        if let Some(nationality) = fields.nationality.as_deref() {
            if !country.matches_nationality(nationality) {
                report.warnings.insert(format!(
                    "nationality '{}' does not match {}",
                    nationality.trim(),
                    country.name()
                ));
            }
        }

        report.finish()
    }

    /// [`validate`](Self::validate) plus an expiry warning relative to `today`.
    pub fn validate_on(
        &self,
        country_code: &str,
        fields: &IdentityFields,
        today: Date,
    ) -> ValidationReport {
        let mut report = self.validate(country_code, fields);
        if let Some(expiry) = fields.expiry_date.as_deref().and_then(parse_document_date) {
            if expiry < today {
                report
                    .warnings
                    .insert(format!("document expired on {}", expiry));
            }
        }
        report
    }
}

fn check_id_number(country: Country, fields: &IdentityFields) -> Result<(), String> {
    let raw = fields
        .id_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing".to_string())?;
    let rule = country.id_rule();
    let normalized = IdNumberRule::normalize(raw);
    if rule.matches(&normalized) {
        Ok(())
    } else {
        Err(format!(
            "'{}' does not match {} format ({})",
            raw,
            country,
            rule.describe()
        ))
    }
}

fn check_date_of_birth(fields: &IdentityFields) -> Result<(), String> {
    let dob = fields
        .date_of_birth
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing".to_string())?;
    if dob.chars().count() >= MIN_DATE_OF_BIRTH_LEN {
        Ok(())
    } else {
        Err(format!("'{}' is too short to be a date", dob))
    }
}

fn check_full_name(fields: &IdentityFields) -> Result<(), String> {
    let name = fields
        .resolved_full_name()
        .ok_or_else(|| "missing".to_string())?;
    if name.trim().chars().count() > MIN_FULL_NAME_LEN {
        Ok(())
    } else {
        Err(format!("'{}' is too short", name.trim()))
    }
}

/// Parse the date layouts printed on SADC documents: `DD/MM/YYYY`,
/// `DD.MM.YYYY`, `DD-MM-YYYY` and ISO `YYYY-MM-DD`.
pub fn parse_document_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    let iso = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(raw, &iso) {
        return Some(date);
    }
    let normalized: String = raw
        .chars()
        .map(|c| if c == '.' || c == '-' { '/' } else { c })
        .collect();
    let dmy = format_description!("[day]/[month]/[year]");
    Date::parse(&normalized, &dmy).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn namibian_fields() -> IdentityFields {
        IdentityFields {
            id_number: Some("85010112345".into()),
            full_name: Some("Ndapewa Shikongo".into()),
            date_of_birth: Some("01/01/1985".into()),
            ..Default::default()
        }
    }

    #[test]
    fn clean_namibian_fields_score_one() {
        let report = SadcValidator::default().validate("NA", &namibian_fields());
        assert_eq!(report.country, Country::Namibia);
        assert_eq!(report.score, 1.0);
        assert!(report.failed_checks.is_empty());
        assert_eq!(report.passed_checks.len(), 3);
        assert!(report.passed());
    }

    #[test]
    fn wrong_length_id_fails_format() {
        let mut fields = namibian_fields();
        fields.id_number = Some("8501011234".into());
        let report = SadcValidator::default().validate("NA", &fields);
        assert!(report.failed_checks.contains(CHECK_ID_NUMBER));
        assert!((report.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.starts_with("id_number:") && w.contains("11 digits")));
    }

    #[test]
    fn spaced_id_number_is_normalized() {
        let mut fields = namibian_fields();
        fields.id_number = Some("850101 12345".into());
        let report = SadcValidator::default().validate("NA", &fields);
        assert!(report.passed_checks.contains(CHECK_ID_NUMBER));
    }

    #[test]
    fn south_african_and_botswana_lengths() {
        let v = SadcValidator::default();
        let mut fields = namibian_fields();
        fields.id_number = Some("8501015009087".into());
        assert!(v.validate("ZA", &fields).passed_checks.contains(CHECK_ID_NUMBER));
        assert!(v.validate("BW", &fields).failed_checks.contains(CHECK_ID_NUMBER));
        fields.id_number = Some("123456789".into());
        assert!(v.validate("BW", &fields).passed_checks.contains(CHECK_ID_NUMBER));
        assert!(v.validate("ZM", &fields).passed_checks.contains(CHECK_ID_NUMBER));
    }

    #[test]
    fn empty_fields_score_zero() {
        let report = SadcValidator::default().validate("ZA", &IdentityFields::default());
        assert_eq!(report.score, 0.0);
        assert_eq!(report.failed_checks.len(), 3);
        assert!(!report.passed());
    }

    #[test]
    fn unknown_country_uses_default_rules() {
        let report = SadcValidator::default().validate("XX", &namibian_fields());
        assert_eq!(report.country, Country::Namibia);
        assert_eq!(report.score, 1.0);
        assert!(report.warnings.iter().any(|w| w.contains("unknown country")));
    }

    #[test]
    fn short_name_and_date_fail() {
        let fields = IdentityFields {
            id_number: Some("85010112345".into()),
            full_name: Some(" Al ".into()),
            date_of_birth: Some("1/1/85".into()),
            ..Default::default()
        };
        let report = SadcValidator::default().validate("NA", &fields);
        assert!(report.failed_checks.contains(CHECK_FULL_NAME));
        assert!(report.failed_checks.contains(CHECK_DATE_OF_BIRTH));
    }

    #[test]
    fn warnings_do_not_change_score() {
        let mut fields = namibian_fields();
        fields.gender = Some("X".into());
        fields.nationality = Some("Zambian".into());
        let report = SadcValidator::default().validate("NA", &fields);
        assert_eq!(report.score, 1.0);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn expired_document_warns() {
        let mut fields = namibian_fields();
        fields.expiry_date = Some("31/12/2020".into());
        let report = SadcValidator::default().validate_on("NA", &fields, date!(2026 - 01 - 01));
        assert_eq!(report.score, 1.0);
        assert!(report.warnings.iter().any(|w| w.contains("expired")));
    }

    #[test]
    fn validation_is_deterministic() {
        let v = SadcValidator::default();
        let fields = namibian_fields();
        assert_eq!(v.validate("NA", &fields), v.validate("NA", &fields));
    }

    #[test]
    fn parses_document_dates() {
        assert_eq!(parse_document_date("2030-06-15"), Some(date!(2030 - 06 - 15)));
        assert_eq!(parse_document_date("15.06.2030"), Some(date!(2030 - 06 - 15)));
        assert_eq!(parse_document_date("15/06/2030"), Some(date!(2030 - 06 - 15)));
        assert_eq!(parse_document_date("June 2030"), None);
    }
}
