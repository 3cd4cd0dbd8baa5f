//! Identity field schema shared by every extraction tier.

use serde::{Deserialize, Serialize};

/// Structured identity fields read from a document. Every field is optional;
/// extraction tiers fill in whatever they can find.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityFields {
    pub id_number: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub issue_date: Option<String>,
    pub expiry_date: Option<String>,
    pub place_of_birth: Option<String>,
    pub address: Option<String>,
}

/// Trim a candidate value, mapping blank strings to `None`.
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl IdentityFields {
    /// Trim every field and drop the blank ones.
    pub fn cleaned(self) -> Self {
        IdentityFields {
            id_number: clean(self.id_number),
            full_name: clean(self.full_name),
            first_name: clean(self.first_name),
            last_name: clean(self.last_name),
            date_of_birth: clean(self.date_of_birth),
            gender: clean(self.gender),
            nationality: clean(self.nationality),
            issue_date: clean(self.issue_date),
            expiry_date: clean(self.expiry_date),
            place_of_birth: clean(self.place_of_birth),
            address: clean(self.address),
        }
    }

    /// The holder's full name, composed from first and last names when no
    /// full name was read directly.
    pub fn resolved_full_name(&self) -> Option<String> {
        if let Some(full) = self.full_name.as_deref().map(str::trim) {
            if !full.is_empty() {
                return Some(full.to_string());
            }
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Number of the three key fields (ID number, name, date of birth) present.
    pub fn key_fields_found(&self) -> usize {
        [
            self.id_number.is_some(),
            self.resolved_full_name().is_some(),
            self.date_of_birth.is_some(),
        ]
        .into_iter()
        .filter(|found| *found)
        .count()
    }

    /// Total number of populated fields.
    pub fn populated(&self) -> usize {
        [
            &self.id_number,
            &self.full_name,
            &self.first_name,
            &self.last_name,
            &self.date_of_birth,
            &self.gender,
            &self.nationality,
            &self.issue_date,
            &self.expiry_date,
            &self.place_of_birth,
            &self.address,
        ]
        .into_iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.populated() == 0
    }
}

/// Fields plus the confidence and method of the tier that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldExtraction {
    pub fields: IdentityFields,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub method: String,
}

/// Clamp an arbitrary score into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
