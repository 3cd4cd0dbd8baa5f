//! Regex field extraction: the last tier of the field extraction chain.
//!
//! Always returns a result. Confidence is fixed and low: 0.3 with no key
//! field found, plus 0.1 for each of ID number, name and date of birth,
//! capped at 0.6.

use std::sync::LazyLock;

use regex::Regex;

use crate::country::{Country, IdNumberRule};
use crate::fields::{FieldExtraction, IdentityFields};

/// Method tag reported by this tier.
pub const REGEX_METHOD: &str = "regex_fallback";

pub const REGEX_BASE_CONFIDENCE: f64 = 0.3;
pub const REGEX_PER_FIELD_CONFIDENCE: f64 = 0.1;
pub const REGEX_MAX_CONFIDENCE: f64 = 0.6;

const DATE: &str = r"(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{4}|\d{4}[/.\-]\d{1,2}[/.\-]\d{1,2}|\d{1,2}[ \t]+[A-Za-z]{3,9}[ \t]+\d{4})";

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("built-in pattern {:?} does not compile: {}", pattern, e),
    }
}

/// Value printed on the same line as one of the given labels.
fn labelled_line(labels: &str) -> Regex {
    compile(&format!(
        r"(?im)^[ \t]*(?:{})\b[ \t]*[:\-]?[ \t]*(\S.*?)[ \t]*$",
        labels
    ))
}

fn labelled_date(labels: &str) -> Regex {
    compile(&format!(r"(?i)(?:{})[ \t]*[:\-]?[ \t]*{}", labels, DATE))
}

static SURNAME: LazyLock<Regex> =
    LazyLock::new(|| labelled_line(r"SURNAME|LAST[ \t]*NAME|FAMILY[ \t]*NAME|APELIDO"));
static FIRST_NAMES: LazyLock<Regex> = LazyLock::new(|| {
    labelled_line(r"FIRST[ \t]*NAMES?|FORENAMES?|GIVEN[ \t]*NAMES?|NAMES|NOMES?")
});
static FULL_NAME: LazyLock<Regex> = LazyLock::new(|| labelled_line(r"FULL[ \t]*NAME|NAME"));
static NATIONALITY: LazyLock<Regex> =
    LazyLock::new(|| labelled_line(r"NATIONALITY|CITIZENSHIP|NACIONALIDADE"));
static PLACE_OF_BIRTH: LazyLock<Regex> =
    LazyLock::new(|| labelled_line(r"PLACE[ \t]*OF[ \t]*BIRTH"));
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| labelled_line(r"RESIDENTIAL[ \t]*ADDRESS|ADDRESS"));
static DATE_OF_BIRTH: LazyLock<Regex> = LazyLock::new(|| {
    labelled_date(
        r"DATE[ \t]*OF[ \t]*BIRTH|BIRTH[ \t]*DATE|D\.?O\.?B\.?|DATA[ \t]*DE[ \t]*NASCIMENTO",
    )
});
static ISSUE_DATE: LazyLock<Regex> =
    LazyLock::new(|| labelled_date(r"DATE[ \t]*OF[ \t]*ISSUE|ISSUE[ \t]*DATE|ISSUED"));
static EXPIRY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    labelled_date(r"DATE[ \t]*OF[ \t]*EXPIRY|EXPIRY[ \t]*DATE|EXPIRES|VALID[ \t]*UNTIL")
});
static LABELLED_ID: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)\b(?:ID|IDENTITY|PERSONAL|NATIONAL)[ \t]*(?:NO|NUMBER|NUMMER|NUM)?\.?[ \t]*[:#]?[ \t]*([0-9][0-9 \-]{5,20}[0-9])",
    )
});
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\b(\d+)\b"));
static GENDER: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:SEX|GENDER)[ \t]*[:\-]?[ \t]*(MALE|FEMALE|M|F)\b")
});

/// First capture group of the first match, trimmed.
fn capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    let value = caps.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Find an ID number that satisfies the country's rule, preferring a
/// labelled value over a bare digit run.
fn id_number(text: &str, country: Country) -> Option<String> {
    let rule = country.id_rule();

    let labelled = capture(&LABELLED_ID, text)
        .map(|raw| IdNumberRule::normalize(&raw))
        .filter(|id| rule.matches(id));
    if labelled.is_some() {
        return labelled;
    }

    DIGIT_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|run| (rule.min_digits..=rule.max_digits).contains(&run.len()))
        .map(str::to_string)
}

fn gender(text: &str) -> Option<String> {
    let raw = capture(&GENDER, text)?;
    match raw.to_uppercase().as_str() {
        "M" | "MALE" => Some("M".to_string()),
        "F" | "FEMALE" => Some("F".to_string()),
        _ => None,
    }
}

/// Extract identity fields from raw document text with fixed patterns.
pub fn extract_fields(text: &str, country: Country) -> FieldExtraction {
    let fields = IdentityFields {
        id_number: id_number(text, country),
        full_name: capture(&FULL_NAME, text),
        first_name: capture(&FIRST_NAMES, text),
        last_name: capture(&SURNAME, text),
        date_of_birth: capture(&DATE_OF_BIRTH, text),
        gender: gender(text),
        nationality: capture(&NATIONALITY, text),
        issue_date: capture(&ISSUE_DATE, text),
        expiry_date: capture(&EXPIRY_DATE, text),
        place_of_birth: capture(&PLACE_OF_BIRTH, text),
        address: capture(&ADDRESS, text),
    }
    .cleaned();

    let confidence = (REGEX_BASE_CONFIDENCE
        + REGEX_PER_FIELD_CONFIDENCE * fields.key_fields_found() as f64)
        .min(REGEX_MAX_CONFIDENCE);

    FieldExtraction {
        fields,
        confidence,
        method: REGEX_METHOD.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMIBIAN_CARD: &str = "REPUBLIC OF NAMIBIA
NATIONAL IDENTITY CARD
ID NO: 850101 12345
SURNAME: SHIKONGO
FIRST NAMES: NDAPEWA MARIA
DATE OF BIRTH: 01/01/1985
SEX: F
PLACE OF BIRTH: OSHAKATI
NATIONALITY: NAMIBIAN
DATE OF ISSUE: 12/03/2015";

    #[test]
    fn extracts_namibian_card() {
        let out = extract_fields(NAMIBIAN_CARD, Country::Namibia);
        let f = &out.fields;
        assert_eq!(f.id_number.as_deref(), Some("85010112345"));
        assert_eq!(f.last_name.as_deref(), Some("SHIKONGO"));
        assert_eq!(f.first_name.as_deref(), Some("NDAPEWA MARIA"));
        assert_eq!(f.date_of_birth.as_deref(), Some("01/01/1985"));
        assert_eq!(f.gender.as_deref(), Some("F"));
        assert_eq!(f.place_of_birth.as_deref(), Some("OSHAKATI"));
        assert_eq!(f.nationality.as_deref(), Some("NAMIBIAN"));
        assert_eq!(f.issue_date.as_deref(), Some("12/03/2015"));
        assert_eq!(out.method, REGEX_METHOD);
        assert!((out.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn bare_id_number_uses_country_length() {
        let text = "SOUTH AFRICA 8501015009087 other 1234";
        let out = extract_fields(text, Country::SouthAfrica);
        assert_eq!(out.fields.id_number.as_deref(), Some("8501015009087"));

        // 13 digits do not satisfy the 9-digit Botswana rule
        let out = extract_fields(text, Country::Botswana);
        assert_eq!(out.fields.id_number, None);
    }

    #[test]
    fn empty_text_gives_base_confidence() {
        let out = extract_fields("", Country::Namibia);
        assert!(out.fields.is_empty());
        assert!((out.confidence - REGEX_BASE_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn confidence_stays_within_band() {
        for text in ["", "NAME: A B", NAMIBIAN_CARD, "DOB 1985-01-01"] {
            let c = extract_fields(text, Country::Namibia).confidence;
            assert!((0.3..=REGEX_MAX_CONFIDENCE).contains(&c), "confidence {}", c);
        }
    }

    #[test]
    fn gender_words_normalized() {
        assert_eq!(gender("Gender: Male").as_deref(), Some("M"));
        assert_eq!(gender("SEX - FEMALE").as_deref(), Some("F"));
        assert_eq!(gender("no marker here"), None);
    }

    #[test]
    fn textual_dates_recognized() {
        let out = extract_fields("Date of Birth: 14 March 1990", Country::Zambia);
        assert_eq!(out.fields.date_of_birth.as_deref(), Some("14 March 1990"));
    }

    #[test]
    fn bare_id_skips_runs_of_the_wrong_length() {
        let out = extract_fields("ref 12 then 123456789 then 42", Country::Botswana);
        assert_eq!(out.fields.id_number.as_deref(), Some("123456789"));
    }

    #[test]
    fn repeated_calls_agree() {
        let first = extract_fields(NAMIBIAN_CARD, Country::Namibia);
        let second = extract_fields(NAMIBIAN_CARD, Country::Namibia);
        assert_eq!(first, second);
    }

    #[test]
    fn full_name_label_read() {
        let out = extract_fields("NAME: THABO MOKOENA\n", Country::Lesotho);
        assert_eq!(out.fields.full_name.as_deref(), Some("THABO MOKOENA"));
    }
}
