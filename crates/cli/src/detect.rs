use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kyc_core::detect_by_keywords;
use kyc_engine::{CallContext, CountryDetector, LlmCountryClassifier};

use crate::{load_config, print_json, read_file, runtime, OutputFormat};

pub(crate) fn cmd_detect(file: &Path, config: Option<&Path>, output: OutputFormat, quiet: bool) {
    let config = load_config(config, output, quiet);
    let text = read_file(file, output, quiet);

    let mut detector = CountryDetector::new()
        .with_keyword_threshold(config.detection.keyword_threshold);
    if let Ok(country) = config.default_country() {
        detector = detector.with_default_country(country);
    }
    if let Some(client) = crate::run::llm_from_env() {
        detector = detector.with_classifier(Arc::new(LlmCountryClassifier::new(
            client,
            config.llm.model.clone(),
        )));
    }

    let ctx = CallContext::new(Duration::from_millis(config.timeouts.agent_ms));
    let detection = runtime(output, quiet).block_on(detector.detect(&text, None, &ctx));
    let keywords = detect_by_keywords(&text);

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "country": detection.country,
            "name": detection.country.name(),
            "confidence": detection.confidence,
            "method": detection.method,
            "matched_keywords": keywords.matched_keywords,
        })),
        OutputFormat::Text => {
            println!(
                "{} ({}) confidence {:.2} via {}",
                detection.country.code(),
                detection.country.name(),
                detection.confidence,
                detection.method
            );
            if !keywords.matched_keywords.is_empty() {
                println!("  keywords: {}", keywords.matched_keywords.join(", "));
            }
        }
    }
}
