//! Classify command implementation

use crate::cli::output::{format_tier, format_tier_json};
use crate::cli::ClassifyArgs;
use crate::config::PacerConfig;

/// Handle `pacer classify` command
pub fn handle_classify(args: &ClassifyArgs) -> Result<String, Box<dyn std::error::Error>> {
    let config = if args.config.exists() {
        PacerConfig::load(Some(&args.config))?
    } else {
        PacerConfig::default()
    };
    config.validate()?;

    let matched = config.endpoints.matching_key(&args.endpoint);
    let tier = config.endpoints.classify(&args.endpoint);

    if args.json {
        Ok(format_tier_json(&args.endpoint, matched, tier))
    } else {
        Ok(format_tier(&args.endpoint, matched, tier))
    }
}
