//! Standard assertion builders.

use serde_json::json;

use super::Assertion;
use crate::types::Location;

pub const LOCATION_LABEL: &str = "stds.exif";
pub const TRAINING_MINING_LABEL: &str = "c2pa.training-mining";
pub const CREATIVE_WORK_LABEL: &str = "stds.schema-org.CreativeWork";

pub const AI_INFERENCE: &str = "c2pa.ai_inference";
pub const AI_GENERATIVE_TRAINING: &str = "c2pa.ai_generative_training";

/// GPS position of the capture, as EXIF fields.
pub fn location(location: &Location) -> Assertion {
    Assertion::new(
        LOCATION_LABEL,
        json!({
            "@context": { "exif": "http://ns.adobe.com/exif/1.0/" },
            "exif:GPSLatitude": location.latitude.to_string(),
            "exif:GPSLongitude": location.longitude.to_string(),
            "exif:GPSTimeStamp": location.timestamp.to_rfc3339(),
        }),
    )
}

/// AI training and inference permission. Exactly two variants exist.
pub fn training_mining(allowed: bool) -> Assertion {
    let usage = if allowed { "allowed" } else { "notAllowed" };
    Assertion::new(
        TRAINING_MINING_LABEL,
        json!({
            "entries": {
                AI_INFERENCE: { "use": usage },
                AI_GENERATIVE_TRAINING: { "use": usage },
            }
        }),
    )
}

/// Schema.org CreativeWork naming the author.
pub fn creative_work(author: &str) -> Assertion {
    Assertion::new(
        CREATIVE_WORK_LABEL,
        json!({
            "@context": "https://schema.org",
            "@type": "CreativeWork",
            "author": [{ "@type": "Person", "name": author }],
        }),
    )
}
