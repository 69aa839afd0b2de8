//! Deployment identifier generation and validation
//!
//! A deployment id doubles as a storage prefix, a bus topic suffix and a DNS
//! subdomain label, so every id must be a valid lowercase DNS label.

use uuid::Uuid;

use crate::errors::PipelineError;

/// Maximum length of a DNS label
pub const MAX_SLUG_LEN: usize = 63;

const ADJECTIVES: [&str; 32] = [
    "amber", "bold", "brave", "bright", "calm", "clever", "cosmic", "crisp",
    "dusty", "eager", "fancy", "gentle", "golden", "happy", "hidden", "icy",
    "jolly", "kind", "lively", "lucky", "mellow", "misty", "noble", "proud",
    "quiet", "rapid", "rustic", "shiny", "silent", "sunny", "swift", "witty",
];

const NOUNS: [&str; 32] = [
    "badger", "breeze", "canyon", "cedar", "comet", "coral", "falcon", "fern",
    "forest", "glacier", "harbor", "heron", "island", "lagoon", "lantern", "maple",
    "meadow", "nebula", "otter", "panda", "pebble", "pine", "planet", "raven",
    "river", "rocket", "sparrow", "summit", "thunder", "tiger", "valley", "willow",
];

/// Generate a fresh, human-readable deployment slug.
///
/// Shape: `<adjective>-<noun>-<8 hex chars>`. The hex suffix carries 32 bits
/// of v4 UUID randomness on top of the 10 bits from the words.
pub fn generate_slug() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let adjective = ADJECTIVES[(bytes[0] as usize) % ADJECTIVES.len()];
    let noun = NOUNS[(bytes[1] as usize) % NOUNS.len()];
    let suffix = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    format!("{}-{}-{:08x}", adjective, noun, suffix)
}

/// Check that a caller-provided slug is usable as a DNS label.
pub fn validate_slug(slug: &str) -> Result<(), PipelineError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(PipelineError::ValidationError(format!(
            "slug must be 1-{} characters long",
            MAX_SLUG_LEN
        )));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(PipelineError::ValidationError(
            "slug must not start or end with '-'".to_string(),
        ));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PipelineError::ValidationError(format!(
            "slug '{}' may only contain lowercase letters, digits and '-'",
            slug
        )));
    }
    Ok(())
}
