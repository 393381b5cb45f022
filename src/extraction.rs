use base64::{Engine as _, engine::general_purpose};

use crate::models::{ClientResponse, DecorationResult};

pub const FALLBACK_EXPLANATION: &str =
    "Unable to generate a decorated image; returning the original photo.";
pub const DEFAULT_EXPLANATION: &str = "Christmas decorations applied to your room.";

/// The first inline image of `response` together with its leading text.
///
/// Returns `None` when the response carries no base64 image. The explanation is
/// empty when the response has no text.
pub fn extract_image(response: &ClientResponse) -> Option<(String, String)> {
    let image = response.primary_image()?.to_base64();
    let explanation = response.primary_text().unwrap_or_default().to_string();
    Some((image, explanation))
}

/// Builds the final payload, falling back to `original` when no image was produced.
pub fn finalize(response: &ClientResponse, original: &[u8]) -> DecorationResult {
    let explanation = |fallback: &str| {
        response
            .primary_text()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };

    match extract_image(response) {
        Some((image_base64, _)) => DecorationResult {
            image_base64,
            explanation: explanation(DEFAULT_EXPLANATION),
        },
        None => DecorationResult {
            image_base64: general_purpose::STANDARD.encode(original),
            explanation: explanation(FALLBACK_EXPLANATION),
        },
    }
}
