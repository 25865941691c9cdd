//! Confidence arithmetic. Nothing else in the workspace computes a score.

/// Weight of the extractor's self-reported confidence in a blend.
pub const AI_WEIGHT: f32 = 0.6;
/// Weight of the OCR confidence in a blend.
pub const OCR_WEIGHT: f32 = 0.4;
/// Factor applied to OCR confidence when the extractor fails outright.
pub const DEGRADE_FACTOR: f32 = 0.5;

/// Clamp to 0.0–1.0. Non-finite input counts as no confidence at all.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Score for a run where the extractor replied with a usable result.
pub fn blend(ai_confidence: f32, ocr_confidence: f32) -> f32 {
    clamp_unit(AI_WEIGHT * clamp_unit(ai_confidence) + OCR_WEIGHT * clamp_unit(ocr_confidence))
}

/// Score for a run where the extractor failed. Always below `blend(1.0, ocr)`.
pub fn degrade(ocr_confidence: f32) -> f32 {
    clamp_unit(DEGRADE_FACTOR * clamp_unit(ocr_confidence))
}
