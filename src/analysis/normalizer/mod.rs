//! Turns whatever the model replied into one canonical [`AnalysisResult`].
//!
//! Decoding walks a ladder and stops at the first rung that succeeds:
//! strict JSON, flexible JSON, labelled key-value text with all core fields,
//! any labelled subset, and finally a fixed fallback record. Fields still
//! missing after the winning rung are backfilled from an independent
//! key-value scan of the same text. Sanitization then runs on every result.

mod fields;
mod key_value;
mod sanitize;
mod structured;

use tracing::debug;

pub use fields::Field;

use crate::analysis::result::AnalysisResult;
use fields::Draft;

/// Which rung of the ladder produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Strict,
    Flexible,
    KeyValue,
    Loose,
    Fallback,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultNormalizer;

impl ResultNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Total: every input, including empty or hostile text, yields a result.
    pub fn normalize(&self, raw: &str) -> AnalysisResult {
        self.normalize_with_stage(raw).0
    }

    pub fn normalize_with_stage(&self, raw: &str) -> (AnalysisResult, DecodeStage) {
        let (mut draft, stage) = decode(raw);
        if stage != DecodeStage::Fallback {
            draft.backfill(&key_value::decode(raw));
        }
        debug!("Decoded model reply at {:?} stage", stage);
        (sanitize::sanitize(draft, raw), stage)
    }
}

fn decode(raw: &str) -> (Draft, DecodeStage) {
    let candidates = structured::json_candidates(raw);
    if let Some(draft) = candidates.iter().find_map(|c| structured::decode_strict(c)) {
        return (draft, DecodeStage::Strict);
    }
    if let Some(draft) = candidates.iter().find_map(|c| structured::decode_flexible(c)) {
        return (draft, DecodeStage::Flexible);
    }

    let draft = key_value::decode(raw);
    if draft.has_core_fields() {
        (draft, DecodeStage::KeyValue)
    } else if !draft.is_empty() {
        (draft, DecodeStage::Loose)
    } else {
        (Draft::fallback(), DecodeStage::Fallback)
    }
}
