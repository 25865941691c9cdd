use std::time::Duration;

use lettermark_core::{
    blend, degrade, AiExtraction, ExtractionReport, Field, FieldCandidate, FieldSet, FieldSource,
    PipelineSettings, RawDocument, StructuredRecord,
};
use thiserror::Error;

use crate::extractor::{AiExtractor, ExtractorError};
use crate::inference::infer_subject;
use crate::resolver::FallbackResolver;
use crate::response::{self, ResponseError};

/// Why the extractor's result could not be used.
#[derive(Debug, Error)]
pub enum AiFailure {
    #[error("extractor call failed: {0}")]
    Transport(#[from] ExtractorError),
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed extractor reply: {0}")]
    Malformed(#[from] ResponseError),
}

/// Outcome of the single extractor call of a pipeline run.
#[derive(Debug)]
pub enum AiOutcome {
    Parsed(AiExtraction),
    Failed(AiFailure),
}

/// Fill every empty slot in `fields` from the fallback rules; a subject the
/// rules cannot find falls through to keyword inference. Populated slots are
/// never touched.
pub fn fill_gaps(resolver: &FallbackResolver<'_>, text: &str, fields: &mut FieldSet<Option<FieldCandidate>>) {
    for field in Field::ALL {
        let slot = fields.get_mut(field);
        if slot.is_some() {
            continue;
        }
        if let Some((order, value)) = resolver.resolve_with_order(field, text) {
            tracing::debug!(%field, rule = order, "filled from pattern");
            *slot = Some(FieldCandidate::new(value, FieldSource::Pattern));
        } else if field == Field::Subject {
            if let Some(label) = infer_subject(text) {
                tracing::debug!(%field, label, "filled from keyword");
                *slot = Some(FieldCandidate::new(label, FieldSource::Keyword));
            }
        }
    }
}

/// Orchestrates: extractor call → defensive parse → per-field fallback → confidence.
pub struct LetterPipeline<'lib, E: AiExtractor> {
    extractor: E,
    resolver: FallbackResolver<'lib>,
    timeout: Duration,
    settings: PipelineSettings,
}

impl<E: AiExtractor> LetterPipeline<'static, E> {
    /// Pipeline over the built-in rule table.
    pub fn new(extractor: E, timeout: Duration) -> Self {
        Self::with_resolver(extractor, FallbackResolver::standard(), timeout)
    }
}

impl<'lib, E: AiExtractor> LetterPipeline<'lib, E> {
    pub fn with_resolver(extractor: E, resolver: FallbackResolver<'lib>, timeout: Duration) -> Self {
        Self {
            extractor,
            resolver,
            timeout,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Call the extractor once, bounded by the timeout, and parse its reply.
    pub async fn invoke(&self, text: &str) -> AiOutcome {
        let reply = match tokio::time::timeout(self.timeout, self.extractor.extract(text)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return AiOutcome::Failed(e.into()),
            Err(_) => return AiOutcome::Failed(AiFailure::Timeout(self.timeout)),
        };
        match response::parse_reply(&reply) {
            Ok(parsed) => AiOutcome::Parsed(parsed),
            Err(e) => AiOutcome::Failed(e.into()),
        }
    }

    pub async fn process(&self, doc: &RawDocument) -> StructuredRecord {
        self.process_detailed(doc).await.record
    }

    /// Run the whole pipeline. Never fails: every path ends in a record.
    pub async fn process_detailed(&self, doc: &RawDocument) -> ExtractionReport {
        let outcome = self.invoke(&doc.text).await;

        let (mut fields, confidence, ai_succeeded) = match outcome {
            AiOutcome::Parsed(ai) => {
                let mut fields = FieldSet::default();
                for field in Field::ALL {
                    *fields.get_mut(field) =
                        ai.get(field).map(|v| FieldCandidate::new(v, FieldSource::Ai));
                }
                (fields, blend(ai.confidence, doc.ocr_confidence), true)
            }
            AiOutcome::Failed(reason) => {
                tracing::warn!("Extractor unavailable, degrading confidence: {reason}");
                (FieldSet::default(), degrade(doc.ocr_confidence), false)
            }
        };

        if ai_succeeded || self.settings.fallback_on_failure {
            fill_gaps(&self.resolver, &doc.text, &mut fields);
        }

        let record = StructuredRecord::from_candidates(&fields, confidence);
        let sources = fields.map(|c| c.map(|c| c.source));
        tracing::info!(
            filled = record.filled_count(),
            confidence = record.confidence,
            ai_succeeded,
            "letter fields extracted"
        );

        ExtractionReport { record, sources, ai_succeeded }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::MockExtractor;
    use crate::rules::{ExtractionRule, PatternLibrary};

    const EPS: f32 = 1e-5;
    const TIMEOUT: Duration = Duration::from_secs(5);

    const ALL_NULL: &str =
        r#"{"from": null, "to": null, "date": null, "subject": null, "confidence_score": 0.0}"#;

    const VISA_LETTER: &str = "\
Dear Sir,

Subject: Visa Extension Request

We kindly ask for an extension of the business visa issued to our engineer.

Sincerely,
for Acme Trading Ltd
";

    const MEETING_LETTER: &str = "\
Dear Ms. Rao,

We would like to arrange a meeting with your team next week to discuss the supply contract.

Best wishes,
Tom
";

    fn pipeline(extractor: MockExtractor) -> LetterPipeline<'static, MockExtractor> {
        LetterPipeline::new(extractor, TIMEOUT)
    }

    // ── Scenarios ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn all_null_reply_is_filled_from_patterns() {
        let p = pipeline(MockExtractor::replying(ALL_NULL));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.9)).await;
        let r = &report.record;

        assert!(report.ai_succeeded);
        assert_eq!(r.from.as_deref(), Some("Acme Trading Ltd"));
        assert_eq!(r.subject.as_deref(), Some("Visa Extension Request"));
        assert_eq!(r.to, None);
        assert_eq!(r.date, None);
        assert!((r.confidence - 0.36).abs() < EPS, "confidence was {}", r.confidence);
        assert_eq!(report.sources.from, Some(FieldSource::Pattern));
        assert_eq!(report.sources.subject, Some(FieldSource::Pattern));
        assert_eq!(report.sources.to, None);
    }

    #[tokio::test]
    async fn timeout_yields_empty_record_with_degraded_confidence() {
        let p = LetterPipeline::new(MockExtractor::hanging(), Duration::from_millis(20));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.8)).await;

        assert!(!report.ai_succeeded);
        assert_eq!(report.record.filled_count(), 0);
        assert!((report.record.confidence - 0.4).abs() < EPS);
        assert_eq!(report.sources, FieldSet::default());
    }

    #[tokio::test]
    async fn keyword_inference_runs_after_subject_rules_fail() {
        let p = pipeline(MockExtractor::replying(ALL_NULL));
        let report = p.process_detailed(&RawDocument::new(MEETING_LETTER, 0.7)).await;

        assert_eq!(report.record.subject.as_deref(), Some("Meeting Request"));
        assert_eq!(report.sources.subject, Some(FieldSource::Keyword));
    }

    #[tokio::test]
    async fn complete_ai_result_needs_no_fallback() {
        let reply = r#"```json
{"from": "Orion Exports Ltd", "to": "Embassy of Japan", "date": "2024-07-12", "subject": "Business visa", "confidence_score": 0.95}
```"#;
        let p = pipeline(MockExtractor::replying(reply));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.85)).await;
        let r = &report.record;

        assert_eq!(r.from.as_deref(), Some("Orion Exports Ltd"));
        assert_eq!(r.to.as_deref(), Some("Embassy of Japan"));
        assert_eq!(r.date.as_deref(), Some("2024-07-12"));
        assert_eq!(r.subject.as_deref(), Some("Business visa"));
        assert!((r.confidence - 0.91).abs() < EPS, "confidence was {}", r.confidence);
        for field in Field::ALL {
            assert_eq!(*report.sources.get(field), Some(FieldSource::Ai), "{field}");
        }
    }

    // ── Failure paths ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transport_failure_skips_fallback_by_default() {
        let p = pipeline(MockExtractor::failing("connection reset"));
        let record = p.process(&RawDocument::new(VISA_LETTER, 0.6)).await;

        assert_eq!(record.filled_count(), 0);
        assert!((record.confidence - 0.3).abs() < EPS);
        assert_eq!(p.extractor().calls(), 1);
    }

    #[tokio::test]
    async fn malformed_reply_is_treated_as_failure() {
        let p = pipeline(MockExtractor::replying("Sure! The sender is Acme."));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.9)).await;

        assert!(!report.ai_succeeded);
        assert_eq!(report.record.filled_count(), 0);
        assert!((report.record.confidence - 0.45).abs() < EPS);
    }

    #[tokio::test]
    async fn partially_valid_reply_is_not_trusted() {
        let reply = r#"{"from": "Acme Trading Ltd", "confidence_score": 0.9}"#;
        let p = pipeline(MockExtractor::replying(reply));
        let record = p.process(&RawDocument::new(VISA_LETTER, 0.9)).await;

        assert_eq!(record.from, None);
        assert!((record.confidence - 0.45).abs() < EPS);
    }

    #[tokio::test]
    async fn reply_missing_closing_fence_still_counts_as_success() {
        let reply = "```json\n{\"from\": \"Acme Ltd\", \"to\": null, \"date\": null, \"subject\": null, \"confidence_score\": 0.9}";
        let p = pipeline(MockExtractor::replying(reply));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.9)).await;

        assert!(report.ai_succeeded);
        assert_eq!(report.record.from.as_deref(), Some("Acme Ltd"));
        assert_eq!(report.sources.subject, Some(FieldSource::Pattern));
        assert!((report.record.confidence - 0.9).abs() < EPS, "confidence was {}", report.record.confidence);
    }

    #[tokio::test]
    async fn fallback_on_failure_policy_fills_fields_but_keeps_degraded_score() {
        let p = pipeline(MockExtractor::failing("503"))
            .with_settings(PipelineSettings { fallback_on_failure: true });
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.8)).await;

        assert!(!report.ai_succeeded);
        assert_eq!(report.record.from.as_deref(), Some("Acme Trading Ltd"));
        assert_eq!(report.record.subject.as_deref(), Some("Visa Extension Request"));
        assert!((report.record.confidence - 0.4).abs() < EPS);
    }

    #[tokio::test]
    async fn invoke_reports_failure_reason() {
        let p = LetterPipeline::new(MockExtractor::hanging(), Duration::from_millis(10));
        assert!(matches!(p.invoke("x").await, AiOutcome::Failed(AiFailure::Timeout(_))));

        let p = pipeline(MockExtractor::failing("down"));
        assert!(matches!(p.invoke("x").await, AiOutcome::Failed(AiFailure::Transport(_))));

        let p = pipeline(MockExtractor::replying("[1, 2]"));
        assert!(matches!(p.invoke("x").await, AiOutcome::Failed(AiFailure::Malformed(_))));

        let p = pipeline(MockExtractor::replying(ALL_NULL));
        assert!(matches!(p.invoke("x").await, AiOutcome::Parsed(_)));
    }

    // ── Fill-gaps policy ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn ai_values_are_never_overwritten() {
        let reply = r#"{"from": "Someone Else", "to": "null", "date": null, "subject": "Follow-up", "confidence_score": 0.5}"#;
        let p = pipeline(MockExtractor::replying(reply));
        let report = p.process_detailed(&RawDocument::new(VISA_LETTER, 0.5)).await;

        assert_eq!(report.record.from.as_deref(), Some("Someone Else"));
        assert_eq!(report.record.subject.as_deref(), Some("Follow-up"));
        assert_eq!(report.sources.from, Some(FieldSource::Ai));
        assert_eq!(report.sources.subject, Some(FieldSource::Ai));
    }

    #[test]
    fn fill_gaps_is_idempotent() {
        let resolver = FallbackResolver::standard();
        let mut fields = FieldSet::default();
        fill_gaps(&resolver, VISA_LETTER, &mut fields);
        let once = fields.clone();
        fill_gaps(&resolver, VISA_LETTER, &mut fields);
        assert_eq!(fields, once);
    }

    #[test]
    fn fill_gaps_prefers_embassy_over_to_label() {
        let resolver = FallbackResolver::standard();
        let text = "To: Visa Section Officer\nEmbassy of Japan\nDear Sir,";
        let mut fields = FieldSet::default();
        fill_gaps(&resolver, text, &mut fields);
        assert_eq!(
            fields.to,
            Some(FieldCandidate::new("Embassy of Japan", FieldSource::Pattern))
        );
    }

    #[tokio::test]
    async fn custom_resolver_is_used() {
        let lib = PatternLibrary::new(vec![ExtractionRule::new(
            Field::Date,
            1,
            r"Dated\s+(\S+)",
            1,
            4,
            20,
        )]);
        let p = LetterPipeline::with_resolver(
            MockExtractor::replying(ALL_NULL),
            FallbackResolver::new(&lib),
            TIMEOUT,
        );
        let record = p.process(&RawDocument::new("Dated 2024.07.12", 1.0)).await;
        assert_eq!(record.date.as_deref(), Some("2024.07.12"));
        assert_eq!(record.from, None);
    }

    #[tokio::test]
    async fn concurrent_runs_share_one_pipeline() {
        let p = pipeline(MockExtractor::replying(ALL_NULL));
        let a = RawDocument::new(VISA_LETTER, 0.9);
        let b = RawDocument::new(MEETING_LETTER, 0.9);
        let (ra, rb) = tokio::join!(p.process(&a), p.process(&b));
        assert_eq!(ra.subject.as_deref(), Some("Visa Extension Request"));
        assert_eq!(rb.subject.as_deref(), Some("Meeting Request"));
        assert_eq!(p.extractor().calls(), 2);
    }
}
