pub mod confidence;
pub mod config;
pub mod types;

pub use confidence::{blend, clamp_unit, degrade};
pub use config::{ConfigError, ExtractorSettings, PipelineSettings, Settings};
pub use types::{
    AiExtraction, ExtractionReport, Field, FieldCandidate, FieldSet, FieldSource, RawDocument,
    StructuredRecord,
};
