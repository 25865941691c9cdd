pub mod extractor;
pub mod inference;
pub mod pipeline;
pub mod resolver;
pub mod response;
pub mod rules;

pub use extractor::{AiExtractor, ExtractorError, GeminiExtractor, MockExtractor, MockReply};
pub use inference::infer_subject;
pub use pipeline::{fill_gaps, AiFailure, AiOutcome, LetterPipeline};
pub use resolver::FallbackResolver;
pub use response::{parse_reply, ResponseError};
pub use rules::{ExtractionRule, PatternLibrary};
