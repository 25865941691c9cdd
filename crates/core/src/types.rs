use serde::{Deserialize, Serialize};
use std::fmt;

use crate::confidence::clamp_unit;

/// One of the four fields pulled out of a business letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    From,
    To,
    Date,
    Subject,
}

impl Field {
    /// Every field, in the order records are assembled and reported.
    pub const ALL: [Field; 4] = [Field::From, Field::To, Field::Date, Field::Subject];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::From => "from",
            Field::To => "to",
            Field::Date => "date",
            Field::Subject => "subject",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Field {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "from" | "sender" => Ok(Field::From),
            "to" | "recipient" => Ok(Field::To),
            "date" => Ok(Field::Date),
            "subject" => Ok(Field::Subject),
            other => Err(format!("Unknown field: '{other}'")),
        }
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Supplied by the external extractor.
    Ai,
    /// Matched by a fallback rule.
    Pattern,
    /// Inferred from a keyword in the text (subject only).
    Keyword,
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSource::Ai => write!(f, "ai"),
            FieldSource::Pattern => write!(f, "pattern"),
            FieldSource::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub value: String,
    pub source: FieldSource,
}

impl FieldCandidate {
    pub fn new(value: impl Into<String>, source: FieldSource) -> Self {
        Self { value: value.into(), source }
    }
}

/// A value per letter field, addressable by [`Field`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet<T> {
    pub from: T,
    pub to: T,
    pub date: T,
    pub subject: T,
}

impl<T> FieldSet<T> {
    pub fn get(&self, field: Field) -> &T {
        match field {
            Field::From => &self.from,
            Field::To => &self.to,
            Field::Date => &self.date,
            Field::Subject => &self.subject,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut T {
        match field {
            Field::From => &mut self.from,
            Field::To => &mut self.to,
            Field::Date => &mut self.date,
            Field::Subject => &mut self.subject,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> FieldSet<U> {
        FieldSet {
            from: f(self.from),
            to: f(self.to),
            date: f(self.date),
            subject: f(self.subject),
        }
    }
}

/// OCR output handed to the pipeline: text plus the recognizer's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub text: String,
    /// Character-level recognition confidence, clamped to 0.0–1.0.
    pub ocr_confidence: f32,
}

impl RawDocument {
    pub fn new(text: impl Into<String>, ocr_confidence: f32) -> Self {
        Self {
            text: text.into(),
            ocr_confidence: clamp_unit(ocr_confidence),
        }
    }
}

/// A successfully parsed reply from the external extractor.
///
/// Sentinel `"null"` strings and blank values are already normalized to
/// `None`; downstream code only ever sees absent or present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiExtraction {
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
    pub subject: Option<String>,
    /// Self-reported extractor confidence, clamped to 0.0–1.0.
    pub confidence: f32,
}

impl AiExtraction {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::From => self.from.as_deref(),
            Field::To => self.to.as_deref(),
            Field::Date => self.date.as_deref(),
            Field::Subject => self.subject.as_deref(),
        }
    }
}

/// The final four-field record. A `None` field means "not determined".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
    pub subject: Option<String>,
    /// Blended confidence (0.0–1.0), present even when every field is empty.
    pub confidence: f32,
}

impl StructuredRecord {
    /// Assemble a record from per-field candidates. Empty candidate values are
    /// dropped so a field is never reported as an empty string.
    pub fn from_candidates(fields: &FieldSet<Option<FieldCandidate>>, confidence: f32) -> Self {
        let value = |field: Field| {
            fields
                .get(field)
                .as_ref()
                .map(|c| c.value.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            from: value(Field::From),
            to: value(Field::To),
            date: value(Field::Date),
            subject: value(Field::Subject),
            confidence: clamp_unit(confidence),
        }
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::From => self.from.as_deref(),
            Field::To => self.to.as_deref(),
            Field::Date => self.date.as_deref(),
            Field::Subject => self.subject.as_deref(),
        }
    }

    pub fn filled_count(&self) -> usize {
        Field::ALL.iter().filter(|f| self.field(**f).is_some()).count()
    }
}

/// Pipeline output: the record plus where each populated field came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub record: StructuredRecord,
    pub sources: FieldSet<Option<FieldSource>>,
    /// Whether the external extractor replied with a usable result.
    pub ai_succeeded: bool,
}
