use std::sync::OnceLock;

use lettermark_core::Field;
use regex::Regex;

/// A single fallback rule: a pattern, the capture group holding the value,
/// and the length window a trimmed capture must fall inside. The window is
/// measured on `window_group` when set, otherwise on `group`.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub field: Field,
    /// Precedence within the field. Lower runs first.
    pub order: u8,
    pub pattern: Regex,
    pub group: usize,
    pub min_len: usize,
    pub max_len: usize,
    pub window_group: Option<usize>,
    /// Accepted values longer than this are cut down to this many characters.
    pub truncate_to: Option<usize>,
}

impl ExtractionRule {
    /// Build a rule from a pattern known at compile time.
    ///
    /// # Panics
    /// If `pattern` is not a valid regex. Use [`try_new`](Self::try_new) for
    /// patterns supplied at runtime.
    pub fn new(field: Field, order: u8, pattern: &str, group: usize, min_len: usize, max_len: usize) -> Self {
        Self::try_new(field, order, pattern, group, min_len, max_len).expect("invalid regex")
    }

    pub fn try_new(
        field: Field,
        order: u8,
        pattern: &str,
        group: usize,
        min_len: usize,
        max_len: usize,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            field,
            order,
            pattern: Regex::new(pattern)?,
            group,
            min_len,
            max_len,
            window_group: None,
            truncate_to: None,
        })
    }

    /// Measure the length window on another capture group than the one returned.
    pub fn windowed_on(mut self, group: usize) -> Self {
        self.window_group = Some(group);
        self
    }

    pub fn truncating(mut self, max_chars: usize) -> Self {
        self.truncate_to = Some(max_chars);
        self
    }

    /// First match in `text` whose capture passes the length window.
    pub fn apply(&self, text: &str) -> Option<String> {
        self.pattern
            .captures_iter(text)
            .find_map(|caps| {
                let value = caps.get(self.group)?.as_str();
                let window = match self.window_group {
                    Some(g) => caps.get(g)?.as_str(),
                    None => value,
                };
                self.accept(value, window)
            })
    }

    fn accept(&self, capture: &str, window: &str) -> Option<String> {
        let window_len = window.trim().chars().count();
        if window_len < self.min_len || window_len > self.max_len {
            return None;
        }
        let trimmed = capture.trim();
        let len = trimmed.chars().count();
        match self.truncate_to {
            Some(max) if len > max => {
                let cut: String = trimmed.chars().take(max).collect();
                Some(cut.trim_end().to_string())
            }
            _ => Some(trimmed.to_string()),
        }
    }
}

/// The ordered rule table for all four fields.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    rules: Vec<ExtractionRule>,
}

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

impl PatternLibrary {
    /// Rules are kept grouped by field and sorted by `order`; ties keep
    /// their input position.
    pub fn new(mut rules: Vec<ExtractionRule>) -> Self {
        rules.sort_by_key(|r| (r.field, r.order));
        Self { rules }
    }

    /// The built-in table, compiled once per process.
    pub fn standard() -> &'static PatternLibrary {
        static LIBRARY: OnceLock<PatternLibrary> = OnceLock::new();
        LIBRARY.get_or_init(|| PatternLibrary::new(standard_rules()))
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn rules_for(&self, field: Field) -> impl Iterator<Item = &ExtractionRule> {
        self.rules.iter().filter(move |r| r.field == field)
    }
}

fn standard_rules() -> Vec<ExtractionRule> {
    use Field::*;

    vec![
        // ── From ─────────────────────────────────────────────────────────────
        // "for <Company>" right after a closing such as "Sincerely,".
        ExtractionRule::new(From, 1,
            r"(?i)\b(?:sincerely|regards|faithfully|truly)\b[,.]?\s*(?:yours[,.]?\s*)?for\s+((?-i:[A-Z])[^\n]*)",
            1, 10, 80),
        // "(JOHN SMITH) General Manager"
        ExtractionRule::new(From, 2,
            r"\(([A-Z][A-Za-z .]*)\)\s*(?i:general\s+manager|manager|director|head)",
            1, 10, 50),
        // "for <Name> Ltd" anywhere in the letter.
        ExtractionRule::new(From, 3,
            r"(?i)\bfor\s+((?-i:[A-Z])[^\n]*\b(?:limited|ltd|corporation|corp|company|services|pvt)\b\.?)",
            1, 10, 80),

        // ── To ───────────────────────────────────────────────────────────────
        // Window bounds the name after "of"; the whole phrase is returned.
        ExtractionRule::new(To, 1, r"(?i)\b(embassy\s+of\s+([^\n]+))", 1, 5, 70).windowed_on(2),
        ExtractionRule::new(To, 2, r"(?i)\b(ministry\s+of\s+([^\n]+))", 1, 5, 70).windowed_on(2),
        ExtractionRule::new(To, 3, r"(?i)\b(?:to|dear|attention)[ \t]*:[ \t]*([^\n]+)", 1, 10, 80),

        // ── Date ─────────────────────────────────────────────────────────────
        ExtractionRule::new(Date, 1,
            &format!(r"(?i)\b((?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}})\b"),
            1, 8, 30),
        ExtractionRule::new(Date, 2, r"\b(\d{1,2}[-/]\d{1,2}[-/]\d{4})\b", 1, 8, 10),
        ExtractionRule::new(Date, 3, r"\b(\d{4}[-/]\d{1,2}[-/]\d{1,2})\b", 1, 8, 10),

        // ── Subject ──────────────────────────────────────────────────────────
        ExtractionRule::new(Subject, 1, r"(?i)\b(?:subject|re|regarding)[ \t]*:[ \t]*([^\n]+)", 1, 10, 150)
            .truncating(100),
        ExtractionRule::new(Subject, 2,
            r"(?i)\b(?:request\s+to|application\s+for|invitation)[ \t]+([^\n]+)",
            1, 10, 100),
        ExtractionRule::new(Subject, 3, r"_{2,}\s*([^\n_]+?)\s*_{2,}", 1, 10, 150),
    ]
}
