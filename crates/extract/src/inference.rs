/// Keyword → canonical subject, highest priority first.
pub const SUBJECT_KEYWORDS: [(&str, &str); 3] = [
    ("visa", "Visa Application"),
    ("meeting", "Meeting Request"),
    ("invitation", "Invitation"),
];

/// Last-resort subject: the label of the first keyword found in `text`
/// (case-insensitive substring).
pub fn infer_subject(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    SUBJECT_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, label)| *label)
}
