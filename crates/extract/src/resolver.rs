use lettermark_core::Field;

use crate::rules::PatternLibrary;

/// Walks a field's rules in order and returns the first valid capture.
#[derive(Debug, Clone, Copy)]
pub struct FallbackResolver<'a> {
    library: &'a PatternLibrary,
}

impl FallbackResolver<'static> {
    pub fn standard() -> Self {
        Self::new(PatternLibrary::standard())
    }
}

impl<'a> FallbackResolver<'a> {
    pub fn new(library: &'a PatternLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &'a PatternLibrary {
        self.library
    }

    pub fn resolve(&self, field: Field, text: &str) -> Option<String> {
        self.resolve_with_order(field, text).map(|(_, value)| value)
    }

    /// Like [`resolve`](Self::resolve), also reporting which rule matched.
    pub fn resolve_with_order(&self, field: Field, text: &str) -> Option<(u8, String)> {
        self.library
            .rules_for(field)
            .find_map(|rule| rule.apply(text).map(|value| (rule.order, value)))
    }
}
