//! Composed text.  Append-only apart from a full clear.

use super::key::KeyValue;

/// Text buffer fed by key activations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, c: char) {
        self.text.push(c);
    }

    pub fn reset(&mut self) {
        self.text.clear();
    }

    /// Apply a fired key value.
    pub fn apply(&mut self, value: &KeyValue) {
        match value {
            KeyValue::Char(c) => self.append(*c),
            KeyValue::Space => self.append(' '),
            KeyValue::Reset => self.reset(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
