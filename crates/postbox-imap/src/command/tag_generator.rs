//! Command tag generator.

/// Generates sequential tags of the form `A0001`, `A0002`, ...
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Returns the next tag.
    pub fn next_tag(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{}{:04}", self.prefix, self.counter)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_tags() {
        let mut tag_gen = TagGenerator::default();
        assert_eq!(tag_gen.next_tag(), "A0001");
        assert_eq!(tag_gen.next_tag(), "A0002");
    }

    #[test]
    fn test_custom_prefix() {
        let mut tag_gen = TagGenerator::new('X');
        assert_eq!(tag_gen.next_tag(), "X0001");
    }
}
