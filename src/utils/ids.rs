//! Prefixed identifier generation.
//!
//! Every persisted entity gets an opaque `<prefix>-<uuid>` id at creation
//! time. Prefixes make ids self-describing in logs and database dumps.

use uuid::Uuid;

/// Stateless generator for prefixed v4-uuid identifiers.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Mint an id with the given prefix, e.g. `uow-9f8a…`.
    pub fn generate(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_differ() {
        let generator = IdGenerator::new();
        let a = generator.generate("uow");
        let b = generator.generate("uow");
        assert!(a.starts_with("uow-"));
        assert_ne!(a, b);
    }
}
