//! Resource name generation.

use uuid::Uuid;

/// Produces names for requests that do not supply one.
pub trait NameGenerator: Send + Sync {
    /// Returns a fresh name starting with `base`.
    fn generate(&self, base: &str) -> String;
}

/// Generates `<base>-<32 hex chars>` from a random UUID.
///
/// Uniqueness is probabilistic; existing resources are not consulted.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn generate(&self, base: &str) -> String {
        format!("{base}-{}", Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_names_use_base_and_hex_suffix() {
        let name = RandomNames.generate("mist");
        let suffix = name
            .strip_prefix("mist-")
            .unwrap_or_else(|| panic!("missing base prefix: {name}"));
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn random_names_differ() {
        assert_ne!(RandomNames.generate("mist"), RandomNames.generate("mist"));
    }
}
