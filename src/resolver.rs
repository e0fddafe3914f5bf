//! Maps a distribution and release to a concrete image or template.
//!
//! Candidate names follow `<distro>-<numeric>-<variant>-v<version>` or
//! `<distro>-<numeric>-v<version>`. The first non-deprecated candidate, in
//! backend order, whose numeric component equals the requested release wins.
//! Backends do not promise a stable listing order, so the newest version is
//! not guaranteed to be chosen.

use regex::Regex;

use crate::driver::{SourceImage, SourceSpec};
use crate::error::ProvisionError;

/// Compiled matcher for one distribution's image names.
#[derive(Clone, Debug)]
pub struct ReleasePattern {
    pattern: Regex,
}

impl ReleasePattern {
    /// Builds the matcher for `distro`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Provider`] if the pattern cannot be compiled.
    pub fn for_distro(distro: &str) -> Result<Self, ProvisionError> {
        let source = format!(
            r"^{}-(?:(\d*)-(.*)-v.*|(\d*)-v.*)$",
            regex::escape(distro)
        );
        let pattern = Regex::new(&source).map_err(|err| ProvisionError::provider(err.to_string()))?;
        Ok(Self { pattern })
    }

    /// Extracts the numeric release component from `name`, if it parses.
    #[must_use]
    pub fn release_of<'n>(&self, name: &'n str) -> Option<&'n str> {
        let captures = self.pattern.captures(name)?;
        captures
            .get(1)
            .or_else(|| captures.get(3))
            .map(|component| component.as_str())
    }
}

/// Picks the first usable source for `distro`/`release`.
///
/// # Errors
///
/// Returns [`ProvisionError::ImageNotFound`] when nothing matches.
pub fn resolve(
    distro: &str,
    release: &str,
    sources: &[SourceImage],
) -> Result<SourceSpec, ProvisionError> {
    let pattern = ReleasePattern::for_distro(distro)?;
    sources
        .iter()
        .filter(|source| !source.deprecated)
        .find(|source| pattern.release_of(&source.name) == Some(release))
        .map(|source| {
            tracing::info!(image = %source.name, distro, release, "found source image");
            SourceSpec {
                identifier: source.identifier.clone(),
                size_hint: source.size_gb,
            }
        })
        .ok_or_else(|| ProvisionError::ImageNotFound {
            distro: distro.to_owned(),
            release: release.to_owned(),
        })
}
