//! Source-to-destination artifact mover.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::destination::ImageDestination;
use crate::error::{Result, TransferError};
use crate::source::ImageSource;

/// Moves artifacts by loading them from a source, then writing them to a
/// destination.
#[derive(Debug)]
pub struct ImageMover<S, D> {
    source: S,
    destination: D,
}

impl<S: ImageSource, D: ImageDestination> ImageMover<S, D> {
    /// Creates a mover.
    #[must_use]
    pub const fn new(source: S, destination: D) -> Self {
        Self { source, destination }
    }

    /// Moves `images`, each distinct reference exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Load`] if the source fails, in which case
    /// nothing is written, or [`TransferError::Write`] if the destination
    /// fails.
    #[instrument(skip_all, fields(requested = images.len()))]
    pub async fn move_images(&self, cancel: &CancellationToken, images: &[String]) -> Result<()> {
        let unique = dedupe(images);
        info!(artifacts = unique.len(), "loading artifacts");
        self.source
            .load(cancel, &unique)
            .await
            .map_err(|e| TransferError::Load { source: Box::new(e) })?;

        info!(artifacts = unique.len(), "writing artifacts");
        self.destination
            .write(cancel, &unique)
            .await
            .map_err(|e| TransferError::Write { source: Box::new(e) })?;
        Ok(())
    }
}

/// Removes exact duplicates, keeping the first occurrence of each reference.
///
/// # Examples
///
/// ```
/// use anywhere_transfer::dedupe;
///
/// let images = ["a:1", "b:2", "a:1", "A:1"].map(String::from);
/// assert_eq!(dedupe(&images), ["a:1", "b:2", "A:1"]);
/// ```
#[must_use]
pub fn dedupe(images: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(images.len());
    images
        .iter()
        .filter(|image| seen.insert(image.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_is_case_sensitive() {
        let images: Vec<String> = ["x/y:v1", "X/Y:v1", "x/y:v1"].map(String::from).to_vec();
        assert_eq!(dedupe(&images), vec!["x/y:v1".to_string(), "X/Y:v1".to_string()]);
    }

    #[test]
    fn test_dedupe_empty() {
        assert!(dedupe(&[]).is_empty());
    }
}
