use inkmark_contracts::session::GeneratedImage;
use tracing::{info, warn};

use crate::client::GenerationService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Detection found nothing; the first-pass image is final.
    Clean,
    /// Artifacts were found and the cleanup call replaced the image.
    Cleaned,
    /// Artifacts were found but cleanup failed; the first-pass image is kept.
    CleanupFailed(String),
}

impl CleanupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupOutcome::Clean => "clean",
            CleanupOutcome::Cleaned => "cleaned",
            CleanupOutcome::CleanupFailed(_) => "cleanup_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub image: GeneratedImage,
    pub outcome: CleanupOutcome,
}

#[derive(Debug)]
enum Stage {
    Detecting,
    Cleaning,
    Done(CleanupOutcome),
}

/// Single detect-then-fix pass over a freshly edited image.
///
/// Stages only move forward (`Detecting -> Cleaning -> Done`), so detection
/// and cleanup each run at most once per call. Nothing here returns an error:
/// a failed cleanup falls back to the first-pass image.
pub struct ArtifactCleanup<'a, S: ?Sized> {
    service: &'a S,
}

impl<'a, S: GenerationService + ?Sized> ArtifactCleanup<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    pub fn run(&self, first_pass: GeneratedImage) -> CleanupReport {
        let mut image = first_pass;
        let mut stage = Stage::Detecting;
        loop {
            stage = match stage {
                Stage::Detecting => {
                    if self.service.detect_artifacts(&image) {
                        info!(fingerprint = %image.fingerprint(), "marker artifacts detected");
                        Stage::Cleaning
                    } else {
                        Stage::Done(CleanupOutcome::Clean)
                    }
                }
                Stage::Cleaning => match self.service.cleanup(&image) {
                    Ok(cleaned) => {
                        image = cleaned;
                        Stage::Done(CleanupOutcome::Cleaned)
                    }
                    Err(err) => {
                        warn!(
                            error = %err,
                            fingerprint = %image.fingerprint(),
                            "artifact cleanup failed; keeping first-pass image"
                        );
                        Stage::Done(CleanupOutcome::CleanupFailed(err.to_string()))
                    }
                },
                Stage::Done(outcome) => return CleanupReport { image, outcome },
            };
        }
    }
}
