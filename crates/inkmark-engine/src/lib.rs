pub mod canvas;
pub mod cleanup;
pub mod client;
pub mod compositor;
pub mod config;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod transport;

pub use canvas::{OverlayCanvas, RasterCanvas};
pub use cleanup::{ArtifactCleanup, CleanupOutcome, CleanupReport};
pub use client::{GenerationClient, GenerationService};
pub use compositor::{OverlayCompositor, RasterCompositor};
pub use config::EngineConfig;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use error::{EngineError, EngineResult};
pub use orchestrator::EditOrchestrator;
pub use transport::{GenerationTransport, HttpTransport};

/// Orchestrator wired to the real Gemini transport.
pub type LiveOrchestrator = EditOrchestrator<GenerationClient<HttpTransport, EnvCredentials>>;
