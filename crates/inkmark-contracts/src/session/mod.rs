mod marker;
mod payload;
mod record;
mod store;

pub use marker::{MarkerColor, MaskInstruction};
pub use payload::{extension_for_media_type, CompositeImage, GeneratedImage};
pub use record::{Activity, Session, SessionId, SessionSummary};
pub use store::{SessionError, SessionStore};
