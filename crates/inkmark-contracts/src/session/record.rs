use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::marker::{MarkerColor, MaskInstruction};
use super::payload::GeneratedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a busy session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Generating,
    Editing,
}

impl Activity {
    pub fn label(self) -> &'static str {
        match self {
            Activity::Generating => "generating",
            Activity::Editing => "editing",
        }
    }
}

/// One independent generate/edit workflow.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub image: Option<GeneratedImage>,
    pub base_prompt: String,
    pub global_instruction: String,
    pub region_instructions: BTreeMap<MarkerColor, String>,
    pub pending_overlay: Option<Vec<u8>>,
    pub activity: Option<Activity>,
    pub last_error: Option<String>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            title: title.into(),
            created_at: Utc::now(),
            image: None,
            base_prompt: String::new(),
            global_instruction: String::new(),
            region_instructions: BTreeMap::new(),
            pending_overlay: None,
            activity: None,
            last_error: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.activity.is_some()
    }

    /// Region instructions with non-blank text, in palette order.
    pub fn active_instructions(&self) -> Vec<MaskInstruction> {
        self.region_instructions
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(color, text)| MaskInstruction::new(*color, text.trim()))
            .collect()
    }

    pub fn has_instructions(&self) -> bool {
        !self.global_instruction.trim().is_empty()
            || self
                .region_instructions
                .values()
                .any(|text| !text.trim().is_empty())
    }

    pub fn has_overlay(&self) -> bool {
        self.pending_overlay
            .as_ref()
            .map(|payload| !payload.is_empty())
            .unwrap_or(false)
    }

    pub fn can_edit(&self) -> bool {
        !self.is_busy() && self.image.is_some() && self.has_instructions()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            title: self.title.clone(),
            status: match self.activity {
                Some(activity) => activity.label().to_string(),
                None if self.last_error.is_some() => "error".to_string(),
                None => "idle".to_string(),
            },
            image_fingerprint: self.image.as_ref().map(GeneratedImage::fingerprint),
            base_prompt: self.base_prompt.clone(),
            region_count: self.active_instructions().len(),
            has_overlay: self.has_overlay(),
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub status: String,
    pub image_fingerprint: Option<String>,
    pub base_prompt: String,
    pub region_count: usize,
    pub has_overlay: bool,
    pub last_error: Option<String>,
}
