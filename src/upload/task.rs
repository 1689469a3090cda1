// Upload task and video metadata

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
pub const MAX_TAGS: usize = 30;

/// People & Blogs
pub const DEFAULT_CATEGORY_ID: &str = "22";
/// Entertainment, used for Shorts
pub const SHORTS_CATEGORY_ID: &str = "24";

const SHORTS_TAGS: [&str; 6] = [
    "Shorts",
    "YouTubeShorts",
    "Short",
    "Vertical",
    "QuickVideo",
    "Mobile",
];
const SHORTS_KEYWORDS: [&str; 2] = ["#shorts", "short"];
const SHORTS_FOOTER: &str = "📱 #Shorts #YouTubeShorts #Vertical";

/// Lifecycle of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    InFlight,
    Paused,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Succeeded | UploadState::Failed)
    }
}

/// Visibility of the uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privacy::Private => write!(f, "private"),
            Privacy::Unlisted => write!(f, "unlisted"),
            Privacy::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for Privacy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Privacy::Private),
            "unlisted" => Ok(Privacy::Unlisted),
            "public" => Ok(Privacy::Public),
            other => Err(Error::InvalidInput(format!("Unknown privacy status: {}", other))),
        }
    }
}

/// Snippet and status sent in the metadata-only initiation request
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: Privacy,
    pub made_for_kids: bool,
}

impl VideoMetadata {
    /// Create metadata; the title must contain something other than whitespace
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(Error::InvalidInput("Video title must not be empty".to_string()));
        }

        Ok(Self {
            title,
            description: String::new(),
            tags: Vec::new(),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy: Privacy::default(),
            made_for_kids: false,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = category_id.into();
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }

    /// Apply the conventions that make the platform surface a video as a Short
    pub fn optimize_for_shorts(mut self) -> Self {
        let lower = self.title.to_lowercase();
        if !SHORTS_KEYWORDS.iter().any(|k| lower.contains(k)) {
            self.title = format!("{} #Shorts", self.title.trim_end());
        }

        self.tags.extend(SHORTS_TAGS.iter().map(|t| t.to_string()));

        if !self.description.is_empty() {
            self.description.push_str("\n\n");
        }
        self.description.push_str(SHORTS_FOOTER);

        self.category_id = SHORTS_CATEGORY_ID.to_string();
        self
    }

    /// Enforce platform length limits and tag uniqueness
    pub fn normalized(mut self) -> Self {
        self.title = truncate_chars(self.title.trim(), MAX_TITLE_CHARS);
        self.description = truncate_chars(&self.description, MAX_DESCRIPTION_CHARS);

        let mut seen = std::collections::HashSet::new();
        self.tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(MAX_TAGS)
            .collect();
        self
    }

    /// Video resource body for the initiation request
    pub fn to_resource(&self) -> Value {
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy,
                "embeddable": true,
                "license": "youtube",
                "selfDeclaredMadeForKids": self.made_for_kids,
            }
        })
    }
}

/// Truncate to `max` characters, marking the cut with "..."
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// A single file to upload and its progress
#[derive(Debug)]
pub struct UploadTask {
    path: PathBuf,
    metadata: VideoMetadata,
    state: UploadState,
    bytes_sent: u64,
    total_bytes: Option<u64>,
    video_id: Option<String>,
    failure: Option<ErrorKind>,
}

impl UploadTask {
    pub fn new(path: impl Into<PathBuf>, metadata: VideoMetadata) -> Self {
        Self {
            path: path.into(),
            metadata: metadata.normalized(),
            state: UploadState::Pending,
            bytes_sent: 0,
            total_bytes: None,
            video_id: None,
            failure: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Bytes acknowledged by the platform
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Platform video id, set once the upload succeeded
    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    /// Category of the failure when the task ended in `Failed`
    pub fn failure(&self) -> Option<ErrorKind> {
        self.failure
    }

    pub fn watch_url(&self) -> Option<String> {
        self.video_id
            .as_ref()
            .map(|id| format!("https://www.youtube.com/watch?v={}", id))
    }

    pub(crate) fn set_state(&mut self, state: UploadState) {
        self.state = state;
    }

    pub(crate) fn set_total_bytes(&mut self, total: u64) {
        self.total_bytes = Some(total);
    }

    /// Acknowledged bytes only ever grow
    pub(crate) fn acknowledge(&mut self, bytes_sent: u64) {
        self.bytes_sent = self.bytes_sent.max(bytes_sent);
    }

    pub(crate) fn succeed(&mut self, video_id: String) {
        self.video_id = Some(video_id);
        self.state = UploadState::Succeeded;
    }

    pub(crate) fn fail(&mut self, error: &Error) {
        self.failure = Some(error.kind());
        self.state = UploadState::Failed;
    }
}
