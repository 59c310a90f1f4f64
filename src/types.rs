//! Shared data types for YT StoryMaker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of visual shown during a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

/// Visual asset entry as sent by the orchestration layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDescriptor {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub url: String,
}

/// Requested output layout. Anything other than these two is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Normal,
    Shorts,
}

impl OutputFormat {
    pub fn resolution(self) -> Resolution {
        match self {
            OutputFormat::Shorts => Resolution {
                width: 1080,
                height: 1920,
            },
            OutputFormat::Normal => Resolution {
                width: 1920,
                height: 1080,
            },
        }
    }
}

/// Output frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// The shorter side, used to size text consistently across orientations
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Input job descriptor (camelCase JSON, as produced by the orchestration layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub assets: Vec<AssetDescriptor>,
    pub audio_url: String,
    #[serde(default)]
    pub bgm_url: Option<String>,
    pub narration_text: String,
    pub theme: String,
    /// Secondary title line drawn under the theme (usually a romanization)
    #[serde(default)]
    pub theme_romanized: Option<String>,
    pub duration_seconds: f64,
    pub format: OutputFormat,
    #[serde(default = "default_background_id")]
    pub background_id: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_background_id() -> String {
    "none".to_string()
}

fn default_language() -> String {
    "ja".to_string()
}

/// Fill/stroke colours used for every text overlay of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub fill_color: String,
    pub stroke_color: String,
    pub stroke_width: u32,
}

impl TextStyle {
    /// White text with a black outline, readable on dark backgrounds
    pub fn light_on_dark() -> Self {
        Self {
            fill_color: "white".to_string(),
            stroke_color: "black".to_string(),
            stroke_width: 4,
        }
    }

    /// Dark text with a white outline, readable on bright backgrounds
    pub fn dark_on_light() -> Self {
        Self {
            fill_color: "#222222".to_string(),
            stroke_color: "white".to_string(),
            stroke_width: 4,
        }
    }
}

/// A media file referenced by URL or local path, plus its materialized copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// http(s) URL or a path on the local filesystem
    pub source: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl MediaRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            local_path: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        is_remote_source(&self.source)
    }
}

/// Visual asset owned by a render job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAsset {
    pub kind: AssetKind,
    pub source_url: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

/// Background music choice for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BgmTrack {
    /// Music supplied with the job; deleted with the rest of the job's scratch files
    Custom(MediaRef),
    /// The configured shared track; never deleted by cleanup.
    /// `source_url` is the configured download location, when there is one.
    SharedDefault {
        local_path: Option<PathBuf>,
        #[serde(default)]
        source_url: Option<String>,
    },
}

impl BgmTrack {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            BgmTrack::Custom(media) => media.local_path.as_deref(),
            BgmTrack::SharedDefault { local_path, .. } => local_path.as_deref(),
        }
    }

    /// Where a remote renderer can fetch the track from
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            BgmTrack::Custom(media) if media.is_remote() => Some(media.source.as_str()),
            BgmTrack::Custom(_) => None,
            BgmTrack::SharedDefault { source_url, .. } => source_url.as_deref(),
        }
    }
}

/// Leading still frame showing the theme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleCard {
    pub text: String,
    pub romanized: Option<String>,
    pub background: MediaRef,
}

/// Everything the compositor needs for one video. Built once per request from a
/// [`JobDescriptor`] and not modified after composition starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: String,
    pub assets: Vec<VisualAsset>,
    pub audio_track: MediaRef,
    pub bgm_track: Option<BgmTrack>,
    pub narration_text: String,
    pub title: Option<TitleCard>,
    pub duration_seconds: f64,
    pub resolution: Resolution,
    pub text_style: TextStyle,
    pub language: String,
}

impl RenderJob {
    pub fn has_title_screen(&self) -> bool {
        self.title.is_some()
    }

    /// Copy of the job whose local paths point straight at the sources.
    /// Used for dry-run planning where nothing is fetched.
    pub fn with_source_paths(&self) -> RenderJob {
        let mut job = self.clone();
        for asset in &mut job.assets {
            asset.local_path = Some(PathBuf::from(&asset.source_url));
        }
        job.audio_track.local_path = Some(PathBuf::from(&job.audio_track.source));
        if let Some(BgmTrack::Custom(media)) = &mut job.bgm_track {
            media.local_path = Some(PathBuf::from(&media.source));
        }
        if let Some(title) = &mut job.title {
            title.background.local_path = Some(PathBuf::from(&title.background.source));
        }
        job
    }
}

/// A block of subtitle text assigned to one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleChunk {
    /// Display text, lines separated by `\n`. Empty means nothing is drawn.
    pub text: String,
    pub segment_index: usize,
    /// The narration sentences this chunk was built from, before wrapping
    pub sentences: Vec<String>,
}

impl SubtitleChunk {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().filter(|l| !l.trim().is_empty())
    }
}

/// Where the rendered container ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRef {
    LocalPath(PathBuf),
    Url(String),
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::LocalPath(path) => write!(f, "{}", path.display()),
            ArtifactRef::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Result of a successful job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub job_id: String,
    pub artifact: ArtifactRef,
    pub total_duration: f64,
}

/// True for http(s) URLs, false for anything treated as a local path
pub fn is_remote_source(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

static JOB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generate a job id that does not collide across concurrent jobs or processes
pub fn new_job_id() -> String {
    let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "job-{}-{}-{}",
        chrono::Local::now().format("%Y%m%d%H%M%S%3f"),
        std::process::id(),
        seq
    )
}

/// Application version constant
pub const APP_VERSION: &str = "0.4.2";

/// Application name constant
pub const APP_NAME: &str = "YT StoryMaker";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_resolution() {
        assert_eq!(
            OutputFormat::Shorts.resolution(),
            Resolution {
                width: 1080,
                height: 1920
            }
        );
        assert_eq!(
            OutputFormat::Normal.resolution(),
            Resolution {
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_descriptor_parsing() {
        let json = r#"{
            "assets": [{"type": "image", "url": "https://cdn.example.com/a.png"},
                       {"type": "video", "url": "https://cdn.example.com/b.mp4"}],
            "audioUrl": "https://cdn.example.com/narration.mp3",
            "narrationText": "こんにちは。",
            "theme": "富士山",
            "durationSeconds": 30,
            "format": "shorts"
        }"#;
        let descriptor: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.assets.len(), 2);
        assert_eq!(descriptor.assets[1].kind, AssetKind::Video);
        assert_eq!(descriptor.background_id, "none");
        assert_eq!(descriptor.language, "ja");
        assert!(descriptor.bgm_url.is_none());
        assert_eq!(descriptor.format, OutputFormat::Shorts);
    }

    #[test]
    fn test_descriptor_rejects_unknown_format() {
        let json = r#"{
            "assets": [], "audioUrl": "a.mp3", "narrationText": "", "theme": "",
            "durationSeconds": 30, "format": "square"
        }"#;
        assert!(serde_json::from_str::<JobDescriptor>(json).is_err());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
        assert!(a.starts_with("job-"));
    }

    #[test]
    fn test_is_remote_source() {
        assert!(is_remote_source("https://example.com/a.png"));
        assert!(is_remote_source("HTTP://example.com/a.png"));
        assert!(!is_remote_source("./backgrounds/a.png"));
        assert!(!is_remote_source("/tmp/a.png"));
    }

    #[test]
    fn test_chunk_lines_skip_blank() {
        let chunk = SubtitleChunk {
            text: "first\n\nsecond".to_string(),
            segment_index: 0,
            sentences: vec![],
        };
        assert_eq!(chunk.lines().collect::<Vec<_>>(), vec!["first", "second"]);
        assert!(!chunk.is_empty());
    }
}
