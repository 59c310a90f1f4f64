//! Configuration management for YT StoryMaker
//! Handles loading and saving settings to settings.json

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::TextStyle;

/// Background entry of the style catalog
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundStyle {
    /// Image file relative to `background_source`. `None` means no title screen.
    #[serde(default)]
    pub filename: Option<String>,
    pub text_color: TextStyle,
}

impl BackgroundStyle {
    /// Entry used for unknown ids and for "none"
    pub fn none() -> Self {
        Self {
            filename: None,
            text_color: TextStyle::light_on_dark(),
        }
    }

    pub fn has_image(&self) -> bool {
        self.filename
            .as_deref()
            .map(|f| !f.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Immutable background-id -> style lookup. Always answers, falling back to "none".
#[derive(Debug, Clone)]
pub struct BackgroundCatalog {
    entries: HashMap<String, BackgroundStyle>,
    fallback: BackgroundStyle,
}

impl BackgroundCatalog {
    pub const FALLBACK_ID: &'static str = "none";

    pub fn new(entries: HashMap<String, BackgroundStyle>) -> Self {
        let fallback = entries
            .get(Self::FALLBACK_ID)
            .cloned()
            .unwrap_or_else(BackgroundStyle::none);
        Self { entries, fallback }
    }

    pub fn lookup(&self, background_id: &str) -> &BackgroundStyle {
        match self.entries.get(background_id) {
            Some(style) => style,
            None => {
                if background_id != Self::FALLBACK_ID {
                    log::warn!(
                        "Unknown background id '{}', using '{}'",
                        background_id,
                        Self::FALLBACK_ID
                    );
                }
                &self.fallback
            }
        }
    }
}

impl Default for BackgroundCatalog {
    fn default() -> Self {
        Self::new(default_backgrounds())
    }
}

fn default_backgrounds() -> HashMap<String, BackgroundStyle> {
    let mut map = HashMap::new();
    map.insert("none".to_string(), BackgroundStyle::none());
    map.insert(
        "night_sky".to_string(),
        BackgroundStyle {
            filename: Some("night_sky.jpg".to_string()),
            text_color: TextStyle::light_on_dark(),
        },
    );
    map.insert(
        "city_lights".to_string(),
        BackgroundStyle {
            filename: Some("city_lights.jpg".to_string()),
            text_color: TextStyle::light_on_dark(),
        },
    );
    map.insert(
        "sakura".to_string(),
        BackgroundStyle {
            filename: Some("sakura.jpg".to_string()),
            text_color: TextStyle::dark_on_light(),
        },
    );
    map.insert(
        "beach".to_string(),
        BackgroundStyle {
            filename: Some("beach.jpg".to_string()),
            text_color: TextStyle::dark_on_light(),
        },
    );
    map
}

/// Subtitle wrapping limits
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubtitleConfig {
    /// Characters per line for space-separated scripts (default 30)
    #[serde(default = "default_max_chars")]
    pub max_chars_per_line: usize,
    /// Characters per line for Japanese/Chinese text (default 16)
    #[serde(default = "default_max_chars_cjk")]
    pub max_chars_per_line_cjk: usize,
}

fn default_max_chars() -> usize {
    30
}

fn default_max_chars_cjk() -> usize {
    16
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            max_chars_per_line: 30,
            max_chars_per_line_cjk: 16,
        }
    }
}

/// Which render strategy executes the composition graph
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

/// Remote render service settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoteRenderConfig {
    /// Base URL, e.g. https://render.example.com/v1
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// First poll delay in milliseconds (default 2000)
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    /// Upper bound for the poll delay in milliseconds (default 30000)
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
}

fn default_poll_initial_ms() -> u64 {
    2_000
}

fn default_poll_max_ms() -> u64 {
    30_000
}

/// Rendering configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RenderConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// ffmpeg executable (default "ffmpeg")
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Upper bound for one render, local or remote (default 900 seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// x264 preset (default "medium")
    #[serde(default = "default_preset")]
    pub preset: String,
    /// x264 CRF (default 23)
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// AAC bitrate (default "192k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default)]
    pub remote: Option<RemoteRenderConfig>,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u32 {
    23
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: default_timeout_secs(),
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
            remote: None,
        }
    }
}

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// Language of the CLI messages ("en", "ja", "es")
    #[serde(default = "default_language")]
    pub language: String,
    /// Default output directory for rendered videos and job records
    #[serde(default = "default_output_dir")]
    pub default_output_dir: String,
    /// Root of the scratch area (per-job files and shared resources)
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    /// File name of the shared background music inside `<scratch_dir>/shared`
    #[serde(default = "default_bgm_file")]
    pub default_bgm_file: String,
    /// Where to fetch the shared background music from when it is missing
    #[serde(default)]
    pub default_bgm_url: Option<String>,
    /// Use the shared background music when a job brings none
    #[serde(default = "default_true")]
    pub use_default_bgm: bool,
    /// Directory or base URL holding the title background images
    #[serde(default = "default_background_source")]
    pub background_source: String,
    /// Background id -> title image and text colours
    #[serde(default = "default_backgrounds")]
    pub backgrounds: HashMap<String, BackgroundStyle>,
    /// Logo drawn on the title screen; the channel name is drawn when missing
    #[serde(default)]
    pub logo_path: Option<String>,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Font file for drawtext; fontconfig default when unset
    #[serde(default)]
    pub font_file: Option<String>,
    #[serde(default)]
    pub subtitles: SubtitleConfig,
    #[serde(default)]
    pub render: RenderConfig,
    /// Measure the narration with ffprobe instead of trusting durationSeconds
    #[serde(default)]
    pub probe_narration_length: bool,
    /// Whether to use GPU acceleration (NVENC) for FFmpeg
    #[serde(default)]
    pub gpu_acceleration: Option<bool>,
    /// Jobs rendered at the same time by `batch` (default 2)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_scratch_dir() -> String {
    if let Some(cache_dir) = dirs::cache_dir() {
        cache_dir
            .join("yt-storymaker")
            .join("scratch")
            .to_string_lossy()
            .to_string()
    } else {
        "./scratch".to_string()
    }
}

fn default_bgm_file() -> String {
    "default_bgm.mp3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_background_source() -> String {
    "./backgrounds".to_string()
}

fn default_channel_name() -> String {
    "YT StoryMaker".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            default_output_dir: default_output_dir(),
            scratch_dir: default_scratch_dir(),
            default_bgm_file: default_bgm_file(),
            default_bgm_url: None,
            use_default_bgm: true,
            background_source: default_background_source(),
            backgrounds: default_backgrounds(),
            logo_path: None,
            channel_name: default_channel_name(),
            font_file: None,
            subtitles: SubtitleConfig::default(),
            render: RenderConfig::default(),
            probe_narration_length: false,
            gpu_acceleration: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl AppConfig {
    /// Configuration file name
    pub const CONFIG_PATH: &'static str = "settings.json";

    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(Self::CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file not found. Please create {}",
                path.display()
            ));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;

        if config.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("max_concurrent_jobs must be at least 1"));
        }

        if config.render.backend == BackendKind::Remote && config.render.remote.is_none() {
            return Err(anyhow::anyhow!(
                "render.backend is \"remote\" but render.remote is not configured"
            ));
        }

        Ok(config)
    }

    /// Create a default configuration file
    pub fn create_default() -> Result<()> {
        let json = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(Self::CONFIG_PATH, json)?;

        Ok(())
    }

    /// Ensure output directory exists
    pub fn ensure_output_dir(&self) -> Result<()> {
        if !Path::new(&self.default_output_dir).exists() {
            fs::create_dir_all(&self.default_output_dir)?;
        }
        Ok(())
    }

    /// Directory holding the records of jobs rendered into the default output dir
    pub fn jobs_dir(&self) -> PathBuf {
        crate::jobs::jobs_dir(Path::new(&self.default_output_dir))
    }

    pub fn background_catalog(&self) -> BackgroundCatalog {
        BackgroundCatalog::new(self.backgrounds.clone())
    }

}

/// Join a file name onto a base URL or directory
pub fn join_location(base: &str, filename: &str) -> String {
    if crate::types::is_remote_source(base) {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            filename.trim_start_matches('/')
        )
    } else {
        Path::new(base).join(filename).to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig {
            channel_name: "Test Channel".to_string(),
            ..AppConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.channel_name, "Test Channel");
        assert_eq!(parsed.backgrounds.len(), config.backgrounds.len());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = serde_json::from_str(r#"{"channel_name": "Mine"}"#).unwrap();
        assert_eq!(parsed.channel_name, "Mine");
        assert_eq!(parsed.subtitles.max_chars_per_line, 30);
        assert_eq!(parsed.render.backend, BackendKind::Local);
        assert_eq!(parsed.render.timeout_secs, 900);
        assert_eq!(parsed.default_bgm_file, "default_bgm.mp3");
        assert_eq!(parsed.language, "en");
        assert!(parsed.backgrounds.contains_key("none"));
    }

    #[test]
    fn test_catalog_unknown_id_falls_back() {
        let catalog = BackgroundCatalog::default();
        let style = catalog.lookup("does-not-exist");
        assert!(!style.has_image());
        assert_eq!(style, catalog.lookup("none"));
    }

    #[test]
    fn test_catalog_without_none_entry_is_still_total() {
        let mut entries = HashMap::new();
        entries.insert(
            "beach".to_string(),
            BackgroundStyle {
                filename: Some("beach.jpg".to_string()),
                text_color: TextStyle::dark_on_light(),
            },
        );
        let catalog = BackgroundCatalog::new(entries);
        assert_eq!(catalog.lookup("none"), &BackgroundStyle::none());
        assert!(catalog.lookup("beach").has_image());
    }

    #[test]
    fn test_bright_and_dark_contrast() {
        let catalog = BackgroundCatalog::default();
        assert_eq!(catalog.lookup("night_sky").text_color.fill_color, "white");
        assert_eq!(catalog.lookup("sakura").text_color.stroke_color, "white");
    }

    #[test]
    fn test_background_style_camel_case() {
        let json = r##"{"filename": "x.jpg", "textColor": {"fillColor": "#fff", "strokeColor": "#000", "strokeWidth": 3}}"##;
        let style: BackgroundStyle = serde_json::from_str(json).unwrap();
        assert_eq!(style.text_color.stroke_width, 3);
        assert!(style.has_image());
    }

    #[test]
    fn test_join_location() {
        assert_eq!(
            join_location("https://cdn.example.com/bg/", "sakura.jpg"),
            "https://cdn.example.com/bg/sakura.jpg"
        );
        assert_eq!(join_location("/srv/bg", "sakura.jpg"), "/srv/bg/sakura.jpg");
    }
}
