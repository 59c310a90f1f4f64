//! Asset materialization for YT StoryMaker
//! Copies or downloads every file a job needs into its own scratch directory.
//!
//! Layout under the scratch root:
//! - `shared/` durable resources reused across jobs (the default BGM)
//! - `jobs/<job id>/` everything fetched for one job, removed by [`AssetFetcher::cleanup`]

use futures_util::future::try_join_all;
use futures_util::StreamExt;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{ComposeError, ComposeResult};
use crate::types::{is_remote_source, AssetKind, BgmTrack, RenderJob};

/// Scratch directory layout
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("jobs").join(job_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Belongs to one job and is deleted with it
    Ephemeral,
    /// Shared across jobs, never deleted by cleanup
    SharedDurable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole {
    Visual(usize),
    Narration,
    Music,
    TitleBackground,
}

impl AssetRole {
    fn label(&self) -> &'static str {
        match self {
            AssetRole::Visual(_) => "visual",
            AssetRole::Narration => "narration",
            AssetRole::Music => "music",
            AssetRole::TitleBackground => "title",
        }
    }

    fn index(&self) -> usize {
        match self {
            AssetRole::Visual(i) => *i,
            _ => 0,
        }
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetRole::Visual(i) => write!(f, "visual #{}", i),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub role: AssetRole,
    pub path: PathBuf,
    pub durability: Durability,
}

/// Files materialized for one job
#[derive(Debug, Clone)]
pub struct LocalAssetSet {
    pub job_dir: PathBuf,
    pub assets: Vec<LocalAsset>,
}

impl LocalAssetSet {
    pub fn ephemeral(&self) -> impl Iterator<Item = &LocalAsset> {
        self.assets
            .iter()
            .filter(|a| a.durability == Durability::Ephemeral)
    }
}

/// A job whose assets all have local paths
#[derive(Debug, Clone)]
pub struct Materialized {
    pub job: RenderJob,
    pub assets: LocalAssetSet,
}

/// Shared background music settings
#[derive(Debug, Clone)]
pub struct DefaultBgm {
    pub file_name: String,
    pub url: Option<String>,
}

struct FetchRequest {
    role: AssetRole,
    source: String,
    fallback_ext: &'static str,
}

pub struct AssetFetcher {
    client: reqwest::Client,
    scratch: ScratchSpace,
    default_bgm: DefaultBgm,
}

impl AssetFetcher {
    pub fn new(scratch: ScratchSpace, default_bgm: DefaultBgm) -> Self {
        Self {
            client: reqwest::Client::new(),
            scratch,
            default_bgm,
        }
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    /// Fetch every file of `job` into its scratch directory.
    ///
    /// Downloads run concurrently. When any required file fails, everything
    /// fetched so far for this job is removed before the error is returned.
    pub async fn materialize(&self, job: &RenderJob) -> ComposeResult<Materialized> {
        let job_dir = self.scratch.job_dir(&job.id);
        tokio::fs::create_dir_all(&job_dir).await?;

        let mut requests: Vec<FetchRequest> = job
            .assets
            .iter()
            .enumerate()
            .map(|(i, asset)| FetchRequest {
                role: AssetRole::Visual(i),
                source: asset.source_url.clone(),
                fallback_ext: match asset.kind {
                    AssetKind::Image => "png",
                    AssetKind::Video => "mp4",
                },
            })
            .collect();
        requests.push(FetchRequest {
            role: AssetRole::Narration,
            source: job.audio_track.source.clone(),
            fallback_ext: "mp3",
        });
        if let Some(BgmTrack::Custom(media)) = &job.bgm_track {
            requests.push(FetchRequest {
                role: AssetRole::Music,
                source: media.source.clone(),
                fallback_ext: "mp3",
            });
        }
        if let Some(title) = &job.title {
            requests.push(FetchRequest {
                role: AssetRole::TitleBackground,
                source: title.background.source.clone(),
                fallback_ext: "jpg",
            });
        }

        log::info!(
            "Materializing {} assets for {} into {}",
            requests.len(),
            job.id,
            job_dir.display()
        );

        let fetches = requests.iter().map(|req| self.fetch_one(req, &job_dir));
        let mut assets = match try_join_all(fetches).await {
            Ok(assets) => assets,
            Err(e) => {
                log::error!("Asset fetch failed for {}: {}", job.id, e);
                remove_job_dir(&job_dir).await;
                return Err(e);
            }
        };

        let mut materialized = job.clone();
        for asset in &assets {
            let path = Some(asset.path.clone());
            match asset.role {
                AssetRole::Visual(i) => materialized.assets[i].local_path = path,
                AssetRole::Narration => materialized.audio_track.local_path = path,
                AssetRole::Music => {
                    if let Some(BgmTrack::Custom(media)) = &mut materialized.bgm_track {
                        media.local_path = path;
                    }
                }
                AssetRole::TitleBackground => {
                    if let Some(title) = &mut materialized.title {
                        title.background.local_path = path;
                    }
                }
            }
        }

        if let Some(BgmTrack::SharedDefault { .. }) = &job.bgm_track {
            match self.ensure_default_bgm(&job.id).await {
                Some(path) => {
                    materialized.bgm_track = Some(BgmTrack::SharedDefault {
                        local_path: Some(path.clone()),
                        source_url: self.default_bgm.url.clone(),
                    });
                    assets.push(LocalAsset {
                        role: AssetRole::Music,
                        path,
                        durability: Durability::SharedDurable,
                    });
                }
                None => materialized.bgm_track = None,
            }
        }

        Ok(Materialized {
            job: materialized,
            assets: LocalAssetSet { job_dir, assets },
        })
    }

    /// Remove the job's scratch directory. Shared resources are never touched.
    pub async fn cleanup(&self, set: &LocalAssetSet) {
        log::debug!(
            "Cleaning up {} scratch files in {}",
            set.ephemeral().count(),
            set.job_dir.display()
        );
        remove_job_dir(&set.job_dir).await;
    }

    /// Path of the shared default BGM, fetching it once when it is missing.
    /// Returns `None` (music is skipped) when it is neither on disk nor fetchable.
    pub async fn ensure_default_bgm(&self, job_id: &str) -> Option<PathBuf> {
        let shared = self.scratch.shared_dir();
        let path = shared.join(&self.default_bgm.file_name);
        if path.exists() {
            return Some(path);
        }

        let Some(url) = &self.default_bgm.url else {
            log::warn!(
                "Default BGM {} not found and no URL configured, skipping music",
                path.display()
            );
            return None;
        };

        if let Err(e) = tokio::fs::create_dir_all(&shared).await {
            log::warn!("Failed to create {}: {}", shared.display(), e);
            return None;
        }

        // Each job downloads to its own partial file; the rename publishes it whole
        let partial = shared.join(format!("{}.{}.part", self.default_bgm.file_name, job_id));
        log::info!("Downloading default BGM to: {}", path.display());
        let result = match self.download(url, &partial).await {
            Ok(()) => tokio::fs::rename(&partial, &path)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Some(path),
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                log::warn!("Failed to fetch default BGM from {}: {}", url, e);
                // Another job may have published it in the meantime
                path.exists().then_some(path)
            }
        }
    }

    async fn fetch_one(&self, req: &FetchRequest, job_dir: &Path) -> ComposeResult<LocalAsset> {
        let ext = infer_extension(&req.source).unwrap_or_else(|| req.fallback_ext.to_string());
        let dest = job_dir.join(scratch_file_name(req.role, &ext));

        let result = if is_remote_source(&req.source) {
            self.download(&req.source, &dest).await
        } else {
            tokio::fs::copy(&req.source, &dest)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        };

        result.map_err(|reason| ComposeError::asset_fetch(req.role.to_string(), &req.source, reason))?;

        log::debug!("Fetched {} -> {}", req.source, dest.display());
        Ok(LocalAsset {
            role: req.role,
            path: dest,
            durability: Durability::Ephemeral,
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| e.to_string())?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| e.to_string())?;

        log::debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(())
    }
}

async fn remove_job_dir(job_dir: &Path) {
    if !job_dir.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(job_dir).await {
        Ok(()) => log::debug!("Removed scratch directory {}", job_dir.display()),
        Err(e) => log::warn!("Failed to remove {}: {}", job_dir.display(), e),
    }
}

/// `<timestamp>_<role>_<index>.<ext>`
fn scratch_file_name(role: AssetRole, ext: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        chrono::Local::now().format("%Y%m%d%H%M%S%3f"),
        role.label(),
        role.index(),
        ext
    )
}

/// File extension of a URL or path, ignoring any query string
fn infer_extension(source: &str) -> Option<String> {
    let re = Regex::new(r"\.([A-Za-z0-9]{2,5})(?:[?#].*)?$").ok()?;
    let last_segment = source.rsplit(['/', '\\']).next()?;
    re.captures(last_segment)
        .and_then(|cap| cap.get(1).map(|m| m.as_str().to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaRef, Resolution, TextStyle, VisualAsset};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(id: &str, visuals: Vec<String>, audio: String) -> RenderJob {
        RenderJob {
            id: id.to_string(),
            assets: visuals
                .into_iter()
                .map(|url| VisualAsset {
                    kind: AssetKind::Image,
                    source_url: url,
                    local_path: None,
                })
                .collect(),
            audio_track: MediaRef::new(audio),
            bgm_track: None,
            narration_text: "Hello.".to_string(),
            title: None,
            duration_seconds: 10.0,
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            text_style: TextStyle::light_on_dark(),
            language: "en".to_string(),
        }
    }

    async fn serve(server: &MockServer, route: &str, status: u16, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    fn no_default_bgm() -> DefaultBgm {
        DefaultBgm {
            file_name: "default_bgm.mp3".to_string(),
            url: None,
        }
    }

    #[test]
    fn test_infer_extension() {
        assert_eq!(infer_extension("https://x.com/a/b.PNG?sig=1").as_deref(), Some("png"));
        assert_eq!(infer_extension("/tmp/clip.mp4").as_deref(), Some("mp4"));
        assert_eq!(infer_extension("https://x.com/download"), None);
        assert_eq!(infer_extension("https://x.com.dir/file"), None);
    }

    #[test]
    fn test_scratch_file_name() {
        let name = scratch_file_name(AssetRole::Visual(3), "png");
        assert!(name.ends_with("_visual_3.png"));
    }

    #[tokio::test]
    async fn test_materialize_downloads_and_cleans_up() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", 200, b"image-a").await;
        serve(&server, "/b.png", 200, b"image-b").await;
        serve(&server, "/voice.mp3", 200, b"voice").await;

        let scratch_root = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(ScratchSpace::new(scratch_root.path()), no_default_bgm());
        let job = job(
            "job-ok",
            vec![format!("{}/a.png", server.uri()), format!("{}/b.png", server.uri())],
            format!("{}/voice.mp3", server.uri()),
        );

        let materialized = fetcher.materialize(&job).await.unwrap();
        let first = materialized.job.assets[0].local_path.clone().unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"image-a");
        assert!(first.starts_with(fetcher.scratch().job_dir("job-ok")));
        assert!(materialized.job.audio_track.local_path.is_some());
        assert_eq!(materialized.assets.ephemeral().count(), 3);

        fetcher.cleanup(&materialized.assets).await;
        assert!(!fetcher.scratch().job_dir("job-ok").exists());
    }

    #[tokio::test]
    async fn test_failed_download_removes_partial_files() {
        let server = MockServer::start().await;
        serve(&server, "/a.png", 200, b"image-a").await;
        serve(&server, "/b.png", 404, b"").await;
        serve(&server, "/c.png", 200, b"image-c").await;
        serve(&server, "/voice.mp3", 200, b"voice").await;

        let scratch_root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(scratch_root.path());
        std::fs::create_dir_all(scratch.shared_dir()).unwrap();
        let shared_bgm = scratch.shared_dir().join("default_bgm.mp3");
        std::fs::write(&shared_bgm, b"music").unwrap();

        let fetcher = AssetFetcher::new(scratch, no_default_bgm());
        let job = job(
            "job-fail",
            vec![
                format!("{}/a.png", server.uri()),
                format!("{}/b.png", server.uri()),
                format!("{}/c.png", server.uri()),
            ],
            format!("{}/voice.mp3", server.uri()),
        );

        let err = fetcher.materialize(&job).await.unwrap_err();
        match err {
            ComposeError::AssetFetch { role, reason, .. } => {
                assert_eq!(role, "visual #1");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!fetcher.scratch().job_dir("job-fail").exists());
        assert!(shared_bgm.exists());
    }

    #[tokio::test]
    async fn test_local_sources_are_copied() {
        let source_dir = tempfile::tempdir().unwrap();
        let image = source_dir.path().join("scene.jpg");
        let voice = source_dir.path().join("voice.wav");
        std::fs::write(&image, b"jpg").unwrap();
        std::fs::write(&voice, b"wav").unwrap();

        let scratch_root = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(ScratchSpace::new(scratch_root.path()), no_default_bgm());
        let job = job(
            "job-local",
            vec![image.to_string_lossy().to_string()],
            voice.to_string_lossy().to_string(),
        );

        let materialized = fetcher.materialize(&job).await.unwrap();
        let copied = materialized.job.audio_track.local_path.clone().unwrap();
        assert_eq!(copied.extension().and_then(|e| e.to_str()), Some("wav"));
        assert!(image.exists());

        fetcher.cleanup(&materialized.assets).await;
        assert!(image.exists());
        assert!(voice.exists());
    }

    #[tokio::test]
    async fn test_missing_local_source_is_fatal() {
        let scratch_root = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(ScratchSpace::new(scratch_root.path()), no_default_bgm());
        let job = job(
            "job-missing",
            vec!["/definitely/not/here.png".to_string()],
            "/definitely/not/here.mp3".to_string(),
        );
        let err = fetcher.materialize(&job).await.unwrap_err();
        assert_eq!(err.kind(), "asset_fetch");
        assert!(!fetcher.scratch().job_dir("job-missing").exists());
    }

    #[tokio::test]
    async fn test_default_bgm_fetched_once_and_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bgm.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"music".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, "/a.png", 200, b"image-a").await;
        serve(&server, "/voice.mp3", 200, b"voice").await;

        let scratch_root = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(
            ScratchSpace::new(scratch_root.path()),
            DefaultBgm {
                file_name: "default_bgm.mp3".to_string(),
                url: Some(format!("{}/bgm.mp3", server.uri())),
            },
        );

        for id in ["job-one", "job-two"] {
            let mut job = job(
                id,
                vec![format!("{}/a.png", server.uri())],
                format!("{}/voice.mp3", server.uri()),
            );
            job.bgm_track = Some(BgmTrack::SharedDefault {
                local_path: None,
                source_url: None,
            });

            let materialized = fetcher.materialize(&job).await.unwrap();
            let bgm = materialized
                .assets
                .assets
                .iter()
                .find(|a| a.role == AssetRole::Music)
                .unwrap();
            assert_eq!(bgm.durability, Durability::SharedDurable);
            assert_eq!(materialized.assets.ephemeral().count(), 2);
            assert_eq!(
                materialized.job.bgm_track.as_ref().and_then(|t| t.remote_url()),
                Some(format!("{}/bgm.mp3", server.uri()).as_str())
            );

            fetcher.cleanup(&materialized.assets).await;
            assert!(bgm.path.exists());
        }
    }

    #[tokio::test]
    async fn test_default_bgm_missing_is_skipped() {
        let scratch_root = tempfile::tempdir().unwrap();
        let fetcher = AssetFetcher::new(ScratchSpace::new(scratch_root.path()), no_default_bgm());
        assert!(fetcher.ensure_default_bgm("job-x").await.is_none());
    }
}
