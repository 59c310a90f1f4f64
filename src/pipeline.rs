//! Job pipeline for YT StoryMaker
//! descriptor -> materialize -> timing -> subtitles -> composition graph -> render

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::assets::{AssetFetcher, DefaultBgm, ScratchSpace};
use crate::composition::{build_graph, BuildOptions, CompositionGraph};
use crate::config::{join_location, AppConfig, BackgroundCatalog, SubtitleConfig};
use crate::error::{ComposeError, ComposeResult};
use crate::jobs::JobStage;
use crate::render::RenderBackend;
use crate::subtitles::{segment_narration, LineLayout};
use crate::timing::{plan_timing, TimingPlan};
use crate::types::{
    BgmTrack, JobDescriptor, MediaRef, RenderJob, RenderOutcome, SubtitleChunk, TitleCard,
    VisualAsset,
};
use crate::video::{check_nvenc_availability, probe_duration};

pub const MIN_DURATION_SECS: f64 = 10.0;
pub const MAX_DURATION_SECS: f64 = 120.0;

/// Job-independent pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub use_default_bgm: bool,
    pub probe_narration_length: bool,
    pub background_source: String,
    pub subtitles: SubtitleConfig,
    pub logo: Option<PathBuf>,
    pub channel_name: String,
    pub font_file: Option<String>,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let logo = config.logo_path.as_ref().and_then(|p| {
            let path = PathBuf::from(p);
            if path.exists() {
                Some(path)
            } else {
                log::warn!("Logo {} not found, drawing the channel name instead", p);
                None
            }
        });

        Self {
            use_default_bgm: config.use_default_bgm,
            probe_narration_length: config.probe_narration_length,
            background_source: config.background_source.clone(),
            subtitles: config.subtitles.clone(),
            logo,
            channel_name: config.channel_name.clone(),
            font_file: config.font_file.clone(),
        }
    }

    fn build_options(&self, language: &str) -> BuildOptions {
        BuildOptions {
            logo: self.logo.clone(),
            channel_name: self.channel_name.clone(),
            font_file: self.font_file.clone(),
            title_layout: LineLayout::for_language(language, &self.subtitles),
        }
    }
}

/// Everything shared by the jobs of one process
pub struct PipelineContext {
    pub catalog: BackgroundCatalog,
    pub fetcher: AssetFetcher,
    pub backend: RenderBackend,
    pub options: PipelineOptions,
}

impl PipelineContext {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let use_gpu = match config.gpu_acceleration {
            Some(enabled) => enabled,
            None => {
                let available = check_nvenc_availability(&config.render.ffmpeg_path);
                log::info!("NVENC auto-detection: {}", available);
                available
            }
        };

        let fetcher = AssetFetcher::new(
            ScratchSpace::new(&config.scratch_dir),
            DefaultBgm {
                file_name: config.default_bgm_file.clone(),
                url: config.default_bgm_url.clone(),
            },
        );

        Ok(Self {
            catalog: config.background_catalog(),
            fetcher,
            backend: RenderBackend::from_config(config, use_gpu)?,
            options: PipelineOptions::from_config(config),
        })
    }
}

/// Timeline, subtitles and graph of one job
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub timing: TimingPlan,
    pub chunks: Vec<SubtitleChunk>,
    pub graph: CompositionGraph,
}

/// Validate a descriptor and turn it into a render job
pub fn prepare_job(
    job_id: &str,
    descriptor: &JobDescriptor,
    catalog: &BackgroundCatalog,
    options: &PipelineOptions,
) -> ComposeResult<RenderJob> {
    if descriptor.assets.is_empty() {
        return Err(ComposeError::graph(
            "timing",
            "at least one visual asset is required",
        ));
    }
    if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&descriptor.duration_seconds) {
        return Err(ComposeError::InvalidJob(format!(
            "durationSeconds must be between {} and {}, got {}",
            MIN_DURATION_SECS, MAX_DURATION_SECS, descriptor.duration_seconds
        )));
    }
    if descriptor.audio_url.trim().is_empty() {
        return Err(ComposeError::InvalidJob("audioUrl is empty".to_string()));
    }
    if let Some(empty) = descriptor.assets.iter().position(|a| a.url.trim().is_empty()) {
        return Err(ComposeError::InvalidJob(format!("asset {} has no url", empty)));
    }

    let style = catalog.lookup(&descriptor.background_id);
    let title = style.filename.as_deref().filter(|_| style.has_image()).map(|file| TitleCard {
        text: descriptor.theme.trim().to_string(),
        romanized: descriptor
            .theme_romanized
            .as_ref()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        background: MediaRef::new(join_location(&options.background_source, file)),
    });

    let bgm_track = match descriptor.bgm_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Some(BgmTrack::Custom(MediaRef::new(url))),
        _ if options.use_default_bgm => Some(BgmTrack::SharedDefault {
            local_path: None,
            source_url: None,
        }),
        _ => None,
    };

    Ok(RenderJob {
        id: job_id.to_string(),
        assets: descriptor
            .assets
            .iter()
            .map(|a| VisualAsset {
                kind: a.kind,
                source_url: a.url.trim().to_string(),
                local_path: None,
            })
            .collect(),
        audio_track: MediaRef::new(descriptor.audio_url.trim()),
        bgm_track,
        narration_text: descriptor.narration_text.clone(),
        title,
        duration_seconds: descriptor.duration_seconds,
        resolution: descriptor.format.resolution(),
        text_style: style.text_color.clone(),
        language: descriptor.language.clone(),
    })
}

/// Timing plan and subtitle chunks
pub fn plan_segments(
    job: &RenderJob,
    content_secs: f64,
    options: &PipelineOptions,
) -> ComposeResult<(TimingPlan, Vec<SubtitleChunk>)> {
    let timing = plan_timing(job.has_title_screen(), content_secs, job.assets.len())?;
    let layout = LineLayout::for_language(&job.language, &options.subtitles);
    let chunks = segment_narration(&job.narration_text, job.assets.len(), &layout);
    Ok((timing, chunks))
}

/// Plan a job without fetching or rendering anything
pub fn plan_job(job: &RenderJob, content_secs: f64, options: &PipelineOptions) -> ComposeResult<JobPlan> {
    let (timing, chunks) = plan_segments(job, content_secs, options)?;
    let graph = build_graph(
        job,
        &timing,
        &chunks,
        &job.text_style,
        &options.build_options(&job.language),
    )?;
    Ok(JobPlan {
        timing,
        chunks,
        graph,
    })
}

/// Run one job to completion. Scratch files are removed on every path.
///
/// Progress goes to `on_stage`; the pipeline never writes job status itself.
pub async fn run_job(
    ctx: &PipelineContext,
    job_id: &str,
    descriptor: &JobDescriptor,
    output: &Path,
    on_stage: &(dyn Fn(JobStage) + Send + Sync),
) -> ComposeResult<RenderOutcome> {
    let job = prepare_job(job_id, descriptor, &ctx.catalog, &ctx.options)?;

    on_stage(JobStage::Materializing);
    log::debug!(
        "Job {} scratch: {}",
        job_id,
        ctx.fetcher.scratch().job_dir(job_id).display()
    );
    let materialized = ctx.fetcher.materialize(&job).await?;

    let result = compose_and_render(ctx, &materialized.job, output, on_stage).await;

    on_stage(JobStage::CleaningUp);
    ctx.fetcher.cleanup(&materialized.assets).await;

    match &result {
        Ok(outcome) => log::info!("Job {} finished: {}", job_id, outcome.artifact),
        Err(e) => log::error!("Job {} failed: {}", job_id, e),
    }
    result
}

async fn compose_and_render(
    ctx: &PipelineContext,
    job: &RenderJob,
    output: &Path,
    on_stage: &(dyn Fn(JobStage) + Send + Sync),
) -> ComposeResult<RenderOutcome> {
    on_stage(JobStage::Planning);
    let content_secs = content_duration(job, ctx.options.probe_narration_length).await;
    let (timing, chunks) = plan_segments(job, content_secs, &ctx.options)?;
    log::debug!(
        "Timing for {}: title {:.2}s, {} x {:.3}s, total {:.3}s",
        job.id,
        timing.title_duration,
        timing.segment_count(),
        timing.segment_durations.first().copied().unwrap_or_default(),
        timing.total_duration
    );

    on_stage(JobStage::Composing);
    let graph = build_graph(
        job,
        &timing,
        &chunks,
        &job.text_style,
        &ctx.options.build_options(&job.language),
    )?;

    on_stage(JobStage::Rendering);
    log::info!("Rendering {} with {} backend", job.id, ctx.backend.name());
    let artifact = ctx.backend.render(&graph, output).await?;

    Ok(RenderOutcome {
        job_id: job.id.clone(),
        artifact,
        total_duration: timing.total_duration,
    })
}

/// Narration length from ffprobe when enabled, else the requested duration
async fn content_duration(job: &RenderJob, probe: bool) -> f64 {
    if !probe {
        return job.duration_seconds;
    }
    let Some(path) = job.audio_track.local_path.as_deref() else {
        return job.duration_seconds;
    };
    match probe_duration(path).await {
        Ok(measured) => {
            log::info!(
                "Narration is {:.2}s (requested {:.2}s)",
                measured,
                job.duration_seconds
            );
            measured
        }
        Err(e) => {
            log::warn!(
                "Could not probe narration length, using durationSeconds: {:#}",
                e
            );
            job.duration_seconds
        }
    }
}
