//! YT StoryMaker
//! Assembles narrated videos from a theme, a narration track and generated scene media:
//! title screen, subtitled scene segments, mixed audio, one timed MP4.

mod assets;
mod composition;
mod config;
mod error;
mod ffmpeg;
mod jobs;
mod pipeline;
mod render;
mod sanitize;
mod subtitles;
mod timing;
mod types;
mod video;

use anyhow::{anyhow, Context, Result};
use config::AppConfig;
use rust_i18n::t;
use simplelog::{Config, LevelFilter, WriteLogger};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::ComposeResult;
use crate::ffmpeg::{build_args, EncodeSettings};
use crate::jobs::{jobs_dir, load_record, JobStage, JobTracker};
use crate::pipeline::{plan_job, prepare_job, run_job, PipelineContext, PipelineOptions};
use crate::render::default_output_path;
use crate::types::{new_job_id, JobDescriptor, RenderOutcome, APP_NAME, APP_VERSION};

// Init translations
rust_i18n::i18n!("locales", fallback = "en");

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Check and strip --debug flag
    let debug_mode = args.contains(&"--debug".to_string());
    if debug_mode {
        let _ = WriteLogger::init(
            LevelFilter::Debug,
            Config::default(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")?,
        );
        log::info!("Starting {} {} with debug logging", APP_NAME, APP_VERSION);
        log::debug!("Raw Args: {:?}", args);
    }

    let actual_args: Vec<String> = args.iter().filter(|a| *a != "--debug").cloned().collect();

    if actual_args.len() < 2 {
        print_help(&actual_args[0]);
        return Ok(());
    }

    handle_cli_command(&actual_args).await
}

async fn handle_cli_command(args: &[String]) -> Result<()> {
    let command = args[1].as_str();

    if matches!(command, "help" | "--help" | "-h") {
        // Help never creates settings.json, but honours its language when present
        if let Ok(config) = AppConfig::load() {
            rust_i18n::set_locale(&config.language);
        }
        print_help(&args[0]);
        return Ok(());
    }

    let config = load_config_for_cli()?;

    match command {
        "render" => {
            if args.len() < 3 {
                eprintln!("{}", t!("cli.usage_render", program = args[0]));
                eprintln!("\n{}", t!("cli.example"));
                eprintln!("  {} render job.json", args[0]);
                eprintln!("  {} render job.json story.mp4", args[0]);
                std::process::exit(1);
            }

            let descriptor = read_descriptor(Path::new(&args[2]))?;
            config.ensure_output_dir()?;
            let ctx = Arc::new(PipelineContext::from_config(&config)?);

            let job_id = new_job_id();
            let output = args
                .get(3)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_output_path(&config.default_output_dir, &job_id));
            let tracker = Arc::new(JobTracker::create(&config.jobs_dir(), &job_id)?);

            println!("{}", t!("render.title"));
            println!("{}", t!("render.job", id = job_id));
            println!("{}", t!("render.scenes", count = descriptor.assets.len()));
            println!("{}", t!("render.format", format = format!("{:?}", descriptor.format)));
            println!("{}", t!("render.backend", backend = ctx.backend.name()));

            let handle = tokio::spawn(run_tracked(
                ctx,
                tracker.clone(),
                job_id.clone(),
                descriptor,
                output,
            ));

            match handle.await {
                Ok(Ok(outcome)) => {
                    println!(
                        "{}",
                        t!(
                            "render.saved",
                            path = outcome.artifact,
                            duration = format!("{:.1}", outcome.total_duration)
                        )
                    );
                    Ok(())
                }
                Ok(Err(e)) => Err(anyhow!(e).context(format!("Job {} failed", job_id))),
                Err(join_error) => {
                    if let Err(e) = tracker.fail_with("internal", &join_error.to_string()) {
                        log::warn!("Failed to save job record for {}: {:#}", job_id, e);
                    }
                    Err(anyhow!("Job {} aborted: {}", job_id, join_error))
                }
            }
        }

        "plan" => {
            if args.len() < 3 {
                eprintln!("{}", t!("cli.usage_plan", program = args[0]));
                std::process::exit(1);
            }

            let descriptor = read_descriptor(Path::new(&args[2]))?;
            let options = PipelineOptions::from_config(&config);
            let job = prepare_job(
                &new_job_id(),
                &descriptor,
                &config.background_catalog(),
                &options,
            )?
            .with_source_paths();
            let plan = plan_job(&job, job.duration_seconds, &options)?;

            println!("{}", t!("plan.header", file = args[2]));
            println!(
                "{}",
                t!(
                    "plan.resolution",
                    width = job.resolution.width,
                    height = job.resolution.height
                )
            );
            println!(
                "{}",
                t!(
                    "plan.title_screen",
                    duration = format!("{:.1}", plan.timing.title_duration)
                )
            );
            let starts = plan.timing.segment_starts();
            for (i, chunk) in plan.chunks.iter().enumerate() {
                println!(
                    "   [{}] {:>7.3}s +{:.3}s  {}",
                    i,
                    starts[i],
                    plan.timing.segment_durations[i],
                    chunk.text.replace('\n', " / ")
                );
            }
            println!(
                "{}",
                t!(
                    "plan.total",
                    duration = format!("{:.3}", plan.timing.total_duration)
                )
            );
            println!();

            let settings = EncodeSettings::from_config(
                &config.render,
                config.gpu_acceleration.unwrap_or(false),
            );
            let ffmpeg_args = build_args(&plan.graph, &settings, Path::new("output.mp4"));
            println!("{} {}", config.render.ffmpeg_path, ffmpeg_args.join(" "));
            Ok(())
        }

        "batch" => {
            if args.len() < 3 {
                eprintln!("{}", t!("cli.usage_batch", program = args[0]));
                eprintln!("\n{}", t!("cli.example"));
                eprintln!("  {} batch ./jobs", args[0]);
                eprintln!("  {} batch ./jobs ./videos", args[0]);
                std::process::exit(1);
            }

            let input_dir = &args[2];
            let output_dir = args
                .get(3)
                .cloned()
                .unwrap_or_else(|| config.default_output_dir.clone());

            println!("{}", t!("batch.title"));
            println!("{}", t!("batch.input_dir", dir = input_dir));
            println!("{}", t!("batch.output_dir", dir = output_dir));
            println!("{}", t!("batch.concurrent", count = config.max_concurrent_jobs));

            let (succeeded, total) = run_batch(&config, Path::new(input_dir), Path::new(&output_dir)).await?;

            println!(
                "{}",
                t!(
                    "batch.done",
                    succeeded = succeeded,
                    total = total,
                    dir = output_dir
                )
            );
            if succeeded < total {
                return Err(anyhow!("{} job(s) failed", total - succeeded));
            }
            Ok(())
        }

        "status" => {
            if args.len() < 3 {
                eprintln!("{}", t!("cli.usage_status", program = args[0]));
                std::process::exit(1);
            }

            // Batch jobs keep their records next to the videos they produced
            let records = args
                .get(3)
                .map(|dir| jobs_dir(Path::new(dir)))
                .unwrap_or_else(|| config.jobs_dir());
            let record = load_record(&records, &args[2])?;
            println!("{}", t!("status.job", id = record.id));
            println!("{}", t!("status.status", status = format!("{:?}", record.status)));
            if let Some(stage) = record.stage {
                println!("{}", t!("status.stage", stage = stage.label()));
            }
            if let Some(duration) = record.total_duration {
                println!("{}", t!("status.duration", duration = format!("{:.1}", duration)));
            }
            if let Some(kind) = &record.error_kind {
                println!("{}", t!("status.error", kind = kind));
            }
            if let Some(detail) = &record.detail {
                println!("{}", t!("status.detail", detail = detail));
            }
            println!("{}", t!("status.updated", time = record.updated_at));
            Ok(())
        }

        "check" => {
            video::check_dependencies(&config.render.ffmpeg_path)?;
            println!("{}", t!("check.ffmpeg_ok"));

            if video::check_nvenc_availability(&config.render.ffmpeg_path) {
                println!("{}", t!("check.nvenc_ok"));
            } else {
                println!("{}", t!("check.nvenc_missing"));
            }

            let scratch = assets::ScratchSpace::new(&config.scratch_dir);
            println!("{}", t!("check.scratch", dir = scratch.root().display()));
            let bgm = scratch.shared_dir().join(&config.default_bgm_file);
            if bgm.exists() {
                println!("{}", t!("check.bgm_present", path = bgm.display()));
            } else if config.default_bgm_url.is_some() {
                println!("{}", t!("check.bgm_on_demand"));
            } else {
                println!("{}", t!("check.bgm_none"));
            }
            Ok(())
        }

        _ => {
            eprintln!("{}", t!("cli.unknown_command", command = command));
            print_help(&args[0]);
            std::process::exit(1);
        }
    }
}

/// Run one job and keep its record current
async fn run_tracked(
    ctx: Arc<PipelineContext>,
    tracker: Arc<JobTracker>,
    job_id: String,
    descriptor: JobDescriptor,
    output: PathBuf,
) -> ComposeResult<RenderOutcome> {
    let stage_tracker = tracker.clone();
    let prefix = job_id.clone();
    let on_stage = move |stage: JobStage| {
        println!("   [{}] {}", prefix, stage.label());
        stage_tracker.stage(stage);
    };

    let result = run_job(&ctx, &job_id, &descriptor, &output, &on_stage).await;

    let recorded = match &result {
        Ok(outcome) => tracker.succeed(outcome),
        Err(e) => tracker.fail(e),
    };
    if let Err(e) = recorded {
        log::warn!("Failed to save job record for {}: {:#}", job_id, e);
    }
    result
}

/// Render every descriptor in `input_dir`, at most `max_concurrent_jobs` at a time.
/// Returns (succeeded, total).
async fn run_batch(config: &AppConfig, input_dir: &Path, output_dir: &Path) -> Result<(usize, usize)> {
    let mut files: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(anyhow!("No job descriptors (*.json) in {}", input_dir.display()));
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let ctx = Arc::new(PipelineContext::from_config(config)?);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
    let records = jobs_dir(output_dir);
    let total = files.len();
    let mut set = JoinSet::new();

    for (i, file) in files.into_iter().enumerate() {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("job{}", i));

        let descriptor = match read_descriptor(&file) {
            Ok(d) => d,
            Err(e) => {
                println!(
                    "{}",
                    t!(
                        "batch.invalid",
                        index = i + 1,
                        total = total,
                        name = name,
                        error = format!("{:#}", e)
                    )
                );
                continue;
            }
        };

        let job_id = new_job_id();
        let tracker = Arc::new(JobTracker::create(&records, &job_id)?);
        let output = output_dir.join(format!("{}.mp4", name));
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();

        println!(
            "{}",
            t!(
                "batch.queued",
                index = i + 1,
                total = total,
                name = name,
                id = job_id
            )
        );
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (name, Err(anyhow!("Job queue closed: {}", e))),
            };
            let result = run_tracked(ctx, tracker, job_id, descriptor, output)
                .await
                .map_err(anyhow::Error::from);
            (name, result)
        });
    }

    let mut succeeded = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(outcome))) => {
                succeeded += 1;
                println!("{}", t!("batch.job_done", name = name, path = outcome.artifact));
            }
            Ok((name, Err(e))) => println!(
                "{}",
                t!("batch.job_failed", name = name, error = format!("{:#}", e))
            ),
            Err(e) => println!("{}", t!("batch.job_aborted", error = e)),
        }
    }

    Ok((succeeded, total))
}

fn read_descriptor(path: &Path) -> Result<JobDescriptor> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid job descriptor {}", path.display()))
}

/// Print help message
fn print_help(program: &str) {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!();
    println!("{}", t!("help.usage"));
    println!("{}", t!("help.render", program = program));
    println!("{}", t!("help.plan", program = program));
    println!("{}", t!("help.batch", program = program));
    println!("{}", t!("help.status", program = program));
    println!("{}", t!("help.check", program = program));
    println!("{}", t!("help.help", program = program));
    println!();
    println!("{}", t!("help.debug"));
    println!();
    println!("{}", t!("help.descriptor"));
    println!("  {{\"assets\": [{{\"type\": \"image\", \"url\": \"...\"}}], \"audioUrl\": \"...\",");
    println!("   \"narrationText\": \"...\", \"theme\": \"...\", \"durationSeconds\": 30,");
    println!("   \"format\": \"shorts\", \"backgroundId\": \"sakura\"}}");
    println!();
    println!("{}", t!("help.configuration"));
    println!("{}", t!("help.edit_settings"));
    println!("{}", t!("help.language"));
    println!("{}", t!("help.backgrounds"));
    println!("{}", t!("help.default_bgm"));
    println!("{}", t!("help.backend"));
    println!("{}", t!("help.timeout"));
}

/// Load config for CLI commands, creating the default file on first run
fn load_config_for_cli() -> Result<AppConfig> {
    if !Path::new(AppConfig::CONFIG_PATH).exists() {
        AppConfig::create_default()?;
        println!("{}", t!("cli.created_config", path = AppConfig::CONFIG_PATH));
    }

    let config = AppConfig::load().context("Failed to load settings.json")?;
    rust_i18n::set_locale(&config.language);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;

    #[test]
    fn test_cli_messages_are_localized() {
        let en = t!("render.title", locale = "en").to_string();
        let ja = t!("render.title", locale = "ja").to_string();
        let es = t!("render.title", locale = "es").to_string();
        assert_ne!(en, ja);
        assert_ne!(en, es);

        let done = t!("batch.done", locale = "es", succeeded = 1, total = 2, dir = "./videos");
        assert!(done.contains("1/2"));
        assert!(done.contains("./videos"));
    }

    #[test]
    fn test_unknown_locale_falls_back_to_english() {
        assert_eq!(
            t!("check.bgm_none", locale = "xx").to_string(),
            t!("check.bgm_none", locale = "en").to_string()
        );
    }

    #[tokio::test]
    async fn test_batch_records_follow_output_dir() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        fs::write(
            input.path().join("empty.json"),
            r#"{"assets": [], "audioUrl": "https://cdn.example.com/n.mp3",
                "narrationText": "Hello.", "theme": "Empty", "durationSeconds": 20,
                "format": "shorts"}"#,
        )
        .unwrap();

        let config = AppConfig {
            default_output_dir: scratch.path().join("default").to_string_lossy().to_string(),
            scratch_dir: scratch.path().to_string_lossy().to_string(),
            gpu_acceleration: Some(false),
            use_default_bgm: false,
            ..AppConfig::default()
        };

        let (succeeded, total) = run_batch(&config, input.path(), output.path()).await.unwrap();
        assert_eq!((succeeded, total), (0, 1));

        let records: Vec<PathBuf> = fs::read_dir(jobs_dir(output.path()))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(records.len(), 1);

        let job_id = records[0].file_stem().unwrap().to_string_lossy().to_string();
        let record = load_record(&jobs_dir(output.path()), &job_id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_kind.as_deref(), Some("graph_construction"));
        assert!(!config.jobs_dir().exists());
    }
}
