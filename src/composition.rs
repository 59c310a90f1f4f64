//! Composition graph for YT StoryMaker
//!
//! The graph is a backend-neutral description of the video: which media files
//! go in, which chains of operations run over them and which two named outputs
//! ("video" and "audio") come out. [`crate::ffmpeg`] turns it into an ffmpeg
//! filter graph; the remote backend ships it as JSON.
//!
//! Stage order matters: a stage may only consume inputs and outputs of stages
//! that come before it.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{ComposeError, ComposeResult};
use crate::sanitize::sanitize_for_overlay;
use crate::subtitles::{wrap_text, LineLayout};
use crate::timing::{TimingPlan, OUTPUT_FPS};
use crate::types::{AssetKind, RenderJob, Resolution, SubtitleChunk, TextStyle};

/// Gain applied to the narration track
pub const NARRATION_GAIN: f64 = 1.5;

/// Background music volume as a fraction of the narration volume
pub const BGM_RATIO: f64 = 0.1;

/// Vertical position of the subtitle block, as a fraction of the frame height
pub const SUBTITLE_Y_RATIO: f64 = 0.72;

/// Vertical position of the logo / channel name on the title screen
pub const BRAND_Y_RATIO: f64 = 0.08;

/// Share of the frame width the title text may use
pub const TITLE_WIDTH_RATIO: f64 = 0.9;

/// Box drawn behind subtitles
pub const SUBTITLE_BOX_COLOR: &str = "black@0.5";

pub const VIDEO_OUTPUT: &str = "video";
pub const AUDIO_OUTPUT: &str = "audio";

/// What a graph input is used for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    TitleBackground,
    Logo,
    Visual(usize),
    Narration,
    Music,
}

/// How the backend should read an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Single image repeated for the given duration
    Still,
    /// Video looped until the given duration is reached
    Motion,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphInput {
    pub role: InputRole,
    pub kind: InputKind,
    pub path: PathBuf,
    /// Remote location of the same file, when there is one
    pub url: Option<String>,
    /// How many seconds to read (visual inputs only)
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

/// A connection point: an input stream or the named output of an earlier stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pad {
    Input { index: usize, stream: StreamKind },
    Named(String),
}

impl Pad {
    pub fn named(name: impl Into<String>) -> Self {
        Pad::Named(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Center,
    Pixels(i32),
}

/// One line of text drawn on a video stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextOverlay {
    /// Already passed through [`sanitize_for_overlay`]
    pub text: String,
    pub font_size: u32,
    pub font_file: Option<String>,
    pub x: Placement,
    pub y: i32,
    pub fill_color: String,
    pub stroke_color: String,
    pub stroke_width: u32,
    pub box_color: Option<String>,
    pub box_padding: u32,
}

/// How long a mix runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MixDuration {
    /// Until the longest input ends
    Longest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum StageOp {
    /// Fit inside the frame keeping aspect ratio, pad the rest with black
    Letterbox { width: u32, height: u32 },
    ScaleWidth { width: u32 },
    /// Second input drawn over the first
    Overlay { x: Placement, y: Placement },
    DrawText(TextOverlay),
    FrameRate { fps: u32 },
    Trim { duration: f64 },
    Concat { segments: usize },
    Volume { gain: f64 },
    Delay { millis: u64 },
    Mix {
        inputs: usize,
        duration: MixDuration,
        normalize: bool,
    },
    /// Extend with silence up to the duration
    PadAudio { duration: f64 },
    TrimAudio { duration: f64 },
}

/// A chain of operations from some pads to one named output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub inputs: Vec<Pad>,
    pub ops: Vec<StageOp>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionGraph {
    pub resolution: Resolution,
    pub fps: u32,
    pub total_duration: f64,
    pub inputs: Vec<GraphInput>,
    pub stages: Vec<Stage>,
    pub video_output: String,
    pub audio_output: String,
}

impl CompositionGraph {
    #[cfg(test)]
    pub fn stage(&self, output: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.output == output)
    }

    /// Check that every pad refers to an existing input or an earlier stage
    /// and that both final outputs exist.
    pub fn validate(&self) -> ComposeResult<()> {
        let mut produced: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            for pad in &stage.inputs {
                match pad {
                    Pad::Input { index, .. } if *index >= self.inputs.len() => {
                        return Err(ComposeError::graph(
                            stage.output.clone(),
                            format!("input #{} does not exist", index),
                        ));
                    }
                    Pad::Named(name) if !produced.contains(name.as_str()) => {
                        return Err(ComposeError::graph(
                            stage.output.clone(),
                            format!("'{}' is used before it is produced", name),
                        ));
                    }
                    _ => {}
                }
            }
            if !produced.insert(stage.output.as_str()) {
                return Err(ComposeError::graph(
                    stage.output.clone(),
                    "output name is produced twice",
                ));
            }
        }
        for output in [&self.video_output, &self.audio_output] {
            if !produced.contains(output.as_str()) {
                return Err(ComposeError::graph(
                    "output",
                    format!("final output '{}' is never produced", output),
                ));
            }
        }
        Ok(())
    }
}

/// Job-independent settings for the builder
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Logo image for the title screen, if one exists on disk
    pub logo: Option<PathBuf>,
    /// Drawn instead of the logo when there is none
    pub channel_name: String,
    pub font_file: Option<String>,
    /// Wrapping used for the theme text on the title screen
    pub title_layout: LineLayout,
}

/// Text sizes derived from the frame
struct TextMetrics {
    title: u32,
    romanized: u32,
    brand: u32,
    subtitle: u32,
}

impl TextMetrics {
    fn for_resolution(resolution: Resolution) -> Self {
        let base = resolution.short_side();
        Self {
            title: base / 12,
            romanized: base / 28,
            brand: base / 20,
            subtitle: base / 24,
        }
    }
}

/// Title wrap limit: the layout's limit, narrowed so a line of full-width
/// glyphs stays inside the frame
fn title_wrap_limit(layout_max: usize, frame_width: u32, font_size: u32) -> usize {
    let fit = (frame_width as f64 * TITLE_WIDTH_RATIO / font_size.max(1) as f64).floor() as usize;
    layout_max.min(fit).max(1)
}

fn line_height(font_size: u32) -> i32 {
    (font_size as f64 * 1.3).round() as i32
}

struct GraphBuilder<'a> {
    job: &'a RenderJob,
    style: &'a TextStyle,
    options: &'a BuildOptions,
    metrics: TextMetrics,
    inputs: Vec<GraphInput>,
    stages: Vec<Stage>,
}

/// Build the composition graph for a materialized job.
///
/// Fails before anything is handed to a backend when an asset has no local
/// file or when the plan and the job disagree. A segment without a subtitle
/// chunk is drawn without text.
pub fn build_graph(
    job: &RenderJob,
    plan: &TimingPlan,
    chunks: &[SubtitleChunk],
    style: &TextStyle,
    options: &BuildOptions,
) -> ComposeResult<CompositionGraph> {
    if job.assets.is_empty() {
        return Err(ComposeError::graph(
            "per-asset",
            "job has no visual assets",
        ));
    }
    if plan.segment_count() != job.assets.len() {
        return Err(ComposeError::graph(
            "per-asset",
            format!(
                "timing plan has {} segments for {} assets",
                plan.segment_count(),
                job.assets.len()
            ),
        ));
    }
    if plan.has_title_screen() != job.has_title_screen() {
        return Err(ComposeError::graph(
            "title",
            "timing plan and job disagree about the title screen",
        ));
    }

    let mut builder = GraphBuilder {
        job,
        style,
        options,
        metrics: TextMetrics::for_resolution(job.resolution),
        inputs: Vec::new(),
        stages: Vec::new(),
    };

    let mut segments = Vec::new();
    if let Some(title) = builder.title_stage(plan)? {
        segments.push(title);
    }
    for index in 0..job.assets.len() {
        let chunk = chunks.iter().find(|c| c.segment_index == index);
        segments.push(builder.asset_stage(index, plan.segment_durations[index], chunk)?);
    }
    builder.concat_stage(segments, plan.total_duration);
    builder.audio_stage(plan)?;

    let graph = CompositionGraph {
        resolution: job.resolution,
        fps: OUTPUT_FPS,
        total_duration: plan.total_duration,
        inputs: builder.inputs,
        stages: builder.stages,
        video_output: VIDEO_OUTPUT.to_string(),
        audio_output: AUDIO_OUTPUT.to_string(),
    };
    graph.validate()?;

    log::debug!(
        "Built composition graph for {}: {} inputs, {} stages, {:.3}s",
        job.id,
        graph.inputs.len(),
        graph.stages.len(),
        graph.total_duration
    );

    Ok(graph)
}

impl GraphBuilder<'_> {
    fn add_input(&mut self, input: GraphInput) -> usize {
        self.inputs.push(input);
        self.inputs.len() - 1
    }

    fn push_stage(&mut self, inputs: Vec<Pad>, ops: Vec<StageOp>, output: &str) -> String {
        self.stages.push(Stage {
            inputs,
            ops,
            output: output.to_string(),
        });
        output.to_string()
    }

    fn text(&self, raw: &str, font_size: u32, y: i32, boxed: bool) -> StageOp {
        StageOp::DrawText(TextOverlay {
            text: sanitize_for_overlay(raw),
            font_size,
            font_file: self.options.font_file.clone(),
            x: Placement::Center,
            y,
            fill_color: self.style.fill_color.clone(),
            stroke_color: self.style.stroke_color.clone(),
            stroke_width: self.style.stroke_width,
            box_color: boxed.then(|| SUBTITLE_BOX_COLOR.to_string()),
            box_padding: if boxed { font_size / 3 } else { 0 },
        })
    }

    fn normalize_ops(&self, duration: f64) -> Vec<StageOp> {
        let Resolution { width, height } = self.job.resolution;
        vec![
            StageOp::Letterbox { width, height },
            StageOp::FrameRate { fps: OUTPUT_FPS },
            StageOp::Trim { duration },
        ]
    }

    /// Background, logo or channel name, theme and romanized line
    fn title_stage(&mut self, plan: &TimingPlan) -> ComposeResult<Option<String>> {
        let job = self.job;
        let Some(title) = &job.title else {
            return Ok(None);
        };
        let background = title.background.local_path.clone().ok_or_else(|| {
            ComposeError::graph(
                "title",
                format!(
                    "title background {} was not materialized",
                    title.background.source
                ),
            )
        })?;

        let Resolution { width, height } = job.resolution;
        let duration = plan.title_duration;
        let brand_y = (height as f64 * BRAND_Y_RATIO).round() as i32;

        let bg_index = self.add_input(GraphInput {
            role: InputRole::TitleBackground,
            kind: InputKind::Still,
            path: background,
            url: title
                .background
                .is_remote()
                .then(|| title.background.source.clone()),
            duration: Some(duration),
        });
        let base_ops = self.normalize_ops(duration);
        let mut current = self.push_stage(
            vec![Pad::Input {
                index: bg_index,
                stream: StreamKind::Video,
            }],
            base_ops,
            "title_base",
        );

        if let Some(logo) = self.options.logo.clone() {
            let logo_index = self.add_input(GraphInput {
                role: InputRole::Logo,
                kind: InputKind::Still,
                path: logo,
                url: None,
                duration: Some(duration),
            });
            let logo_pad = self.push_stage(
                vec![Pad::Input {
                    index: logo_index,
                    stream: StreamKind::Video,
                }],
                vec![StageOp::ScaleWidth { width: width / 4 }],
                "title_logo",
            );
            current = self.push_stage(
                vec![Pad::named(current), Pad::named(logo_pad)],
                vec![StageOp::Overlay {
                    x: Placement::Center,
                    y: Placement::Pixels(brand_y),
                }],
                "title_branded",
            );
        } else if !self.options.channel_name.trim().is_empty() {
            let channel = self.text(
                &self.options.channel_name,
                self.metrics.brand,
                brand_y,
                false,
            );
            current = self.push_stage(vec![Pad::named(current)], vec![channel], "title_branded");
        }

        let max_chars =
            title_wrap_limit(self.options.title_layout.max_chars, width, self.metrics.title);
        let theme_lines = wrap_text(&title.text, max_chars);
        let title_line_height = line_height(self.metrics.title);
        let block_height = title_line_height * theme_lines.len() as i32;
        let top = height as i32 / 2 - block_height / 2;

        let mut ops: Vec<StageOp> = theme_lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                self.text(line, self.metrics.title, top + i as i32 * title_line_height, false)
            })
            .collect();

        if let Some(romanized) = title.romanized.as_deref().filter(|r| !r.trim().is_empty()) {
            let y = top + block_height + self.metrics.romanized as i32 / 2;
            ops.push(self.text(romanized, self.metrics.romanized, y, false));
        }

        if ops.is_empty() {
            return Ok(Some(current));
        }
        Ok(Some(self.push_stage(vec![Pad::named(current)], ops, "title")))
    }

    /// Scaled visual plus its subtitle block
    fn asset_stage(
        &mut self,
        index: usize,
        duration: f64,
        chunk: Option<&SubtitleChunk>,
    ) -> ComposeResult<String> {
        let job = self.job;
        let asset = &job.assets[index];
        let path = asset.local_path.clone().ok_or_else(|| {
            ComposeError::graph(
                "per-asset",
                format!("asset {} ({}) was not materialized", index, asset.source_url),
            )
        })?;
        let kind = match asset.kind {
            AssetKind::Image => InputKind::Still,
            AssetKind::Video => InputKind::Motion,
        };
        let url = crate::types::is_remote_source(&asset.source_url)
            .then(|| asset.source_url.clone());

        let input = self.add_input(GraphInput {
            role: InputRole::Visual(index),
            kind,
            path,
            url,
            duration: Some(duration),
        });

        let mut ops = self.normalize_ops(duration);
        if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
            let height = job.resolution.height as f64;
            let top = (height * SUBTITLE_Y_RATIO).round() as i32;
            let step = line_height(self.metrics.subtitle);
            let lines: Vec<&str> = chunk.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                ops.push(self.text(line, self.metrics.subtitle, top + i as i32 * step, true));
            }
        }

        Ok(self.push_stage(
            vec![Pad::Input {
                index: input,
                stream: StreamKind::Video,
            }],
            ops,
            &format!("seg{}", index),
        ))
    }

    fn concat_stage(&mut self, segments: Vec<String>, total_duration: f64) {
        let count = segments.len();
        let concat = self.push_stage(
            segments.into_iter().map(Pad::Named).collect(),
            vec![StageOp::Concat { segments: count }],
            "concat",
        );
        self.push_stage(
            vec![Pad::named(concat)],
            vec![StageOp::Trim {
                duration: total_duration,
            }],
            VIDEO_OUTPUT,
        );
    }

    /// Narration (boosted, delayed past the title) mixed with optional music
    fn audio_stage(&mut self, plan: &TimingPlan) -> ComposeResult<()> {
        let job = self.job;
        let narration_path = job.audio_track.local_path.clone().ok_or_else(|| {
            ComposeError::graph(
                "audio",
                format!("narration {} was not materialized", job.audio_track.source),
            )
        })?;
        let narration_url = job
            .audio_track
            .is_remote()
            .then(|| job.audio_track.source.clone());
        let narration_index = self.add_input(GraphInput {
            role: InputRole::Narration,
            kind: InputKind::Audio,
            path: narration_path,
            url: narration_url,
            duration: None,
        });

        let mut narration_ops = vec![StageOp::Volume {
            gain: NARRATION_GAIN,
        }];
        if plan.has_title_screen() {
            narration_ops.push(StageOp::Delay {
                millis: (plan.title_duration * 1000.0).round() as u64,
            });
        }
        let mut current = self.push_stage(
            vec![Pad::Input {
                index: narration_index,
                stream: StreamKind::Audio,
            }],
            narration_ops,
            "narration",
        );

        if let Some(track) = &job.bgm_track {
            let path = track.local_path().map(|p| p.to_path_buf()).ok_or_else(|| {
                ComposeError::graph("audio", "background music was not materialized")
            })?;
            let url = track.remote_url().map(str::to_string);
            let music_index = self.add_input(GraphInput {
                role: InputRole::Music,
                kind: InputKind::Audio,
                path,
                url,
                duration: None,
            });
            let music = self.push_stage(
                vec![Pad::Input {
                    index: music_index,
                    stream: StreamKind::Audio,
                }],
                vec![StageOp::Volume {
                    gain: NARRATION_GAIN * BGM_RATIO,
                }],
                "music",
            );
            current = self.push_stage(
                vec![Pad::named(current), Pad::named(music)],
                vec![StageOp::Mix {
                    inputs: 2,
                    duration: MixDuration::Longest,
                    normalize: false,
                }],
                "mix",
            );
        }

        self.push_stage(
            vec![Pad::named(current)],
            vec![
                StageOp::PadAudio {
                    duration: plan.total_duration,
                },
                StageOp::TrimAudio {
                    duration: plan.total_duration,
                },
            ],
            AUDIO_OUTPUT,
        );
        Ok(())
    }
}
