//! ffmpeg command line generation
//! Serializes a composition graph into `-filter_complex` and the surrounding arguments.

use std::path::Path;

use crate::composition::{
    CompositionGraph, GraphInput, InputKind, MixDuration, Pad, Placement, Stage, StageOp,
    StreamKind, TextOverlay,
};
use crate::config::RenderConfig;
use crate::sanitize::sanitize_for_overlay;

/// Encoder settings for the final container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub use_gpu: bool,
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate: String,
}

impl EncodeSettings {
    pub fn from_config(config: &RenderConfig, use_gpu: bool) -> Self {
        Self {
            use_gpu,
            preset: config.preset.clone(),
            crf: config.crf,
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            use_gpu: false,
            preset: "medium".to_string(),
            crf: 23,
            audio_bitrate: "192k".to_string(),
        }
    }
}

/// Second escaping level: characters with meaning in a filtergraph description.
/// Applied on top of the option-value escaping done by [`sanitize_for_overlay`].
pub fn escape_filtergraph(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

fn pad_label(pad: &Pad) -> String {
    match pad {
        Pad::Input { index, stream } => {
            let kind = match stream {
                StreamKind::Video => "v",
                StreamKind::Audio => "a",
            };
            format!("[{}:{}]", index, kind)
        }
        Pad::Named(name) => format!("[{}]", name),
    }
}

fn overlay_axis(placement: Placement, centered: &str) -> String {
    match placement {
        Placement::Center => centered.to_string(),
        Placement::Pixels(px) => px.to_string(),
    }
}

fn drawtext_filter(text: &TextOverlay) -> String {
    let mut filter = format!(
        "drawtext=expansion=none:text={}:fontsize={}:fontcolor={}:bordercolor={}:borderw={}:x={}:y={}",
        escape_filtergraph(&text.text),
        text.font_size,
        text.fill_color,
        text.stroke_color,
        text.stroke_width,
        overlay_axis(text.x, "(w-text_w)/2"),
        text.y
    );
    if let Some(font) = &text.font_file {
        filter.push_str(&format!(
            ":fontfile={}",
            escape_filtergraph(&sanitize_for_overlay(font))
        ));
    }
    if let Some(color) = &text.box_color {
        filter.push_str(&format!(
            ":box=1:boxcolor={}:boxborderw={}",
            color, text.box_padding
        ));
    }
    filter
}

/// One operation as an ffmpeg filter (or short comma-joined chain)
pub fn op_filter(op: &StageOp) -> String {
    match op {
        StageOp::Letterbox { width, height } => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1",
            w = width,
            h = height
        ),
        StageOp::ScaleWidth { width } => format!("scale={}:-1", width),
        StageOp::Overlay { x, y } => format!(
            "overlay=x={}:y={}",
            overlay_axis(*x, "(main_w-overlay_w)/2"),
            overlay_axis(*y, "(main_h-overlay_h)/2")
        ),
        StageOp::DrawText(text) => drawtext_filter(text),
        StageOp::FrameRate { fps } => format!("fps={}", fps),
        StageOp::Trim { duration } => {
            format!("trim=duration={},setpts=PTS-STARTPTS", secs(*duration))
        }
        StageOp::Concat { segments } => format!("concat=n={}:v=1:a=0", segments),
        StageOp::Volume { gain } => format!("volume={:.3}", gain),
        StageOp::Delay { millis } => format!("adelay={}:all=1", millis),
        StageOp::Mix {
            inputs,
            duration,
            normalize,
        } => {
            let duration = match duration {
                MixDuration::Longest => "longest",
            };
            format!(
                "amix=inputs={}:duration={}:normalize={}",
                inputs,
                duration,
                u8::from(*normalize)
            )
        }
        StageOp::PadAudio { duration } => format!("apad=whole_dur={}", secs(*duration)),
        StageOp::TrimAudio { duration } => {
            format!("atrim=duration={},asetpts=PTS-STARTPTS", secs(*duration))
        }
    }
}

fn stage_filter(stage: &Stage) -> String {
    let inputs: String = stage.inputs.iter().map(pad_label).collect();
    let chain = stage
        .ops
        .iter()
        .map(op_filter)
        .collect::<Vec<_>>()
        .join(",");
    // An empty chain still needs a filter to carry the label
    let chain = if chain.is_empty() {
        "null".to_string()
    } else {
        chain
    };
    format!("{}{}[{}]", inputs, chain, stage.output)
}

/// The complete `-filter_complex` value
pub fn build_filter_complex(graph: &CompositionGraph) -> String {
    graph
        .stages
        .iter()
        .map(stage_filter)
        .collect::<Vec<_>>()
        .join(";")
}

fn input_args(input: &GraphInput, fps: u32) -> Vec<String> {
    let mut args = Vec::new();
    match input.kind {
        InputKind::Still => {
            args.push("-loop".to_string());
            args.push("1".to_string());
            args.push("-framerate".to_string());
            args.push(fps.to_string());
        }
        InputKind::Motion => {
            args.push("-stream_loop".to_string());
            args.push("-1".to_string());
        }
        InputKind::Audio => {}
    }
    if let Some(duration) = input.duration {
        args.push("-t".to_string());
        args.push(secs(duration));
    }
    args.push("-i".to_string());
    args.push(input.path.to_string_lossy().to_string());
    args
}

fn encoder_args(settings: &EncodeSettings) -> Vec<String> {
    if settings.use_gpu {
        vec![
            "-c:v".to_string(),
            "h264_nvenc".to_string(),
            "-preset".to_string(),
            "p4".to_string(),
            "-rc".to_string(),
            "vbr".to_string(),
            "-cq".to_string(),
            settings.crf.to_string(),
            "-b:v".to_string(),
            "0".to_string(),
        ]
    } else {
        vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            settings.preset.clone(),
            "-crf".to_string(),
            settings.crf.to_string(),
        ]
    }
}

/// Full ffmpeg argument list (without the program name)
pub fn build_args(graph: &CompositionGraph, settings: &EncodeSettings, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    for input in &graph.inputs {
        args.extend(input_args(input, graph.fps));
    }

    args.push("-filter_complex".to_string());
    args.push(build_filter_complex(graph));

    args.push("-map".to_string());
    args.push(format!("[{}]", graph.video_output));
    args.push("-map".to_string());
    args.push(format!("[{}]", graph.audio_output));

    args.extend(encoder_args(settings));

    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-r".to_string());
    args.push(graph.fps.to_string());
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push(settings.audio_bitrate.clone());
    args.push("-t".to_string());
    args.push(secs(graph.total_duration));
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push("-y".to_string());
    args.push(output.to_string_lossy().to_string());

    args
}
