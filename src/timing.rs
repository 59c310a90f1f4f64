//! Timing planner for YT StoryMaker
//! Decides how long the title screen and every visual segment stay on screen.

use serde::Serialize;

use crate::error::{ComposeError, ComposeResult};

/// Title screen length when one is shown
pub const TITLE_DURATION_SECS: f64 = 2.0;

/// Silence kept after the narration so its tail is never cut by rounding
pub const END_BUFFER_SECS: f64 = 3.0;

/// Output frame rate of every segment
pub const OUTPUT_FPS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingPlan {
    pub title_duration: f64,
    /// One entry per visual asset. They add up to content + end buffer, so the
    /// last visual stays up while the trailing audio plays out.
    pub segment_durations: Vec<f64>,
    pub content_duration: f64,
    pub end_buffer: f64,
    pub total_duration: f64,
}

impl TimingPlan {
    pub fn has_title_screen(&self) -> bool {
        self.title_duration > 0.0
    }

    pub fn segment_count(&self) -> usize {
        self.segment_durations.len()
    }

    /// Start of every segment on the output timeline
    pub fn segment_starts(&self) -> Vec<f64> {
        let mut starts = Vec::with_capacity(self.segment_durations.len());
        let mut offset = self.title_duration;
        for duration in &self.segment_durations {
            starts.push(offset);
            offset += duration;
        }
        starts
    }
}

/// Build the timing plan for a job
pub fn plan_timing(
    has_title_screen: bool,
    content_duration_secs: f64,
    asset_count: usize,
) -> ComposeResult<TimingPlan> {
    if asset_count == 0 {
        return Err(ComposeError::graph(
            "timing",
            "at least one visual asset is required",
        ));
    }
    if !content_duration_secs.is_finite() || content_duration_secs <= 0.0 {
        return Err(ComposeError::graph(
            "timing",
            format!(
                "content duration must be positive, got {}",
                content_duration_secs
            ),
        ));
    }

    let title_duration = if has_title_screen {
        TITLE_DURATION_SECS
    } else {
        0.0
    };
    let per_segment = (content_duration_secs + END_BUFFER_SECS) / asset_count as f64;

    Ok(TimingPlan {
        title_duration,
        segment_durations: vec![per_segment; asset_count],
        content_duration: content_duration_secs,
        end_buffer: END_BUFFER_SECS,
        total_duration: title_duration + content_duration_secs + END_BUFFER_SECS,
    })
}
