//! Error types for the composition pipeline

use std::time::Duration;
use thiserror::Error;

/// Backend diagnostics longer than this are cut down to their tail
pub const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Result type for composition operations
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Everything that can fail a job inside the compositor
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Failed to fetch {role} asset from {location}: {reason}")]
    AssetFetch {
        role: String,
        location: String,
        reason: String,
    },

    #[error("Graph construction failed at {stage} stage: {reason}")]
    GraphConstruction { stage: String, reason: String },

    #[error("Render backend failed: {detail}")]
    RenderBackend { detail: String },

    #[error("Render timed out after {after:?}")]
    RenderTimeout { after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    pub fn asset_fetch(
        role: impl Into<String>,
        location: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::AssetFetch {
            role: role.into(),
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn graph(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GraphConstruction {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Wrap backend output, bounded to [`MAX_DIAGNOSTIC_CHARS`]
    pub fn backend(diagnostic: &str) -> Self {
        Self::RenderBackend {
            detail: truncate_diagnostic(diagnostic),
        }
    }

    /// Short machine-readable tag stored on failed job records
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::InvalidJob(_) => "invalid_job",
            ComposeError::AssetFetch { .. } => "asset_fetch",
            ComposeError::GraphConstruction { .. } => "graph_construction",
            ComposeError::RenderBackend { .. } => "render_backend",
            ComposeError::RenderTimeout { .. } => "render_timeout",
            ComposeError::Io(_) => "io",
        }
    }
}

/// Keep the tail of long backend output; ffmpeg prints the actual error last.
pub fn truncate_diagnostic(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_diagnostic() {
        assert_eq!(truncate_diagnostic("  boom \n"), "boom");
    }

    #[test]
    fn test_truncate_long_diagnostic_keeps_tail() {
        let long = format!("{}END", "x".repeat(MAX_DIAGNOSTIC_CHARS * 2));
        let truncated = truncate_diagnostic(&long);
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with("END"));
        assert_eq!(truncated.chars().count(), MAX_DIAGNOSTIC_CHARS + 3);
    }

    #[test]
    fn test_error_messages() {
        let err = ComposeError::graph("per-asset", "asset 2 has no local path");
        assert_eq!(
            err.to_string(),
            "Graph construction failed at per-asset stage: asset 2 has no local path"
        );
        assert_eq!(err.kind(), "graph_construction");

        let err = ComposeError::RenderTimeout {
            after: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("5s"));
        assert_eq!(err.kind(), "render_timeout");
    }
}
