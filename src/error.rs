use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Record data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Rendering failed during {stage}: {reason}")]
    RenderFailure { stage: String, reason: String },

    #[error("Report dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid reporting period: {0}")]
    InvalidPeriod(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ReportError {
    pub fn chart(reason: impl Into<String>) -> Self {
        Self::RenderFailure {
            stage: "chart-render".to_string(),
            reason: reason.into(),
        }
    }

    pub fn document(reason: impl Into<String>) -> Self {
        Self::RenderFailure {
            stage: "document-render".to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the pipeline stage the error originated from, for run logs.
    pub fn stage(&self) -> &str {
        match self {
            Self::DataUnavailable(_) => "data-source",
            Self::RenderFailure { stage, .. } => stage,
            Self::DispatchFailure(_) => "dispatch",
            Self::InvalidConfig(_) => "config",
            Self::InvalidPeriod(_) | Self::DateError(_) => "period",
            Self::SerializationError(_) => "serialization",
            Self::IoError(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_failure_stage() {
        assert_eq!(ReportError::chart("no bars").stage(), "chart-render");
        assert_eq!(ReportError::document("bad page").stage(), "document-render");
        assert_eq!(
            ReportError::DispatchFailure("smtp down".to_string()).stage(),
            "dispatch"
        );
    }

    #[test]
    fn test_error_messages_carry_reason() {
        let err = ReportError::chart("labels and values differ in length");
        assert_eq!(
            err.to_string(),
            "Rendering failed during chart-render: labels and values differ in length"
        );
    }
}
