// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Landmark inference failed for a single frame. Never fatal.
    #[error("detection error: {0}")]
    Detection(String),

    /// GPU context, program, or texture creation failed.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("capture device error: {0}")]
    Capture(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("readback error: {0}")]
    Readback(String),

    #[error("pipeline state error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn readback(msg: impl Into<String>) -> Self {
        Self::Readback(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Fatal errors invalidate the pipeline instance; the caller tears down
    /// and may retry construction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_errors_are_fatal() {
        assert!(PipelineError::resource("no adapter").is_fatal());
        assert!(!PipelineError::detection("no face").is_fatal());
        assert!(!PipelineError::invalid_frame("short buffer").is_fatal());
        assert!(!PipelineError::capture("busy").is_fatal());
    }

    #[test]
    fn display_prefixes_are_stable() {
        assert!(PipelineError::resource("x").to_string().starts_with("resource error:"));
        assert!(PipelineError::detection("x").to_string().starts_with("detection error:"));
        assert!(PipelineError::config("x").to_string().starts_with("config error:"));
    }
}
