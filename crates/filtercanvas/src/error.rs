use scheduler::SchedulerError;

/// Every failure a canvas operation can report to its host.
///
/// A throttled frame is not an error; see [`crate::FrameOutcome::Throttled`].
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("failed to bind presentation surface: {0}")]
    SurfaceInitFailed(String),
    #[error("invalid texture dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("pixel buffer holds {actual} bytes but {expected} are required")]
    PixelBufferTooSmall { expected: usize, actual: usize },
    #[error("texture key must be a non-empty string")]
    InvalidKey,
    #[error("texture '{0}' is not registered")]
    TextureNotFound(String),
    #[error("unknown filter variant '{0}'")]
    UnknownVariant(String),
    #[error("no filter has been selected")]
    NoActiveFilter,
    #[error("GPU submission failed: {0}")]
    GpuSubmissionFailed(String),
    #[error("canvas disabled after GPU failure: {0}")]
    CanvasDisabled(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl CanvasError {
    pub(crate) fn invalid_dimensions(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    /// Failures after which the device can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GpuSubmissionFailed(_))
    }

    /// Stable numeric code used by the C ABI; always negative.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::SurfaceInitFailed(_) => -1,
            Self::InvalidDimensions { .. } => -2,
            Self::UnsupportedFormat(_) => -3,
            Self::TextureNotFound(_) => -4,
            Self::UnknownVariant(_) => -5,
            Self::NoActiveFilter => -6,
            Self::GpuSubmissionFailed(_) => -7,
            Self::CanvasDisabled(_) => -8,
            Self::PixelBufferTooSmall { .. } => -9,
            Self::InvalidKey => -10,
            Self::InvalidArgument(_) => -11,
            Self::Scheduler(_) => -12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinct_and_negative() {
        let errors = [
            CanvasError::SurfaceInitFailed(String::new()),
            CanvasError::invalid_dimensions(0, 0, "zero"),
            CanvasError::UnsupportedFormat(String::new()),
            CanvasError::TextureNotFound(String::new()),
            CanvasError::UnknownVariant(String::new()),
            CanvasError::NoActiveFilter,
            CanvasError::GpuSubmissionFailed(String::new()),
            CanvasError::CanvasDisabled(String::new()),
            CanvasError::PixelBufferTooSmall {
                expected: 4,
                actual: 0,
            },
            CanvasError::InvalidKey,
            CanvasError::InvalidArgument(String::new()),
            CanvasError::Scheduler(SchedulerError::StalePermit(1)),
        ];
        let mut codes: Vec<i32> = errors.iter().map(CanvasError::status_code).collect();
        assert!(codes.iter().all(|code| *code < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn only_gpu_failures_are_fatal() {
        assert!(CanvasError::GpuSubmissionFailed("lost".into()).is_fatal());
        assert!(!CanvasError::NoActiveFilter.is_fatal());
        assert!(!CanvasError::TextureNotFound("a".into()).is_fatal());
    }
}
