use std::fmt;

pub type SnowResult<T> = Result<T, SnowError>;

/// One-time resources created while a session starts, in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStage {
    Output,
    Context,
    Surface,
    Registration,
    Compute,
    Display,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Output => "output",
            Self::Context => "context",
            Self::Surface => "surface",
            Self::Registration => "registration",
            Self::Compute => "compute",
            Self::Display => "display",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SnowError {
    #[error("setup failure ({stage}): {message}")]
    Setup { stage: SetupStage, message: String },

    #[error("ownership violation: {0}")]
    Ownership(String),

    #[error("presentation warning: {0}")]
    Presentation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnowError {
    pub fn setup(stage: SetupStage, msg: impl Into<String>) -> Self {
        Self::Setup {
            stage,
            message: msg.into(),
        }
    }

    pub fn ownership(msg: impl Into<String>) -> Self {
        Self::Ownership(msg.into())
    }

    pub fn presentation(msg: impl Into<String>) -> Self {
        Self::Presentation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// Presentation warnings are logged and dropped; everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Presentation(_))
    }

    /// Re-tags a failure that happened while creating a one-time resource.
    pub fn at_stage(self, stage: SetupStage) -> Self {
        match self {
            Self::Setup { .. } => self,
            other => Self::setup(stage, other.to_string()),
        }
    }

    pub fn setup_stage(&self) -> Option<SetupStage> {
        match self {
            Self::Setup { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
