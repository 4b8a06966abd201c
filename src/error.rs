use thiserror::Error;

/// Errores del dominio musical.
///
/// Every variant belongs to one [`ErrorClass`]. The command boundary turns any
/// of them into a failure notice; only transport errors feed the playback retry
/// policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MusicError {
    #[error("{0}")]
    UserInput(String),

    #[error("{0}")]
    Permission(String),

    #[error("La cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("La playlist tiene demasiados videos, el máximo es {max}")]
    PlaylistTooLarge { max: usize },

    #[error("Error de transporte: {0}")]
    Transport(String),

    #[error("{0}")]
    Resolution(String),

    #[error("No hay ninguna canción en la posición {position}")]
    NotFound { position: usize },

    #[error("Solo quien pidió la canción o un DJ puede quitarla")]
    Forbidden,

    #[error("{0}")]
    InvalidOperation(String),
}

/// Clasificación usada para decidir reintentos y logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UserInput,
    Permission,
    Capacity,
    Transport,
    ExternalResolution,
}

impl MusicError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UserInput(_) | Self::NotFound { .. } | Self::InvalidOperation(_) => {
                ErrorClass::UserInput
            }
            Self::Permission(_) | Self::Forbidden => ErrorClass::Permission,
            Self::QueueFull { .. } | Self::PlaylistTooLarge { .. } => ErrorClass::Capacity,
            Self::Transport(_) => ErrorClass::Transport,
            Self::Resolution(_) => ErrorClass::ExternalResolution,
        }
    }

    /// Solo los errores de transporte entran en la política de reintento.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }
}

pub type MusicResult<T> = Result<T, MusicError>;
