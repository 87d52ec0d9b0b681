//! Ambient configuration, constructed by the embedder rather than parsed
//! from a config file: per-session connection parameters widened to room
//! membership and to the set of catalog presets a new session seeds
//! itself with.

/// Per-session connection parameters, handed to [`crate::session::Session`]
/// and [`crate::network::NetworkRelay`] at `initialize()` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub moq_url: String,
    pub room_name: String,
    pub user_name: String,
    pub auth_token: Option<String>,
}

impl RoomConfig {
    pub fn new(
        moq_url: impl Into<String>,
        room_name: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            moq_url: moq_url.into(),
            room_name: room_name.into(),
            user_name: user_name.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Which preset families a publisher seeds its catalog with on startup.
/// `CatalogPresetConfig::default()` enables none of them; a host app turns
/// on whichever local devices it actually has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogPresetConfig {
    pub camera: bool,
    pub screenshare: bool,
    pub audio: bool,
}

impl CatalogPresetConfig {
    pub fn all() -> Self {
        Self {
            camera: true,
            screenshare: true,
            audio: true,
        }
    }
}
