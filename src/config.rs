use std::path::Path;

use crate::encoding::BoardShape;
use crate::error::ConfigError;

/// Network-wide hyperparameters shared by every version.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Dropout probability between stage groups in training mode.
    pub dropout: f64,
    /// Size of the dense action index space.
    pub action_size: usize,
    pub num_players: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            dropout: 0.3,
            action_size: 128,
            num_players: 2,
        }
    }
}

/// Top-level evaluator configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Architecture version id.
    pub version: u32,
    pub network: Hyperparameters,
    pub board: BoardShape,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            version: 25,
            network: Hyperparameters::default(),
            board: BoardShape::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: EvaluatorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration values. The version id is checked later,
    /// against the registry the evaluator is built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.network.dropout) {
            return Err(ConfigError::Validation(
                "network.dropout must be in [0, 1)".into(),
            ));
        }
        if self.network.action_size == 0 {
            return Err(ConfigError::Validation(
                "network.action_size must be > 0".into(),
            ));
        }
        if self.network.num_players == 0 {
            return Err(ConfigError::Validation(
                "network.num_players must be > 0".into(),
            ));
        }
        if self.board.nb_vect == 0 || self.board.vect_dim == 0 {
            return Err(ConfigError::Validation(
                "board.nb_vect and board.vect_dim must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&EvaluatorConfig::default()).expect("default config serializes")
    }
}
