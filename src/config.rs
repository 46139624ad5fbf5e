//! Renderer configuration.
//!
//! Every field has a default, so an empty JSON object is a valid configuration:
//!
//! ```
//! use tessera::RendererConfig;
//!
//! let config = RendererConfig::from_json_str(r#"{ "ssao": true, "ssao_seed": 7 }"#).unwrap();
//! assert!(config.ssao);
//! assert!(config.translucency);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tiling::TileRounding;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Equirectangular `.hdr` image used for the skybox and image-based lighting.
    pub environment_hdr: PathBuf,
    pub tile_rounding: TileRounding,
    /// Enables the screen-space ambient occlusion stage.
    pub ssao: bool,
    /// Seed for the SSAO hemisphere kernel and rotation noise.
    pub ssao_seed: u64,
    /// Enables the translucent forward stage and the particle stage after the skybox.
    pub translucency: bool,
    /// Clear color of the HDR target, visible only where the skybox does not draw.
    pub clear_color: [f64; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            environment_hdr: PathBuf::from("assets/environment.hdr"),
            tile_rounding: TileRounding::default(),
            ssao: false,
            ssao_seed: 0x5EED,
            translucency: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn environment(mut self, path: impl Into<PathBuf>) -> Self {
        self.environment_hdr = path.into();
        self
    }

    pub fn with_ssao(mut self, seed: u64) -> Self {
        self.ssao = true;
        self.ssao_seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = RendererConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.tile_rounding, TileRounding::Ceil);
        assert!(!config.ssao);
    }

    #[test]
    fn parses_rounding_and_paths() {
        let config = RendererConfig::from_json_str(
            r#"{ "environment_hdr": "sky/park.hdr", "tile_rounding": "legacy", "translucency": false }"#,
        )
        .unwrap();
        assert_eq!(config.environment_hdr, PathBuf::from("sky/park.hdr"));
        assert_eq!(config.tile_rounding, TileRounding::Legacy);
        assert!(!config.translucency);
    }

    #[test]
    fn rejects_unknown_rounding() {
        assert!(RendererConfig::from_json_str(r#"{ "tile_rounding": "floor" }"#).is_err());
    }

    #[test]
    fn builder_enables_ssao_with_seed() {
        let config = RendererConfig::default().environment("a.hdr").with_ssao(42);
        assert!(config.ssao);
        assert_eq!(config.ssao_seed, 42);
        assert_eq!(config.environment_hdr, PathBuf::from("a.hdr"));
    }
}
