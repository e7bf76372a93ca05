// SPDX-License-Identifier: CEPL-1.0
use std::{fs, io, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use lumen_render::BackendKind;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "lumen".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RenderCfg {
    pub backend: String,
    pub validation: bool,
    pub texture: Option<PathBuf>,
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            backend: BackendKind::Vulkan.as_str().to_owned(),
            validation: cfg!(debug_assertions),
            texture: None,
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read the config file. A missing file is not an error; a malformed one
    /// is logged and replaced by defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|e| {
                warn!("ignoring malformed config {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("cannot read config {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub backend: Option<String>,
    pub texture: Option<PathBuf>,
    pub shader_dir: Option<PathBuf>,
    pub no_validation: bool,
}

/// Final startup settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub window: WindowCfg,
    pub backend: BackendKind,
    pub validation: bool,
    pub texture: Option<PathBuf>,
    pub shader_dir: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(cfg: AppCfg, cli: CliOverrides) -> Result<Self> {
        let backend = cli.backend.as_deref().unwrap_or(&cfg.render.backend);
        let backend = backend
            .parse::<BackendKind>()
            .with_context(|| format!("backend '{backend}'"))?;
        Ok(Settings {
            window: cfg.window,
            backend,
            validation: cfg.render.validation && !cli.no_validation,
            texture: cli.texture.or(cfg.render.texture),
            shader_dir: cli.shader_dir.or(cfg.render.shader_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            width = 1280

            [render]
            texture = "assets/statue.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, "lumen");
        assert_eq!(cfg.render.backend, "vulkan");
        assert_eq!(cfg.render.texture, Some(PathBuf::from("assets/statue.jpg")));
        assert_eq!(cfg.render.shader_dir, None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = AppCfg::load(Path::new("/definitely/not/here/lumen.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn malformed_file_is_an_error_for_parse() {
        assert!(AppCfg::parse("[window\nwidth = ").is_err());
        assert!(AppCfg::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        cfg.render.shader_dir = Some(PathBuf::from("file-shaders"));
        let settings = Settings::resolve(
            cfg,
            CliOverrides {
                backend: Some("none".to_owned()),
                texture: None,
                shader_dir: Some(PathBuf::from("cli-shaders")),
                no_validation: true,
            },
        )
        .unwrap();
        assert_eq!(settings.backend, BackendKind::None);
        assert!(!settings.validation);
        assert_eq!(settings.shader_dir, Some(PathBuf::from("cli-shaders")));
        assert_eq!(settings.texture, None);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cfg = AppCfg::default();
        cfg.render.backend = "metal".to_owned();
        assert!(Settings::resolve(cfg, CliOverrides::default()).is_err());
    }
}
