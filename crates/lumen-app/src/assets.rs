// SPDX-License-Identifier: CEPL-1.0
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use lumen_render::{DecodedImage, ShaderSource};
use lumen_render_vk::BuiltinShaders;
use tracing::info;

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

/// Decode the configured texture to RGBA8, or fall back to a checkerboard.
pub fn load_texture(path: Option<&Path>) -> Result<DecodedImage> {
    let Some(path) = path else {
        info!("no texture configured, using checkerboard");
        return Ok(DecodedImage::checkerboard(CHECKER_SIZE, CHECKER_CELL));
    };
    let rgba = image::open(path)
        .with_context(|| format!("decode texture {}", path.display()))?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    info!("loaded texture {} ({width}x{height})", path.display());
    DecodedImage::new(width, height, rgba.into_raw())
        .with_context(|| format!("texture {}", path.display()))
}

/// Precompiled shaders read from `<dir>/<name>.spv`.
#[derive(Debug, Clone)]
pub struct ShaderDir {
    dir: PathBuf,
}

impl ShaderDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ShaderSource for ShaderDir {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(format!("{name}.spv"));
        fs::read(&path).with_context(|| format!("read shader {}", path.display()))
    }
}

pub fn shader_source(dir: Option<&Path>) -> Box<dyn ShaderSource> {
    match dir {
        Some(dir) => {
            info!("loading shaders from {}", dir.display());
            Box::new(ShaderDir::new(dir))
        }
        None => Box::new(BuiltinShaders),
    }
}
