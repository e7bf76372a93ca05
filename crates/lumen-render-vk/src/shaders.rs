// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::{util::read_spv, vk, Device};
use lumen_render::{ShaderSource, FRAGMENT_SHADER, VERTEX_SHADER};

static SIMPLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/simple.vert.spv"));
static SIMPLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/simple.frag.spv"));

/// SPIR-V compiled by the build script and embedded in the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinShaders;

impl ShaderSource for BuiltinShaders {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        match name {
            VERTEX_SHADER => Ok(SIMPLE_VERT.to_vec()),
            FRAGMENT_SHADER => Ok(SIMPLE_FRAG.to_vec()),
            other => Err(anyhow!("no built-in shader named '{other}'")),
        }
    }
}

/// SPIR-V read once at startup so pipeline rebuilds never touch the source
/// again.
#[derive(Clone, Debug, Default)]
pub struct ShaderCache {
    blobs: Vec<(String, Vec<u8>)>,
}

impl ShaderCache {
    pub fn preload(source: &dyn ShaderSource, names: &[&str]) -> Result<Self> {
        let mut blobs = Vec::with_capacity(names.len());
        for &name in names {
            let bytes = source
                .load(name)
                .with_context(|| format!("load shader {name}"))?;
            spirv_words(&bytes).with_context(|| format!("shader {name}"))?;
            blobs.push((name.to_owned(), bytes));
        }
        Ok(Self { blobs })
    }
}

impl ShaderSource for ShaderCache {
    fn load(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("shader {name} was not preloaded"))
    }
}

/// Reinterpret SPIR-V bytes as aligned words. Byte-swapped modules are
/// fixed up; lengths that are not a multiple of four are rejected.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).context("invalid SPIR-V")
}

/// Shader module destroyed on drop; only needed until the pipeline exists.
pub struct ShaderModule {
    device: Device,
    pub module: vk::ShaderModule,
}

impl ShaderModule {
    pub unsafe fn new(device: &Device, bytes: &[u8]) -> Result<Self> {
        let code = spirv_words(bytes)?;
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: code.len() * 4,
            ..Default::default()
        };
        let module =
            unsafe { device.create_shader_module(&info, None) }.context("create_shader_module")?;
        Ok(Self {
            device: device.clone(),
            module,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}
