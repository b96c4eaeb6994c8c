// Shader module loading
//
// Shaders are compiled to SPIR-V ahead of time (see build.rs) and loaded from
// disk at pipeline creation, so a rebuilt .spv is picked up by the next
// surface generation.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CString;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V blob into words, accepting either byte order
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => anyhow::bail!("Bad SPIR-V magic number {:#010x}", other),
        None => anyhow::bail!("Empty SPIR-V blob"),
    }
}

/// Where a stage's bytecode lives and which entry point to call
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub stage: vk::ShaderStageFlags,
    pub entry: CString,
}

impl ShaderSource {
    pub fn new(path: impl AsRef<Path>, stage: vk::ShaderStageFlags, entry: &str) -> Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            stage,
            entry: CString::new(entry).context("Shader entry point contains a NUL byte")?,
        })
    }

    pub fn load(&self) -> Result<Vec<u32>> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read shader {:?}", self.path))?;
        parse_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", self.path))
    }
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    entry: CString,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(device: Arc<VulkanDevice>, source: &ShaderSource) -> Result<Self> {
        let code = source.load()?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .with_context(|| format!("Failed to create shader module from {:?}", source.path))?;

        Ok(Self {
            module,
            stage: source.stage,
            entry: source.entry.clone(),
            device,
        })
    }

    /// Stage description borrowing this module's entry point name
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_valid_header() {
        let words = parse_spirv(&blob(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0])).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn accepts_big_endian_blobs() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_truncated_blob() {
        let mut bytes = blob(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(parse_spirv(&blob(&[0xdead_beef, 1])).is_err());
    }

    #[test]
    fn rejects_empty_blob() {
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let source = ShaderSource::new(
            "does/not/exist.spv",
            vk::ShaderStageFlags::VERTEX,
            "main",
        )
        .unwrap();
        let err = source.load().unwrap_err();
        assert!(format!("{:?}", err).contains("does/not/exist.spv"));
    }

    #[test]
    fn entry_with_nul_is_rejected() {
        assert!(ShaderSource::new("a.spv", vk::ShaderStageFlags::FRAGMENT, "ma\0in").is_err());
    }
}
