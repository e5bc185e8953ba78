//! Shader sources and their compilation into modules.
//!
//! The backend ships GLSL and leaves the GLSL to SPIR-V step to a
//! [`ShaderCompiler`] supplied by the embedder (shaderc, glslang, or a
//! cache of precompiled blobs).

use std::io::Cursor;

use ash::{util::read_spv, vk, Device};

use crate::error::{BackendError, Result, VkResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Turns GLSL source into SPIR-V bytes.
pub trait ShaderCompiler {
    /// `name` identifies the shader in diagnostics. The error is the
    /// compiler's log.
    fn compile(&self, source: &str, stage: ShaderStage, name: &str) -> std::result::Result<Vec<u8>, String>;
}

impl<F> ShaderCompiler for F
where
    F: Fn(&str, ShaderStage, &str) -> std::result::Result<Vec<u8>, String>,
{
    fn compile(&self, source: &str, stage: ShaderStage, name: &str) -> std::result::Result<Vec<u8>, String> {
        self(source, stage, name)
    }
}

/// A named GLSL program for one stage.
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource {
    pub name: &'static str,
    pub stage: ShaderStage,
    pub glsl: &'static str,
}

// Push constant block shared by both vertex shaders:
//   offset  0: uvec2 target size
//   offset  8: int x1, y1, x2, y2 of the rectangle to cover
//   offset 24: ivec2 origin of the source in target space (blit only)
// The fill colour lives at offset 32 in the fragment stage.

pub const BLIT_VERTEX: ShaderSource = ShaderSource {
    name: "blit.vert",
    stage: ShaderStage::Vertex,
    glsl: r#"#version 460
layout(push_constant) uniform Blit {
    uvec2 target_size;
    int x1;
    int y1;
    int x2;
    int y2;
    ivec2 origin;
};

layout(location = 0) out vec2 source_pixel;

void main() {
    // Triangle strip: (x1,y1) (x2,y1) (x1,y2) (x2,y2)
    vec2 corner = vec2((gl_VertexIndex & 1) == 0 ? x1 : x2,
                       (gl_VertexIndex & 2) == 0 ? y1 : y2);
    source_pixel = corner - vec2(origin);
    gl_Position = vec4(corner / vec2(target_size) * 2.0 - 1.0, 0.0, 1.0);
}
"#,
};

pub const BLIT_FRAGMENT: ShaderSource = ShaderSource {
    name: "blit.frag",
    stage: ShaderStage::Fragment,
    glsl: r#"#version 460
layout(binding = 0) uniform sampler2D source;

layout(location = 0) in vec2 source_pixel;
layout(location = 0) out vec4 color;

void main() {
    color = texture(source, source_pixel / vec2(textureSize(source, 0)));
}
"#,
};

pub const FILL_VERTEX: ShaderSource = ShaderSource {
    name: "fill.vert",
    stage: ShaderStage::Vertex,
    glsl: r#"#version 460
layout(push_constant) uniform Fill {
    uvec2 target_size;
    int x1;
    int y1;
    int x2;
    int y2;
};

void main() {
    vec2 corner = vec2((gl_VertexIndex & 1) == 0 ? x1 : x2,
                       (gl_VertexIndex & 2) == 0 ? y1 : y2);
    gl_Position = vec4(corner / vec2(target_size) * 2.0 - 1.0, 0.0, 1.0);
}
"#,
};

pub const FILL_FRAGMENT: ShaderSource = ShaderSource {
    name: "fill.frag",
    stage: ShaderStage::Fragment,
    glsl: r#"#version 460
layout(push_constant) uniform Fill {
    layout(offset = 32) vec4 fill_color;
};

layout(location = 0) out vec4 color;

void main() {
    color = fill_color;
}
"#,
};

/// Loads a SPIR-V shader module from a byte slice.
pub fn load_shader_module(device: &Device, name: &'static str, spirv_bytes: &[u8]) -> Result<vk::ShaderModule> {
    let mut cursor = Cursor::new(spirv_bytes);
    let code = read_spv(&mut cursor).map_err(|source| BackendError::InvalidSpirv { name, source })?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    unsafe { device.create_shader_module(&create_info, None) }.vk_context("vkCreateShaderModule")
}

/// Compiles `source` and wraps the result in a module.
pub fn compile_module<C: ShaderCompiler + ?Sized>(
    device: &Device,
    compiler: &C,
    source: &ShaderSource,
) -> Result<vk::ShaderModule> {
    let spirv = compiler
        .compile(source.glsl, source.stage, source.name)
        .map_err(|message| BackendError::ShaderCompilation { name: source.name, message })?;
    tracing::debug!(shader = source.name, bytes = spirv.len(), "Compiled shader");
    load_shader_module(device, source.name, &spirv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_can_act_as_compilers() {
        let compiler = |source: &str, stage: ShaderStage, name: &str| -> std::result::Result<Vec<u8>, String> {
            assert_eq!(stage, ShaderStage::Fragment);
            assert_eq!(name, "fill.frag");
            Ok(source.as_bytes().to_vec())
        };
        let bytes = compiler
            .compile(FILL_FRAGMENT.glsl, FILL_FRAGMENT.stage, FILL_FRAGMENT.name)
            .unwrap();
        assert!(bytes.starts_with(b"#version 460"));
    }

    #[test]
    fn push_constant_layout_matches_the_recorded_offsets() {
        for source in [BLIT_VERTEX, FILL_VERTEX] {
            assert!(source.glsl.contains("uvec2 target_size;\n    int x1;"), "{}", source.name);
        }
        assert!(BLIT_VERTEX.glsl.contains("int y2;\n    ivec2 origin;"));
        assert!(FILL_FRAGMENT.glsl.contains("layout(offset = 32) vec4 fill_color"));
    }

    #[test]
    fn every_program_targets_glsl_460() {
        for source in [BLIT_VERTEX, BLIT_FRAGMENT, FILL_VERTEX, FILL_FRAGMENT] {
            assert!(source.glsl.starts_with("#version 460\n"), "{}", source.name);
        }
    }

    #[test]
    fn stages_map_to_vulkan_flags() {
        assert_eq!(ShaderStage::Vertex.to_vk(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.to_vk(), vk::ShaderStageFlags::FRAGMENT);
    }
}
