//! PBR material source data and GPU material records

use ash::vk;

use crate::render::api::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, GpuImage, ImageDesc,
    RenderDevice, RenderError, RenderResult, SamplerHandle,
};
use crate::render::common::MeshPerMaterialUniformBufferObject;

use super::upload::PartialUpload;

/// Texel used wherever a material has no texture
pub const PLACEHOLDER_TEXEL: [u8; 4] = [128, 128, 128, 128];

/// Decoded 8-bit RGBA texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format of `pixels`
    ///
    /// Material slots accept either 8-bit RGBA encoding and choose sRGB or
    /// linear sampling themselves.
    pub format: vk::Format,
    /// Tightly packed rows
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// 1x1 texture of a single texel
    pub fn solid(texel: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            pixels: texel.to_vec(),
        }
    }

    /// Wrap a decoded image
    pub fn from_rgba_image(image: &image::RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            format: vk::Format::R8G8B8A8_UNORM,
            pixels: image.as_raw().clone(),
        }
    }

    /// Reject anything but `width * height` tightly packed 8-bit RGBA texels
    pub fn check_rgba8(&self, slot: &str) -> RenderResult<()> {
        if !matches!(self.format, vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB) {
            return Err(RenderError::InvalidOperation(format!(
                "{slot} texture has format {:?}, materials take 8-bit RGBA",
                self.format
            )));
        }
        let expected = u64::from(self.width) * u64::from(self.height) * 4;
        if self.pixels.len() as u64 != expected {
            return Err(RenderError::InvalidOperation(format!(
                "{slot} texture is {}x{} but holds {} bytes",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Scalar material factors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialFactors {
    /// Base colour multiplier
    pub base_color_factor: [f32; 4],
    /// Metallic multiplier
    pub metallic_factor: f32,
    /// Roughness multiplier
    pub roughness_factor: f32,
    /// Normal map scale
    pub normal_scale: f32,
    /// Ambient occlusion strength
    pub occlusion_strength: f32,
    /// Emissive colour
    pub emissive_factor: [f32; 3],
    /// Alpha blended
    pub is_blend: bool,
    /// Rendered without back-face culling
    pub double_sided: bool,
}

impl Default for MaterialFactors {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            emissive_factor: [0.0; 3],
            is_blend: false,
            double_sided: false,
        }
    }
}

impl From<&MaterialFactors> for MeshPerMaterialUniformBufferObject {
    fn from(factors: &MaterialFactors) -> Self {
        Self {
            base_color_factor: factors.base_color_factor,
            metallic_factor: factors.metallic_factor,
            roughness_factor: factors.roughness_factor,
            normal_scale: factors.normal_scale,
            occlusion_strength: factors.occlusion_strength,
            emissive_factor: factors.emissive_factor,
            is_blend: u32::from(factors.is_blend),
            is_double_sided: u32::from(factors.double_sided),
        }
    }
}

/// Decoded material handed over by the asset layer
#[derive(Debug, Clone, Default)]
pub struct MaterialSource {
    /// Factors
    pub factors: MaterialFactors,
    /// sRGB base colour
    pub base_color: Option<TextureData>,
    /// Metallic (b) and roughness (g)
    pub metallic_roughness: Option<TextureData>,
    /// Tangent-space normals
    pub normal: Option<TextureData>,
    /// Ambient occlusion
    pub occlusion: Option<TextureData>,
    /// Emission
    pub emissive: Option<TextureData>,
}

impl MaterialSource {
    /// Texture slots in descriptor binding order (1..=5) with their upload format
    fn texture_slots(&self) -> [(&'static str, Option<&TextureData>, vk::Format); 5] {
        [
            ("base colour", self.base_color.as_ref(), vk::Format::R8G8B8A8_SRGB),
            ("metallic-roughness", self.metallic_roughness.as_ref(), vk::Format::R8G8B8A8_UNORM),
            ("normal", self.normal.as_ref(), vk::Format::R8G8B8A8_UNORM),
            ("occlusion", self.occlusion.as_ref(), vk::Format::R8G8B8A8_UNORM),
            ("emissive", self.emissive.as_ref(), vk::Format::R8G8B8A8_UNORM),
        ]
    }
}

/// Device-resident material
#[derive(Debug, Clone)]
pub struct MaterialRecord {
    /// Factor uniform buffer
    pub uniform_buffer: BufferHandle,
    /// Base colour, metallic-roughness, normal, occlusion, emissive
    pub textures: [GpuImage; 5],
    /// Per-material set (set 2)
    pub descriptor_set: DescriptorSetHandle,
    /// Alpha blended
    pub is_blend: bool,
    /// Rendered without back-face culling
    pub double_sided: bool,
}

impl MaterialRecord {
    /// Upload the factors and textures and build the per-material set
    ///
    /// Textures are checked before anything is created; parts already uploaded
    /// are destroyed again when a later one fails.
    pub fn upload(
        device: &mut dyn RenderDevice,
        source: &MaterialSource,
        per_material_layout: DescriptorSetLayoutHandle,
        sampler: SamplerHandle,
    ) -> RenderResult<Self> {
        for (slot, texture, _) in source.texture_slots() {
            if let Some(texture) = texture {
                texture.check_rgba8(slot)?;
            }
        }
        let mut parts = PartialUpload::default();
        Self::upload_parts(device, source, per_material_layout, sampler, &mut parts).map_err(|err| {
            parts.release(device);
            err
        })
    }

    fn upload_parts(
        device: &mut dyn RenderDevice,
        source: &MaterialSource,
        per_material_layout: DescriptorSetLayoutHandle,
        sampler: SamplerHandle,
        parts: &mut PartialUpload,
    ) -> RenderResult<Self> {
        let ubo = MeshPerMaterialUniformBufferObject::from(&source.factors);
        let uniform_buffer = parts.buffer(
            device,
            bytemuck::bytes_of(&ubo),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;

        let placeholder = TextureData::solid(PLACEHOLDER_TEXEL);
        let mut textures = Vec::with_capacity(5);
        for (_, texture, format) in source.texture_slots() {
            let texture = texture.unwrap_or(&placeholder);
            let desc = ImageDesc::texture(texture.width, texture.height, format, 1);
            textures.push(parts.image(device, &desc, &texture.pixels)?);
        }
        let textures: [GpuImage; 5] = textures
            .try_into()
            .map_err(|_| RenderError::InvalidOperation("material texture count".into()))?;

        let descriptor_set = device.allocate_descriptor_set(per_material_layout)?;
        let mut writes = vec![DescriptorWrite::Buffer {
            binding: 0,
            kind: vk::DescriptorType::UNIFORM_BUFFER,
            buffer: uniform_buffer,
            offset: 0,
            range: std::mem::size_of::<MeshPerMaterialUniformBufferObject>() as u64,
        }];
        writes.extend(
            textures
                .iter()
                .zip(1u32..)
                .map(|(texture, binding)| DescriptorWrite::sampled(binding, texture.view, sampler)),
        );
        device.update_descriptor_set(descriptor_set, &writes);

        Ok(Self {
            uniform_buffer,
            textures,
            descriptor_set,
            is_blend: source.factors.is_blend,
            double_sided: source.factors.double_sided,
        })
    }

    /// Release the uniform buffer and textures
    pub fn destroy(&self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.uniform_buffer);
        for texture in &self.textures {
            device.destroy_image(texture);
        }
    }
}
