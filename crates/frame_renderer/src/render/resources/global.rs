//! Renderer-wide GPU resources
//!
//! Everything more than one pass reads lives here: the transient ring, the
//! null descriptor buffer, the descriptor set layouts shared by the mesh
//! pipelines, samplers, and the image-based lighting and colour-grading
//! textures. Passes receive it through their context, never through statics.

use ash::vk;

use crate::render::api::{
    BufferDesc, BufferHandle, DescriptorBinding, DescriptorSetLayoutHandle, GpuImage, ImageDesc, ImageKind,
    MemoryLocation, RenderDevice, RenderResult, SamplerDesc, SamplerHandle,
};
use crate::render::common::NULL_DESCRIPTOR_BUFFER_SIZE;
use crate::render::config::RendererConfig;

use super::material::{TextureData, PLACEHOLDER_TEXEL};
use super::transient::TransientArena;
use super::upload::{full_mip_levels, upload_image};

/// Descriptor set layouts used by every mesh pipeline
#[derive(Debug, Clone, Copy)]
pub struct SharedLayouts {
    /// Set 0 of the mesh pipelines: three dynamic storage buffers plus IBL and shadow samplers
    pub mesh_global: DescriptorSetLayoutHandle,
    /// Set 1: per-mesh joint binding storage buffer
    pub per_mesh: DescriptorSetLayoutHandle,
    /// Set 2: material uniform buffer plus five textures
    pub per_material: DescriptorSetLayoutHandle,
}

impl SharedLayouts {
    fn new(device: &mut dyn RenderDevice) -> RenderResult<Self> {
        let dynamic_storage = vk::DescriptorType::STORAGE_BUFFER_DYNAMIC;
        let sampler = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let vertex = vk::ShaderStageFlags::VERTEX;
        let fragment = vk::ShaderStageFlags::FRAGMENT;

        let mesh_global = device.create_descriptor_set_layout(&[
            DescriptorBinding::new(0, dynamic_storage, vertex | fragment),
            DescriptorBinding::new(1, dynamic_storage, vertex),
            DescriptorBinding::new(2, dynamic_storage, vertex),
            DescriptorBinding::new(3, sampler, fragment),
            DescriptorBinding::new(4, sampler, fragment),
            DescriptorBinding::new(5, sampler, fragment),
            DescriptorBinding::new(6, sampler, fragment),
            DescriptorBinding::new(7, sampler, fragment),
        ])?;

        let per_mesh = device.create_descriptor_set_layout(&[DescriptorBinding::new(
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            vertex,
        )])?;

        let mut material_bindings = vec![DescriptorBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, fragment)];
        material_bindings.extend((1..=5).map(|binding| DescriptorBinding::new(binding, sampler, fragment)));
        let per_material = device.create_descriptor_set_layout(&material_bindings)?;

        Ok(Self {
            mesh_global,
            per_mesh,
            per_material,
        })
    }
}

/// Samplers shared across passes
#[derive(Debug, Clone, Copy)]
pub struct GlobalSamplers {
    /// Material textures
    pub material: SamplerHandle,
    /// Linear clamp, single mip (BRDF LUT, colour grading LUT, shadow maps)
    pub linear_clamp: SamplerHandle,
    /// Irradiance cube map, covers its mip chain
    pub irradiance: SamplerHandle,
    /// Specular cube map, covers its mip chain
    pub specular: SamplerHandle,
    /// Point sampling for full-screen reads
    pub nearest: SamplerHandle,
}

/// Image-based lighting textures
#[derive(Debug, Clone, Copy)]
pub struct IblResources {
    /// Split-sum BRDF lookup
    pub brdf_lut: GpuImage,
    /// Diffuse irradiance cube map
    pub irradiance: GpuImage,
    /// Prefiltered specular cube map
    pub specular: GpuImage,
}

/// Six faces of a cube map
#[derive(Debug, Clone)]
pub struct CubeMapSource {
    /// +X face
    pub positive_x: TextureData,
    /// -X face
    pub negative_x: TextureData,
    /// +Y face
    pub positive_y: TextureData,
    /// -Y face
    pub negative_y: TextureData,
    /// +Z face
    pub positive_z: TextureData,
    /// -Z face
    pub negative_z: TextureData,
}

impl CubeMapSource {
    /// Same texture on every face
    pub fn uniform(face: TextureData) -> Self {
        Self {
            positive_x: face.clone(),
            negative_x: face.clone(),
            positive_y: face.clone(),
            negative_y: face.clone(),
            positive_z: face.clone(),
            negative_z: face,
        }
    }

    /// Faces in the layer order the lighting shaders sample: +X, -X, +Z, -Z, +Y, -Y
    pub const fn layer_order(&self) -> [&TextureData; 6] {
        [
            &self.positive_x,
            &self.negative_x,
            &self.positive_z,
            &self.negative_z,
            &self.positive_y,
            &self.negative_y,
        ]
    }

    /// Upload as a cube map with a full mip chain
    ///
    /// All faces are assumed to share the size and format of +X.
    pub fn upload(&self, device: &mut dyn RenderDevice) -> RenderResult<GpuImage> {
        let first = &self.positive_x;
        let mut pixels = Vec::with_capacity(first.pixels.len() * 6);
        for face in self.layer_order() {
            pixels.extend_from_slice(&face.pixels);
        }
        let mip_levels = full_mip_levels(first.width, first.height);
        let desc = ImageDesc {
            array_layers: 6,
            kind: ImageKind::Cube,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            ..ImageDesc::texture(first.width, first.height, first.format, mip_levels)
        };
        upload_image(device, &desc, &pixels)
    }
}

/// Level-wide lighting inputs
#[derive(Debug, Clone)]
pub struct GlobalResourceSources {
    /// Split-sum BRDF lookup
    pub brdf_lut: TextureData,
    /// Diffuse irradiance faces
    pub irradiance: CubeMapSource,
    /// Prefiltered specular faces
    pub specular: CubeMapSource,
    /// Colour grading lookup strip
    pub color_grading_lut: TextureData,
}

impl Default for GlobalResourceSources {
    fn default() -> Self {
        let texel = TextureData::solid(PLACEHOLDER_TEXEL);
        Self {
            brdf_lut: texel.clone(),
            irradiance: CubeMapSource::uniform(texel.clone()),
            specular: CubeMapSource::uniform(texel.clone()),
            color_grading_lut: texel,
        }
    }
}

/// Resources shared by every pass
#[derive(Debug)]
pub struct GlobalRenderResources {
    /// Per-frame ring buffer
    pub transient: TransientArena,
    /// 64-byte storage buffer bound wherever nothing else applies
    pub null_descriptor: BufferHandle,
    /// Shared descriptor set layouts
    pub layouts: SharedLayouts,
    /// Shared samplers
    pub samplers: GlobalSamplers,
    /// Image-based lighting
    pub ibl: IblResources,
    /// Colour grading lookup
    pub color_grading_lut: GpuImage,
}

impl GlobalRenderResources {
    /// Create the ring, layouts and samplers, with placeholder lighting textures
    pub fn new(device: &mut dyn RenderDevice, config: &RendererConfig) -> RenderResult<Self> {
        let frame_count = device.max_frames_in_flight();
        let transient = TransientArena::new(device, config.transient_ring_size, frame_count)?;

        let null_descriptor = device.create_buffer(&BufferDesc {
            size: NULL_DESCRIPTOR_BUFFER_SIZE,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            location: MemoryLocation::DeviceLocal,
        })?;

        let layouts = SharedLayouts::new(device)?;

        let placeholder = GlobalResourceSources::default();
        let (ibl, color_grading_lut) = Self::upload_lighting(device, &placeholder)?;
        let samplers = GlobalSamplers {
            material: device.create_sampler(&SamplerDesc::linear_repeat())?,
            linear_clamp: device.create_sampler(&SamplerDesc::linear_clamp(1))?,
            irradiance: device.create_sampler(&SamplerDesc::linear_clamp(ibl.irradiance.mip_levels))?,
            specular: device.create_sampler(&SamplerDesc::linear_clamp(ibl.specular.mip_levels))?,
            nearest: device.create_sampler(&SamplerDesc::nearest())?,
        };

        Ok(Self {
            transient,
            null_descriptor,
            layouts,
            samplers,
            ibl,
            color_grading_lut,
        })
    }

    /// Replace the lighting textures and their mip-aware samplers
    ///
    /// Waits for the device to go idle first; descriptor sets that sample these
    /// textures must be rewritten afterwards.
    pub fn upload_global_render_resource(
        &mut self,
        device: &mut dyn RenderDevice,
        sources: &GlobalResourceSources,
    ) -> RenderResult<()> {
        device.wait_idle()?;
        let (ibl, color_grading_lut) = Self::upload_lighting(device, sources)?;

        for image in [
            self.ibl.brdf_lut,
            self.ibl.irradiance,
            self.ibl.specular,
            self.color_grading_lut,
        ] {
            device.destroy_image(&image);
        }

        self.samplers.irradiance = device.create_sampler(&SamplerDesc::linear_clamp(ibl.irradiance.mip_levels))?;
        self.samplers.specular = device.create_sampler(&SamplerDesc::linear_clamp(ibl.specular.mip_levels))?;
        self.ibl = ibl;
        self.color_grading_lut = color_grading_lut;

        log::info!(
            "Global render resources uploaded: irradiance {} mips, specular {} mips",
            ibl.irradiance.mip_levels,
            ibl.specular.mip_levels
        );
        Ok(())
    }

    fn upload_lighting(
        device: &mut dyn RenderDevice,
        sources: &GlobalResourceSources,
    ) -> RenderResult<(IblResources, GpuImage)> {
        let irradiance = sources.irradiance.upload(device)?;
        let specular = sources.specular.upload(device)?;

        let brdf = &sources.brdf_lut;
        let brdf_lut = upload_image(
            device,
            &ImageDesc::texture(brdf.width, brdf.height, brdf.format, 1),
            &brdf.pixels,
        )?;

        let lut = &sources.color_grading_lut;
        let color_grading_lut = upload_image(
            device,
            &ImageDesc::texture(lut.width, lut.height, lut.format, 1),
            &lut.pixels,
        )?;

        Ok((
            IblResources {
                brdf_lut,
                irradiance,
                specular,
            },
            color_grading_lut,
        ))
    }

    /// Release the ring, null buffer and lighting textures
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        self.transient.destroy(device);
        device.destroy_buffer(self.null_descriptor);
        for image in [
            self.ibl.brdf_lut,
            self.ibl.irradiance,
            self.ibl.specular,
            self.color_grading_lut,
        ] {
            device.destroy_image(&image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::recording::RecordingDevice;

    fn face(tag: u8, size: u32) -> TextureData {
        TextureData {
            width: size,
            height: size,
            format: vk::Format::R8G8B8A8_UNORM,
            pixels: vec![tag; (size * size * 4) as usize],
        }
    }

    #[test]
    fn test_cube_face_order() {
        let cube = CubeMapSource {
            positive_x: face(0, 1),
            negative_x: face(1, 1),
            positive_y: face(2, 1),
            negative_y: face(3, 1),
            positive_z: face(4, 1),
            negative_z: face(5, 1),
        };
        let tags: Vec<u8> = cube.layer_order().iter().map(|f| f.pixels[0]).collect();
        assert_eq!(tags, vec![0, 1, 4, 5, 2, 3]);
    }

    #[test]
    fn test_cube_map_gets_full_mip_chain() {
        let mut device = RecordingDevice::new();
        let cube = CubeMapSource::uniform(face(7, 64)).upload(&mut device).unwrap();
        assert_eq!(cube.mip_levels, 7);
        assert_eq!(cube.array_layers, 6);
    }

    #[test]
    fn test_upload_replaces_placeholders() {
        let mut device = RecordingDevice::new();
        let config = RendererConfig::default().with_transient_ring_size(4 * 1024 * 1024);
        let mut global = GlobalRenderResources::new(&mut device, &config).unwrap();
        assert_eq!(global.ibl.specular.mip_levels, 1);

        let sources = GlobalResourceSources {
            specular: CubeMapSource::uniform(face(1, 256)),
            ..GlobalResourceSources::default()
        };
        global.upload_global_render_resource(&mut device, &sources).unwrap();
        assert_eq!(global.ibl.specular.mip_levels, 9);
        assert_eq!(global.ibl.irradiance.mip_levels, 1);
    }
}
