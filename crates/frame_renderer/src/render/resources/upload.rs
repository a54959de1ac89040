//! Staged uploads into device-local memory
//!
//! Every asset buffer and image goes through the same protocol: fill a
//! host-visible staging buffer, create the device-local destination, copy on
//! the GPU and drop the staging buffer straight away.

use ash::vk;

use crate::render::api::{BufferDesc, BufferHandle, GpuImage, ImageDesc, RenderDevice, RenderResult};

/// Upload `bytes` into a new device-local buffer
pub fn upload_buffer(
    device: &mut dyn RenderDevice,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> RenderResult<BufferHandle> {
    let size = bytes.len() as u64;
    let staging = device.create_buffer(&BufferDesc::staging(size))?;
    let uploaded = device.write_buffer(staging, 0, bytes).and_then(|()| {
        let buffer = device.create_buffer(&BufferDesc::device_local(size, usage))?;
        if let Err(err) = device.copy_buffer(staging, buffer, size) {
            device.destroy_buffer(buffer);
            return Err(err);
        }
        Ok(buffer)
    });
    device.destroy_buffer(staging);
    uploaded
}

/// Upload tightly packed layers into a new sampled image
///
/// `bytes` holds mip 0 of every layer back to back. With more than one mip
/// level the chain is blitted on the GPU.
pub fn upload_image(device: &mut dyn RenderDevice, desc: &ImageDesc, bytes: &[u8]) -> RenderResult<GpuImage> {
    let staging = device.create_buffer(&BufferDesc::staging(bytes.len() as u64))?;
    let uploaded = device.write_buffer(staging, 0, bytes).and_then(|()| {
        let image = device.create_image(desc)?;
        if let Err(err) = device.copy_buffer_to_image(staging, &image, desc.mip_levels > 1) {
            device.destroy_image(&image);
            return Err(err);
        }
        Ok(image)
    });
    device.destroy_buffer(staging);
    uploaded
}

/// Buffers and images created so far by a multi-part upload
///
/// A record built from several uploads collects them here and calls
/// [`PartialUpload::release`] when a later part fails.
#[derive(Debug, Default)]
pub struct PartialUpload {
    buffers: Vec<BufferHandle>,
    images: Vec<GpuImage>,
}

impl PartialUpload {
    /// [`upload_buffer`], remembering the result
    pub fn buffer(
        &mut self,
        device: &mut dyn RenderDevice,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<BufferHandle> {
        let buffer = upload_buffer(device, bytes, usage)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    /// [`upload_image`], remembering the result
    pub fn image(&mut self, device: &mut dyn RenderDevice, desc: &ImageDesc, bytes: &[u8]) -> RenderResult<GpuImage> {
        let image = upload_image(device, desc, bytes)?;
        self.images.push(image);
        Ok(image)
    }

    /// Destroy everything uploaded so far
    pub fn release(self, device: &mut dyn RenderDevice) {
        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
        for image in &self.images {
            device.destroy_image(image);
        }
    }
}

/// Mip count of a full chain down to 1x1
pub fn full_mip_levels(width: u32, height: u32) -> u32 {
    width.max(height).max(1).ilog2() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::recording::RecordingDevice;

    #[test]
    fn test_full_mip_levels() {
        assert_eq!(full_mip_levels(1, 1), 1);
        assert_eq!(full_mip_levels(256, 256), 9);
        assert_eq!(full_mip_levels(300, 20), 9);
        assert_eq!(full_mip_levels(512, 1024), 11);
    }

    #[test]
    fn test_staging_buffer_released() {
        let mut device = RecordingDevice::new();
        let buffer = upload_buffer(&mut device, &[1, 2, 3, 4], vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();

        assert_eq!(device.live_buffer_count(), 1);
        assert_eq!(device.buffer_bytes(buffer), &[1, 2, 3, 4]);
        assert_eq!(device.upload_count(), 1);
    }

    #[test]
    fn test_partial_upload_release() {
        let mut device = RecordingDevice::new();
        let mut parts = PartialUpload::default();
        parts.buffer(&mut device, &[0; 16], vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();
        parts
            .image(
                &mut device,
                &ImageDesc::texture(1, 1, vk::Format::R8G8B8A8_UNORM, 1),
                &[0; 4],
            )
            .unwrap();
        assert_eq!((device.live_buffer_count(), device.live_image_count()), (1, 1));

        parts.release(&mut device);
        assert_eq!((device.live_buffer_count(), device.live_image_count()), (0, 0));
    }
}
