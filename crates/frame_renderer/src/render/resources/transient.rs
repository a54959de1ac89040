//! Transient storage ring buffer
//!
//! One host-coherent, persistently mapped buffer is split evenly between the
//! frame slots. Each slot bump-allocates from its own region during a frame and
//! is rewound once per frame after that slot's fence wait, so the GPU never
//! reads a region the CPU is writing.
//!
//! ```text
//! | slot 0 region          | slot 1 region          | slot 2 region          |
//! ^begin   ^end ---->      ^begin ^end ---->        ^begin  ^end ---->
//! ```
//!
//! Overflowing a region is a programming error (the ring is sized for the
//! worst frame) and panics.

use ash::vk;
use bytemuck::Pod;

use crate::foundation::math::round_up;
use crate::render::api::{BufferDesc, BufferHandle, HostMapping, MemoryLocation, RenderDevice, RenderResult};

/// Bump cursor of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientRegion {
    /// First byte owned by the slot
    pub begin: u64,
    /// Next free byte
    pub end: u64,
    /// Bytes owned by the slot
    pub capacity: u64,
}

impl TransientRegion {
    /// Bytes handed out since the last reset
    pub const fn used(&self) -> u64 {
        self.end - self.begin
    }
}

/// Typed view of a fresh allocation
///
/// `offset` is the dynamic offset to bind; `data` is the mapped memory behind it.
#[derive(Debug)]
pub struct TransientSlice<'a, T> {
    /// Byte offset from the start of the ring buffer
    pub offset: u64,
    /// Mapped elements
    pub data: &'a mut [T],
}

impl<T> TransientSlice<'_, T> {
    /// Offset in the form `vkCmdBindDescriptorSets` takes
    pub fn dynamic_offset(&self) -> u32 {
        dynamic_offset(self.offset)
    }
}

/// Narrow a ring offset to a dynamic descriptor offset
///
/// The ring is never larger than `maxStorageBufferRange`, so this only fails
/// on a corrupted cursor.
pub fn dynamic_offset(offset: u64) -> u32 {
    u32::try_from(offset).unwrap_or_else(|_| panic!("transient offset {offset} exceeds u32 range"))
}

/// Ring-buffer arena for per-frame and per-drawcall data
#[derive(Debug)]
pub struct TransientArena {
    buffer: BufferHandle,
    mapping: HostMapping,
    size: u64,
    alignment: u64,
    max_storage_buffer_range: u64,
    regions: Vec<TransientRegion>,
}

impl TransientArena {
    /// Create the ring buffer and split it between `frame_count` slots
    pub fn new(device: &mut dyn RenderDevice, size: u64, frame_count: usize) -> RenderResult<Self> {
        let limits = device.limits();
        let buffer = device.create_buffer(&BufferDesc {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER,
            location: MemoryLocation::HostVisible,
        })?;
        let mapping = device.map_persistent(buffer)?;

        let frame_count = frame_count.max(1) as u64;
        let regions = (0..frame_count)
            .map(|i| {
                let begin = size * i / frame_count;
                let next = size * (i + 1) / frame_count;
                TransientRegion {
                    begin,
                    end: begin,
                    capacity: next - begin,
                }
            })
            .collect();

        log::debug!("Transient ring: {size} bytes across {frame_count} frame slots");

        Ok(Self {
            buffer,
            mapping,
            size,
            alignment: limits
                .min_storage_buffer_offset_alignment
                .max(limits.min_uniform_buffer_offset_alignment),
            max_storage_buffer_range: limits.max_storage_buffer_range,
            regions,
        })
    }

    /// Reserve `size` bytes in the slot's region, returning the aligned offset
    ///
    /// # Panics
    /// When the region would overflow.
    pub fn allocate(&mut self, frame_slot: usize, size: u64) -> u64 {
        let region = &mut self.regions[frame_slot];
        let offset = round_up(region.end, self.alignment);
        let end = offset + size;
        assert!(
            end <= region.begin + region.capacity,
            "transient region {frame_slot} overflow: {} of {} bytes requested",
            end - region.begin,
            region.capacity
        );
        region.end = end;
        offset
    }

    /// Reserve `count` elements of `T` and return them mapped
    ///
    /// Contents are whatever the slot last wrote there; callers overwrite
    /// every element the shader reads.
    ///
    /// # Panics
    /// When the region would overflow.
    pub fn allocate_typed<T: Pod>(&mut self, frame_slot: usize, count: usize) -> TransientSlice<'_, T> {
        let bytes = (std::mem::size_of::<T>() * count) as u64;
        let offset = self.allocate(frame_slot, bytes);

        // Safety: the mapping covers `size` bytes for the arena's lifetime, the
        // range was just reserved inside it and the returned borrow is tied to
        // `&mut self`, so no other view of these bytes exists.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.mapping.as_ptr().add(offset as usize), bytes as usize)
        };
        TransientSlice {
            offset,
            data: bytemuck::cast_slice_mut(bytes),
        }
    }

    /// Reserve and fill a single object
    pub fn push<T: Pod>(&mut self, frame_slot: usize, value: &T) -> u64 {
        let slice = self.allocate_typed::<T>(frame_slot, 1);
        slice.data[0] = *value;
        slice.offset
    }

    /// Rewind the slot's region
    pub fn reset(&mut self, frame_slot: usize) {
        let region = &mut self.regions[frame_slot];
        region.end = region.begin;
    }

    /// Cursor state of one slot
    pub fn region(&self, frame_slot: usize) -> TransientRegion {
        self.regions[frame_slot]
    }

    /// Backing buffer, bound as a dynamic storage buffer
    pub const fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Total ring size in bytes
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Offset alignment applied to every allocation
    pub const fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Descriptor range for a dynamic binding reading `object_size` bytes
    ///
    /// # Panics
    /// When the object cannot fit in a single storage binding.
    pub fn binding_range(&self, object_size: u64) -> u64 {
        assert!(
            object_size <= self.max_storage_buffer_range,
            "storage object of {object_size} bytes exceeds maxStorageBufferRange {}",
            self.max_storage_buffer_range
        );
        object_size
    }

    /// Release the backing buffer
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.buffer);
        self.buffer = BufferHandle::NULL;
    }
}
