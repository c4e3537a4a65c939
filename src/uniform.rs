use std::{mem, num::NonZeroU64};

use bytemuck::{NoUninit, Pod};
use wgpu::util::DeviceExt;

/// A typed uniform buffer with its own single-binding bind group.
/// Mutate the cpu-side copy via [AsMut] and call [UniformBuffer::sync]
/// to upload it.
#[derive(Debug)]
pub struct UniformBuffer<T: NoUninit + Pod> {
    buffer: wgpu::Buffer,
    data: T,
    bind_group: wgpu::BindGroup,
}

impl<T> UniformBuffer<T>
where
    T: NoUninit + Pod + Default,
{
    pub fn new_default(device: &wgpu::Device, label: Option<&str>) -> Self {
        Self::new(device, T::default(), label)
    }
}

impl<T> UniformBuffer<T>
where
    T: NoUninit + Pod,
{
    pub fn new(device: &wgpu::Device, data: T, label: Option<&str>) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label,
            contents: bytemuck::cast_slice(&[data]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bg_label = label.map(|l| format!("{l} bind group"));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: bg_label.as_deref(),
            layout: &Self::bind_group_layout(device),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self {
            buffer,
            data,
            bind_group,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[allow(dead_code)]
    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform bind group layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::all(),
                ty: Self::binding_type(),
                count: None,
            }],
        })
    }

    /// uploads the cpu-side data to the gpu
    pub fn sync(&mut self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.data]));
    }

    pub fn binding_type() -> wgpu::BindingType {
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: Some(NonZeroU64::new(mem::size_of::<T>() as u64).unwrap()),
        }
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

impl<T: NoUninit + Pod> AsMut<T> for UniformBuffer<T> {
    fn as_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
