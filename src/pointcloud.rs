use bytemuck::Zeroable;
use cgmath::{Point3, Vector2, Vector4};
use half::f16;
use std::fmt::Debug;
use std::mem;
use wgpu::util::DeviceExt;

use crate::error::SplatSortError;

/// One 3d gaussian as stored in the asset: position, opacity, the upper
/// triangle of the covariance matrix and the spherical harmonics
/// coefficients (16 x rgb, everything above the loaded degree is zero).
/// Layout must match the Gaussian struct in shaders/preprocess.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Gaussian {
    pub xyz: Point3<f32>,
    pub opacity: f32,
    pub cov: [f32; 6],
    pub sh: [[f32; 3]; 16],
    pub _pad: [u32; 2],
}

impl Default for Gaussian {
    fn default() -> Self {
        Gaussian::zeroed()
    }
}

/// The projected splat the preprocess pass writes and the rasterizer reads:
/// the two screen space axes, the ndc center and the rgba8 color.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Splat2D {
    v: Vector4<f16>,
    pos: Vector2<f16>,
    color: Vector4<u8>,
}

/// The gpu resident point cloud. The 3d gaussian buffer is read-only after
/// construction, only the 2d splat buffer is rewritten every frame.
#[allow(dead_code)]
pub struct PointCloud {
    vertex_buffer: wgpu::Buffer,
    splat_2d_buffer: wgpu::Buffer,

    bind_group: wgpu::BindGroup,
    render_bind_group: wgpu::BindGroup,
    num_points: u32,
    sh_deg: u32,
}

impl Debug for PointCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloud")
            .field("num_points", &self.num_points)
            .finish()
    }
}

impl PointCloud {
    pub fn new(
        device: &wgpu::Device,
        gaussians: &[Gaussian],
        sh_deg: u32,
    ) -> Result<Self, SplatSortError> {
        if sh_deg > 3 {
            return Err(SplatSortError::UnsupportedShDeg(sh_deg));
        }
        let limits = device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let gaussians_size = (gaussians.len() * mem::size_of::<Gaussian>()) as u64;
        if gaussians_size > limit {
            return Err(SplatSortError::BufferCapacity {
                what: "3d gaussians buffer",
                required: gaussians_size,
                limit,
            });
        }
        let num_points = gaussians.len() as u32;
        log::info!("uploading point cloud with {num_points} points (sh degree {sh_deg})");

        // zero points is a legal degenerate cloud, but empty buffers cannot
        // be bound
        let vertex_buffer = if gaussians.is_empty() {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("3d gaussians buffer"),
                size: mem::size_of::<Gaussian>() as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        } else {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("3d gaussians buffer"),
                contents: bytemuck::cast_slice(gaussians),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            })
        };

        let splat_2d_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("2d gaussians buffer"),
            size: (gaussians.len() * mem::size_of::<Splat2D>()).max(mem::size_of::<Splat2D>())
                as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("point cloud bind group"),
            layout: &Self::bind_group_layout(device),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertex_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: splat_2d_buffer.as_entire_binding(),
                },
            ],
        });

        let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("point cloud rendering bind group"),
            layout: &Self::bind_group_layout_render(device),
            entries: &[wgpu::BindGroupEntry {
                binding: 2,
                resource: splat_2d_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            vertex_buffer,
            splat_2d_buffer,
            bind_group,
            render_bind_group,
            num_points,
            sh_deg,
        })
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn sh_deg(&self) -> u32 {
        self.sh_deg
    }

    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub(crate) fn render_bind_group(&self) -> &wgpu::BindGroup {
        &self.render_bind_group
    }

    pub fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("point cloud bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        })
    }

    pub fn bind_group_layout_render(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("point cloud rendering bind group layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_layout_matches_shader_struct() {
        // shaders/preprocess.wgsl: 4 floats + 6 cov + 48 sh + vec2 pad
        assert_eq!(mem::size_of::<Gaussian>(), 240);
        assert_eq!(mem::align_of::<Gaussian>() % 4, 0);
    }

    #[test]
    fn splat_2d_is_four_words() {
        assert_eq!(mem::size_of::<Splat2D>(), 16);
    }
}
