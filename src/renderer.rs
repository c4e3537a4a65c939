use std::{num::NonZeroU64, time::Duration};

use crate::{
    camera::{Camera, PerspectiveCamera, OPENGL_TO_WGPU_MATRIX},
    error::SplatSortError,
    gpu_sort::{GPUSorter, SortBuffers},
    pointcloud::PointCloud,
    preprocess::PreprocessPipeline,
    uniform::UniformBuffer,
    utils::GPUStopwatch,
};
use cgmath::{Matrix4, SquareMatrix, Vector2};
use wgpu::util::DeviceExt;

/// Per frame splatting parameters. Changes become visible with the next
/// [GaussianRenderer::prepare] call.
#[derive(Debug, Clone, Copy)]
pub struct SplattingArgs {
    pub camera: PerspectiveCamera,
    pub viewport: Vector2<u32>,
    /// uniform size multiplier for all splats
    pub gaussian_scaling: f32,
    /// sh degree used for color evaluation, clamped to the point cloud's degree
    pub sh_deg: u32,
}

/// Sequences one frame: reset -> preprocess -> sort -> indirect draw.
/// All stages are recorded into a single command stream, so every stage sees
/// the writes of the previous one and the host never reads a count back.
pub struct GaussianRenderer {
    pipeline: wgpu::RenderPipeline,
    camera: UniformBuffer<CameraUniform>,
    render_settings: UniformBuffer<RenderSettingsUniform>,
    uniforms_bind_group: wgpu::BindGroup,
    preprocess: PreprocessPipeline,
    sorter: GPUSorter,
    sort_buffers: SortBuffers,
    sort_bind_group: wgpu::BindGroup,
    sort_pre_bind_group: wgpu::BindGroup,
    sort_render_bind_group: wgpu::BindGroup,
    reset_bind_group: wgpu::BindGroup,
    draw_indirect_buffer: wgpu::Buffer,
    draw_indirect: wgpu::BindGroup,
    color_format: wgpu::TextureFormat,
    capacity: u32,
    stopwatch: Option<GPUStopwatch>,
}

impl GaussianRenderer {
    pub fn new(
        device: &wgpu::Device,
        color_format: wgpu::TextureFormat,
        pc: &PointCloud,
    ) -> Result<Self, SplatSortError> {
        let sorter = GPUSorter::new(device);
        let sort_buffers = sorter.create_sort_buffers(device, pc.num_points() as usize)?;
        let sort_bind_group = sorter.create_bind_group(device, &sort_buffers);
        let sort_pre_bind_group = sorter.create_bind_group_preprocess(device, &sort_buffers);
        let sort_render_bind_group = sorter.create_bind_group_render(device, &sort_buffers);

        let draw_indirect_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("indirect draw buffer"),
            contents: wgpu::util::DrawIndirectArgs {
                vertex_count: 4,
                instance_count: 0,
                first_vertex: 0,
                first_instance: 0,
            }
            .as_bytes(),
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST,
        });
        let reset_bind_group =
            sorter.create_bind_group_reset(device, &sort_buffers, &draw_indirect_buffer);

        let indirect_layout = Self::bind_group_layout(device);
        let draw_indirect = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw indirect bind group"),
            layout: &indirect_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: draw_indirect_buffer.as_entire_binding(),
            }],
        });

        let camera = UniformBuffer::new_default(device, Some("camera uniform buffer"));
        let render_settings = UniformBuffer::new(
            device,
            RenderSettingsUniform::default(),
            Some("render settings buffer"),
        );
        let uniforms_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preprocess uniforms bind group"),
            layout: &PreprocessPipeline::bind_group_layout_uniforms(device),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: render_settings.buffer().as_entire_binding(),
                },
            ],
        });

        let preprocess = PreprocessPipeline::new(device, pc.sh_deg());

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[
                &PointCloud::bind_group_layout_render(device),
                &GPUSorter::bind_group_layout_rendering(device),
            ],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/gaussian.wgsl"));

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("render pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let stopwatch = if device.features().contains(
            wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
        ) {
            Some(GPUStopwatch::new(device, Some(2)))
        } else {
            None
        };

        Ok(GaussianRenderer {
            pipeline,
            camera,
            render_settings,
            uniforms_bind_group,
            preprocess,
            sorter,
            sort_buffers,
            sort_bind_group,
            sort_pre_bind_group,
            sort_render_bind_group,
            reset_bind_group,
            draw_indirect_buffer,
            draw_indirect,
            color_format,
            capacity: pc.num_points(),
            stopwatch,
        })
    }

    /// Records the whole compute side of one frame: reset the sort state,
    /// project all splats and sort the emitted keys. Must be submitted before
    /// (or together with) the render pass that calls [GaussianRenderer::render].
    pub fn prepare(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        pc: &PointCloud,
        args: &SplattingArgs,
    ) -> Result<(), SplatSortError> {
        if pc.num_points() != self.capacity {
            return Err(SplatSortError::CapacityMismatch {
                num_points: pc.num_points(),
                capacity: self.capacity,
            });
        }

        let mut camera = args.camera;
        camera.projection.resize(args.viewport.x, args.viewport.y);
        let uniform = self.camera.as_mut();
        uniform.set_camera(camera);
        uniform.set_focal(camera.projection.focal(args.viewport));
        uniform.set_viewport(args.viewport.cast().unwrap());
        self.camera.sync(queue);

        let settings = self.render_settings.as_mut();
        settings.gaussian_scaling = args.gaussian_scaling;
        settings.max_sh_deg = args.sh_deg.min(pc.sh_deg());
        self.render_settings.sync(queue);

        let measure = self.stopwatch.as_ref().map_or(false, |sw| sw.is_empty());

        self.sorter.record_reset(&self.reset_bind_group, encoder);

        if measure {
            self.stopwatch
                .as_mut()
                .unwrap()
                .start(encoder, "preprocess")?;
        }
        self.preprocess.run(
            encoder,
            &self.uniforms_bind_group,
            pc,
            &self.draw_indirect,
            &self.sort_pre_bind_group,
        );
        if measure {
            let sw = self.stopwatch.as_mut().unwrap();
            sw.stop(encoder, "preprocess")?;
            sw.start(encoder, "sorting")?;
        }

        self.sorter.record_sort_indirect(
            &self.sort_bind_group,
            self.sort_buffers.dispatch_buffer(),
            encoder,
        );
        if measure {
            let sw = self.stopwatch.as_mut().unwrap();
            sw.stop(encoder, "sorting")?;
            sw.end(encoder);
        }
        Ok(())
    }

    /// Draws the splats back-to-front. The vertex shader pulls the splat of
    /// `sorted_indices[instance_index]`, the instance count comes from the
    /// gpu-written indirect draw buffer.
    pub fn render<'rpass>(
        &'rpass self,
        render_pass: &mut wgpu::RenderPass<'rpass>,
        pc: &'rpass PointCloud,
    ) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, pc.render_bind_group(), &[]);
        render_pass.set_bind_group(1, &self.sort_render_bind_group, &[]);
        render_pass.draw_indirect(&self.draw_indirect_buffer, 0);
    }

    pub async fn render_stats(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Option<RenderStatistics> {
        let stopwatch = self.stopwatch.as_mut()?;
        let durations = stopwatch.take_measurements(device, queue).await;
        Some(RenderStatistics {
            preprocess_time: durations.get("preprocess").copied().unwrap_or_default(),
            sort_time: durations.get("sorting").copied().unwrap_or_default(),
        })
    }

    pub fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw indirect"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: Some(
                        NonZeroU64::new(
                            std::mem::size_of::<wgpu::util::DrawIndirectArgs>() as u64
                        )
                        .unwrap(),
                    ),
                },
                count: None,
            }],
        })
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    pub fn sort_buffers(&self) -> &SortBuffers {
        &self.sort_buffers
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    /// the cameras view matrix
    pub(crate) view_matrix: Matrix4<f32>,
    /// inverse view matrix
    pub(crate) view_inv_matrix: Matrix4<f32>,

    // the cameras projection matrix
    pub(crate) proj_matrix: Matrix4<f32>,

    // inverse projection matrix
    pub(crate) proj_inv_matrix: Matrix4<f32>,

    pub(crate) viewport: Vector2<f32>,
    pub(crate) focal: Vector2<f32>,
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view_matrix: Matrix4::identity(),
            view_inv_matrix: Matrix4::identity(),
            proj_matrix: Matrix4::identity(),
            proj_inv_matrix: Matrix4::identity(),
            viewport: Vector2::new(1., 1.),
            focal: Vector2::new(1., 1.),
        }
    }
}

impl CameraUniform {
    pub(crate) fn set_view_mat(&mut self, view_matrix: Matrix4<f32>) {
        self.view_matrix = view_matrix;
        self.view_inv_matrix = view_matrix.invert().unwrap();
    }

    pub(crate) fn set_proj_mat(&mut self, proj_matrix: Matrix4<f32>) {
        self.proj_matrix = OPENGL_TO_WGPU_MATRIX * proj_matrix;
        self.proj_inv_matrix = proj_matrix.invert().unwrap();
    }

    pub fn set_camera(&mut self, camera: impl Camera) {
        self.set_proj_mat(camera.proj_matrix());
        self.set_view_mat(camera.view_matrix());
    }

    pub fn set_viewport(&mut self, viewport: Vector2<f32>) {
        self.viewport = viewport;
    }

    pub fn set_focal(&mut self, focal: Vector2<f32>) {
        self.focal = focal
    }
}

/// Mirrors the RenderSettings struct in shaders/preprocess.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderSettingsUniform {
    pub gaussian_scaling: f32,
    pub max_sh_deg: u32,
    pub _pad: [u32; 2],
}

impl Default for RenderSettingsUniform {
    fn default() -> Self {
        Self {
            gaussian_scaling: 1.,
            max_sh_deg: 3,
            _pad: [0, 0],
        }
    }
}

pub struct RenderStatistics {
    pub preprocess_time: Duration,
    pub sort_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_uniform_layout() {
        // 4 matrices + viewport + focal, as declared in preprocess.wgsl
        assert_eq!(std::mem::size_of::<CameraUniform>(), 4 * 64 + 16);
    }

    #[test]
    fn render_settings_defaults() {
        let settings = RenderSettingsUniform::default();
        assert_eq!(settings.gaussian_scaling, 1.);
        assert_eq!(settings.max_sh_deg, 3);
        assert_eq!(std::mem::size_of::<RenderSettingsUniform>(), 16);
    }
}
