use crate::{
    gpu_sort::GPUSorter,
    pointcloud::PointCloud,
    renderer::{CameraUniform, GaussianRenderer, RenderSettingsUniform},
    uniform::UniformBuffer,
};

use crate::gpu_sort::{HISTOGRAM_WG_SIZE, RS_BLOCK_KVS};

/// Encodes a view-space depth as an unsigned sort key.
///
/// The mapping is the IEEE-754 total order transform: it is monotone over all
/// floats, including negative ones. With a right handed camera looking down
/// -z, ascending key order therefore walks ascending view z, which is far to
/// near, so the sorted index buffer is in back-to-front draw order.
/// Equal depths map to equal keys and are kept in input order by the sorter.
pub fn depth_to_key(depth: f32) -> u32 {
    let bits = depth.to_bits();
    let mask = if bits & 0x8000_0000 != 0 {
        0xffff_ffff
    } else {
        0x8000_0000
    };
    bits ^ mask
}

/// Projects every splat into view space, writes the 2d splat record and
/// appends a (depth key, index) pair for the sorter. Also bumps the sort
/// dispatch and draw instance counters, so neither count ever touches the
/// host.
pub struct PreprocessPipeline(wgpu::ComputePipeline);

impl PreprocessPipeline {
    pub fn new(device: &wgpu::Device, sh_deg: u32) -> Self {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("preprocess pipeline layout"),
            bind_group_layouts: &[
                &Self::bind_group_layout_uniforms(device),
                &PointCloud::bind_group_layout(device),
                &GaussianRenderer::bind_group_layout(device),
                &GPUSorter::bind_group_layout_preprocess(device),
            ],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preprocess shader"),
            source: wgpu::ShaderSource::Wgsl(Self::build_shader(sh_deg).into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("preprocess pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "preprocess",
            compilation_options: Default::default(),
            cache: None,
        });
        Self(pipeline)
    }

    fn build_shader(sh_deg: u32) -> String {
        const SHADER_SRC: &str = include_str!("shaders/preprocess.wgsl");
        let shader_src = format!("const MAX_SH_DEG: u32 = {:}u;\n{:}", sh_deg, SHADER_SRC);
        shader_src
            .replace("{workgroup_size}", HISTOGRAM_WG_SIZE.to_string().as_str())
            .replace("{block_kvs}", RS_BLOCK_KVS.to_string().as_str())
    }

    // camera and render settings share one bind group, the preprocess
    // pipeline already needs the other three slots
    pub fn bind_group_layout_uniforms(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess uniforms layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: UniformBuffer::<CameraUniform>::binding_type(),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: UniformBuffer::<RenderSettingsUniform>::binding_type(),
                    count: None,
                },
            ],
        })
    }

    pub(crate) fn run(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        uniforms: &wgpu::BindGroup,
        pc: &PointCloud,
        draw_indirect: &wgpu::BindGroup,
        sort_preprocess: &wgpu::BindGroup,
    ) {
        encoder.push_debug_group("preprocess");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("preprocess compute pass"),
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.0);
            pass.set_bind_group(0, uniforms, &[]);
            pass.set_bind_group(1, pc.bind_group(), &[]);
            pass.set_bind_group(2, draw_indirect, &[]);
            pass.set_bind_group(3, sort_preprocess, &[]);

            let wgs = pc.num_points().div_ceil(HISTOGRAM_WG_SIZE as u32);
            pass.dispatch_workgroups(wgs, 1, 1);
        }
        encoder.pop_debug_group();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_is_monotone() {
        let depths = [
            f32::MIN,
            -1000.,
            -10.5,
            -1.,
            -0.25,
            -0.,
            0.,
            0.25,
            1.,
            10.5,
            1000.,
            f32::MAX,
        ];
        for pair in depths.windows(2) {
            assert!(
                depth_to_key(pair[0]) <= depth_to_key(pair[1]),
                "keys out of order for depths {:?}",
                pair
            );
        }
        // strict for distinct magnitudes
        assert!(depth_to_key(-2.) < depth_to_key(-1.));
        assert!(depth_to_key(-1.) < depth_to_key(1.));
        assert!(depth_to_key(1.) < depth_to_key(2.));
    }

    #[test]
    fn equal_depths_collide() {
        assert_eq!(depth_to_key(3.5), depth_to_key(3.5));
        assert_eq!(depth_to_key(-7.25), depth_to_key(-7.25));
    }

    #[test]
    fn dispatch_increments_match_ceil_div() {
        // the projector bumps the sort dispatch once per started block, which
        // must come out as ceil(count / block size) workgroups
        for c in [0usize, 1, RS_BLOCK_KVS - 1, RS_BLOCK_KVS, RS_BLOCK_KVS + 1, 10_000] {
            let bumped = (0..c).filter(|i| i % RS_BLOCK_KVS == 0).count();
            assert_eq!(bumped, c.div_ceil(RS_BLOCK_KVS));
        }
    }

    #[test]
    fn farther_points_draw_first() {
        // view space z of a point in front of a -z looking camera is negative,
        // the farther one has to come first in the sorted order
        let far = depth_to_key(-50.);
        let near = depth_to_key(-0.5);
        assert!(far < near);
    }
}
