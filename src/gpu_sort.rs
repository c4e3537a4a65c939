/*
    This file implements a gpu version of radix sort. A good introduction to general purpose radix sort can
    be found here: http://www.codercorner.com/RadixSortRevisited.htm

    The sort is a histogram radix sort over 8 bit digits: every pass counts digit occurrences per
    block, turns the counts into global offsets with an exclusive scan and scatters the key/index
    pairs into the other half of a ping-pong buffer pair. Equal digits keep their input order in
    every pass, which makes the whole sort stable.

    All shaders can be found in shaders/radix_sort.wgsl
*/

use wgpu::{util::DeviceExt, ComputePassDescriptor};

use crate::error::SplatSortError;

// IMPORTANT: the following constants have to be synced with the numbers in radix_sort.wgsl
pub const HISTOGRAM_WG_SIZE: usize = 256;
const RS_RADIX_LOG2: usize = 8; // 8 bit radices
const RS_RADIX_SIZE: usize = 1 << RS_RADIX_LOG2; // 256 entries into the radix table
const RS_KEYVAL_SIZE: usize = 32 / RS_RADIX_LOG2; // 4 passes for a 32 bit key
pub const RS_BLOCK_ROWS: usize = 15;
/// number of key/index pairs a single workgroup (= block) is responsible for
pub const RS_BLOCK_KVS: usize = HISTOGRAM_WG_SIZE * RS_BLOCK_ROWS;
const PREFIX_WG_SIZE: usize = RS_RADIX_SIZE; // one scan thread per digit
const SCATTER_WG_SIZE: usize = HISTOGRAM_WG_SIZE;

/// number of workgroups needed to histogram/scatter `keys_size` elements
pub fn block_count(keys_size: usize) -> usize {
    (keys_size + RS_BLOCK_KVS - 1) / RS_BLOCK_KVS
}

fn histogram_len(capacity: usize) -> usize {
    RS_RADIX_SIZE * block_count(capacity).max(1)
}

/// Gpu-resident bookkeeping record of the sorter. Written by the reset pass
/// and the preprocess stage, read by every sort dispatch.
///
/// `even_pass`/`odd_pass` hold the pass index the next scatter of that parity
/// will use. Each scatter writes the counter of the *other* parity, so no
/// dispatch ever writes a field it also reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortInfo {
    pub keys_size: u32,
    pub passes: u32,
    pub even_pass: u32,
    pub odd_pass: u32,
}

impl SortInfo {
    pub fn initial(keys_size: u32) -> Self {
        Self {
            keys_size,
            passes: RS_KEYVAL_SIZE as u32,
            even_pass: 0,
            odd_pass: 1,
        }
    }
}

/// All per-cloud buffers of the sorter. Allocated once at construction and
/// sized to the point cloud capacity, only the contents change per frame.
pub struct SortBuffers {
    keys_a: wgpu::Buffer,
    keys_b: wgpu::Buffer,
    indices_a: wgpu::Buffer,
    indices_b: wgpu::Buffer,
    histograms: wgpu::Buffer,
    info: wgpu::Buffer,
    dispatch: wgpu::Buffer,
    capacity: usize,
}

impl SortBuffers {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// keys after a full sort (4 passes always end up in buffer a)
    pub fn keys(&self) -> &wgpu::Buffer {
        &self.keys_a
    }

    /// sorted point indices after a full sort
    pub fn indices(&self) -> &wgpu::Buffer {
        &self.indices_a
    }

    pub fn info_buffer(&self) -> &wgpu::Buffer {
        &self.info
    }

    pub fn dispatch_buffer(&self) -> &wgpu::Buffer {
        &self.dispatch
    }
}

pub struct GPUSorter {
    bind_group_layout: wgpu::BindGroupLayout,
    preprocess_bind_group_layout: wgpu::BindGroupLayout,
    render_bind_group_layout: wgpu::BindGroupLayout,
    reset_bind_group_layout: wgpu::BindGroupLayout,
    reset_p: wgpu::ComputePipeline,
    histogram_even_p: wgpu::ComputePipeline,
    histogram_odd_p: wgpu::ComputePipeline,
    prefix_p: wgpu::ComputePipeline,
    scatter_even_p: wgpu::ComputePipeline,
    scatter_odd_p: wgpu::ComputePipeline,
}

impl GPUSorter {
    pub fn new(device: &wgpu::Device) -> Self {
        let bind_group_layout = Self::bind_group_layout(device);
        let preprocess_bind_group_layout = Self::bind_group_layout_preprocess(device);
        let render_bind_group_layout = Self::bind_group_layout_rendering(device);
        let reset_bind_group_layout = Self::bind_group_layout_reset(device);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix sort pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let reset_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix sort reset pipeline layout"),
            bind_group_layouts: &[&reset_bind_group_layout],
            push_constant_ranges: &[],
        });

        let raw_shader: &str = include_str!("shaders/radix_sort.wgsl");
        let shader_w_const = format!(
            "const rs_radix_log2: u32 = {:}u;\n\
            const rs_radix_size: u32 = {:}u;\n\
            const rs_keyval_size: u32 = {:}u;\n\
            const rs_block_rows: u32 = {:}u;\n\
            const rs_block_kvs: u32 = {:}u;\n{:}",
            RS_RADIX_LOG2, RS_RADIX_SIZE, RS_KEYVAL_SIZE, RS_BLOCK_ROWS, RS_BLOCK_KVS, raw_shader
        );
        let shader_code = shader_w_const
            .replace(
                "{histogram_wg_size}",
                HISTOGRAM_WG_SIZE.to_string().as_str(),
            )
            .replace("{prefix_wg_size}", PREFIX_WG_SIZE.to_string().as_str())
            .replace("{scatter_wg_size}", SCATTER_WG_SIZE.to_string().as_str())
            .replace("{radix_size}", RS_RADIX_SIZE.to_string().as_str())
            .replace("{block_kvs}", RS_BLOCK_KVS.to_string().as_str());

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("radix sort shader"),
            source: wgpu::ShaderSource::Wgsl(shader_code.into()),
        });

        let reset_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("reset_indirect"),
            layout: Some(&reset_pipeline_layout),
            module: &shader,
            entry_point: "reset_indirect",
            compilation_options: Default::default(),
            cache: None,
        });
        let histogram_even_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("histogram_even"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "histogram_even",
            compilation_options: Default::default(),
            cache: None,
        });
        let histogram_odd_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("histogram_odd"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "histogram_odd",
            compilation_options: Default::default(),
            cache: None,
        });
        let prefix_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("prefix_histogram"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "prefix_histogram",
            compilation_options: Default::default(),
            cache: None,
        });
        let scatter_even_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("scatter_even"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "scatter_even",
            compilation_options: Default::default(),
            cache: None,
        });
        let scatter_odd_p = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("scatter_odd"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "scatter_odd",
            compilation_options: Default::default(),
            cache: None,
        });

        log::info!(
            "created radix sorter ({} bit digits, {} passes, {} keys per block)",
            RS_RADIX_LOG2,
            RS_KEYVAL_SIZE,
            RS_BLOCK_KVS
        );

        Self {
            bind_group_layout,
            preprocess_bind_group_layout,
            render_bind_group_layout,
            reset_bind_group_layout,
            reset_p,
            histogram_even_p,
            histogram_odd_p,
            prefix_p,
            scatter_even_p,
            scatter_odd_p,
        }
    }

    /// Allocates all sorter buffers for up to `capacity` key/index pairs.
    /// The info buffer starts out with `keys_size == capacity` so the direct
    /// recording path works without a preprocess stage.
    pub fn create_sort_buffers(
        &self,
        device: &wgpu::Device,
        capacity: usize,
    ) -> Result<SortBuffers, SplatSortError> {
        let limits = device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);

        let keyval_size = (capacity * std::mem::size_of::<u32>()).max(4) as u64;
        if keyval_size > limit {
            return Err(SplatSortError::BufferCapacity {
                what: "sort key buffer",
                required: keyval_size,
                limit,
            });
        }
        let histograms_size = (histogram_len(capacity) * std::mem::size_of::<u32>()) as u64;
        if histograms_size > limit {
            return Err(SplatSortError::BufferCapacity {
                what: "sort histogram buffer",
                required: histograms_size,
                limit,
            });
        }

        let keyval_desc = |label| wgpu::BufferDescriptor {
            label: Some(label),
            size: keyval_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        };
        let keys_a = device.create_buffer(&keyval_desc("radix keys buffer a"));
        let keys_b = device.create_buffer(&keyval_desc("radix keys buffer b"));
        let indices_a = device.create_buffer(&keyval_desc("radix indices buffer a"));
        let indices_b = device.create_buffer(&keyval_desc("radix indices buffer b"));

        let histograms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("radix histogram buffer"),
            size: histograms_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let info = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort info buffer"),
            contents: bytemuck::bytes_of(&SortInfo::initial(capacity as u32)),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        let dispatch = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort dispatch indirect buffer"),
            contents: wgpu::util::DispatchIndirectArgs {
                x: block_count(capacity) as u32,
                y: 1,
                z: 1,
            }
            .as_bytes(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::INDIRECT,
        });

        Ok(SortBuffers {
            keys_a,
            keys_b,
            indices_a,
            indices_b,
            histograms,
            info,
            dispatch,
            capacity,
        })
    }

    pub fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..6)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix bind group layout"),
            entries: &entries,
        })
    }

    // used by the preprocess pipeline: the projector appends key/index pairs
    // and bumps the dispatch counter, so it only sees the info buffer, the
    // "a" ping-pong half and the dispatch buffer
    pub fn bind_group_layout_preprocess(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..4)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix bind group layout for preprocess pipeline"),
            entries: &entries,
        })
    }

    // used by the renderer, read_only as storage writes are not allowed in vertex stages
    pub fn bind_group_layout_rendering(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix render bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        })
    }

    // the reset pass rewrites the info record and both indirect argument buffers
    pub fn bind_group_layout_reset(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = [0, 6, 7]
            .into_iter()
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix reset bind group layout"),
            entries: &entries,
        })
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        buffers: &SortBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("radix bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.histograms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.keys_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.keys_b.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.indices_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffers.indices_b.as_entire_binding(),
                },
            ],
        })
    }

    pub fn create_bind_group_preprocess(
        &self,
        device: &wgpu::Device,
        buffers: &SortBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("radix preprocess bind group"),
            layout: &self.preprocess_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.keys_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.indices_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.dispatch.as_entire_binding(),
                },
            ],
        })
    }

    pub fn create_bind_group_render(
        &self,
        device: &wgpu::Device,
        buffers: &SortBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("radix render bind group"),
            layout: &self.render_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.indices_a.as_entire_binding(),
                },
            ],
        })
    }

    pub fn create_bind_group_reset(
        &self,
        device: &wgpu::Device,
        buffers: &SortBuffers,
        draw_indirect_buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("radix reset bind group"),
            layout: &self.reset_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: buffers.dispatch.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: draw_indirect_buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// Rewrites the sort info, dispatch and draw argument buffers for the
    /// next frame with a single one-workgroup dispatch. No host writes, so a
    /// gpu culling stage can feed the counters later on.
    pub fn record_reset(&self, bind_group: &wgpu::BindGroup, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("reset sort state"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.reset_p);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }

    fn record_pass(
        &self,
        bind_group: &wgpu::BindGroup,
        pass_idx: usize,
        dispatch: Dispatch,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let even = pass_idx % 2 == 0;
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("radix sort pass"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, bind_group, &[]);

        pass.set_pipeline(if even {
            &self.histogram_even_p
        } else {
            &self.histogram_odd_p
        });
        match dispatch {
            Dispatch::Direct(blocks) => pass.dispatch_workgroups(blocks, 1, 1),
            Dispatch::Indirect(buffer) => pass.dispatch_workgroups_indirect(buffer, 0),
        }

        // the scan is always a single workgroup, one thread per digit
        pass.set_pipeline(&self.prefix_p);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(if even {
            &self.scatter_even_p
        } else {
            &self.scatter_odd_p
        });
        match dispatch {
            Dispatch::Direct(blocks) => pass.dispatch_workgroups(blocks, 1, 1),
            Dispatch::Indirect(buffer) => pass.dispatch_workgroups_indirect(buffer, 0),
        }
    }

    /// Sorts `keysize` pairs with host-known element count. The info buffer
    /// must hold a fresh [SortInfo] for this count (as written by
    /// [GPUSorter::create_sort_buffers] or the reset pass).
    pub fn record_sort(
        &self,
        bind_group: &wgpu::BindGroup,
        keysize: usize,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        if keysize == 0 {
            return;
        }
        let blocks = block_count(keysize) as u32;
        for pass_idx in 0..RS_KEYVAL_SIZE {
            self.record_pass(bind_group, pass_idx, Dispatch::Direct(blocks), encoder);
        }
    }

    /// Sorts with the element count and workgroup counts the gpu computed
    /// itself. A zero count comes out as zero-workgroup dispatches, so the
    /// whole sequence degenerates to a no-op.
    pub fn record_sort_indirect(
        &self,
        bind_group: &wgpu::BindGroup,
        dispatch_buffer: &wgpu::Buffer,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        for pass_idx in 0..RS_KEYVAL_SIZE {
            self.record_pass(
                bind_group,
                pass_idx,
                Dispatch::Indirect(dispatch_buffer),
                encoder,
            );
        }
    }
}

#[derive(Clone, Copy)]
enum Dispatch<'a> {
    Direct(u32),
    Indirect(&'a wgpu::Buffer),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::depth_to_key;
    use num_traits::{int::PrimInt, Unsigned};
    use rand::prelude::*;

    // cpu model of a single gpu sort pass: per-block digit histogram, global
    // exclusive scan (per digit across blocks, then across digits), stable
    // scatter. Mirrors radix_sort.wgsl with the same block geometry.
    fn model_pass(keys: &[u32], values: &[u32], shift: u32) -> (Vec<u32>, Vec<u32>) {
        let n = keys.len();
        let nb = block_count(n);
        let mut histograms = vec![0u32; RS_RADIX_SIZE * nb];

        for b in 0..nb {
            let lo = b * RS_BLOCK_KVS;
            let hi = (lo + RS_BLOCK_KVS).min(n);
            for key in &keys[lo..hi] {
                let digit = ((key >> shift) & 0xff) as usize;
                histograms[digit * nb + b] += 1;
            }
        }

        let mut acc = 0u32;
        for entry in histograms.iter_mut() {
            let count = *entry;
            *entry = acc;
            acc += count;
        }
        assert_eq!(acc as usize, n);

        let mut out_keys = vec![0u32; n];
        let mut out_values = vec![0u32; n];
        let mut cursor = histograms;
        for b in 0..nb {
            let lo = b * RS_BLOCK_KVS;
            let hi = (lo + RS_BLOCK_KVS).min(n);
            for i in lo..hi {
                let digit = ((keys[i] >> shift) & 0xff) as usize;
                let dst = cursor[digit * nb + b] as usize;
                cursor[digit * nb + b] += 1;
                out_keys[dst] = keys[i];
                out_values[dst] = values[i];
            }
        }
        (out_keys, out_values)
    }

    fn model_sort(keys: &[u32], values: &[u32]) -> (Vec<u32>, Vec<u32>) {
        let mut keys = keys.to_vec();
        let mut values = values.to_vec();
        for shift in pass_shifts() {
            let (k, v) = model_pass(&keys, &values, shift);
            keys = k;
            values = v;
        }
        (keys, values)
    }

    // the pass counter handoff between the two scatter parities: each scatter
    // reads its own counter and writes the other one
    fn pass_shifts() -> Vec<u32> {
        let mut even_pass = 0u32;
        let mut odd_pass = 1u32;
        let mut shifts = Vec::new();
        for pass_idx in 0..RS_KEYVAL_SIZE {
            if pass_idx % 2 == 0 {
                shifts.push(even_pass * RS_RADIX_LOG2 as u32);
                odd_pass = even_pass + 1;
            } else {
                shifts.push(odd_pass * RS_RADIX_LOG2 as u32);
                even_pass = odd_pass + 1;
            }
        }
        shifts
    }

    // reference sort in the style of a scalar lsd radix sort, used to
    // cross-check the block model
    fn radix_sort_ref<T: PrimInt + Unsigned>(data: &mut [T]) {
        let passes = std::mem::size_of::<T>();
        let mut scratch = data.to_vec();
        for p in 0..passes {
            let mut counts = [0usize; 256];
            for v in data.iter() {
                counts[(*v >> (p * 8)).to_usize().unwrap() & 0xff] += 1;
            }
            let mut offsets = [0usize; 256];
            let mut acc = 0;
            for (o, c) in offsets.iter_mut().zip(counts.iter()) {
                *o = acc;
                acc += c;
            }
            for v in data.iter() {
                let bucket = (*v >> (p * 8)).to_usize().unwrap() & 0xff;
                scratch[offsets[bucket]] = *v;
                offsets[bucket] += 1;
            }
            data.copy_from_slice(&scratch);
        }
    }

    #[test]
    fn pass_counter_handoff_yields_all_shifts() {
        assert_eq!(pass_shifts(), vec![0, 8, 16, 24]);
    }

    #[test]
    fn block_count_is_ceil_div() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(RS_BLOCK_KVS), 1);
        assert_eq!(block_count(RS_BLOCK_KVS + 1), 2);
        assert_eq!(block_count(10 * RS_BLOCK_KVS), 10);
        for c in [17usize, 999, 123_456] {
            assert_eq!(block_count(c), (c as f64 / RS_BLOCK_KVS as f64).ceil() as usize);
        }
    }

    #[test]
    fn sorts_across_block_boundaries() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for n in [0usize, 1, 2, RS_BLOCK_KVS - 1, RS_BLOCK_KVS, RS_BLOCK_KVS + 1, 10_000] {
            let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
            let values: Vec<u32> = (0..n as u32).collect();
            let (sorted_keys, sorted_values) = model_sort(&keys, &values);

            assert!(sorted_keys.windows(2).all(|w| w[0] <= w[1]), "n = {n}");
            // every output key must still belong to its original index
            for (key, idx) in sorted_keys.iter().zip(sorted_values.iter()) {
                assert_eq!(*key, keys[*idx as usize]);
            }
            // no index lost, none duplicated
            let mut indices = sorted_values.clone();
            indices.sort_unstable();
            assert!(indices.iter().copied().eq(0..n as u32), "n = {n}");
        }
    }

    #[test]
    fn matches_scalar_reference() {
        let mut rng = StdRng::seed_from_u64(42);
        let keys: Vec<u32> = (0..20_000).map(|_| rng.gen()).collect();
        let values: Vec<u32> = (0..keys.len() as u32).collect();
        let (sorted_keys, _) = model_sort(&keys, &values);

        let mut expected = keys;
        radix_sort_ref(&mut expected);
        assert_eq!(sorted_keys, expected);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let mut rng = StdRng::seed_from_u64(7);
        // few distinct keys over two blocks force plenty of ties
        let keys: Vec<u32> = (0..2 * RS_BLOCK_KVS)
            .map(|_| rng.gen_range(0..4u32) * 0x0101_0101)
            .collect();
        let values: Vec<u32> = (0..keys.len() as u32).collect();
        let (sorted_keys, sorted_values) = model_sort(&keys, &values);

        for w in sorted_keys
            .windows(2)
            .zip(sorted_values.windows(2))
            .filter(|(k, _)| k[0] == k[1])
        {
            assert!(w.1[0] < w.1[1], "tie broken out of input order");
        }
    }

    #[test]
    fn depth_ties_stay_stable() {
        let depths = [3.0f32, 1.0, 4.0, 1.0];
        let keys: Vec<u32> = depths.iter().map(|d| depth_to_key(*d)).collect();
        let values: Vec<u32> = (0..4).collect();
        let (_, sorted_values) = model_sort(&keys, &values);
        assert_eq!(sorted_values, vec![1, 3, 0, 2]);
    }

    #[test]
    fn reset_record_is_idempotent() {
        // the reset pass writes constants, so resetting twice must match one reset
        let once = SortInfo::initial(0);
        let twice = SortInfo::initial(once.keys_size);
        assert_eq!(once, twice);
        assert_eq!(
            once,
            SortInfo {
                keys_size: 0,
                passes: 4,
                even_pass: 0,
                odd_pass: 1
            }
        );
    }

    #[test]
    fn histogram_buffer_covers_capacity() {
        assert_eq!(histogram_len(0), RS_RADIX_SIZE);
        assert_eq!(histogram_len(1), RS_RADIX_SIZE);
        assert_eq!(histogram_len(RS_BLOCK_KVS + 1), 2 * RS_RADIX_SIZE);
    }
}
