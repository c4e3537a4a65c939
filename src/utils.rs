use std::{collections::HashMap, mem::size_of, ops::Deref};

use wgpu::util::DeviceExt;

use crate::error::SplatSortError;

/// Measures gpu-side durations with timestamp queries.
/// Requires [wgpu::Features::TIMESTAMP_QUERY] and
/// [wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS].
pub struct GPUStopwatch {
    query_set: wgpu::QuerySet,
    query_buffer: wgpu::Buffer,
    query_set_capacity: u32,
    index: u32,
    labels: HashMap<String, u32>,
}

impl GPUStopwatch {
    pub fn new(device: &wgpu::Device, capacity: Option<u32>) -> Self {
        let capacity = capacity.unwrap_or(wgpu::QUERY_SET_MAX_QUERIES / 2);
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("time stamp query set"),
            ty: wgpu::QueryType::Timestamp,
            count: capacity * 2,
        });

        let query_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("query set buffer"),
            size: capacity as u64 * 2 * size_of::<u64>() as u64,
            usage: wgpu::BufferUsages::QUERY_RESOLVE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let labels = HashMap::with_capacity(capacity as usize);

        Self {
            query_set,
            query_buffer,
            query_set_capacity: capacity * 2,
            index: 0,
            labels,
        }
    }

    pub fn start(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
    ) -> Result<(), SplatSortError> {
        if self.labels.contains_key(label) {
            return Err(SplatSortError::MeasureStarted(label.to_string()));
        }
        if self.labels.len() * 2 >= self.query_set_capacity as usize {
            return Err(SplatSortError::MeasureCapacity(self.query_set_capacity));
        }
        self.labels.insert(label.to_string(), self.index);
        encoder.write_timestamp(&self.query_set, self.index * 2);
        self.index += 1;
        Ok(())
    }

    pub fn stop(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
    ) -> Result<(), SplatSortError> {
        match self.labels.get(label) {
            Some(idx) => {
                encoder.write_timestamp(&self.query_set, *idx * 2 + 1);
                Ok(())
            }
            None => Err(SplatSortError::MeasureMissing(label.to_string())),
        }
    }

    /// true if no measurement is in flight (all labels were taken)
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn end(&mut self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(
            &self.query_set,
            0..self.query_set_capacity,
            &self.query_buffer,
            0,
        );
        self.index = 0;
    }

    pub async fn take_measurements(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> HashMap<String, std::time::Duration> {
        let period = queue.get_timestamp_period();

        let labels: Vec<(String, u32)> = self.labels.drain().collect();

        let slice = self.query_buffer.slice(..);

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| tx.send(result).unwrap());
        device.poll(wgpu::Maintain::Wait);
        rx.receive().await.unwrap().unwrap();

        let mut durations = HashMap::new();
        {
            let view = slice.get_mapped_range();
            let data_raw: &[u8] = view.deref();
            let timestamps: &[u64] = bytemuck::cast_slice(data_raw);
            for (label, index) in labels {
                let diff_ticks =
                    timestamps[(index * 2 + 1) as usize] - timestamps[(index * 2) as usize];
                let diff_time =
                    std::time::Duration::from_nanos((diff_ticks as f32 * period) as u64);
                durations.insert(label, diff_time);
            }
        }
        self.query_buffer.unmap();
        durations
    }
}

/// Copies `values` into `buffer` through a staging buffer.
pub fn upload_to_buffer<T: bytemuck::Pod>(
    buffer: &wgpu::Buffer,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    values: &[T],
) {
    let staging_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("staging buffer"),
        contents: bytemuck::cast_slice(values),
        usage: wgpu::BufferUsages::COPY_SRC,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("upload encoder"),
    });
    encoder.copy_buffer_to_buffer(&staging_buffer, 0, buffer, 0, staging_buffer.size());
    queue.submit([encoder.finish()]);

    device.poll(wgpu::Maintain::Wait);
    staging_buffer.destroy();
}

/// Reads a whole buffer back to the cpu. Stalls the device, only meant for
/// tests and debugging.
pub async fn download_buffer<T: bytemuck::Pod>(
    buffer: &wgpu::Buffer,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> Vec<T> {
    let download_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("download buffer"),
        size: buffer.size(),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("download encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &download_buffer, 0, buffer.size());
    queue.submit([encoder.finish()]);

    let buffer_slice = download_buffer.slice(..);
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| tx.send(result).unwrap());
    device.poll(wgpu::Maintain::Wait);
    rx.receive().await.unwrap().unwrap();

    let data = buffer_slice.get_mapped_range();
    let values = bytemuck::cast_slice(data.deref()).to_vec();
    drop(data);
    download_buffer.unmap();

    values
}
