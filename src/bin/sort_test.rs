// gpu smoke test for the radix sorter: sorts scrambled key/value pairs on
// the device and checks the result on the cpu. Needs a real adapter, so this
// lives in a binary instead of the unit tests.

use rand::prelude::*;

use splat_sort::gpu_sort::GPUSorter;
use splat_sort::utils::{download_buffer, upload_to_buffer};

#[pollster::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = wgpu::util::initialize_adapter_from_env_or_default(&instance, None)
        .await
        .ok_or_else(|| anyhow::anyhow!("no compatible gpu adapter found"))?;
    log::info!("using {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .await?;

    let n: usize = 1 << 16;
    let mut keys: Vec<u32> = (0..n as u32).collect();
    keys.shuffle(&mut rand::thread_rng());
    let values: Vec<u32> = (0..n as u32).collect();

    let sorter = GPUSorter::new(&device);
    let sort_buffers = sorter.create_sort_buffers(&device, n)?;
    let bind_group = sorter.create_bind_group(&device, &sort_buffers);

    upload_to_buffer(sort_buffers.keys(), &device, &queue, keys.as_slice());
    upload_to_buffer(sort_buffers.indices(), &device, &queue, values.as_slice());

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("sort test encoder"),
    });
    sorter.record_sort(&bind_group, n, &mut encoder);
    let idx = queue.submit([encoder.finish()]);
    device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));

    let sorted_keys: Vec<u32> = download_buffer(sort_buffers.keys(), &device, &queue).await;
    let sorted_values: Vec<u32> = download_buffer(sort_buffers.indices(), &device, &queue).await;

    for i in 0..n {
        assert_eq!(
            sorted_keys[i], i as u32,
            "key at position {i} is out of order"
        );
        assert_eq!(
            keys[sorted_values[i] as usize], sorted_keys[i],
            "index at position {i} does not point at its key"
        );
    }

    println!("sorted {n} key/value pairs correctly");
    Ok(())
}
