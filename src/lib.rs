//! Gpu-resident sorting and preprocessing core for 3d gaussian splatting.
//!
//! Every frame the [GaussianRenderer] records, into a single command stream:
//! a reset of the sort state, the preprocess pass that projects all splats
//! and emits depth keys, the multi-pass radix sort and an indirect draw that
//! consumes the sorted index buffer. Element counts and dispatch sizes live
//! in gpu buffers only, the host never reads them back.
//!
//! On device loss ([SplatSortError::DeviceLost]) every object of this crate
//! is invalid and has to be reconstructed on a fresh device.

mod camera;
pub use camera::{Camera, PerspectiveCamera, PerspectiveProjection, SimpleCamera};

mod error;
pub use error::SplatSortError;

pub mod gpu_sort;
pub use gpu_sort::GPUSorter;

mod pointcloud;
pub use pointcloud::{Gaussian, PointCloud, Splat2D};

mod preprocess;
pub use preprocess::{depth_to_key, PreprocessPipeline};

mod renderer;
pub use renderer::{GaussianRenderer, RenderStatistics, SplattingArgs};

mod uniform;
pub use uniform::UniformBuffer;

pub mod utils;
