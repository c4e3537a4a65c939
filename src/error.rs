use thiserror::Error;

/// Failures the core reports upward. Construction errors are fatal: no
/// partially initialized renderer or sorter is ever returned.
#[derive(Error, Debug)]
pub enum SplatSortError {
    #[error("{what} requires {required} bytes but the device limit is {limit}")]
    BufferCapacity {
        what: &'static str,
        required: u64,
        limit: u64,
    },

    #[error("point cloud has {num_points} points but the renderer was built for {capacity}")]
    CapacityMismatch { num_points: u32, capacity: u32 },

    #[error("spherical harmonics degree {0} is not supported (max is 3)")]
    UnsupportedShDeg(u32),

    /// The device was lost. All buffers and pipelines of this crate are
    /// invalid and must be rebuilt from scratch on a new device.
    #[error("wgpu device lost: {0}")]
    DeviceLost(String),

    #[error("a measurement for label {0:?} was already started")]
    MeasureStarted(String),

    #[error("no measurement was started for label {0:?}")]
    MeasureMissing(String),

    #[error("timestamp query capacity ({0}) reached")]
    MeasureCapacity(u32),
}
