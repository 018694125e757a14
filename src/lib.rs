// kdeshift: grid-accelerated mean-shift clustering of 2-D points
//
// Each point climbs a Gaussian kernel density estimate to its mode; points
// that reach the same mode form one cluster.
//
//   density  — rasterize the KDE (CPU exact/binned, or GPU)
//   tracker  — lock-step mean-shift gradient ascent
//   merge    — fuse converged positions into a partition
//   context  — leased thread pool / headless GPU device
//   engine   — the `MeanShift` front door

pub mod points;
pub mod grid;
pub mod convolution;
pub mod gradient;
pub mod density;
pub mod tracker;
pub mod merge;
pub mod context;
pub mod gpu;
pub mod engine;
pub mod config;
pub mod progress;
pub mod diagnostics;
pub mod error;

pub use config::{load_config, FieldKind, MeanShiftConfig};
pub use context::{Backend, ComputeContext, ContextConfig, ContextLease};
pub use density::{DensityField, DensityMethod, DensityRasterizer, DensitySurface, ExactKde};
pub use engine::{ClusterResult, MeanShift};
pub use error::{Error, Result};
pub use merge::{Cluster, ModeMerger};
pub use points::{BoundingBox, Point2};
pub use progress::{Progress, Stage};
pub use tracker::{GradientAscentTracker, TrackStatus};
