// gpu/mod.rs — GPU acceleration layer.
//
// wgpu compute kernels that mirror CPU code in the parent crate. The CPU
// rasterizer (`density::DensityRasterizer` with `DensityMethod::Exact`)
// stays the reference; the GPU kernel is validated against it cell by cell.
//
// Split of work:
//
//   GPU: density + gradient at every grid cell (the O(cells · N) part)
//   CPU: tracking and merging, which sample the read-back surface
//
// The boundary is a single readback of the vec4 field per run.

pub mod device;
pub mod density;
