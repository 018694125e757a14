// context.rs — Compute resource context with scoped acquisition.
//
// A `ComputeContext` owns everything a clustering run executes on:
//
//   - a rayon thread pool (rasterization rows and tracker passes run here),
//   - for `Backend::Gpu`, a headless wgpu device plus the compiled density
//     pipeline.
//
// Creating it is the expensive part (thread spawn, adapter enumeration,
// shader compilation) and happens once. Each run then *leases* it:
//
//   let lease = ctx.acquire()?;      // fails with ContextBusy if leased
//   let surface = lease.rasterize(..)?;
//   lease.install(|| tracker.track(..));
//   drop(lease);                     // or lease.release()
//
// The lease is an RAII guard. Dropping it clears the in-use flag, so the
// context is released on every exit path, including `?` early returns and
// panics unwinding through the run. The flag is a single `AtomicBool`
// swapped with compare_exchange: the context is not re-entrant, and a
// second concurrent `acquire()` reports `ContextBusy` instead of blocking.
//
// NEW RUST CONCEPTS:
// - A guard type borrowing its owner (`ContextLease<'a>` holds
//   `&'a ComputeContext`) cannot outlive it; the borrow checker enforces
//   that a lease never dangles.
// - `ThreadPool::install` runs a closure inside a specific pool, so any
//   rayon parallel iterator it calls uses that pool's workers instead of the
//   global pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::density::{DensityRasterizer, DensitySurface};
use crate::error::{Error, Result};
use crate::gpu::density::GpuDensityRasterizer;
use crate::gpu::device::{DeviceProfile, GpuDevice};
use crate::points::Point2;

/// Where density rasterization runs. Tracking and merging are always on the
/// CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

/// How to build a `ComputeContext`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub backend: Backend,
    /// Worker threads in the context's pool; 0 lets rayon decide.
    pub threads: usize,
    /// Limits profile for the GPU device (ignored for `Backend::Cpu`).
    pub gpu_profile: DeviceProfile,
}

/// GPU half of the context. Fields drop top to bottom: the pipeline goes
/// before the device that created it.
struct GpuResources {
    rasterizer: GpuDensityRasterizer,
    device: GpuDevice,
}

/// Shared, non-re-entrant execution context.
pub struct ComputeContext {
    backend: Backend,
    pool: rayon::ThreadPool,
    gpu: Option<GpuResources>,
    in_use: AtomicBool,
    leases: AtomicU64,
}

impl ComputeContext {
    /// Build the thread pool and, for `Backend::Gpu`, the device and pipeline.
    ///
    /// Any failure is reported as `Error::ContextInit`; there is no silent
    /// fallback from GPU to CPU.
    pub fn create(config: &ContextConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("kdeshift-worker-{i}"))
            .build()
            .map_err(|e| Error::ContextInit(format!("thread pool: {e}")))?;

        let gpu = match config.backend {
            Backend::Cpu => None,
            Backend::Gpu => {
                let device = GpuDevice::new_with_profile(config.gpu_profile)
                    .map_err(|e| Error::ContextInit(format!("gpu: {e}")))?;
                let rasterizer = GpuDensityRasterizer::new(&device);
                Some(GpuResources { rasterizer, device })
            }
        };

        info!(
            "compute context ready: backend={:?}, {} worker threads",
            config.backend,
            pool.current_num_threads()
        );
        Ok(ComputeContext {
            backend: config.backend,
            pool,
            gpu,
            in_use: AtomicBool::new(false),
            leases: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The GPU device, for `Backend::Gpu` contexts.
    pub fn gpu_device(&self) -> Option<&GpuDevice> {
        self.gpu.as_ref().map(|g| &g.device)
    }

    /// Whether a lease is currently alive.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of leases granted so far.
    pub fn lease_count(&self) -> u64 {
        self.leases.load(Ordering::Relaxed)
    }

    /// Lease the context for one run.
    ///
    /// # Errors
    /// `Error::ContextBusy` if another lease is alive.
    pub fn acquire(&self) -> Result<ContextLease<'_>> {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ContextBusy)?;
        let n = self.leases.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("compute context acquired (lease #{n})");
        Ok(ContextLease { ctx: self })
    }
}

/// Exclusive access to a `ComputeContext` for the duration of one run.
pub struct ContextLease<'a> {
    ctx: &'a ComputeContext,
}

impl<'a> ContextLease<'a> {
    pub fn backend(&self) -> Backend {
        self.ctx.backend
    }

    /// Run `op` inside the context's thread pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.ctx.pool.install(op)
    }

    /// Rasterize on whichever backend the context was built for.
    pub fn rasterize(
        &self,
        rasterizer: &DensityRasterizer,
        points: &[Point2],
        sigma: f32,
    ) -> Result<DensitySurface> {
        match &self.ctx.gpu {
            Some(gpu) => {
                debug!("rasterizing on {}", gpu.device.adapter_info);
                Ok(gpu.rasterizer.build(&gpu.device, rasterizer, points, sigma)?)
            }
            None => Ok(self.install(|| rasterizer.build(points, sigma))),
        }
    }

    /// Release explicitly. Equivalent to dropping the lease.
    pub fn release(self) {}
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        self.ctx.in_use.store(false, Ordering::Release);
        trace!("compute context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_context(threads: usize) -> ComputeContext {
        ComputeContext::create(&ContextConfig { threads, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let ctx = cpu_context(2);
        let lease = ctx.acquire().unwrap();
        assert!(ctx.is_in_use());
        assert!(matches!(ctx.acquire(), Err(Error::ContextBusy)));
        lease.release();
        assert!(!ctx.is_in_use());
    }

    #[test]
    fn test_repeated_acquire_release() {
        let ctx = cpu_context(1);
        for _ in 0..100 {
            let lease = ctx.acquire().unwrap();
            drop(lease);
        }
        assert_eq!(ctx.lease_count(), 100);
        assert!(!ctx.is_in_use());
    }

    #[test]
    fn test_release_on_error_path() {
        fn failing_run(ctx: &ComputeContext) -> Result<()> {
            let _lease = ctx.acquire()?;
            Err(Error::InvalidConfig("boom".into()))
        }
        let ctx = cpu_context(1);
        assert!(failing_run(&ctx).is_err());
        assert!(!ctx.is_in_use());
        assert!(ctx.acquire().is_ok());
    }

    #[test]
    fn test_busy_across_threads() {
        let ctx = cpu_context(2);
        let lease = ctx.acquire().unwrap();
        std::thread::scope(|s| {
            let other = s.spawn(|| ctx.acquire().map(|_| ()));
            assert!(matches!(other.join().unwrap(), Err(Error::ContextBusy)));
        });
        drop(lease);
    }

    #[test]
    fn test_install_uses_context_pool() {
        let ctx = cpu_context(3);
        assert_eq!(ctx.threads(), 3);
        let lease = ctx.acquire().unwrap();
        let n = lease.install(rayon::current_num_threads);
        assert_eq!(n, 3);
    }

    #[test]
    fn test_cpu_rasterize_matches_direct_build() {
        let ctx = cpu_context(2);
        let pts = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.5)];
        let r = DensityRasterizer::new(32);
        let lease = ctx.acquire().unwrap();
        let via_ctx = lease.rasterize(&r, &pts, 0.5).unwrap();
        let direct = r.build(&pts, 0.5);
        assert_eq!(via_ctx.density(), direct.density());
        assert_eq!(lease.backend(), Backend::Cpu);
        assert!(ctx.gpu_device().is_none());
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg: ContextConfig = serde_json::from_str(r#"{"backend": "gpu"}"#).unwrap();
        assert_eq!(cfg.backend, Backend::Gpu);
        assert_eq!(cfg.threads, 0);
        assert_eq!(cfg.gpu_profile, DeviceProfile::Native);
    }
}
