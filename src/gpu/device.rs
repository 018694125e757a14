// gpu/device.rs — Headless wgpu device for density rasterization.
//
// Responsibilities:
//   - Open a wgpu instance with no surface attached and pick an adapter.
//   - Expose a `DeviceProfile` that caps limits for small targets, so
//     oversized dispatches fail on the development machine first.
//   - Provide `WorkgroupSize`, validated against the active profile and
//     baked into the density shader when the pipeline is built.
//
// HEADLESS:
// No window, no surface, no swapchain. The device exists only to run the
// density compute shader and copy the result back, which is why the
// context can be created from tests, the demo binary, or a server process
// without a display.
//
// ADAPTER SELECTION:
// Adapters are enumerated explicitly across the primary backends (Vulkan,
// Metal, DX12) and tiered:
//   1. DiscreteGpu / IntegratedGpu   real hardware
//   2. VirtualGpu / Other            VM pass-through, translation layers
//   3. Cpu                           software rasterizer, last resort
// The software tier still produces correct results; it is just no faster
// than the CPU path.
//
// DEVICE LIMITS:
// Under `Constrained` we request *lower* limits than the adapter reports.
// wgpu validates every dispatch and buffer binding against the requested
// limits, so a point set that would not fit on a small GPU is rejected on
// any machine.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` — runs an async fn to completion on the current
//   thread. The wgpu adapter/device API is async for WebGPU's sake; natively
//   we just block.
// - `#[error(transparent)]` on a thiserror variant forwards Display and
//   `source()` to the wrapped error.

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Hardware profile controlling device limits and default workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    /// The adapter's default limits.
    #[default]
    Native,
    /// Embedded-class limits: 256 invocations per workgroup, 128 MiB storage
    /// bindings.
    Constrained,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::Constrained => write!(f, "Constrained (capped limits)"),
        }
    }
}

/// A 2-D workgroup size for compute dispatches over grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Validated default for the given profile.
    ///
    /// - `Native`: 16×8 = 128 invocations, a whole number of warps or
    ///   wavefronts on desktop GPUs, 16 cells wide along a grid row.
    /// - `Constrained`: 8×8 = 64, well inside the 256 limit.
    pub fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::Constrained => WorkgroupSize { x: 8, y: 8 },
        }
    }

    /// Workgroups needed to cover a `width × height` grid (ceiling division).
    ///
    /// The shader must guard against out-of-range global IDs:
    /// ```wgsl
    /// if gid.x >= params.width || gid.y >= params.height { return; }
    /// ```
    pub fn dispatch_for(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.x), height.div_ceil(self.y))
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Adapter, device, queue, and active profile.
///
/// Expensive to create (instance + device initialization); the compute
/// context creates one and keeps it for its whole lifetime.
///
/// # Field drop order
/// Struct fields drop in declaration order. `_instance` is declared last so
/// the `wgpu::Instance` outlives `device` and `queue`; some drivers crash if
/// the instance goes first.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    /// Fixed at creation; kernels bake it into their shader source.
    workgroup_size: WorkgroupSize,
    /// Controls drop order only.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a headless device with `DeviceProfile::Native` limits.
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    /// Create a headless device with an explicit hardware profile.
    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        for a in &adapters {
            let info = a.get_info();
            info!("gpu adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }

        adapters.sort_by_key(|a| adapter_tier(a.get_info().device_type));
        let adapter = adapters.into_iter().next().ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        if raw_info.device_type == wgpu::DeviceType::Cpu {
            warn!("only a software adapter is available ({}); GPU rasterization will be slow", raw_info.name);
        }
        let adapter_info = AdapterInfo {
            name: raw_info.name,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // wgpu 22: request_device returns (Device, Queue) directly; the tuple
        // type must be spelled out to help inference.
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("kdeshift"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        let gpu = GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::for_profile(profile),
            _instance: instance,
        };
        info!("{gpu}");
        Ok(gpu)
    }

    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup_size
    }

    /// `(dispatch_x, dispatch_y)` workgroups covering a `width × height` grid.
    pub fn dispatch_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.workgroup_size.dispatch_for(width, height)
    }

    /// Largest storage buffer the device will bind, in bytes.
    pub fn max_storage_binding(&self) -> u64 {
        self.device.limits().max_storage_buffer_binding_size as u64
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Limits helpers
// ============================================================

fn adapter_tier(ty: wgpu::DeviceType) -> u8 {
    match ty {
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu => 0,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 2,
    }
}

fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),
        DeviceProfile::Constrained => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialization and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// No adapter on any primary backend.
    #[error("no GPU adapter found on any primary backend (Vulkan, Metal, DX12)")]
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits, ...).
    #[error("device request failed: {0}")]
    DeviceRequest(#[source] wgpu::RequestDeviceError),
    /// A buffer would exceed the device's storage binding limit.
    #[error("{what} needs {bytes} bytes, device limit is {limit}")]
    BufferTooLarge { what: &'static str, bytes: u64, limit: u64 },
    /// Mapping the readback buffer failed.
    #[error("readback failed: {0}")]
    Readback(String),
}

// ============================================================
// Tests
// ============================================================
