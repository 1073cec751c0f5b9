//! WebGPU backend for applying transport maps.
//!
//! The stencil table is uploaded once per map. Each apply writes the source
//! density, dispatches one compute pass over all cells, waits for it, and
//! copies the result back.
//!
//! ## Device-resident stepping
//!
//! For multi-step runs the density can stay on the GPU between steps:
//!
//! ```text
//!  upload ──> state[0] ──step──> state[1] ──step──> state[0] ... ──> download
//! ```
//!
//! Each step is a dispatch that reads one state buffer and writes the other.
//! Only `upload` and `download` move data across the bus.

use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::{clamp_enabled, TransportBackend};
use crate::error::{Result, TransportError};
use crate::mapping::{TransportMap, NO_CLAMP};

/// Threads per workgroup; must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: u32 = 64;

/// WGSL source for stencil application.
const WGSL_APPLY_SHADER: &str = r#"
struct Params {
    cells: u32,
    taps: u32,
    saturate: u32,
    row_stride: u32,  // invocations per row of workgroups
}

struct StencilEntry {
    index: u32,
    weight: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> stencil: array<StencilEntry>;
@group(0) @binding(2) var<storage, read> clamp_taps: array<vec4<u32>>;
@group(0) @binding(3) var<storage, read> source: array<f32>;
@group(0) @binding(4) var<storage, read_write> destination: array<f32>;

@compute @workgroup_size(64)
fn apply_map(@builtin(global_invocation_id) gid: vec3u) {
    let cell = gid.y * params.row_stride + gid.x;
    if (cell >= params.cells) {
        return;
    }

    let base = cell * params.taps;
    var value = 0.0;
    for (var k = 0u; k < params.taps; k = k + 1u) {
        let e = stencil[base + k];
        value = value + source[e.index] * e.weight;
    }

    if (params.saturate != 0u) {
        let t = clamp_taps[cell];
        if (t.x != 0xffffffffu) {
            let a = source[t.x];
            let b = source[t.y];
            let c = source[t.z];
            let d = source[t.w];
            let lo = min(min(a, b), min(c, d));
            let hi = max(max(a, b), max(c, d));
            value = max(min(value, hi), lo);
        }
    }

    destination[cell] = value;
}
"#;

/// Stencil entry as laid out on the device.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct GpuStencilEntry {
    /// Flattened source cell index.
    pub index: u32,
    /// Interpolation weight, narrowed to `f32`.
    pub weight: f32,
}

/// Uniform parameters (must match the WGSL `Params` layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ApplyParams {
    cells: u32,
    taps: u32,
    saturate: u32,
    row_stride: u32,
}

/// Device and queue shared by GPU backends.
///
/// Pass one context to several backends to share a device, or create
/// separate contexts to isolate them.
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: Option<wgpu::AdapterInfo>,
}

impl WgpuContext {
    /// Select a high-performance adapter and create a device on it.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                TransportError::BackendUnavailable("No WebGPU adapter found".to_string())
            })?;

        let info = adapter.get_info();
        tracing::info!("Transport GPU backend: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Phasemap Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| TransportError::backend(format!("Failed to create device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            info: Some(info),
        })
    }

    /// Blocking variant of [`new`](Self::new).
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    /// Wrap an existing device and queue.
    pub fn from_parts(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            info: None,
        }
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the command queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Adapter name, if this context selected the adapter itself.
    pub fn adapter_name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.name.as_str())
    }

    /// Block until all submitted work has finished.
    pub fn synchronize(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// Device buffers derived from one map.
struct DeviceState {
    state: [wgpu::Buffer; 2],
    staging: wgpu::Buffer,
    /// `bind_groups[i]` reads `state[i]` and writes `state[1 - i]`.
    bind_groups: [wgpu::BindGroup; 2],
    workgroups: (u32, u32),
    state_bytes: u64,
    /// Which state buffer holds the latest density.
    current: usize,
}

/// Applies transport maps with a WGSL compute shader.
///
/// The state and staging buffers are shared by every call, so each apply
/// holds the device lock from upload to readback. Concurrent callers are
/// serialized rather than interleaved.
pub struct WgpuBackend {
    ctx: Arc<WgpuContext>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    map: Arc<TransportMap>,
    saturate_requested: bool,
    saturate: bool,
    device_state: Mutex<DeviceState>,
}

impl WgpuBackend {
    /// Compile the kernel and upload `map` to the device.
    pub fn new(ctx: Arc<WgpuContext>, map: Arc<TransportMap>, saturate: bool) -> Result<Self> {
        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Transport Apply Shader"),
            source: wgpu::ShaderSource::Wgsl(WGSL_APPLY_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Transport Apply Bind Group Layout"),
            entries: &[
                layout_entry(0, wgpu::BufferBindingType::Uniform),
                layout_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Transport Apply Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Transport Apply Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "apply_map",
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(TransportError::backend(format!(
                "Failed to build apply kernel: {}",
                err
            )));
        }

        let saturate_active = clamp_enabled(map.order(), saturate);
        let device_state = upload_map(&ctx, &bind_group_layout, &map, saturate_active)?;

        Ok(Self {
            ctx,
            pipeline,
            bind_group_layout,
            map,
            saturate_requested: saturate,
            saturate: saturate_active,
            device_state: Mutex::new(device_state),
        })
    }

    /// Whether the saturation clamp is active.
    pub fn is_saturating(&self) -> bool {
        self.saturate
    }

    /// The shared device context.
    pub fn context(&self) -> &Arc<WgpuContext> {
        &self.ctx
    }

    /// Copy a host density into the resident state buffer.
    pub fn upload(&mut self, source: &[f32]) -> Result<()> {
        TransportError::check_len(self.map.cells(), source.len())?;
        let state = self.device_state.get_mut();
        self.ctx
            .queue()
            .write_buffer(&state.state[0], 0, bytemuck::cast_slice(source));
        state.current = 0;
        Ok(())
    }

    /// Advance the resident density by `steps` applications.
    ///
    /// All passes are recorded into one submission and run in order.
    pub fn step(&mut self, steps: u32) -> Result<()> {
        if steps == 0 {
            return Ok(());
        }

        let state = self.device_state.get_mut();
        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Transport Step Encoder"),
            });

        for _ in 0..steps {
            encode_pass(&self.pipeline, state, &mut encoder, state.current);
            state.current = 1 - state.current;
        }

        self.ctx.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Read the latest density back to the host.
    ///
    /// After an [`apply`](TransportBackend::apply) this is that call's result.
    pub fn download(&self) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.map.cells()];
        let state = self.device_state.lock();
        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Transport Download Encoder"),
            });
        encoder.copy_buffer_to_buffer(
            &state.state[state.current],
            0,
            &state.staging,
            0,
            state.state_bytes,
        );
        self.ctx.queue().submit(std::iter::once(encoder.finish()));
        read_staging(&self.ctx, &state, &mut out)?;
        Ok(out)
    }

    /// Upload `initial`, apply the map `steps` times on the device, and read back.
    pub fn run_resident(&mut self, initial: &[f32], steps: u32) -> Result<Vec<f32>> {
        self.upload(initial)?;
        self.step(steps)?;
        self.download()
    }
}

impl TransportBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn map(&self) -> &TransportMap {
        &self.map
    }

    fn set_map(&mut self, map: Arc<TransportMap>) -> Result<()> {
        let saturate = clamp_enabled(map.order(), self.saturate_requested);
        *self.device_state.get_mut() =
            upload_map(&self.ctx, &self.bind_group_layout, &map, saturate)?;
        self.saturate = saturate;
        self.map = map;
        Ok(())
    }

    /// One synchronous apply. The result also becomes the resident density.
    fn apply(&self, source: &[f32], destination: &mut [f32]) -> Result<()> {
        let cells = self.map.cells();
        TransportError::check_len(cells, source.len())?;
        TransportError::check_len(cells, destination.len())?;

        let mut state = self.device_state.lock();
        self.ctx
            .queue()
            .write_buffer(&state.state[0], 0, bytemuck::cast_slice(source));

        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Transport Apply Encoder"),
            });
        encode_pass(&self.pipeline, &state, &mut encoder, 0);
        encoder.copy_buffer_to_buffer(
            &state.state[1],
            0,
            &state.staging,
            0,
            state.state_bytes,
        );
        self.ctx.queue().submit(std::iter::once(encoder.finish()));
        state.current = 1;

        read_staging(&self.ctx, &state, destination)
    }
}

fn encode_pass(
    pipeline: &wgpu::ComputePipeline,
    state: &DeviceState,
    encoder: &mut wgpu::CommandEncoder,
    input: usize,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("Transport Apply Pass"),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, &state.bind_groups[input], &[]);
    let (x, y) = state.workgroups;
    pass.dispatch_workgroups(x, y, 1);
}

/// Map the staging buffer and copy it into `out`. Callers hold the device lock.
fn read_staging(ctx: &WgpuContext, state: &DeviceState, out: &mut [f32]) -> Result<()> {
    let buffer_slice = state.staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device().poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| TransportError::TransferFailed(format!("Map callback dropped: {}", e)))?
        .map_err(|e| TransportError::TransferFailed(format!("Map failed: {:?}", e)))?;

    {
        let data = buffer_slice.get_mapped_range();
        out.copy_from_slice(bytemuck::cast_slice(&data));
    }
    state.staging.unmap();
    Ok(())
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Workgroup grid covering `cells` invocations within the per-dimension limit.
fn workgroup_grid(cells: usize, max_per_dim: u32) -> (u32, u32) {
    let groups = (cells as u64).div_ceil(WORKGROUP_SIZE as u64);
    let x = groups.min(max_per_dim as u64).max(1);
    let y = groups.div_ceil(x).max(1);
    (x as u32, y as u32)
}

fn upload_map(
    ctx: &WgpuContext,
    layout: &wgpu::BindGroupLayout,
    map: &TransportMap,
    saturate: bool,
) -> Result<DeviceState> {
    let device = ctx.device();
    let limits = device.limits();

    let stencil: Vec<GpuStencilEntry> = map
        .entries()
        .iter()
        .map(|e| GpuStencilEntry {
            index: e.index,
            weight: e.weight as f32,
        })
        .collect();
    let stencil_bytes = std::mem::size_of_val(stencil.as_slice()) as u64;
    if stencil_bytes > limits.max_storage_buffer_binding_size as u64 {
        return Err(TransportError::backend(format!(
            "Stencil table of {} bytes exceeds the device binding limit of {} bytes",
            stencil_bytes, limits.max_storage_buffer_binding_size
        )));
    }

    let clamp_taps: &[[u32; 4]] = if map.clamp_taps().is_empty() {
        &[[NO_CLAMP; 4]]
    } else {
        map.clamp_taps()
    };

    let (wx, wy) = workgroup_grid(map.cells(), limits.max_compute_workgroups_per_dimension);
    let params = ApplyParams {
        cells: map.cells() as u32,
        taps: map.taps_per_cell() as u32,
        saturate: saturate as u32,
        row_stride: wx * WORKGROUP_SIZE,
    };

    let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Transport Params"),
        contents: bytemuck::bytes_of(&params),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let stencil_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Transport Stencil Table"),
        contents: bytemuck::cast_slice(&stencil),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let clamp_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Transport Clamp Taps"),
        contents: bytemuck::cast_slice(clamp_taps),
        usage: wgpu::BufferUsages::STORAGE,
    });

    let state_bytes = (map.cells() * std::mem::size_of::<f32>()) as u64;
    let state_usage =
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    let state_buffer = |label: &str| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: state_bytes,
            usage: state_usage,
            mapped_at_creation: false,
        })
    };
    let state = [state_buffer("Density A"), state_buffer("Density B")];

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Density Staging"),
        size: state_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group = |input: &wgpu::Buffer, output: &wgpu::Buffer, label: &str| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: stencil_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: clamp_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output.as_entire_binding(),
                },
            ],
        })
    };
    let bind_groups = [
        bind_group(&state[0], &state[1], "Transport A->B"),
        bind_group(&state[1], &state[0], "Transport B->A"),
    ];

    tracing::debug!(
        cells = map.cells(),
        stencil_bytes,
        workgroups_x = wx,
        workgroups_y = wy,
        "uploaded transport map"
    );

    Ok(DeviceState {
        state,
        staging,
        bind_groups,
        workgroups: (wx, wy),
        state_bytes,
        current: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_match_shader() {
        assert_eq!(std::mem::size_of::<GpuStencilEntry>(), 8);
        assert_eq!(std::mem::size_of::<ApplyParams>(), 16);
    }

    #[test]
    fn test_backend_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WgpuBackend>();
        assert_send_sync::<WgpuContext>();
    }

    #[test]
    fn test_workgroup_grid() {
        assert_eq!(workgroup_grid(1, 65535), (1, 1));
        assert_eq!(workgroup_grid(64, 65535), (1, 1));
        assert_eq!(workgroup_grid(65, 65535), (2, 1));
        // 2048 x 2048 cells need more than 65535 groups in one dimension.
        let (x, y) = workgroup_grid(2048 * 2048, 65535);
        assert_eq!(x, 65535);
        assert!(x as u64 * y as u64 * WORKGROUP_SIZE as u64 >= 2048 * 2048);
    }
}
