//! wgpu implementation of [`Device`] (Vulkan, Metal, DX12)
//!
//! Dispatches are submitted to the queue immediately; the queue executes them in
//! order and [`Device::synchronize_and_wait`] polls until it is idle. Validation and
//! out-of-memory errors are captured with error scopes and mapped to
//! [`Gf2Error`]: allocation → `AllocationFailure`, compile → `BackendUnavailable`,
//! dispatch/read → `DeviceExecutionFailure`. A device lost before or during a fence
//! fails that fence with `DeviceExecutionFailure`.

use std::sync::{Arc, Mutex};

use wgpu::util::DeviceExt;

use super::device::{Device, GridShape, GroupShape, KernelId};
use super::shaders;
use crate::{Gf2Error, Result};

const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::UNIFORM)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Round up to the 8-byte word size (and at least one word)
fn padded_size(bytes: usize) -> u64 {
    (bytes.max(1).div_ceil(8) * 8) as u64
}

/// Device buffer
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    bytes: usize,
}

/// Compiled compute pipeline
#[derive(Debug)]
pub struct WgpuPipeline {
    kernel: KernelId,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// GPU device manager
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    name: String,
    lost: Arc<Mutex<Option<String>>>,
}

/// Outcome of a completion fence given the device-lost slot
fn fence_status(lost: &Mutex<Option<String>>) -> Result<()> {
    let lost = lost
        .lock()
        .map_err(|_| Gf2Error::DeviceExecutionFailure("device-lost slot poisoned".to_string()))?;
    match lost.as_deref() {
        Some(reason) => Err(Gf2Error::DeviceExecutionFailure(format!(
            "device lost: {reason}"
        ))),
        None => Ok(()),
    }
}

impl WgpuDevice {
    /// Initialize the default high-performance adapter
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if no adapter or device can be obtained.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Gf2Error::unavailable("wgpu", "no GPU adapter found"))?;
        let name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gf2mm device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Gf2Error::unavailable("wgpu", format!("failed to create device: {e}")))?;

        let lost = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            if let Ok(mut slot) = slot.lock() {
                slot.get_or_insert(format!("{reason:?}: {message}"));
            }
        });

        Ok(Self {
            device,
            queue,
            name,
            lost,
        })
    }

    /// Check if a GPU adapter is available
    pub fn is_available() -> bool {
        pollster::block_on(async {
            wgpu::Instance::default()
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Run `f` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(validation))
    }

    fn wrap_buffer(&self, bytes: usize, scoped: (wgpu::Buffer, Option<wgpu::Error>)) -> Result<WgpuBuffer> {
        match scoped {
            (buffer, None) => Ok(WgpuBuffer { buffer, bytes }),
            (buffer, Some(err)) => {
                buffer.destroy();
                Err(Gf2Error::AllocationFailure {
                    requested: bytes,
                    reason: err.to_string(),
                })
            }
        }
    }
}

impl Device for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Pipeline = WgpuPipeline;

    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, bytes: usize) -> Result<WgpuBuffer> {
        let scoped = self.scoped(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("gf2mm buffer"),
                size: padded_size(bytes),
                usage: BUFFER_USAGE,
                mapped_at_creation: false,
            })
        });
        self.wrap_buffer(bytes, scoped)
    }

    fn allocate_from_data(&self, data: &[u8]) -> Result<WgpuBuffer> {
        let mut contents = data.to_vec();
        contents.resize(padded_size(data.len()) as usize, 0);
        let scoped = self.scoped(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("gf2mm upload"),
                    contents: &contents,
                    usage: BUFFER_USAGE,
                })
        });
        self.wrap_buffer(data.len(), scoped)
    }

    fn compile(&self, kernel: KernelId) -> Result<WgpuPipeline> {
        let (pipeline, error) = self.scoped(|| {
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(kernel.name()),
                    source: wgpu::ShaderSource::Wgsl(shaders::source(kernel).into()),
                });
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.name()),
                    layout: None,
                    module: &module,
                    entry_point: "main",
                    compilation_options: Default::default(),
                    cache: None,
                })
        });
        if let Some(err) = error {
            return Err(Gf2Error::unavailable(kernel.name(), err.to_string()));
        }
        let layout = pipeline.get_bind_group_layout(0);
        Ok(WgpuPipeline {
            kernel,
            pipeline,
            layout,
        })
    }

    fn dispatch(
        &self,
        pipeline: &WgpuPipeline,
        buffers: &[&WgpuBuffer],
        grid: GridShape,
        group: GroupShape,
    ) -> Result<()> {
        if group != GroupShape::TILE {
            return Err(Gf2Error::DeviceExecutionFailure(format!(
                "{}: shaders are compiled for 16x16 workgroups",
                pipeline.kernel
            )));
        }
        if buffers.len() != pipeline.kernel.binding_count() {
            return Err(Gf2Error::DeviceExecutionFailure(format!(
                "{}: expected {} bindings, got {}",
                pipeline.kernel,
                pipeline.kernel.binding_count(),
                buffers.len()
            )));
        }

        let ((), error) = self.scoped(|| {
            let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
                .iter()
                .enumerate()
                .map(|(binding, buffer)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: buffer.buffer.as_entire_binding(),
                })
                .collect();
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(pipeline.kernel.name()),
                layout: &pipeline.layout,
                entries: &entries,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(pipeline.kernel.name()),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pipeline.kernel.name()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                let (x, y, z) = grid.workgroups(group);
                pass.dispatch_workgroups(x, y, z);
            }
            self.queue.submit(Some(encoder.finish()));
        });

        match error {
            Some(err) => Err(Gf2Error::DeviceExecutionFailure(format!(
                "{}: {err}",
                pipeline.kernel
            ))),
            None => Ok(()),
        }
    }

    fn synchronize_and_wait(&self) -> Result<()> {
        fence_status(&self.lost)?;
        self.device.poll(wgpu::Maintain::Wait);
        fence_status(&self.lost)
    }

    fn read(&self, buffer: &WgpuBuffer, out: &mut [u8]) -> Result<()> {
        if out.len() > buffer.bytes {
            return Err(Gf2Error::DeviceExecutionFailure(format!(
                "read of {} bytes from a {}-byte buffer",
                out.len(),
                buffer.bytes
            )));
        }
        let size = padded_size(out.len());

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gf2mm staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gf2mm read-back"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver.receive())
            .ok_or_else(|| {
                Gf2Error::DeviceExecutionFailure("failed to receive mapping result".to_string())
            })?
            .map_err(|e| Gf2Error::DeviceExecutionFailure(format!("buffer mapping failed: {e:?}")))?;

        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(&data[..out.len()]);
        }
        staging.unmap();
        staging.destroy();
        Ok(())
    }

    fn release(&self, buffer: WgpuBuffer) {
        buffer.buffer.destroy();
    }
}
