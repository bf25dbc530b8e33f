//! CPU emulation of an accelerator device
//!
//! `HostDevice` implements [`Device`] on host memory with the semantics of a GPU
//! queue: dispatches are recorded, then executed in submission order when the
//! caller synchronizes. Each dispatch runs the kernel bodies from
//! [`kernels`](super::kernels) over its grid, one output row per task, with rows
//! spread over the rayon pool when the `parallel` feature is enabled.
//!
//! The device checks what a real driver would reject (binding count, aliased
//! bindings, oversized workgroups, undersized buffers) and reports it as
//! [`Gf2Error::DeviceExecutionFailure`]. [`HostDeviceConfig`] can cap memory and
//! make individual kernels fail to compile, which exercises the engine's error
//! paths without hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::device::{
    Device, GridShape, GroupShape, KernelId, KernelParams, MAX_GROUP_INVOCATIONS, TILE,
    WORD_BYTES,
};
use super::kernels;
use crate::config::SUPPORTED_M4R_CHUNK_BITS;
use crate::matrix::words_for;
use crate::{Gf2Error, Result};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

type Storage = Arc<RwLock<Vec<u64>>>;

/// Configuration for a [`HostDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeviceConfig {
    /// Total bytes that may be live at once (`None` = unlimited)
    pub memory_limit_bytes: Option<usize>,
    /// Kernels whose compilation fails
    pub disabled_kernels: Vec<KernelId>,
    /// Execute rows on the rayon pool (ignored without the `parallel` feature)
    pub parallel: bool,
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: None,
            disabled_kernels: Vec::new(),
            parallel: true,
        }
    }
}

impl HostDeviceConfig {
    /// Cap live allocations at `bytes`
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    /// Make `kernel` fail to compile
    #[must_use]
    pub fn with_disabled_kernel(mut self, kernel: KernelId) -> Self {
        if !self.disabled_kernels.contains(&kernel) {
            self.disabled_kernels.push(kernel);
        }
        self
    }

    /// Enable or disable parallel row execution
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Host buffer: word storage shared with queued dispatches
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    bytes: usize,
    storage: Storage,
}

impl HostBuffer {
    /// Size in bytes as allocated
    pub fn len_bytes(&self) -> usize {
        self.bytes
    }
}

/// Host "pipeline": the kernel to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPipeline {
    kernel: KernelId,
}

impl HostPipeline {
    /// Kernel this pipeline runs
    pub fn kernel(&self) -> KernelId {
        self.kernel
    }
}

struct PendingDispatch {
    kernel: KernelId,
    params: KernelParams,
    inputs: Vec<Storage>,
    output: Storage,
    grid: GridShape,
    group: GroupShape,
}

#[derive(Debug, Default)]
struct Accounting {
    live_buffers: usize,
    allocated_bytes: usize,
}

/// CPU-backed [`Device`]
pub struct HostDevice {
    config: HostDeviceConfig,
    next_id: AtomicU64,
    accounting: Mutex<Accounting>,
    queue: Mutex<Vec<PendingDispatch>>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_failure() -> Gf2Error {
    Gf2Error::DeviceExecutionFailure("host device lock poisoned".to_string())
}

fn execution_failure(kernel: KernelId, message: impl AsRef<str>) -> Gf2Error {
    Gf2Error::DeviceExecutionFailure(format!("{kernel}: {}", message.as_ref()))
}

impl HostDevice {
    /// Device with default configuration
    pub fn new() -> Self {
        Self::with_config(HostDeviceConfig::default())
    }

    /// Device with the given configuration
    pub fn with_config(config: HostDeviceConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
            accounting: Mutex::new(Accounting::default()),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &HostDeviceConfig {
        &self.config
    }

    /// Buffers allocated and not yet released
    pub fn live_buffers(&self) -> usize {
        self.accounting.lock().map_or(0, |a| a.live_buffers)
    }

    /// Bytes allocated and not yet released
    pub fn allocated_bytes(&self) -> usize {
        self.accounting.lock().map_or(0, |a| a.allocated_bytes)
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut accounting = self.accounting.lock().map_err(|_| lock_failure())?;
        if let Some(limit) = self.config.memory_limit_bytes {
            let total = accounting.allocated_bytes.checked_add(bytes);
            if total.map_or(true, |total| total > limit) {
                return Err(Gf2Error::AllocationFailure {
                    requested: bytes,
                    reason: format!(
                        "{} of {} bytes already in use",
                        accounting.allocated_bytes, limit
                    ),
                });
            }
        }
        accounting.live_buffers += 1;
        accounting.allocated_bytes += bytes;
        Ok(())
    }

    fn make_buffer(&self, bytes: usize, words: Vec<u64>) -> HostBuffer {
        HostBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            bytes,
            storage: Arc::new(RwLock::new(words)),
        }
    }

    fn read_params(kernel: KernelId, buffer: &HostBuffer) -> Result<KernelParams> {
        let size = std::mem::size_of::<KernelParams>();
        let words = buffer.storage.read().map_err(|_| lock_failure())?;
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        if buffer.bytes < size || bytes.len() < size {
            return Err(execution_failure(
                kernel,
                format!("parameter buffer holds {} bytes, need {size}", buffer.bytes),
            ));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    fn validate_dispatch(
        kernel: KernelId,
        buffers: &[&HostBuffer],
        group: GroupShape,
    ) -> Result<()> {
        if buffers.len() != kernel.binding_count() {
            return Err(execution_failure(
                kernel,
                format!(
                    "expected {} bindings, got {}",
                    kernel.binding_count(),
                    buffers.len()
                ),
            ));
        }
        for (i, first) in buffers.iter().enumerate() {
            if buffers[i + 1..].iter().any(|other| other.id == first.id) {
                return Err(execution_failure(kernel, "buffer bound more than once"));
            }
        }

        let invocations = group.invocations();
        if invocations == 0 || invocations > u64::from(MAX_GROUP_INVOCATIONS) {
            return Err(execution_failure(
                kernel,
                format!(
                    "workgroup of {invocations} invocations outside 1..={MAX_GROUP_INVOCATIONS}"
                ),
            ));
        }
        if kernel == KernelId::Tiled && group != GroupShape::TILE {
            return Err(execution_failure(
                kernel,
                format!("tiled kernel requires a {TILE}x{TILE} workgroup"),
            ));
        }
        Ok(())
    }

    fn validate_sizes(kernel: KernelId, params: &KernelParams, buffers: &[&HostBuffer]) -> Result<()> {
        let is_m4r = matches!(kernel, KernelId::M4rBuild | KernelId::M4rMultiply);
        if is_m4r && !SUPPORTED_M4R_CHUNK_BITS.contains(&params.chunk_bits) {
            return Err(execution_failure(
                kernel,
                format!("invalid chunk width {}", params.chunk_bits),
            ));
        }

        let wpr_a = words_for(params.a_cols as usize);
        let wpr_r = words_for(params.b_cols as usize);
        let wpr_b = match kernel {
            KernelId::Transposed | KernelId::Vectorized => wpr_a,
            _ => wpr_r,
        };
        let consistent = params.words_per_row_a as usize == wpr_a
            && params.words_per_row_result as usize == wpr_r
            && params.words_per_row_b as usize == wpr_b
            && (!is_m4r
                || params.num_tables as usize == wpr_a * (64 / params.chunk_bits as usize));
        if !consistent {
            return Err(execution_failure(
                kernel,
                format!("inconsistent kernel parameters {params:?}"),
            ));
        }

        for (binding, (buffer, needed)) in buffers
            .iter()
            .zip(params.required_words(kernel))
            .enumerate()
        {
            if buffer.bytes < needed * WORD_BYTES {
                return Err(execution_failure(
                    kernel,
                    format!(
                        "binding {binding} holds {} bytes, kernel addresses {}",
                        buffer.bytes,
                        needed * WORD_BYTES
                    ),
                ));
            }
        }
        Ok(())
    }

    fn execute(&self, dispatch: PendingDispatch) -> Result<()> {
        let PendingDispatch {
            kernel,
            params,
            inputs,
            output,
            grid,
            group,
        } = dispatch;

        let guards = inputs
            .iter()
            .map(|storage| storage.read().map_err(|_| lock_failure()))
            .collect::<Result<Vec<_>>>()?;
        let mut out = output.write().map_err(|_| lock_failure())?;

        // Invocations launched per axis, rounded up to whole workgroups.
        let (groups_x, groups_y, _) = grid.workgroups(group);
        let launched_x = groups_x as usize * group.x as usize;
        let launched_y = groups_y as usize * group.y as usize;

        let p = &params;
        match kernel {
            KernelId::Tiled => {
                let (a, b) = (guards[0].as_slice(), guards[1].as_slice());
                let stride = p.words_per_row_result as usize;
                let block = TILE as usize * stride;
                let rows = (p.a_rows as usize).min(launched_x);
                let tiled_len = (rows * stride).min(out.len());
                self.for_each_chunk(&mut out[..tiled_len], block, |gx, rows_out| {
                    for gy in 0..groups_y as usize {
                        kernels::tiled_workgroup(a, b, p, gx, gy, rows_out);
                    }
                });
            }
            KernelId::M4rBuild => {
                let b = guards[0].as_slice();
                let stride = p.words_per_row_b as usize;
                let entries = (p.num_tables as usize * p.table_rows()).min(launched_x);
                let words = stride.min(launched_y);
                let len = (entries * stride).min(out.len());
                self.for_each_chunk(&mut out[..len], stride, |entry, row_out| {
                    for (w, slot) in row_out.iter_mut().enumerate().take(words) {
                        *slot = kernels::m4r_build_word(b, p, entry, w);
                    }
                });
            }
            _ => {
                let (a, second) = (guards[0].as_slice(), guards[1].as_slice());
                let stride = p.words_per_row_result as usize;
                let rows = (p.a_rows as usize).min(launched_x);
                let words = stride.min(launched_y);
                let len = (rows * stride).min(out.len());
                let body: fn(&[u64], &[u64], &KernelParams, usize, usize) -> u64 = match kernel {
                    KernelId::Naive => kernels::naive_word,
                    KernelId::Transposed => kernels::transposed_word,
                    KernelId::Vectorized => kernels::vectorized_word,
                    _ => kernels::m4r_multiply_word,
                };
                self.for_each_chunk(&mut out[..len], stride, |row, row_out| {
                    for (w, slot) in row_out.iter_mut().enumerate().take(words) {
                        *slot = body(a, second, p, row, w);
                    }
                });
            }
        }
        Ok(())
    }

    fn for_each_chunk<F>(&self, out: &mut [u64], chunk: usize, f: F)
    where
        F: Fn(usize, &mut [u64]) + Send + Sync,
    {
        if chunk == 0 || out.is_empty() {
            return;
        }

        #[cfg(feature = "parallel")]
        if self.config.parallel {
            out.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, rows)| f(i, rows));
            return;
        }

        out.chunks_mut(chunk)
            .enumerate()
            .for_each(|(i, rows)| f(i, rows));
    }
}

impl Device for HostDevice {
    type Buffer = HostBuffer;
    type Pipeline = HostPipeline;

    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&self, bytes: usize) -> Result<HostBuffer> {
        self.reserve(bytes)?;
        Ok(self.make_buffer(bytes, vec![0; bytes.div_ceil(WORD_BYTES)]))
    }

    fn allocate_from_data(&self, data: &[u8]) -> Result<HostBuffer> {
        self.reserve(data.len())?;
        let mut words = vec![0u64; data.len().div_ceil(WORD_BYTES)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..data.len()].copy_from_slice(data);
        Ok(self.make_buffer(data.len(), words))
    }

    fn compile(&self, kernel: KernelId) -> Result<HostPipeline> {
        if self.config.disabled_kernels.contains(&kernel) {
            return Err(Gf2Error::unavailable(
                kernel.name(),
                "kernel disabled in host device configuration",
            ));
        }
        Ok(HostPipeline { kernel })
    }

    fn dispatch(
        &self,
        pipeline: &HostPipeline,
        buffers: &[&HostBuffer],
        grid: GridShape,
        group: GroupShape,
    ) -> Result<()> {
        let kernel = pipeline.kernel;
        Self::validate_dispatch(kernel, buffers, group)?;

        let (params_buffer, bound) = buffers
            .split_last()
            .ok_or_else(|| execution_failure(kernel, "no parameter buffer bound"))?;
        let params = Self::read_params(kernel, params_buffer)?;
        Self::validate_sizes(kernel, &params, bound)?;

        let out_index = kernel.output_binding();
        let inputs = bound
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != out_index)
            .map(|(_, buffer)| Arc::clone(&buffer.storage))
            .collect();

        let mut queue = self.queue.lock().map_err(|_| lock_failure())?;
        queue.push(PendingDispatch {
            kernel,
            params,
            inputs,
            output: Arc::clone(&bound[out_index].storage),
            grid,
            group,
        });
        Ok(())
    }

    fn synchronize_and_wait(&self) -> Result<()> {
        let pending = {
            let mut queue = self.queue.lock().map_err(|_| lock_failure())?;
            std::mem::take(&mut *queue)
        };
        for dispatch in pending {
            self.execute(dispatch)?;
        }
        Ok(())
    }

    fn read(&self, buffer: &HostBuffer, out: &mut [u8]) -> Result<()> {
        if out.len() > buffer.bytes {
            return Err(Gf2Error::DeviceExecutionFailure(format!(
                "read of {} bytes from a {}-byte buffer",
                out.len(),
                buffer.bytes
            )));
        }
        let words = buffer.storage.read().map_err(|_| lock_failure())?;
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        out.copy_from_slice(&bytes[..out.len()]);
        Ok(())
    }

    fn release(&self, buffer: HostBuffer) {
        if let Ok(mut accounting) = self.accounting.lock() {
            accounting.live_buffers = accounting.live_buffers.saturating_sub(1);
            accounting.allocated_bytes = accounting.allocated_bytes.saturating_sub(buffer.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::accel::KernelVariant;

    fn upload(device: &HostDevice, words: &[u64]) -> HostBuffer {
        device.allocate_from_data(bytemuck::cast_slice(words)).unwrap()
    }

    fn read_words(device: &HostDevice, buffer: &HostBuffer, len: usize) -> Vec<u64> {
        let mut words = vec![0u64; len];
        device
            .read(buffer, bytemuck::cast_slice_mut(&mut words))
            .unwrap();
        words
    }

    #[test]
    fn test_allocate_and_release_accounting() {
        let device = HostDevice::new();
        let a = device.allocate(24).unwrap();
        let b = device.allocate_from_data(&[1, 2, 3]).unwrap();
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.allocated_bytes(), 27);
        device.release(a);
        device.release(b);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_memory_limit() {
        let device = HostDevice::with_config(HostDeviceConfig::default().with_memory_limit(64));
        let a = device.allocate(48).unwrap();
        let err = device.allocate(32).unwrap_err();
        assert!(matches!(err, Gf2Error::AllocationFailure { requested: 32, .. }));
        device.release(a);
        let b = device.allocate(64).unwrap();
        device.release(b);
    }

    #[test]
    fn test_memory_limit_rejects_overflowing_request() {
        let device = HostDevice::with_config(HostDeviceConfig::default().with_memory_limit(1024));
        let a = device.allocate(64).unwrap();
        let err = device.allocate(usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            Gf2Error::AllocationFailure {
                requested: usize::MAX,
                ..
            }
        ));
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.allocated_bytes(), 64);
        device.release(a);
    }

    #[test]
    fn test_disabled_kernel_fails_to_compile() {
        let device = HostDevice::with_config(
            HostDeviceConfig::default().with_disabled_kernel(KernelId::Tiled),
        );
        assert!(device.compile(KernelId::Naive).is_ok());
        let err = device.compile(KernelId::Tiled).unwrap_err();
        assert!(matches!(err, Gf2Error::BackendUnavailable { .. }));
    }

    #[test]
    fn test_read_round_trip() {
        let device = HostDevice::new();
        let buffer = upload(&device, &[7, u64::MAX]);
        assert_eq!(read_words(&device, &buffer, 2), vec![7, u64::MAX]);
        let mut too_long = vec![0u8; 17];
        assert!(device.read(&buffer, &mut too_long).is_err());
        device.release(buffer);
    }

    #[test]
    fn test_dispatch_runs_only_after_synchronize() {
        // [[1,0,1],[0,1,1]] × [[1,0],[0,1],[1,1]] = [[0,1],[1,0]]
        let device = HostDevice::new();
        let params = KernelParams::for_variant(KernelVariant::Naive, 2, 3, 2, 8).unwrap();
        let a = upload(&device, &[0b101, 0b110]);
        let b = upload(&device, &[0b01, 0b10, 0b11]);
        let c = device.allocate(16).unwrap();
        let p = device.allocate_from_data(bytemuck::bytes_of(&params)).unwrap();
        let pipeline = device.compile(KernelId::Naive).unwrap();

        device
            .dispatch(&pipeline, &[&a, &b, &c, &p], params.grid(KernelId::Naive), GroupShape::TILE)
            .unwrap();
        assert_eq!(read_words(&device, &c, 2), vec![0, 0]);

        device.synchronize_and_wait().unwrap();
        assert_eq!(read_words(&device, &c, 2), vec![0b10, 0b01]);

        for buffer in [a, b, c, p] {
            device.release(buffer);
        }
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_dispatch_validation() {
        let device = HostDevice::new();
        let params = KernelParams::for_variant(KernelVariant::Tiled, 2, 3, 2, 8).unwrap();
        let a = upload(&device, &[0b101, 0b110]);
        let b = upload(&device, &[0b01, 0b10, 0b11]);
        let c = device.allocate(8).unwrap();
        let p = device.allocate_from_data(bytemuck::bytes_of(&params)).unwrap();
        let pipeline = device.compile(KernelId::Tiled).unwrap();
        let grid = params.grid(KernelId::Tiled);

        let wrong_count = device.dispatch(&pipeline, &[&a, &b, &p], grid, GroupShape::TILE);
        assert!(matches!(wrong_count, Err(Gf2Error::DeviceExecutionFailure(_))));

        let aliased = device.dispatch(&pipeline, &[&a, &a, &c, &p], grid, GroupShape::TILE);
        assert!(matches!(aliased, Err(Gf2Error::DeviceExecutionFailure(_))));

        let wide = GroupShape { x: 32, y: 16, z: 1 };
        let too_wide = device.dispatch(&pipeline, &[&a, &b, &c, &p], grid, wide);
        assert!(matches!(too_wide, Err(Gf2Error::DeviceExecutionFailure(_))));

        let narrow = GroupShape { x: 8, y: 8, z: 1 };
        let not_tile = device.dispatch(&pipeline, &[&a, &b, &c, &p], grid, narrow);
        assert!(matches!(not_tile, Err(Gf2Error::DeviceExecutionFailure(_))));

        // c holds one word, the kernel writes two
        let small = device.dispatch(&pipeline, &[&a, &b, &c, &p], grid, GroupShape::TILE);
        assert!(matches!(small, Err(Gf2Error::DeviceExecutionFailure(_))));

        for buffer in [a, b, c, p] {
            device.release(buffer);
        }
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let params = KernelParams::for_variant(KernelVariant::Tiled, 40, 130, 1100, 8).unwrap();
        let a_words: Vec<u64> = (0..40 * 3).map(|i| (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
        let b_words: Vec<u64> = (0..130 * 18).map(|i| (i as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)).collect();

        let run = |parallel: bool| {
            let device = HostDevice::with_config(HostDeviceConfig::default().with_parallel(parallel));
            let a = upload(&device, &a_words);
            let b = upload(&device, &b_words);
            let c = device.allocate(40 * 18 * WORD_BYTES).unwrap();
            let p = device.allocate_from_data(bytemuck::bytes_of(&params)).unwrap();
            let pipeline = device.compile(KernelId::Tiled).unwrap();
            device
                .dispatch(&pipeline, &[&a, &b, &c, &p], params.grid(KernelId::Tiled), GroupShape::TILE)
                .unwrap();
            device.synchronize_and_wait().unwrap();
            read_words(&device, &c, 40 * 18)
        };

        assert_eq!(run(true), run(false));
    }
}
