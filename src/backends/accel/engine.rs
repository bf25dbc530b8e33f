//! Accelerator engine: uploads operands, dispatches a kernel variant, reads back
//!
//! The engine compiles every kernel once at construction. A kernel that fails to
//! compile is recorded (and logged once); the variants that need it are then
//! rejected with [`Gf2Error::BackendUnavailable`] while the rest stay usable.
//!
//! ```rust
//! use gf2mm::{AcceleratorEngine, BitMatrix, EngineConfig, HostDevice, KernelVariant};
//!
//! let engine = AcceleratorEngine::new(HostDevice::new(), EngineConfig::default()).unwrap();
//! let a = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
//! let b = BitMatrix::from_rows(&[[1, 0], [0, 1], [1, 1]]).unwrap();
//!
//! let c = engine.multiply(KernelVariant::M4r, &a, &b).unwrap();
//! assert_eq!(c, BitMatrix::from_rows(&[[0, 1], [1, 0]]).unwrap());
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::Mutex;

use tracing::{debug, instrument, trace, warn};

use super::device::{Device, GroupShape, KernelId, KernelParams, KernelVariant, WORD_BYTES};
use crate::{BitMatrix, EngineConfig, Gf2Error, Result};

/// Device buffer released when dropped
struct BufferGuard<'d, D: Device> {
    device: &'d D,
    buffer: ManuallyDrop<D::Buffer>,
}

impl<'d, D: Device> BufferGuard<'d, D> {
    fn allocate(device: &'d D, bytes: usize) -> Result<Self> {
        let buffer = device.allocate(bytes)?;
        Ok(Self {
            device,
            buffer: ManuallyDrop::new(buffer),
        })
    }

    fn upload(device: &'d D, data: &[u8]) -> Result<Self> {
        let buffer = device.allocate_from_data(data)?;
        Ok(Self {
            device,
            buffer: ManuallyDrop::new(buffer),
        })
    }

    fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }
}

impl<D: Device> Drop for BufferGuard<'_, D> {
    fn drop(&mut self) {
        // SAFETY: the buffer is taken exactly once, here, and never used again
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        self.device.release(buffer);
    }
}

/// Runs [`KernelVariant`]s on a [`Device`]
pub struct AcceleratorEngine<D: Device> {
    device: D,
    config: EngineConfig,
    pipelines: HashMap<KernelId, D::Pipeline>,
    unavailable: HashMap<KernelId, String>,
    submission: Mutex<()>,
}

impl<D: Device> AcceleratorEngine<D> {
    /// Compile every kernel on `device`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `config` is invalid. Kernel compile failures are
    /// not errors here; they make the affected variants unavailable.
    pub fn new(device: D, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut pipelines = HashMap::new();
        let mut unavailable = HashMap::new();
        for kernel in KernelId::ALL {
            match device.compile(kernel) {
                Ok(pipeline) => {
                    debug!(device = device.name(), kernel = kernel.name(), "compiled kernel");
                    pipelines.insert(kernel, pipeline);
                }
                Err(err) => {
                    warn!(
                        device = device.name(),
                        kernel = kernel.name(),
                        error = %err,
                        "kernel unavailable"
                    );
                    unavailable.insert(kernel, err.to_string());
                }
            }
        }

        Ok(Self {
            device,
            config,
            pipelines,
            unavailable,
            submission: Mutex::new(()),
        })
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Tear down the engine, returning the device
    pub fn into_device(self) -> D {
        self.device
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True if every kernel of `variant` compiled
    pub fn is_available(&self, variant: KernelVariant) -> bool {
        variant
            .kernels()
            .iter()
            .all(|kernel| self.pipelines.contains_key(kernel))
    }

    /// Variants that can run on this engine
    pub fn available_variants(&self) -> Vec<KernelVariant> {
        KernelVariant::ALL
            .into_iter()
            .filter(|variant| self.is_available(*variant))
            .collect()
    }

    fn pipeline(&self, variant: KernelVariant, kernel: KernelId) -> Result<&D::Pipeline> {
        self.pipelines.get(&kernel).ok_or_else(|| {
            let reason = self
                .unavailable
                .get(&kernel)
                .cloned()
                .unwrap_or_else(|| format!("kernel {kernel} not compiled"));
            Gf2Error::unavailable(variant.name(), reason)
        })
    }

    /// Multiply `a × b` with `variant` into a new matrix
    ///
    /// # Errors
    ///
    /// See [`AcceleratorEngine::multiply_into`].
    pub fn multiply(&self, variant: KernelVariant, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
        let mut out = BitMatrix::new(a.rows(), b.cols());
        self.multiply_into(variant, a, b, &mut out)?;
        Ok(out)
    }

    /// Multiply `a × b` with `variant`, overwriting `out`
    ///
    /// `out` must already have shape `(a.rows(), b.cols())`. It is written only after
    /// the device has finished, so on error it is left untouched. Every device
    /// buffer allocated by the call is released before it returns.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` if `a.cols() != b.rows()`
    /// - `InvalidInput` if `out` has the wrong shape or a dimension exceeds 32-bit
    ///   kernel addressing
    /// - `BackendUnavailable` if a kernel of `variant` failed to compile
    /// - `AllocationFailure` / `DeviceExecutionFailure` as reported by the device
    #[instrument(
        level = "debug",
        skip(self, a, b, out),
        fields(
            device = self.device.name(),
            variant = %variant,
            a_rows = a.rows(),
            a_cols = a.cols(),
            b_cols = b.cols()
        )
    )]
    pub fn multiply_into(
        &self,
        variant: KernelVariant,
        a: &BitMatrix,
        b: &BitMatrix,
        out: &mut BitMatrix,
    ) -> Result<()> {
        if a.cols() != b.rows() {
            return Err(Gf2Error::dimension_mismatch(a.shape(), b.shape()));
        }
        if out.shape() != (a.rows(), b.cols()) {
            return Err(Gf2Error::InvalidInput(format!(
                "output is {}x{}, product is {}x{}",
                out.rows(),
                out.cols(),
                a.rows(),
                b.cols()
            )));
        }
        let pipelines = variant
            .kernels()
            .iter()
            .map(|kernel| self.pipeline(variant, *kernel))
            .collect::<Result<Vec<_>>>()?;

        if a.rows() == 0 || a.cols() == 0 || b.cols() == 0 {
            *out = BitMatrix::new(a.rows(), b.cols());
            return Ok(());
        }

        let params = KernelParams::for_variant(
            variant,
            a.rows(),
            a.cols(),
            b.cols(),
            self.config.m4r_chunk_bits,
        )?;

        let _submission = self.submission.lock().map_err(|_| {
            Gf2Error::DeviceExecutionFailure("engine submission lock poisoned".to_string())
        })?;
        let words = self.execute(variant, &pipelines, &params, a, b)?;
        out.overwrite_words(&words);
        Ok(())
    }

    fn execute(
        &self,
        variant: KernelVariant,
        pipelines: &[&D::Pipeline],
        params: &KernelParams,
        a: &BitMatrix,
        b: &BitMatrix,
    ) -> Result<Vec<u64>> {
        let device = &self.device;
        let b_operand = if variant.uses_transposed_b() {
            Cow::Owned(b.transpose())
        } else {
            Cow::Borrowed(b)
        };

        let a_buf = BufferGuard::upload(device, bytemuck::cast_slice(a.as_words()))?;
        let b_buf = BufferGuard::upload(device, bytemuck::cast_slice(b_operand.as_words()))?;
        let params_buf = BufferGuard::upload(device, bytemuck::bytes_of(params))?;
        let result_words = a.rows() * params.words_per_row_result as usize;
        let c_buf = BufferGuard::allocate(device, result_words * WORD_BYTES)?;

        match (variant, pipelines) {
            (KernelVariant::M4r, [build, multiply]) => {
                let table = BufferGuard::allocate(device, params.table_words() * WORD_BYTES)?;
                self.dispatch(
                    KernelId::M4rBuild,
                    build,
                    &[b_buf.buffer(), table.buffer(), params_buf.buffer()],
                    params,
                )?;
                // pass 2 reads every table entry pass 1 writes
                device.synchronize_and_wait()?;
                self.dispatch(
                    KernelId::M4rMultiply,
                    multiply,
                    &[a_buf.buffer(), table.buffer(), c_buf.buffer(), params_buf.buffer()],
                    params,
                )?;
                device.synchronize_and_wait()?;
            }
            (_, [pipeline]) => {
                self.dispatch(
                    variant.kernels()[0],
                    pipeline,
                    &[a_buf.buffer(), b_buf.buffer(), c_buf.buffer(), params_buf.buffer()],
                    params,
                )?;
                device.synchronize_and_wait()?;
            }
            _ => {
                return Err(Gf2Error::unavailable(
                    variant.name(),
                    "pipeline set does not match the variant",
                ))
            }
        }

        let mut words = vec![0u64; result_words];
        device.read(c_buf.buffer(), bytemuck::cast_slice_mut(&mut words))?;
        Ok(words)
    }

    fn dispatch(
        &self,
        kernel: KernelId,
        pipeline: &D::Pipeline,
        buffers: &[&D::Buffer],
        params: &KernelParams,
    ) -> Result<()> {
        let grid = params.grid(kernel);
        trace!(kernel = kernel.name(), grid_x = grid.x, grid_y = grid.y, "dispatch");
        self.device.dispatch(pipeline, buffers, grid, GroupShape::TILE)
    }
}
