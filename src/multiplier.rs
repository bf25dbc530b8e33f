//! Strategy dispatch
//!
//! [`Multiplier`] maps a [`Strategy`] to an implementation of [`MatrixMultiply`]:
//! the CPU strategies directly, the accelerator strategies through one shared
//! [`AcceleratorEngine`].
//!
//! ```rust
//! use gf2mm::{BitMatrix, Multiplier, Strategy};
//!
//! let multiplier = Multiplier::new();
//! let a = BitMatrix::random(40, 100);
//! let b = BitMatrix::random(100, 30);
//!
//! let serial = multiplier.multiply(Strategy::Serial, &a, &b).unwrap();
//! for strategy in Strategy::ALL {
//!     assert_eq!(multiplier.multiply(strategy, &a, &b).unwrap(), serial);
//! }
//! ```

use std::time::{Duration, Instant};

use crate::backends::accel::{AcceleratorEngine, Device, HostDevice, KernelVariant};
use crate::backends::CpuBackend;
use crate::bitsliced::BitslicedMultiplier;
use crate::reference::ReferenceMultiplier;
use crate::{BitMatrix, EngineConfig, Gf2Error, Result, Strategy};

/// A way of computing `A × B` over GF(2)
pub trait MatrixMultiply {
    /// Strategy name
    fn name(&self) -> &str;

    /// Compute `a × b` into a new matrix
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `a.cols() != b.rows()`; accelerator
    /// implementations may also fail with device errors.
    fn multiply(&self, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix>;
}

/// One kernel variant on a borrowed engine
pub struct AcceleratedMultiplier<'e, D: Device> {
    engine: &'e AcceleratorEngine<D>,
    variant: KernelVariant,
}

impl<'e, D: Device> AcceleratedMultiplier<'e, D> {
    /// Bind `variant` to `engine`
    pub fn new(engine: &'e AcceleratorEngine<D>, variant: KernelVariant) -> Self {
        Self { engine, variant }
    }
}

impl<D: Device> MatrixMultiply for AcceleratedMultiplier<'_, D> {
    fn name(&self) -> &str {
        self.variant.name()
    }

    fn multiply(&self, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
        self.engine.multiply(self.variant, a, b)
    }
}

/// Dispatches every [`Strategy`]
pub struct Multiplier<D: Device = HostDevice> {
    serial: ReferenceMultiplier,
    simd: BitslicedMultiplier,
    engine: Option<AcceleratorEngine<D>>,
}

impl Default for Multiplier<HostDevice> {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplier<HostDevice> {
    /// All strategies, accelerator ones on a [`HostDevice`]
    pub fn new() -> Self {
        Self {
            serial: ReferenceMultiplier,
            simd: BitslicedMultiplier::new(),
            engine: AcceleratorEngine::new(HostDevice::new(), EngineConfig::default()).ok(),
        }
    }

    /// Only `Serial` and `Simd`; accelerator strategies report `BackendUnavailable`
    pub fn cpu_only() -> Self {
        Self {
            serial: ReferenceMultiplier,
            simd: BitslicedMultiplier::new(),
            engine: None,
        }
    }
}

impl<D: Device> Multiplier<D> {
    /// All strategies, accelerator ones on `engine`
    pub fn with_engine(engine: AcceleratorEngine<D>) -> Self {
        Self {
            serial: ReferenceMultiplier,
            simd: BitslicedMultiplier::new(),
            engine: Some(engine),
        }
    }

    /// Pin the `Simd` strategy to `backend`
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the CPU does not support `backend`.
    pub fn with_simd_backend(mut self, backend: CpuBackend) -> Result<Self> {
        self.simd = BitslicedMultiplier::with_backend(backend)?;
        Ok(self)
    }

    /// The accelerator engine, if any
    pub fn engine(&self) -> Option<&AcceleratorEngine<D>> {
        self.engine.as_ref()
    }

    /// True if `strategy` can run
    pub fn is_available(&self, strategy: Strategy) -> bool {
        match strategy.kernel_variant() {
            None => true,
            Some(variant) => self
                .engine
                .as_ref()
                .is_some_and(|engine| engine.is_available(variant)),
        }
    }

    /// The implementation behind `strategy`
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` for an accelerator strategy without an engine
    /// or whose kernels failed to compile.
    pub fn strategy(&self, strategy: Strategy) -> Result<Box<dyn MatrixMultiply + '_>> {
        let variant = match strategy.kernel_variant() {
            None if strategy == Strategy::Serial => return Ok(Box::new(self.serial)),
            None => return Ok(Box::new(self.simd)),
            Some(variant) => variant,
        };
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Gf2Error::unavailable(strategy.name(), "no accelerator engine"))?;
        if !engine.is_available(variant) {
            return Err(Gf2Error::unavailable(
                strategy.name(),
                "kernel failed to compile",
            ));
        }
        Ok(Box::new(AcceleratedMultiplier::new(engine, variant)))
    }

    /// Compute `a × b` with `strategy`
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` is reported first for every strategy; then
    /// `BackendUnavailable`, and for accelerator strategies any device error.
    pub fn multiply(&self, strategy: Strategy, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
        if a.cols() != b.rows() {
            return Err(Gf2Error::dimension_mismatch(a.shape(), b.shape()));
        }
        self.strategy(strategy)?.multiply(a, b)
    }

    /// [`Multiplier::multiply`] plus its wall-clock time
    ///
    /// # Errors
    ///
    /// As [`Multiplier::multiply`].
    pub fn multiply_timed(
        &self,
        strategy: Strategy,
        a: &BitMatrix,
        b: &BitMatrix,
    ) -> Result<(BitMatrix, Duration)> {
        if a.cols() != b.rows() {
            return Err(Gf2Error::dimension_mismatch(a.shape(), b.shape()));
        }
        let implementation = self.strategy(strategy)?;
        let start = Instant::now();
        let product = implementation.multiply(a, b)?;
        Ok((product, start.elapsed()))
    }
}

/// Compute `a × b` with `strategy` on a fresh [`Multiplier`]
///
/// Every call builds a new [`HostDevice`] engine and compiles all kernels, so a
/// kernel that fails to compile is logged on each call. Keep one [`Multiplier`]
/// alive to compile once and reuse it across calls.
///
/// # Errors
///
/// As [`Multiplier::multiply`].
pub fn multiply(strategy: Strategy, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
    Multiplier::new().multiply(strategy, a, b)
}

/// Bit operations per second, in billions: `a_rows · a_cols · b_cols / seconds / 1e9`
pub fn throughput_gops(a_rows: usize, a_cols: usize, b_cols: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds == 0.0 {
        return 0.0;
    }
    (a_rows as f64) * (a_cols as f64) * (b_cols as f64) / seconds / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::accel::{
        GridShape, GroupShape, HostBuffer, HostDeviceConfig, HostPipeline, KernelId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host device that counts kernel compilations
    struct CountingDevice {
        inner: HostDevice,
        compiles: AtomicUsize,
    }

    impl Device for CountingDevice {
        type Buffer = HostBuffer;
        type Pipeline = HostPipeline;

        fn name(&self) -> &str {
            "counting"
        }

        fn allocate(&self, bytes: usize) -> Result<HostBuffer> {
            self.inner.allocate(bytes)
        }

        fn allocate_from_data(&self, data: &[u8]) -> Result<HostBuffer> {
            self.inner.allocate_from_data(data)
        }

        fn compile(&self, kernel: KernelId) -> Result<HostPipeline> {
            self.compiles.fetch_add(1, Ordering::Relaxed);
            self.inner.compile(kernel)
        }

        fn dispatch(
            &self,
            pipeline: &HostPipeline,
            buffers: &[&HostBuffer],
            grid: GridShape,
            group: GroupShape,
        ) -> Result<()> {
            self.inner.dispatch(pipeline, buffers, grid, group)
        }

        fn synchronize_and_wait(&self) -> Result<()> {
            self.inner.synchronize_and_wait()
        }

        fn read(&self, buffer: &HostBuffer, out: &mut [u8]) -> Result<()> {
            self.inner.read(buffer, out)
        }

        fn release(&self, buffer: HostBuffer) {
            self.inner.release(buffer)
        }
    }

    fn sample() -> (BitMatrix, BitMatrix, BitMatrix) {
        let a = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
        let b = BitMatrix::from_rows(&[[1, 0], [0, 1], [1, 1]]).unwrap();
        let c = BitMatrix::from_rows(&[[0, 1], [1, 0]]).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_free_function_every_strategy() {
        let (a, b, c) = sample();
        for strategy in Strategy::ALL {
            assert_eq!(multiply(strategy, &a, &b).unwrap(), c, "{strategy}");
        }
    }

    #[test]
    fn test_cpu_only_rejects_accelerated() {
        let (a, b, c) = sample();
        let multiplier = Multiplier::cpu_only();
        assert_eq!(multiplier.multiply(Strategy::Simd, &a, &b).unwrap(), c);
        assert!(!multiplier.is_available(Strategy::M4r));
        let err = multiplier.multiply(Strategy::M4r, &a, &b).unwrap_err();
        assert!(matches!(err, Gf2Error::BackendUnavailable { .. }));
    }

    #[test]
    fn test_dimension_mismatch_reported_before_availability() {
        let multiplier = Multiplier::cpu_only();
        let err = multiplier
            .multiply(Strategy::Tiled, &BitMatrix::new(2, 3), &BitMatrix::new(2, 3))
            .unwrap_err();
        assert!(matches!(err, Gf2Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_strategy_names() {
        let multiplier = Multiplier::new();
        for strategy in Strategy::ALL {
            assert_eq!(multiplier.strategy(strategy).unwrap().name(), strategy.name());
        }
    }

    #[test]
    fn test_disabled_kernel_marks_strategy_unavailable() {
        let device = HostDevice::with_config(
            HostDeviceConfig::default().with_disabled_kernel(KernelId::Vectorized),
        );
        let engine = AcceleratorEngine::new(device, EngineConfig::default()).unwrap();
        let multiplier = Multiplier::with_engine(engine);
        assert!(!multiplier.is_available(Strategy::Vectorized));
        assert!(multiplier.is_available(Strategy::Transposed));
        assert!(multiplier.strategy(Strategy::Vectorized).is_err());
    }

    #[test]
    fn test_reused_multiplier_compiles_once() {
        let (a, b, c) = sample();
        let device = CountingDevice {
            inner: HostDevice::with_config(
                HostDeviceConfig::default().with_disabled_kernel(KernelId::Tiled),
            ),
            compiles: AtomicUsize::new(0),
        };
        let engine = AcceleratorEngine::new(device, EngineConfig::default()).unwrap();
        let multiplier = Multiplier::with_engine(engine);
        let compiled = KernelId::ALL.len();

        for _ in 0..3 {
            for strategy in Strategy::ALL {
                match multiplier.multiply(strategy, &a, &b) {
                    Ok(product) => assert_eq!(product, c, "{strategy}"),
                    Err(err) => {
                        assert_eq!(strategy, Strategy::Tiled);
                        assert!(matches!(err, Gf2Error::BackendUnavailable { .. }));
                    }
                }
            }
        }

        let device = multiplier.engine().unwrap().device();
        assert_eq!(device.compiles.load(Ordering::Relaxed), compiled);
    }

    #[test]
    fn test_multiply_timed() {
        let (a, b, c) = sample();
        let (product, _elapsed) = Multiplier::new()
            .multiply_timed(Strategy::Naive, &a, &b)
            .unwrap();
        assert_eq!(product, c);
    }

    #[test]
    fn test_with_simd_backend() {
        let (a, b, c) = sample();
        let multiplier = Multiplier::cpu_only()
            .with_simd_backend(CpuBackend::Scalar)
            .unwrap();
        assert_eq!(multiplier.multiply(Strategy::Simd, &a, &b).unwrap(), c);
    }

    #[test]
    fn test_throughput() {
        let gops = throughput_gops(1000, 1000, 1000, Duration::from_secs(1));
        assert!((gops - 1.0).abs() < 1e-12);
        assert_eq!(throughput_gops(1, 1, 1, Duration::ZERO), 0.0);
    }
}
