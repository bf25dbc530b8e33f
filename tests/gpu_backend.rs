//! wgpu device tests
//!
//! Skipped (with a message) when no GPU adapter is present.

#![cfg(feature = "gpu")]

use rand::rngs::StdRng;
use rand::SeedableRng;

use gf2mm::{
    AcceleratorEngine, BitMatrix, EngineConfig, KernelVariant, MatrixMultiply, Multiplier,
    ReferenceMultiplier, Strategy, WgpuDevice,
};

fn gpu_engine() -> Option<AcceleratorEngine<WgpuDevice>> {
    if !WgpuDevice::is_available() {
        eprintln!("GPU not available, skipping test");
        return None;
    }
    let device = WgpuDevice::new().ok()?;
    AcceleratorEngine::new(device, EngineConfig::default()).ok()
}

#[test]
fn test_gpu_variants_match_reference() {
    let Some(engine) = gpu_engine() else {
        return;
    };
    let mut rng = StdRng::seed_from_u64(31);
    for (m, k, n) in [(2, 3, 2), (17, 65, 33), (64, 128, 64), (50, 300, 130)] {
        let a = BitMatrix::random_with(m, k, &mut rng);
        let b = BitMatrix::random_with(k, n, &mut rng);
        let expected = ReferenceMultiplier.multiply(&a, &b).unwrap();
        for variant in engine.available_variants() {
            assert_eq!(
                engine.multiply(variant, &a, &b).unwrap(),
                expected,
                "{variant} on {m}x{k} × {k}x{n}"
            );
        }
    }
}

#[test]
fn test_gpu_m4r_chunk_widths() {
    if !WgpuDevice::is_available() {
        eprintln!("GPU not available, skipping test");
        return;
    }
    let mut rng = StdRng::seed_from_u64(32);
    let a = BitMatrix::random_with(33, 150, &mut rng);
    let b = BitMatrix::random_with(150, 77, &mut rng);
    let expected = ReferenceMultiplier.multiply(&a, &b).unwrap();
    for bits in [1, 2, 4, 8] {
        let Ok(device) = WgpuDevice::new() else {
            return;
        };
        let engine =
            AcceleratorEngine::new(device, EngineConfig::default().with_m4r_chunk_bits(bits))
                .unwrap();
        if engine.is_available(KernelVariant::M4r) {
            assert_eq!(engine.multiply(KernelVariant::M4r, &a, &b).unwrap(), expected);
        }
    }
}

#[test]
fn test_gpu_multiplier_strategies() {
    let Some(engine) = gpu_engine() else {
        return;
    };
    let multiplier = Multiplier::with_engine(engine);
    let a = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
    let b = BitMatrix::from_rows(&[[1, 0], [0, 1], [1, 1]]).unwrap();
    let expected = BitMatrix::from_rows(&[[0, 1], [1, 0]]).unwrap();
    for strategy in Strategy::ALL {
        if multiplier.is_available(strategy) {
            assert_eq!(multiplier.multiply(strategy, &a, &b).unwrap(), expected, "{strategy}");
        }
    }
}
