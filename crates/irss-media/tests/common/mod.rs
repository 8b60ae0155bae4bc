//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use ndarray::Array4;

use irss_media::{EngineFactory, InferenceEngine, MediaError, MediaResult, MaskPipelineConfig};
use irss_models::ExecutionStrategy;

/// Observations shared by every engine a factory creates.
#[derive(Debug, Default)]
pub struct EngineProbe {
    /// Calls that started while the same engine was already inside `infer`
    pub reentrant_calls: AtomicUsize,
    pub calls: AtomicUsize,
    pub created: AtomicUsize,
}

/// Engine that returns a half-sky mask after an optional delay.
pub struct MockEngine {
    in_flight: Arc<AtomicBool>,
    probe: Arc<EngineProbe>,
    delay: Duration,
    fail_every: Option<usize>,
    panics: bool,
}

impl InferenceEngine for MockEngine {
    fn infer(&mut self, input: Array4<f32>) -> MediaResult<Array4<f32>> {
        if self.panics {
            panic!("mock engine crashed");
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.probe.reentrant_calls.fetch_add(1, Ordering::SeqCst);
        }
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let (_, _, h, w) = input.dim();
        let mut mask = Array4::<f32>::zeros((1, 1, h, w));
        for y in 0..h / 2 {
            for x in 0..w {
                mask[[0, 0, y, x]] = 1.0;
            }
        }
        self.in_flight.store(false, Ordering::SeqCst);

        match self.fail_every {
            Some(n) if call % n == 0 => Err(MediaError::inference("mock inference failure")),
            _ => Ok(mask),
        }
    }
}

/// Factory building [`MockEngine`]s for the strategies it accepts.
pub struct MockFactory {
    pub accepts: Vec<ExecutionStrategy>,
    pub delay: Duration,
    pub fail_every: Option<usize>,
    /// Lanes whose engines panic on their first call
    pub panic_lanes: Vec<usize>,
    pub probe: Arc<EngineProbe>,
}

impl MockFactory {
    pub fn cpu() -> Self {
        Self {
            accepts: vec![ExecutionStrategy::Cpu],
            delay: Duration::ZERO,
            fail_every: None,
            panic_lanes: Vec::new(),
            probe: Arc::new(EngineProbe::default()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn panicking_on(mut self, lanes: &[usize]) -> Self {
        self.panic_lanes = lanes.to_vec();
        self
    }

    pub fn rejecting_all() -> Self {
        Self {
            accepts: Vec::new(),
            ..Self::cpu()
        }
    }
}

impl EngineFactory for MockFactory {
    fn create(
        &self,
        strategy: ExecutionStrategy,
        lane_id: usize,
    ) -> MediaResult<Box<dyn InferenceEngine>> {
        if !self.accepts.contains(&strategy) {
            return Err(MediaError::strategy_unavailable(strategy, "mock rejects strategy"));
        }
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            in_flight: Arc::new(AtomicBool::new(false)),
            probe: Arc::clone(&self.probe),
            delay: self.delay,
            fail_every: self.fail_every,
            panics: self.panic_lanes.contains(&lane_id),
        }))
    }
}

/// Write `n` small images named `shot_<i>.png` into `dir`.
pub fn write_images(dir: &Path, n: usize) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    (0..n)
        .map(|i| {
            let path = dir.join(format!("shot_{}.png", i));
            let shade = (i % 256) as u8;
            RgbImage::from_pixel(12, 8, Rgb([shade, 128, 255 - shade]))
                .save(&path)
                .unwrap();
            path
        })
        .collect()
}

/// Small, fast settings for tests.
pub fn test_config(output_dir: &Path, replicas: usize) -> MaskPipelineConfig {
    let mut config = MaskPipelineConfig::new(output_dir);
    config.replicas = replicas;
    config.strategy = ExecutionStrategy::Cpu;
    config.load_concurrency = 3;
    config.postprocess_concurrency = 2;
    config.save_concurrency = 2;
    config.model_size = 8;
    config
}
