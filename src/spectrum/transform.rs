//! Real <-> complex transform plans with their scratch space.
//!
//! Both directions scale by `1/sqrt(size)`, so a forward transform followed
//! by an inverse one reproduces the input. High quality plans run in `f64`;
//! fast plans run in `f32`.

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::FftNum;
use std::sync::Arc;

use crate::error::{StageError, StageResult};

/// Precision a plan computes in, converted from and to `f32` at the edges.
pub trait PlanFloat: FftNum + From<f32> + Into<f64> {}

impl PlanFloat for f32 {}
impl PlanFloat for f64 {}

struct InversePlan<T: PlanFloat> {
    plan: Arc<dyn ComplexToReal<T>>,
    spectrum: Vec<Complex<T>>,
    signal: Vec<T>,
    scratch: Vec<Complex<T>>,
}

impl<T: PlanFloat> InversePlan<T> {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<T>::new();
        let plan = planner.plan_fft_inverse(size);
        Self {
            spectrum: plan.make_input_vec(),
            signal: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            plan,
        }
    }

    fn run(&mut self, bins: &[Complex<f32>], out: &mut [f32], root: f64) -> StageResult<()> {
        for (dst, src) in self.spectrum.iter_mut().zip(bins) {
            *dst = Complex::new(T::from(src.re), T::from(src.im));
        }
        // DC (and Nyquist for even sizes) carry no phase; the imaginary part is ignored.
        let zero = T::from(0.0);
        self.spectrum[0].im = zero;
        if self.signal.len() % 2 == 0 {
            if let Some(last) = self.spectrum.last_mut() {
                last.im = zero;
            }
        }

        self.plan
            .process_with_scratch(&mut self.spectrum, &mut self.signal, &mut self.scratch)
            .map_err(|e| StageError::InvalidState(format!("inverse transform failed: {}", e)))?;

        for (o, &s) in out.iter_mut().zip(self.signal.iter()) {
            let v: f64 = s.into();
            *o = (v / root) as f32;
        }
        Ok(())
    }
}

struct ForwardPlan<T: PlanFloat> {
    plan: Arc<dyn RealToComplex<T>>,
    signal: Vec<T>,
    spectrum: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: PlanFloat> ForwardPlan<T> {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<T>::new();
        let plan = planner.plan_fft_forward(size);
        Self {
            signal: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            plan,
        }
    }

    fn run(&mut self, samples: &[f32], out: &mut [Complex<f32>], root: f64) -> StageResult<()> {
        for (dst, &src) in self.signal.iter_mut().zip(samples) {
            *dst = T::from(src);
        }

        self.plan
            .process_with_scratch(&mut self.signal, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| StageError::InvalidState(format!("forward transform failed: {}", e)))?;

        for (o, s) in out.iter_mut().zip(self.spectrum.iter()) {
            let re: f64 = s.re.into();
            let im: f64 = s.im.into();
            *o = Complex::new((re / root) as f32, (im / root) as f32);
        }
        Ok(())
    }
}

enum InverseEngine {
    Precise(InversePlan<f64>),
    Fast(InversePlan<f32>),
}

/// Complex -> real plan for one window size, with its input/output scratch.
pub struct InverseTransform {
    size: usize,
    root: f64,
    engine: InverseEngine,
    output: Vec<f32>,
}

impl InverseTransform {
    pub fn new(size: usize, hi_quality: bool) -> Self {
        let engine = if hi_quality {
            InverseEngine::Precise(InversePlan::new(size))
        } else {
            InverseEngine::Fast(InversePlan::new(size))
        };
        Self {
            size,
            root: (size as f64).sqrt(),
            engine,
            output: vec![0.0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform `size/2 + 1` bins into `size` normalized samples.
    pub fn execute(&mut self, bins: &[Complex<f32>]) -> StageResult<&[f32]> {
        let expected = self.size / 2 + 1;
        if bins.len() != expected {
            return Err(StageError::FrameSizeMismatch {
                expected,
                actual: bins.len(),
            });
        }
        match &mut self.engine {
            InverseEngine::Precise(plan) => plan.run(bins, &mut self.output, self.root)?,
            InverseEngine::Fast(plan) => plan.run(bins, &mut self.output, self.root)?,
        }
        Ok(self.output.as_slice())
    }
}

enum ForwardEngine {
    Precise(ForwardPlan<f64>),
    Fast(ForwardPlan<f32>),
}

/// Real -> complex plan for one window size.
pub struct ForwardTransform {
    size: usize,
    root: f64,
    engine: ForwardEngine,
}

impl ForwardTransform {
    pub fn new(size: usize, hi_quality: bool) -> Self {
        let engine = if hi_quality {
            ForwardEngine::Precise(ForwardPlan::new(size))
        } else {
            ForwardEngine::Fast(ForwardPlan::new(size))
        };
        Self {
            size,
            root: (size as f64).sqrt(),
            engine,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform the first `size` samples into `size/2 + 1` normalized bins.
    pub fn execute(&mut self, samples: &[f32]) -> StageResult<Vec<Complex<f32>>> {
        if samples.len() < self.size {
            return Err(StageError::FrameSizeMismatch {
                expected: self.size,
                actual: samples.len(),
            });
        }
        let mut bins = vec![Complex::new(0.0, 0.0); self.size / 2 + 1];
        let window = &samples[..self.size];
        match &mut self.engine {
            ForwardEngine::Precise(plan) => plan.run(window, &mut bins, self.root)?,
            ForwardEngine::Fast(plan) => plan.run(window, &mut bins, self.root)?,
        }
        Ok(bins)
    }
}
