//! Control model runner: one decoder invocation per frame.
//!
//! The decoder maps (normalized f0, normalized loudness, recurrent state) to
//! (amplitude, harmonic distribution, noise magnitudes, next state). Tensors
//! are resolved by name at load time; the names are artifacts of the model
//! export and must match exactly.

use std::path::Path;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

use crate::constants::*;
use crate::error::{EngineError, Result};

/// Input features for one decoder frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioFeatures {
    /// Fundamental frequency in Hz.
    pub f0_hz: f32,
    /// Loudness in dB (typically -80..0).
    pub loudness_db: f32,
    /// Normalized f0 in [0, 1].
    pub f0_norm: f32,
    /// Normalized loudness in [0, 1].
    pub loudness_norm: f32,
}

/// Decoder outputs driving the two synthesizers.
#[derive(Debug, Clone)]
pub struct SynthesisControls {
    /// Overall harmonic amplitude.
    pub amplitude: f32,
    /// f0 passed through from the input features.
    pub f0_hz: f32,
    /// Harmonic distribution, one weight per harmonic.
    pub harmonics: Vec<f32>,
    /// Filtered-noise magnitude per band.
    pub noise_amps: Vec<f32>,
}

impl Default for SynthesisControls {
    fn default() -> Self {
        Self {
            amplitude: 0.0,
            f0_hz: 0.0,
            harmonics: vec![0.0; NUM_HARMONICS],
            noise_amps: vec![0.0; NUM_NOISE_BANDS],
        }
    }
}

impl SynthesisControls {
    pub fn clear(&mut self) {
        self.amplitude = 0.0;
        self.f0_hz = 0.0;
        self.harmonics.fill(0.0);
        self.noise_amps.fill(0.0);
    }
}

/// Replace NaN harmonics with zero; any NaN seen forces the amplitude to
/// zero so a poisoned frame renders as silence instead of propagating.
///
/// Every [`ControlModel`] backend must apply this to its outputs.
pub fn sanitize_controls(controls: &mut SynthesisControls) {
    let mut saw_nan = false;
    for h in &mut controls.harmonics {
        if h.is_nan() {
            *h = 0.0;
            saw_nan = true;
        }
    }
    if saw_nan {
        controls.amplitude = 0.0;
    }
}

/// Capability set of a decoder backend.
///
/// The pipeline owns exactly one backend, chosen at construction. Backends
/// hold the recurrent state themselves and must not advance it when `call`
/// fails, so the next frame can recover. Outputs must be sanitized with
/// [`sanitize_controls`] before returning.
pub trait ControlModel: Send {
    /// Run one frame of inference.
    fn call(&mut self, input: &AudioFeatures, output: &mut SynthesisControls) -> Result<()>;

    /// Zero the recurrent state.
    fn reset(&mut self);

    /// Whether a model is loaded and callable.
    fn is_loaded(&self) -> bool;
}

/// ONNX Runtime backed decoder runner.
pub struct PredictControlsModel {
    session: Option<Session>,
    hidden: Vec<f32>,
}

impl Default for PredictControlsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictControlsModel {
    /// Create an unloaded runner. [`load`](Self::load) makes it callable.
    pub fn new() -> Self {
        Self {
            session: None,
            hidden: vec![0.0; GRU_STATE_SIZE],
        }
    }

    /// Load a decoder model and verify its tensor contract.
    ///
    /// Attempts the configured accelerator delegates first and silently falls
    /// back to plain CPU execution when they are unavailable. On any failure
    /// the runner stays unloaded.
    pub fn load(&mut self, model_path: &Path, num_threads: usize) -> Result<()> {
        self.session = None;

        let session = match build_session(model_path, num_threads, true) {
            Ok(session) => session,
            Err(delegate_err) => {
                log::warn!("accelerator delegate unavailable, using CPU: {delegate_err}");
                build_session(model_path, num_threads, false)?
            }
        };

        verify_tensor_names(&session)?;

        self.hidden.fill(0.0);
        self.session = Some(session);
        log::info!("decoder loaded from {}", model_path.display());
        Ok(())
    }
}

fn build_session(model_path: &Path, num_threads: usize, with_delegates: bool) -> Result<Session> {
    let mut builder = Session::builder()?
        .with_intra_threads(num_threads)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?;

    if with_delegates {
        builder = register_delegates(builder)?;
    }

    builder
        .commit_from_file(model_path)
        .map_err(|source| EngineError::ModelLoad {
            path: model_path.to_path_buf(),
            source,
        })
}

#[cfg(any(feature = "coreml", feature = "cuda", feature = "xnnpack"))]
fn register_delegates(builder: SessionBuilder) -> Result<SessionBuilder> {
    use ort::execution_providers::ExecutionProviderDispatch;

    let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();
    #[cfg(feature = "coreml")]
    providers.push(ort::execution_providers::CoreMLExecutionProvider::default().build());
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    #[cfg(feature = "xnnpack")]
    providers.push(ort::execution_providers::XNNPACKExecutionProvider::default().build());

    builder
        .with_execution_providers(providers)
        .map_err(|e| EngineError::Delegate(e.to_string()))
}

#[cfg(not(any(feature = "coreml", feature = "cuda", feature = "xnnpack")))]
fn register_delegates(builder: SessionBuilder) -> Result<SessionBuilder> {
    Ok(builder)
}

fn session_has_input(session: &Session, name: &str) -> bool {
    session.inputs.iter().any(|inp| inp.name == name)
}

fn session_has_output(session: &Session, name: &str) -> bool {
    session.outputs.iter().any(|out| out.name == name)
}

fn verify_tensor_names(session: &Session) -> Result<()> {
    for name in [TENSOR_IN_F0, TENSOR_IN_LOUDNESS, TENSOR_IN_STATE] {
        if !session_has_input(session, name) {
            return Err(EngineError::TensorShape(name.to_string()));
        }
    }
    for name in [
        TENSOR_OUT_AMPLITUDE,
        TENSOR_OUT_HARMONICS,
        TENSOR_OUT_NOISE,
        TENSOR_OUT_STATE,
    ] {
        if !session_has_output(session, name) {
            return Err(EngineError::TensorShape(name.to_string()));
        }
    }
    Ok(())
}

fn extract_checked<'a>(
    data: &'a [f32],
    expected_len: usize,
    name: &str,
) -> Result<&'a [f32]> {
    if data.len() != expected_len {
        return Err(EngineError::TensorShape(name.to_string()));
    }
    Ok(data)
}

impl ControlModel for PredictControlsModel {
    fn call(&mut self, input: &AudioFeatures, output: &mut SynthesisControls) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::Config("decoder not loaded".into()))?;

        let outputs = session.run(ort::inputs![
            TENSOR_IN_F0 => Tensor::from_array(([1usize, 1], vec![input.f0_norm]))?,
            TENSOR_IN_LOUDNESS => Tensor::from_array(([1usize, 1], vec![input.loudness_norm]))?,
            TENSOR_IN_STATE => Tensor::from_array(([1usize, GRU_STATE_SIZE], self.hidden.clone()))?,
        ])?;

        let amplitude = outputs[TENSOR_OUT_AMPLITUDE].try_extract_tensor::<f32>()?;
        let harmonics = outputs[TENSOR_OUT_HARMONICS].try_extract_tensor::<f32>()?;
        let noise = outputs[TENSOR_OUT_NOISE].try_extract_tensor::<f32>()?;
        let state = outputs[TENSOR_OUT_STATE].try_extract_tensor::<f32>()?;

        output.amplitude = extract_checked(amplitude.1, 1, TENSOR_OUT_AMPLITUDE)?[0];
        output
            .harmonics
            .copy_from_slice(extract_checked(harmonics.1, NUM_HARMONICS, TENSOR_OUT_HARMONICS)?);
        output
            .noise_amps
            .copy_from_slice(extract_checked(noise.1, NUM_NOISE_BANDS, TENSOR_OUT_NOISE)?);

        // The recurrent state only advances once every output has been read,
        // so a failed frame is recoverable on the next call.
        self.hidden
            .copy_from_slice(extract_checked(state.1, GRU_STATE_SIZE, TENSOR_OUT_STATE)?);

        sanitize_controls(output);
        output.f0_hz = input.f0_hz;
        Ok(())
    }

    fn reset(&mut self) {
        self.hidden.fill(0.0);
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }
}
