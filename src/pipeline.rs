//! Inference pipeline: decoder, synthesizers, resampler and ring buffers
//! behind a worker thread.
//!
//! The worker wakes on a fixed interval, snapshots the atomic control
//! parameters, runs one decoder frame, renders and mixes the harmonic and
//! noise hops at the 16 kHz model rate, upsamples to the host rate and
//! publishes to the output ring. The audio thread only ever calls
//! [`InferencePipeline::next_block`], the parameter setters and the
//! observability getters; none of those block, lock or allocate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use atomic_float::AtomicF32;
use parking_lot::Mutex;

use crate::constants::*;
use crate::error::{EngineError, Result};
use crate::features::{denormalize_loudness, normalized_loudness, normalized_pitch, offset_pitch};
use crate::harmonic::HarmonicSynthesizer;
use crate::model::{AudioFeatures, ControlModel, PredictControlsModel, SynthesisControls};
use crate::noise::NoiseSynthesizer;
use crate::resampler::Resampler;
use crate::ring_buffer::SpscRingBuffer;

/// Control parameters written by the host, read once per worker iteration.
struct ControlInputs {
    f0_hz: AtomicF32,
    loudness_norm: AtomicF32,
    pitch_shift_semitones: AtomicF32,
    harmonic_gain: AtomicF32,
    noise_gain: AtomicF32,
}

impl ControlInputs {
    fn new() -> Self {
        Self {
            f0_hz: AtomicF32::new(440.0),
            loudness_norm: AtomicF32::new(0.5),
            pitch_shift_semitones: AtomicF32::new(0.0),
            harmonic_gain: AtomicF32::new(1.0),
            noise_gain: AtomicF32::new(1.0),
        }
    }
}

/// Values published by the worker for host feedback.
pub struct PipelineStatus {
    current_pitch: AtomicF32,
    current_rms: AtomicF32,
    frame_count: AtomicU64,
    overflow_count: AtomicU64,
    model_ready: AtomicBool,
    is_running: AtomicBool,
}

impl PipelineStatus {
    fn new() -> Self {
        Self {
            current_pitch: AtomicF32::new(0.0),
            current_rms: AtomicF32::new(0.0),
            frame_count: AtomicU64::new(0),
            overflow_count: AtomicU64::new(0),
            model_ready: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
        }
    }
}

/// Everything the render iteration mutates. Shared between the control
/// thread and the worker through a mutex; the audio thread never touches it.
struct RenderState {
    model: Box<dyn ControlModel>,
    harmonic_synth: HarmonicSynthesizer,
    noise_synth: NoiseSynthesizer,
    resampler: Resampler,
    features: AudioFeatures,
    controls: SynthesisControls,
    /// Mixed harmonic + noise hop at the model rate.
    synthesis_buffer: Vec<f32>,
    /// Upsampled hop at the host rate.
    resampled_buffer: Vec<f32>,
    user_frame_size: usize,
    user_hop_size: usize,
}

impl RenderState {
    fn new(sample_rate: u32) -> Self {
        Self {
            model: Box::new(PredictControlsModel::new()),
            harmonic_synth: HarmonicSynthesizer::new(
                NUM_HARMONICS,
                MODEL_HOP_SIZE,
                MODEL_SAMPLE_RATE as f32,
            ),
            noise_synth: NoiseSynthesizer::new(NUM_NOISE_BANDS, MODEL_HOP_SIZE),
            resampler: Resampler::new(MODEL_SAMPLE_RATE, sample_rate),
            features: AudioFeatures::default(),
            controls: SynthesisControls::default(),
            synthesis_buffer: vec![0.0; MODEL_HOP_SIZE],
            resampled_buffer: vec![
                0.0;
                Resampler::max_output_len(MODEL_HOP_SIZE, MODEL_SAMPLE_RATE, sample_rate)
            ],
            user_frame_size: user_frame_size(sample_rate),
            user_hop_size: user_hop_size(sample_rate),
        }
    }

    fn retarget(&mut self, sample_rate: u32) {
        self.resampler = Resampler::new(MODEL_SAMPLE_RATE, sample_rate);
        self.resampled_buffer = vec![
            0.0;
            Resampler::max_output_len(MODEL_HOP_SIZE, MODEL_SAMPLE_RATE, sample_rate)
        ];
        self.user_frame_size = user_frame_size(sample_rate);
        self.user_hop_size = user_hop_size(sample_rate);
    }
}

/// Real-time DDSP synthesis pipeline.
///
/// Lifecycle: construct with the host audio configuration, load a model,
/// `start` the worker, feed parameters from any thread, consume audio from
/// the callback via `next_block`. `reset` clears synthesis state but keeps
/// the model and configuration. Dropping the pipeline stops the worker.
pub struct InferencePipeline {
    sample_rate: u32,
    block_size: usize,

    state: Arc<Mutex<RenderState>>,
    inputs: Arc<ControlInputs>,
    status: Arc<PipelineStatus>,
    input_ring: Arc<SpscRingBuffer>,
    output_ring: Arc<SpscRingBuffer>,

    should_run: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,

    /// Read once at construction; never observed again.
    default_model_path: Option<PathBuf>,
}

impl InferencePipeline {
    /// Build a pipeline for the given host configuration.
    pub fn new(sample_rate: u32, block_size: usize) -> Result<Self> {
        validate_config(sample_rate, block_size)?;
        let pipeline = Self {
            sample_rate,
            block_size,
            state: Arc::new(Mutex::new(RenderState::new(sample_rate))),
            inputs: Arc::new(ControlInputs::new()),
            status: Arc::new(PipelineStatus::new()),
            input_ring: Arc::new(SpscRingBuffer::new(RING_BUFFER_CAPACITY)),
            output_ring: Arc::new(SpscRingBuffer::new(RING_BUFFER_CAPACITY)),
            should_run: Arc::new(AtomicBool::new(false)),
            worker: None,
            default_model_path: std::env::var_os(MODEL_PATH_ENV).map(PathBuf::from),
        };
        pipeline.reset();
        Ok(pipeline)
    }

    /// Reconfigure for a new host sample rate / block size, then reset.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) -> Result<()> {
        validate_config(sample_rate, block_size)?;
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.state.lock().retarget(sample_rate);
        self.reset();
        Ok(())
    }

    /// Load a decoder model. On failure the pipeline is left unloaded and
    /// `next_block` keeps returning silence.
    pub fn load_model(&self, model_path: impl AsRef<Path>, num_threads: usize) -> Result<()> {
        let mut runner = PredictControlsModel::new();
        let result = runner.load(model_path.as_ref(), num_threads);
        let mut state = self.state.lock();
        self.status
            .model_ready
            .store(runner.is_loaded(), Ordering::Release);
        state.model = Box::new(runner);
        result
    }

    /// Load the model named by the `DDSP_MODEL_PATH` environment variable.
    pub fn load_model_from_env(&self, num_threads: usize) -> Result<()> {
        let path = self.default_model_path.clone().ok_or_else(|| {
            EngineError::Config(format!("{MODEL_PATH_ENV} is not set and no path was given"))
        })?;
        self.load_model(path, num_threads)
    }

    /// Install a custom decoder backend (alternative runtimes, test mocks).
    pub fn with_runner(&self, runner: Box<dyn ControlModel>) {
        let mut state = self.state.lock();
        self.status
            .model_ready
            .store(runner.is_loaded(), Ordering::Release);
        state.model = runner;
    }

    /// Start the render worker. Calling `start` while running is a no-op.
    pub fn start(&mut self, interval_ms: u64) {
        if self.should_run.swap(true, Ordering::AcqRel) {
            return;
        }

        let state = Arc::clone(&self.state);
        let inputs = Arc::clone(&self.inputs);
        let status = Arc::clone(&self.status);
        let output_ring = Arc::clone(&self.output_ring);
        let should_run = Arc::clone(&self.should_run);

        let handle = std::thread::Builder::new()
            .name("ddsp-render".into())
            .spawn(move || {
                status.is_running.store(true, Ordering::Release);
                let interval = Duration::from_millis(interval_ms);
                while should_run.load(Ordering::Acquire) {
                    let started = Instant::now();
                    render_once(&state, &inputs, &status, &output_ring);
                    // An overrun shortens the next sleep; it is never fatal.
                    if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(remaining);
                    }
                }
                status.is_running.store(false, Ordering::Release);
            })
            .expect("failed to spawn render worker");
        self.worker = Some(handle);
    }

    /// Signal the worker to exit after its current iteration and join it.
    pub fn stop(&mut self) {
        self.should_run.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Run one worker iteration inline. For hosts without a render thread.
    pub fn trigger_render(&self) {
        render_once(&self.state, &self.inputs, &self.status, &self.output_ring);
    }

    /// Synth mode has no audio input path; the parameters drive rendering
    /// directly. Kept for API symmetry with analysis-driven hosts; feeding
    /// input audio through this call is a future extension.
    pub fn process_block(&self, _input: &[f32]) {}

    /// Pop up to `out.len()` synthesized samples. The tail past the returned
    /// count is zero-filled, so underruns degrade to silence.
    ///
    /// Audio-thread safe: no locks, no allocation.
    pub fn next_block(&self, out: &mut [f32]) -> usize {
        let read = self.output_ring.read(out);
        out[read..].fill(0.0);
        read
    }

    // --- Control parameters. Clamped at this boundary. ---

    pub fn set_f0_hz(&self, f0_hz: f32) {
        self.inputs
            .f0_hz
            .store(f0_hz.clamp(PITCH_MIN_HZ, PITCH_MAX_HZ), Ordering::Release);
    }

    pub fn set_loudness_norm(&self, loudness_norm: f32) {
        self.inputs
            .loudness_norm
            .store(loudness_norm.clamp(0.0, 1.0), Ordering::Release);
    }

    pub fn set_loudness_db(&self, loudness_db: f32) {
        self.set_loudness_norm(normalized_loudness(loudness_db));
    }

    pub fn set_pitch_shift(&self, semitones: f32) {
        self.inputs
            .pitch_shift_semitones
            .store(semitones, Ordering::Release);
    }

    pub fn set_harmonic_gain(&self, gain: f32) {
        self.inputs
            .harmonic_gain
            .store(gain.clamp(0.0, 10.0), Ordering::Release);
    }

    pub fn set_noise_gain(&self, gain: f32) {
        self.inputs
            .noise_gain
            .store(gain.clamp(0.0, 10.0), Ordering::Release);
    }

    // --- Observability. All plain atomic reads. ---

    /// Last normalized pitch published by the worker.
    pub fn current_pitch(&self) -> f32 {
        self.status.current_pitch.load(Ordering::Acquire)
    }

    /// Last normalized loudness published by the worker.
    pub fn current_rms(&self) -> f32 {
        self.status.current_rms.load(Ordering::Acquire)
    }

    /// Samples ready for `next_block`.
    pub fn ready_samples(&self) -> usize {
        self.output_ring.available()
    }

    pub fn frame_count(&self) -> u64 {
        self.status.frame_count.load(Ordering::Relaxed)
    }

    /// Frames whose output could not fully fit the ring (consumer too slow).
    pub fn overflow_count(&self) -> u64 {
        self.status.overflow_count.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.status.model_ready.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn user_frame_size(&self) -> usize {
        self.state.lock().user_frame_size
    }

    pub fn user_hop_size(&self) -> usize {
        self.state.lock().user_hop_size
    }

    /// Reset all synthesis state: model hidden state, synthesizer carry,
    /// resampler history, ring buffers. The loaded model and the host
    /// configuration are preserved. The input ring is re-padded with one
    /// user-rate frame of zeros for latency compensation.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.model.reset();
        state.harmonic_synth.reset();
        state.noise_synth.reset();
        state.resampler.reset();
        state.controls.clear();
        state.features = AudioFeatures::default();
        state.synthesis_buffer.fill(0.0);
        state.resampled_buffer.fill(0.0);

        self.input_ring.reset();
        self.output_ring.reset();
        self.input_ring.write(&vec![0.0; state.user_frame_size]);
    }
}

impl Drop for InferencePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_config(sample_rate: u32, block_size: usize) -> Result<()> {
    if sample_rate == 0 {
        return Err(EngineError::Config("sample rate must be positive".into()));
    }
    if block_size == 0 {
        return Err(EngineError::Config("block size must be positive".into()));
    }
    Ok(())
}

/// One worker iteration: snapshot controls, infer, synthesize, upsample,
/// publish.
fn render_once(
    state: &Mutex<RenderState>,
    inputs: &ControlInputs,
    status: &PipelineStatus,
    output_ring: &SpscRingBuffer,
) {
    let mut guard = state.lock();
    let RenderState {
        model,
        harmonic_synth,
        noise_synth,
        resampler,
        features,
        controls,
        synthesis_buffer,
        resampled_buffer,
        ..
    } = &mut *guard;

    if !model.is_loaded() {
        return;
    }

    let f0_hz = inputs.f0_hz.load(Ordering::Acquire);
    let loudness_norm = inputs.loudness_norm.load(Ordering::Acquire);
    let pitch_shift = inputs.pitch_shift_semitones.load(Ordering::Acquire);

    let shifted_f0 = offset_pitch(f0_hz, pitch_shift);
    let f0_norm = normalized_pitch(shifted_f0);

    status.current_pitch.store(f0_norm, Ordering::Release);
    status.current_rms.store(loudness_norm, Ordering::Release);

    *features = AudioFeatures {
        f0_hz: shifted_f0,
        loudness_db: denormalize_loudness(loudness_norm),
        f0_norm,
        loudness_norm,
    };

    if let Err(e) = model.call(features, controls) {
        log::warn!("decoder frame skipped: {e}");
        return;
    }

    let harmonic_gain = inputs.harmonic_gain.load(Ordering::Acquire);
    let noise_gain = inputs.noise_gain.load(Ordering::Acquire);
    controls.amplitude *= harmonic_gain;
    for amp in &mut controls.noise_amps {
        *amp *= noise_gain;
    }

    let amplitude = controls.amplitude;
    let f0 = controls.f0_hz;
    let harmonic = harmonic_synth.render(&mut controls.harmonics, amplitude, f0);
    let noise = noise_synth.render(&controls.noise_amps);
    for (out, (h, n)) in synthesis_buffer
        .iter_mut()
        .zip(harmonic.iter().zip(noise.iter()))
    {
        *out = h + n;
    }

    let produced = resampler.process(synthesis_buffer, resampled_buffer);

    let written = output_ring.write(&resampled_buffer[..produced]);
    if written < produced {
        // Producer-side drop: the audio thread is never blocked.
        status.overflow_count.fetch_add(1, Ordering::Relaxed);
    }
    status.frame_count.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_config() {
        assert!(InferencePipeline::new(0, 512).is_err());
        assert!(InferencePipeline::new(48_000, 0).is_err());
        let mut pipeline = InferencePipeline::new(48_000, 512).unwrap();
        assert!(pipeline.prepare(0, 512).is_err());
        assert!(pipeline.prepare(44_100, 256).is_ok());
        assert_eq!(pipeline.user_hop_size(), 882);
    }

    #[test]
    fn test_setters_clamp_at_boundary() {
        let pipeline = InferencePipeline::new(48_000, 512).unwrap();

        pipeline.set_f0_hz(100_000.0);
        assert_eq!(pipeline.inputs.f0_hz.load(Ordering::Acquire), PITCH_MAX_HZ);
        pipeline.set_f0_hz(0.0);
        assert_eq!(pipeline.inputs.f0_hz.load(Ordering::Acquire), PITCH_MIN_HZ);

        pipeline.set_loudness_norm(2.0);
        assert_eq!(pipeline.inputs.loudness_norm.load(Ordering::Acquire), 1.0);
        pipeline.set_loudness_db(-40.0);
        assert_eq!(pipeline.inputs.loudness_norm.load(Ordering::Acquire), 0.5);

        pipeline.set_harmonic_gain(50.0);
        assert_eq!(pipeline.inputs.harmonic_gain.load(Ordering::Acquire), 10.0);
        pipeline.set_noise_gain(-1.0);
        assert_eq!(pipeline.inputs.noise_gain.load(Ordering::Acquire), 0.0);
    }

    #[test]
    fn test_reset_pads_input_ring_and_clears_output() {
        let pipeline = InferencePipeline::new(48_000, 512).unwrap();
        pipeline.reset();
        assert_eq!(pipeline.input_ring.available(), user_frame_size(48_000));
        assert_eq!(pipeline.ready_samples(), 0);

        // reset(); reset() == reset()
        pipeline.reset();
        assert_eq!(pipeline.input_ring.available(), user_frame_size(48_000));
    }

    #[test]
    fn test_next_block_pads_silence_when_empty() {
        let pipeline = InferencePipeline::new(48_000, 512).unwrap();
        let mut block = [1.0f32; 512];
        let count = pipeline.next_block(&mut block);
        assert_eq!(count, 0);
        assert!(block.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_render_without_model_publishes_nothing() {
        let pipeline = InferencePipeline::new(48_000, 512).unwrap();
        pipeline.trigger_render();
        assert_eq!(pipeline.ready_samples(), 0);
        assert_eq!(pipeline.frame_count(), 0);
        assert!(!pipeline.is_ready());
    }
}
