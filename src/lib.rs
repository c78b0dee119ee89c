//! # ddsp-engine-rs
//!
//! Real-time DDSP neural audio synthesis: a pre-trained decoder predicts
//! synthesis controls (amplitude, a 60-band harmonic distribution, a 65-band
//! noise spectrum) from a fundamental frequency and a loudness value, and two
//! DSP synthesizers render them to audio.
//!
//! ## Quick start
//!
//! ```ignore
//! use ddsp_engine_rs::InferencePipeline;
//!
//! let mut pipeline = InferencePipeline::new(48_000, 512)?;
//! pipeline.load_model("models/violin.onnx", 2)?;
//! pipeline.start(20);
//!
//! // Host parameter thread:
//! pipeline.set_f0_hz(440.0);
//! pipeline.set_loudness_norm(0.6);
//!
//! // Audio callback:
//! let written = pipeline.next_block(&mut block);
//! ```
//!
//! ## Architecture
//!
//! - [`features`] - pure pitch/loudness feature mapping
//! - [`model`] - decoder runner over ONNX Runtime, recurrent state carried
//!   across frames, tensors resolved by name
//! - [`harmonic`] - phase-continuous additive synthesizer
//! - [`noise`] - frequency-sampling FIR + FFT-convolved white noise
//! - [`ring_buffer`] - lock-free SPSC sample FIFO
//! - [`resampler`] - polyphase windowed-sinc 16 kHz -> host rate bridge
//! - [`pipeline`] - worker-thread orchestration of all of the above
//!
//! ## Threading contract
//!
//! The audio thread may call `next_block`, the parameter setters and the
//! observability getters; these never block, lock or allocate. Everything
//! else (prepare, load, start/stop, reset) belongs to a control thread. The
//! render worker is the only thread that touches DSP state.
//!
//! ## Hardware acceleration
//!
//! Decoder delegates are selected via cargo features (`coreml`, `cuda`,
//! `xnnpack`). Each silently falls back to plain CPU execution when
//! unavailable.

pub mod constants;
pub mod error;
pub mod features;
pub mod harmonic;
pub mod model;
pub mod noise;
pub mod pipeline;
pub mod resampler;
pub mod ring_buffer;

pub use error::{EngineError, Result};
pub use model::{
    sanitize_controls, AudioFeatures, ControlModel, PredictControlsModel, SynthesisControls,
};
pub use pipeline::InferencePipeline;
