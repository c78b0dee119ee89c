//! Offline renderer: drives the synthesis pipeline without an audio device
//! and writes the result to a WAV file.
//!
//! ```text
//! offline_synth --model path/to/decoder.onnx --out sweep.wav \
//!     --f0 220 --loudness 0.6 --seconds 3 --rate 48000
//! ```
//!
//! The model path falls back to the `DDSP_MODEL_PATH` environment variable.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use ddsp_engine_rs::constants::{DEFAULT_INFERENCE_INTERVAL_MS, MODEL_PATH_ENV};
use ddsp_engine_rs::InferencePipeline;

fn parse_arg(args: &[String], key: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == key).map(|w| w[1].clone())
}

fn parse_arg_f32(args: &[String], key: &str, default: f32) -> f32 {
    parse_arg(args, key)
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(default)
}

fn parse_arg_u32(args: &[String], key: &str, default: u32) -> u32 {
    parse_arg(args, key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let model_path = parse_arg(&args, "--model")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(MODEL_PATH_ENV).map(PathBuf::from));
    let Some(model_path) = model_path else {
        bail!("no model: pass --model <path> or set {MODEL_PATH_ENV}");
    };

    let out_path = parse_arg(&args, "--out").unwrap_or_else(|| "ddsp_render.wav".into());
    let sample_rate = parse_arg_u32(&args, "--rate", 48_000);
    let f0_hz = parse_arg_f32(&args, "--f0", 220.0);
    let loudness = parse_arg_f32(&args, "--loudness", 0.6);
    let pitch_shift = parse_arg_f32(&args, "--shift", 0.0);
    let seconds = parse_arg_f32(&args, "--seconds", 3.0);

    let pipeline = InferencePipeline::new(sample_rate, 512)
        .context("pipeline configuration rejected")?;
    pipeline
        .load_model(&model_path, 2)
        .with_context(|| format!("loading {}", model_path.display()))?;

    pipeline.set_f0_hz(f0_hz);
    pipeline.set_loudness_norm(loudness);
    pipeline.set_pitch_shift(pitch_shift);

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer =
        WavWriter::create(&out_path, spec).with_context(|| format!("creating {out_path}"))?;

    // Render inline, one worker iteration per hop interval of audio.
    let total_samples = (seconds * sample_rate as f32) as usize;
    let hops = total_samples.div_ceil(
        (sample_rate as u64 * DEFAULT_INFERENCE_INTERVAL_MS as u64 / 1000) as usize,
    );
    let mut block = vec![0.0f32; pipeline.user_hop_size()];
    let mut written_samples = 0usize;
    for _ in 0..hops {
        pipeline.trigger_render();
        let n = pipeline.next_block(&mut block);
        for &sample in &block[..n.min(total_samples - written_samples)] {
            writer.write_sample(sample)?;
        }
        written_samples += n;
        if written_samples >= total_samples {
            break;
        }
    }
    writer.finalize()?;

    log::info!(
        "wrote {} samples ({:.2} s) to {out_path}",
        written_samples.min(total_samples),
        written_samples.min(total_samples) as f32 / sample_rate as f32
    );
    Ok(())
}
