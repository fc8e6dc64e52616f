//! TTS module for text-to-speech synthesis using kokoro-tiny.
//!
//! Implements [`SpeechSynthesizer`] by rendering text to samples with the
//! kokoro engine and writing each turn's audio artifact as a WAV file under
//! the configured output directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use uuid::Uuid;

use crate::error::SynthesisError;
use crate::pipeline::SpeechSynthesizer;

/// Kokoro output sample rate.
const SAMPLE_RATE: u32 = 24_000;
/// Silence inserted between chunks (0.3 s) to prevent cutoff.
const CHUNK_GAP_SAMPLES: usize = 7_200;
/// Trailing padding (0.5 s) at the end of a message.
const TAIL_GAP_SAMPLES: usize = 12_000;
/// Kokoro has a strict limit on input length per call.
const MAX_CHUNK_CHARS: usize = 200;

/// Voice synthesizer backed by kokoro-tiny.
pub struct KokoroSynthesizer {
    /// Synthesis needs `&mut`; calls run one at a time inside spawn_blocking.
    engine: Arc<Mutex<TtsEngine>>,
    available_voices: Vec<String>,
    output_dir: PathBuf,
}

impl KokoroSynthesizer {
    /// Initialize the TTS engine (downloads the model on first run) and
    /// ensure the artifact directory exists.
    pub async fn new(output_dir: impl Into<PathBuf>) -> Result<Self, SynthesisError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| SynthesisError::Engine(format!("Failed to initialize TTS: {}", e)))?;
        let available_voices = engine.voices();

        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            available_voices,
            output_dir,
        })
    }

    /// Get list of available voice IDs.
    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), SynthesisError> {
        if voice_id.is_empty() || !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(SynthesisError::UnknownVoice(voice_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError> {
        self.validate_voice(voice)?;

        let engine = Arc::clone(&self.engine);
        let text = text.to_string();
        let voice_id = voice.to_string();

        let samples = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().expect("tts engine lock poisoned");
            render_chunks(&mut engine, &text, &voice_id)
        })
        .await
        .map_err(|e| SynthesisError::Engine(format!("synthesis task failed: {}", e)))??;

        let tag = Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}.wav", voice, &tag[..6]);
        let path = self.output_dir.join(filename);
        write_wav(&path, &samples)?;

        Ok(path.to_string_lossy().into_owned())
    }
}

/// Synthesize text chunk by chunk with silence gaps between chunks.
fn render_chunks(
    engine: &mut TtsEngine,
    text: &str,
    voice_id: &str,
) -> Result<Vec<f32>, SynthesisError> {
    let mut all_samples = Vec::new();

    for chunk in split_into_chunks(text, MAX_CHUNK_CHARS) {
        if chunk.trim().is_empty() {
            continue;
        }

        let samples = engine
            .synthesize(&chunk, Some(voice_id))
            .map_err(|e| SynthesisError::Engine(format!("Synthesis failed: {}", e)))?;

        all_samples.extend(samples);
        all_samples.extend(vec![0.0; CHUNK_GAP_SAMPLES]);
    }

    all_samples.extend(vec![0.0; TAIL_GAP_SAMPLES]);
    Ok(all_samples)
}

/// Write mono 16-bit PCM at the kokoro sample rate.
fn write_wav(path: &Path, samples: &[f32]) -> Result<(), SynthesisError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| SynthesisError::Engine(format!("Failed to create WAV: {}", e)))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(value)
            .map_err(|e| SynthesisError::Engine(format!("Failed to write WAV: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| SynthesisError::Engine(format!("Failed to finalize WAV: {}", e)))?;
    Ok(())
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    // Split by sentence-ending punctuation
    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            // If a single sentence is too long, split by commas
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars {
                        if !current_chunk.is_empty() {
                            chunks.push(current_chunk.trim().to_string());
                            current_chunk = String::new();
                        }
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                }
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        } else {
            current_chunk.push_str(sentence);
            current_chunk.push(' ');
        }
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}
