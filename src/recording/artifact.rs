use hound::{SampleFormat, WavSpec, WavWriter};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Playback reference to a finished recording, valid until revoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactUrl(String);

impl fmt::Display for ArtifactUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    blobs: HashMap<ArtifactUrl, Arc<[u8]>>,
}

/// Process-local store mapping artifact URLs to their bytes.
#[derive(Clone, Default)]
pub struct ArtifactRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: Arc<[u8]>) -> ArtifactUrl {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let url = ArtifactUrl(format!("blob:echoloop/{}", inner.next_id));
        inner.blobs.insert(url.clone(), bytes);
        url
    }

    pub fn resolve(&self, url: &ArtifactUrl) -> Option<Arc<[u8]>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.blobs.get(url).cloned()
    }

    /// Invalidate `url`. Returns false if it was not live.
    pub fn revoke(&self, url: &ArtifactUrl) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.blobs.remove(url).is_some();
        if removed {
            debug!("Revoked {}", url);
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).blobs.len()
    }
}

/// Finalized, immutable recording.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    /// Complete WAV file contents
    pub bytes: Arc<[u8]>,
    pub url: ArtifactUrl,
    /// Active (non-paused) recording time
    pub duration: Duration,
    pub sample_rate: u32,
    pub sample_count: usize,
}

impl RecordingArtifact {
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)
    }
}

/// Ordered chunks captured during one recording.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    chunks: Vec<Vec<f32>>,
    samples: usize,
}

impl RecordingBuffer {
    pub fn append(&mut self, chunk: Vec<f32>) {
        self.samples += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn into_samples(self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Encode mono samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            let sample = if s.is_finite() {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            } else {
                0
            };
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
