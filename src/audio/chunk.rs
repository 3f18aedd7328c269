use tracing::warn;

/// A single captured audio segment, as delivered by the capture source.
///
/// The payload carries the source's transport encoding (base64 over raw
/// PCM); `length` is the decoded byte count reported by the source and is
/// checked against the actual decoded size before transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Base64-encoded audio bytes
    pub payload: String,
    /// Decoded byte count reported by the capture source
    pub length: usize,
}

impl AudioChunk {
    pub fn new(payload: impl Into<String>, length: usize) -> Self {
        Self {
            payload: payload.into(),
            length,
        }
    }
}

/// An ordered, non-empty group of chunks sent as one outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBatch {
    chunks: Vec<AudioChunk>,
}

impl AudioBatch {
    /// Returns `None` when `chunks` is empty; a batch is never empty.
    pub fn new(chunks: Vec<AudioChunk>) -> Option<Self> {
        if chunks.is_empty() {
            None
        } else {
            Some(Self { chunks })
        }
    }

    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Accumulates chunks into send-ready batches.
///
/// With `batch_size` N, a batch is emitted on every Nth push; with
/// `batch_size` 1 every chunk passes straight through (used when the
/// capture source already segments on voice activity). `flush` force-emits
/// whatever is buffered, which is how the final partial batch gets out on
/// stop. Chunks keep their arrival order and none are dropped here.
#[derive(Debug)]
pub struct ChunkAggregator {
    batch_size: usize,
    buffer: Vec<AudioChunk>,
}

impl ChunkAggregator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = if batch_size == 0 {
            warn!("batch_size 0 is not meaningful, clamping to 1");
            1
        } else {
            batch_size
        };

        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of chunks currently buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Add a chunk; returns a full batch once `batch_size` chunks have
    /// accumulated.
    pub fn push(&mut self, chunk: AudioChunk) -> Option<AudioBatch> {
        self.buffer.push(chunk);

        if self.buffer.len() >= self.batch_size {
            self.flush()
        } else {
            None
        }
    }

    /// Force out any partial batch; `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<AudioBatch> {
        if self.buffer.is_empty() {
            return None;
        }

        let chunks = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        AudioBatch::new(chunks)
    }
}
