pub mod capture;
pub mod chunk;
pub mod file;

pub use capture::{AudioCapture, CaptureError};
pub use chunk::{AudioBatch, AudioChunk, ChunkAggregator};
pub use file::WavCapture;
