//! Adaptive block compression
//!
//! Selects an algorithm and level per block, either from the input's
//! byte entropy (level 0) or from the compression ratio of the previous
//! block (the worker's policy). Ratio history per algorithm is tracked as
//! an exponential moving average and drives algorithm selection.
//!
//! # Example
//!
//! ```
//! use corestage::compress::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new();
//! let data = vec![0u8; 4096];
//!
//! let out = manager.compress(&data, 0, CompressionAlgorithm::Zstd).unwrap();
//! let back = manager
//!     .decompress(&out.data, data.len(), out.algorithm)
//!     .unwrap();
//! assert_eq!(back.as_ref(), data.as_slice());
//! ```

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Smoothing factor for the per-algorithm ratio averages
const RATIO_EMA_ALPHA: f64 = 0.1;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// Zstandard - balanced speed and ratio (default)
    Zstd,
    /// LZ4 - fast compression
    Lz4,
    /// Gzip (DEFLATE) - widely compatible
    Gzip,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Zstd => "zstd",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Gzip => "gzip",
        }
    }

    /// Get typical compression ratio (compressed / original) used before
    /// any real observations exist
    pub fn typical_ratio(&self) -> f64 {
        match self {
            CompressionAlgorithm::Zstd => 0.4,
            CompressionAlgorithm::Lz4 => 0.5,
            CompressionAlgorithm::Gzip => 0.45,
        }
    }

    /// Get list of available algorithms
    pub fn available_algorithms() -> Vec<Self> {
        vec![Self::Zstd, Self::Lz4, Self::Gzip]
    }

    fn index(&self) -> usize {
        match self {
            CompressionAlgorithm::Zstd => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Gzip => 2,
        }
    }
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::Zstd
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Entropy
// =============================================================================

/// 8-bit Shannon entropy of a byte slice, in bits per byte (0.0 - 8.0)
pub fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0u64; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in freq.iter() {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Level chosen for a block from its entropy: highly ordered data gets a
/// cheap level, high-entropy data gets pushed harder
pub fn level_for_entropy(entropy: f64) -> i32 {
    if entropy < 4.0 {
        1
    } else if entropy < 6.0 {
        3
    } else {
        5
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for adaptive compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Default algorithm to use
    pub default_algorithm: CompressionAlgorithm,
    /// Lower level bound for the prior-ratio selector
    pub min_level: i32,
    /// Upper level bound for the prior-ratio selector
    pub max_level: i32,
    /// Ratio above which data counts as poorly compressible
    pub adaptive_threshold: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: CompressionAlgorithm::Zstd,
            min_level: 1,
            max_level: 5,
            adaptive_threshold: 0.8,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data at the given level (clamped to the codec's range)
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>>;

    /// Decompress data; `capacity` bounds the decompressed size
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>>;
}

// =============================================================================
// Zstd Compressor
// =============================================================================

/// Zstandard compressor (levels 1-22)
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let level = level.clamp(1, 22);
        zstd::bulk::compress(data, level).map_err(|e| Error::CompressionFailed {
            algorithm: self.algorithm().name().into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>> {
        zstd::bulk::decompress(data, capacity).map_err(|e| Error::DecompressionFailed {
            algorithm: self.algorithm().name().into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 compressor (high-compression mode, levels clamped to 1-12)
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let level = level.clamp(1, 12);
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: self.algorithm().name().into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8], _capacity: usize) -> Result<Vec<u8>> {
        // Size is prepended at compression time
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: self.algorithm().name().into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Gzip Compressor
// =============================================================================

/// Gzip compressor (levels clamped to 1-9)
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        let level = level.clamp(1, 9) as u32;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::CompressionFailed {
                algorithm: self.algorithm().name().into(),
                reason: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::with_capacity(capacity);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: self.algorithm().name().into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

// =============================================================================
// Compression Outcome & Stats
// =============================================================================

/// Result of one successful compression
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Compressed bytes
    pub data: Bytes,
    /// Algorithm that produced them
    pub algorithm: CompressionAlgorithm,
    /// Level actually used (after level-0 resolution)
    pub level: i32,
}

/// Compression statistics snapshot
#[derive(Debug, Clone)]
pub struct CompressionStats {
    /// Successful compressions
    pub compressions: u64,
    /// Successful decompressions
    pub decompressions: u64,
    /// Failed operations
    pub failures: u64,
    /// Total uncompressed bytes in
    pub bytes_in: u64,
    /// Total compressed bytes out
    pub bytes_out: u64,
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Manager for adaptive compression with per-algorithm ratio tracking
pub struct CompressionManager {
    config: CompressionConfig,
    zstd: ZstdCompressor,
    lz4: Lz4Compressor,
    gzip: GzipCompressor,
    /// EMA of observed ratios, indexed by algorithm
    ratios: Mutex<[Option<f64>; 3]>,
    compressions: AtomicU64,
    decompressions: AtomicU64,
    failures: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl CompressionManager {
    /// Create a new manager with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            config,
            zstd: ZstdCompressor,
            lz4: Lz4Compressor,
            gzip: GzipCompressor,
            ratios: Mutex::new([None; 3]),
            compressions: AtomicU64::new(0),
            decompressions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    /// Get compressor for algorithm
    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::Zstd => &self.zstd,
            CompressionAlgorithm::Lz4 => &self.lz4,
            CompressionAlgorithm::Gzip => &self.gzip,
        }
    }

    /// Compress a block with the given algorithm.
    ///
    /// A `level` of 0 asks the manager to pick one from the block's
    /// entropy; any other value is used as-is (clamped per codec).
    pub fn compress(
        &self,
        data: &[u8],
        level: i32,
        algorithm: CompressionAlgorithm,
    ) -> Result<CompressionOutcome> {
        if data.is_empty() {
            return Err(Error::InvalidParameter("cannot compress empty input".into()));
        }
        let level = if level == 0 {
            level_for_entropy(entropy(data))
        } else {
            level
        };

        match self.compressor(algorithm).compress(data, level) {
            Ok(compressed) => {
                self.compressions.fetch_add(1, Ordering::Relaxed);
                self.bytes_in.fetch_add(data.len() as u64, Ordering::Relaxed);
                self.bytes_out
                    .fetch_add(compressed.len() as u64, Ordering::Relaxed);
                self.observe_ratio(algorithm, compressed.len() as f64 / data.len() as f64);
                Ok(CompressionOutcome {
                    data: Bytes::from(compressed),
                    algorithm,
                    level,
                })
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Decompress a block compressed with `algorithm`
    pub fn decompress(
        &self,
        data: &[u8],
        capacity: usize,
        algorithm: CompressionAlgorithm,
    ) -> Result<Bytes> {
        if data.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot decompress empty input".into(),
            ));
        }
        match self.compressor(algorithm).decompress(data, capacity) {
            Ok(out) => {
                self.decompressions.fetch_add(1, Ordering::Relaxed);
                Ok(Bytes::from(out))
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn observe_ratio(&self, algorithm: CompressionAlgorithm, ratio: f64) {
        let mut ratios = self.ratios.lock();
        let slot = &mut ratios[algorithm.index()];
        *slot = Some(match *slot {
            Some(prev) => RATIO_EMA_ALPHA * ratio + (1.0 - RATIO_EMA_ALPHA) * prev,
            None => ratio,
        });
    }

    /// Exponential moving average of past ratios for an algorithm, or the
    /// algorithm's typical ratio before any observation
    pub fn predict_ratio(&self, algorithm: CompressionAlgorithm) -> f64 {
        self.ratios.lock()[algorithm.index()].unwrap_or_else(|| algorithm.typical_ratio())
    }

    /// Algorithm with the best (lowest) recent predicted ratio; ties and
    /// cold starts resolve to Zstd
    pub fn select_algorithm(&self) -> CompressionAlgorithm {
        let mut best = CompressionAlgorithm::Zstd;
        let mut best_ratio = self.predict_ratio(best);
        for algorithm in [CompressionAlgorithm::Lz4, CompressionAlgorithm::Gzip] {
            let ratio = self.predict_ratio(algorithm);
            if ratio < best_ratio {
                best = algorithm;
                best_ratio = ratio;
            }
        }
        best
    }

    /// The worker's level policy: if the previous block compressed poorly
    /// (ratio above the adaptive threshold) push harder, otherwise stay
    /// cheap
    pub fn level_from_prior_ratio(&self, prev_orig: usize, prev_comp: usize) -> i32 {
        if prev_orig == 0 {
            return self.config.min_level;
        }
        let ratio = prev_comp as f64 / prev_orig as f64;
        if ratio > self.config.adaptive_threshold {
            self.config.max_level
        } else {
            self.config.min_level
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> CompressionStats {
        CompressionStats {
            compressions: self.compressions.load(Ordering::Relaxed),
            decompressions: self.decompressions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
