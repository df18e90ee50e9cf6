//! Approximate ignore set for noisy command names.
//!
//! A Bloom filter over executable names that rarely help a model suggest a
//! command (versioned toolchain binaries, distro helper scripts and so on).
//! It lets the context gatherer drop those names from a large PATH listing
//! without a linear scan against the full exclusion list.
//!
//! # Persisted format
//!
//! ```text
//! byte_len  : u64 little-endian   length of the packed bit vector in bytes
//! bit_count : u64 little-endian   m, number of addressable bits
//! hash_count: u32 little-endian   k, number of seeded hashes per item
//! bits      : [u8; byte_len]      bit i lives in byte i / 8, mask 1 << (i % 8)
//! ```

use crate::error::IgnoreSetError;
use once_cell::sync::OnceCell;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// False-positive rate used for every ignore set the application builds.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// File name of the persisted filter inside the config directory.
pub const PERSISTED_FILE_NAME: &str = "ignore_commands.bloom";

/// File name of a user-maintained source list inside the config directory.
pub const SOURCE_FILE_NAME: &str = "ignore_commands.txt";

const HEADER_LEN: usize = 8 + 8 + 4;

const DEFAULT_SOURCE: &str = include_str!("../data/ignore_commands.txt");

static GLOBAL: OnceCell<Arc<IgnoreSet>> = OnceCell::new();

/// Packed Bloom filter with a fixed false-positive target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSet {
    bits: Vec<u8>,
    bit_count: u64,
    hash_count: u32,
}

impl IgnoreSet {
    /// Builds a filter containing `items` sized for `false_positive_rate`.
    pub fn build<I, S>(items: I, false_positive_rate: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items: Vec<S> = items.into_iter().collect();
        let (bit_count, hash_count) = Self::optimal_parameters(items.len(), false_positive_rate);
        let mut set = Self {
            bits: vec![0; bit_count.div_ceil(8) as usize],
            bit_count,
            hash_count,
        };
        for item in &items {
            set.insert(item.as_ref());
        }
        debug!(
            "Built ignore set: {} items, {} bits, {} hashes",
            items.len(),
            bit_count,
            hash_count
        );
        set
    }

    /// Computes `(m, k)` for `n` items at false-positive rate `p`.
    ///
    /// An empty source yields a minimal one-byte filter that reports nothing
    /// as present.
    pub fn optimal_parameters(n: usize, p: f64) -> (u64, u32) {
        if n == 0 {
            return (8, 1);
        }
        let p = p.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let n = n as f64;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(1.0);
        let k = ((m / n) * ln2).round().max(1.0);
        (m as u64, k as u32)
    }

    /// Builds a filter from a newline-separated source list.
    pub fn from_source_file(path: &Path, false_positive_rate: f64) -> Result<Self, IgnoreSetError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_source_text(&content, false_positive_rate))
    }

    fn from_source_text(content: &str, false_positive_rate: f64) -> Self {
        let items = content.lines().map(str::trim).filter(|line| !line.is_empty());
        Self::build(items, false_positive_rate)
    }

    /// Builds the filter from the list compiled into the binary.
    pub fn embedded_default() -> Self {
        Self::from_source_text(DEFAULT_SOURCE, DEFAULT_FALSE_POSITIVE_RATE)
    }

    fn insert(&mut self, item: &str) {
        for seed in 0..self.hash_count {
            let bit = self.bit_index(item, seed);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns true if `item` may be in the set. Inserted items always are.
    pub fn contains(&self, item: &str) -> bool {
        (0..self.hash_count).all(|seed| {
            let bit = self.bit_index(item, seed);
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    /// True for hidden names and for anything the filter reports as present.
    pub fn should_ignore(&self, command: &str) -> bool {
        command.starts_with('.') || self.contains(command)
    }

    fn bit_index(&self, item: &str, seed: u32) -> u64 {
        u64::from(murmur3_32(item.as_bytes(), seed)) % self.bit_count
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len());
        out.extend_from_slice(&(self.bits.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.bit_count.to_le_bytes());
        out.extend_from_slice(&self.hash_count.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, IgnoreSetError> {
        if data.len() < HEADER_LEN {
            return Err(IgnoreSetError::Truncated(data.len()));
        }
        let byte_len = read_u64(&data[0..8]);
        let bit_count = read_u64(&data[8..16]);
        let hash_count = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);

        if bit_count == 0 || hash_count == 0 {
            return Err(IgnoreSetError::BadHeader(format!(
                "bit_count={bit_count}, hash_count={hash_count}"
            )));
        }
        if byte_len != bit_count.div_ceil(8) {
            return Err(IgnoreSetError::BadHeader(format!(
                "{byte_len} bytes cannot hold exactly {bit_count} bits"
            )));
        }
        let body = &data[HEADER_LEN..];
        if body.len() as u64 != byte_len {
            return Err(IgnoreSetError::Truncated(data.len()));
        }

        Ok(Self {
            bits: body.to_vec(),
            bit_count,
            hash_count,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IgnoreSetError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes())?;
        info!("Saved ignore set to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IgnoreSetError> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Loads the persisted filter from `config_dir`, falling back to a
    /// user source list there, then to the embedded default list.
    pub fn load_or_build(config_dir: &Path) -> Self {
        let persisted = config_dir.join(PERSISTED_FILE_NAME);
        if persisted.exists() {
            match Self::load(&persisted) {
                Ok(set) => {
                    debug!("Loaded ignore set from {}", persisted.display());
                    return set;
                }
                Err(e) => warn!("Ignoring unreadable {}: {}", persisted.display(), e),
            }
        }

        let source = config_dir.join(SOURCE_FILE_NAME);
        if source.exists() {
            match Self::from_source_file(&source, DEFAULT_FALSE_POSITIVE_RATE) {
                Ok(set) => return set,
                Err(e) => warn!("Ignoring unreadable {}: {}", source.display(), e),
            }
        }

        Self::embedded_default()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Installs the process-wide ignore set, running `loader` only on the first
/// call. Later calls return the instance already installed.
pub fn initialize<F>(loader: F) -> Arc<IgnoreSet>
where
    F: FnOnce() -> IgnoreSet,
{
    GLOBAL.get_or_init(|| Arc::new(loader())).clone()
}

/// The process-wide ignore set, if [`initialize`] has run.
pub fn global() -> Option<Arc<IgnoreSet>> {
    GLOBAL.get().cloned()
}

/// MurmurHash3, x86 32-bit variant.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    let mut k = 0u32;
    for (i, byte) in tail.iter().enumerate() {
        k ^= u32::from(*byte) << (8 * i);
    }
    if !tail.is_empty() {
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
