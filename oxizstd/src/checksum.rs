//! Frame content checksum.
//!
//! A frame checksum is the low 32 bits of XXH64 (seed 0) over the
//! uncompressed content, written little-endian after the last block.

use xxhash_rust::xxh64::Xxh64;

/// Size of the checksum epilogue.
pub const CHECKSUM_SIZE: usize = 4;

/// Incremental frame checksum.
#[derive(Clone)]
pub struct FrameChecksum {
    state: Xxh64,
}

impl std::fmt::Debug for FrameChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChecksum").field("digest", &self.digest()).finish()
    }
}

impl Default for FrameChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameChecksum {
    /// Fresh state.
    pub fn new() -> Self {
        Self { state: Xxh64::new(0) }
    }

    /// Restart for a new frame.
    pub fn reset(&mut self) {
        self.state.reset(0);
    }

    /// Feed content bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Low 32 bits of the running digest.
    pub fn digest(&self) -> u32 {
        self.state.digest() as u32
    }

    /// Write the epilogue. Returns bytes written.
    pub fn write(&self, dst: &mut [u8]) -> Option<usize> {
        let out = dst.get_mut(..CHECKSUM_SIZE)?;
        out.copy_from_slice(&self.digest().to_le_bytes());
        Some(CHECKSUM_SIZE)
    }
}

/// Checksum of a whole buffer.
pub fn checksum(data: &[u8]) -> u32 {
    xxhash_rust::xxh64::xxh64(data, 0) as u32
}
