//! Block-compression driver.
//!
//! Thin wrapper over the external block codec (LZ4, via `lz4_flex`): routes
//! a [`CompressionLevel`] to a fixed- or dynamic-block engine and streams a
//! source buffer through it one block at a time.
//!
//! ## Streaming contract
//!
//! A [`Compressor`] is created per pack with `(block_size, source, level)`.
//! Each [`Compressor::pack`] call consumes one input block and reports:
//!
//! * [`PackState::NotDone`]: block emitted, more input remains; call again.
//! * [`PackState::Done`]: block emitted (possibly empty), input exhausted.
//! * [`PackState::Incompressible`]: the block did not shrink. Nothing was
//!   emitted; the caller copies the input block verbatim and records its
//!   *uncompressed* length as the block's stored size. The compressor has
//!   already advanced past the block, so the caller just keeps going.
//!
//! `Incompressible` is never an error; it is the codec refusing to waste
//! bytes. The driver guarantees an emitted block is *strictly smaller* than
//! its input, which is what makes the loader's "stored size equals block
//! size ⇒ copy verbatim" rule unambiguous.
//!
//! ## Engines
//!
//! The level mapping keeps the external codec's routing: `Fast` and `Low`
//! select the fixed-block engine (`FAST` / `MEDIUM` fixed presets), `Medium`
//! and `High` the dynamic-block engine (`MEDIUM` / `HIGH` dynamic presets).
//! Both engines bottom out in LZ4 block compression (the backend exposes a
//! single strategy), and every block, whichever engine produced it, is
//! readable by the one [`Decompressor`].

use crate::error::{RespakError, Result};

/// Compression quality requested at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fixed-block engine, fastest preset.
    Fast,
    /// Fixed-block engine, medium preset.
    Low,
    /// Dynamic-block engine, medium preset.
    #[default]
    Medium,
    /// Dynamic-block engine, high preset.
    High,
}

/// Result state of one [`Compressor::pack`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackState {
    /// A block was emitted and more input remains.
    NotDone,
    /// A block was emitted and the input is exhausted.
    Done,
    /// The current block did not shrink; store it verbatim.
    Incompressible,
}

/// Which block engine a level routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Fixed,
    Dynamic,
}

fn engine_for(level: CompressionLevel) -> Engine {
    match level {
        CompressionLevel::Fast | CompressionLevel::Low => Engine::Fixed,
        CompressionLevel::Medium | CompressionLevel::High => Engine::Dynamic,
    }
}

/// Streaming block compressor over one source buffer.
#[derive(Debug)]
pub struct Compressor<'a> {
    source: &'a [u8],
    block_size: usize,
    position: usize,
    last_position: usize,
    engine: Engine,
}

impl<'a> Compressor<'a> {
    /// Creates a compressor for `source`, consuming `block_size` input
    /// bytes per call (the final block may be shorter).
    pub fn new(block_size: u32, source: &'a [u8], level: CompressionLevel) -> Self {
        Self {
            source,
            block_size: block_size as usize,
            position: 0,
            last_position: 0,
            engine: engine_for(level),
        }
    }

    /// Input offset of the next block.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Name of the engine the level routed to, for diagnostics.
    pub fn engine_name(&self) -> &'static str {
        match self.engine {
            Engine::Fixed => "fixed",
            Engine::Dynamic => "dynamic",
        }
    }

    /// Input offset of the block handled by the most recent
    /// [`pack`](Self::pack) call; the verbatim fallback copies from here.
    pub fn last_position(&self) -> usize {
        self.last_position
    }

    /// Compresses the next input block into `out`.
    ///
    /// `out` must have room for `block_size` bytes. Returns the number of
    /// bytes written (0 for `Incompressible`) and the stream state.
    pub fn pack(&mut self, out: &mut [u8]) -> Result<(usize, PackState)> {
        self.last_position = self.position;

        let remaining = self.source.len() - self.position;
        if remaining == 0 {
            return Ok((0, PackState::Done));
        }

        let input_len = remaining.min(self.block_size);
        let input = &self.source[self.position..self.position + input_len];
        if out.len() < input_len {
            return Err(RespakError::Codec(format!(
                "output slice too small for block: {} < {}",
                out.len(),
                input_len
            )));
        }

        // Give the backend exactly the input length to work with: a block
        // that cannot beat its own size is incompressible by contract.
        self.position += input_len;
        let written = match lz4_flex::block::compress_into(input, &mut out[..input_len]) {
            Ok(written) if written < input_len => written,
            // Filled the whole budget or refused to fit: no gain.
            Ok(_) | Err(_) => return Ok((0, PackState::Incompressible)),
        };

        let state = if self.position < self.source.len() {
            PackState::NotDone
        } else {
            PackState::Done
        };
        Ok((written, state))
    }
}

/// Block decompressor. One instance serves every block of a pack.
#[derive(Debug)]
pub struct Decompressor {
    block_size: u32,
}

impl Decompressor {
    /// Creates a decompressor for packs using the given block size.
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    /// Decompresses one stored block from `src` into the front of `dst`.
    /// Returns the number of bytes produced.
    pub fn unpack(&mut self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        let written = lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| RespakError::Codec(e.to_string()))?;
        if written as u64 > u64::from(self.block_size) {
            return Err(RespakError::Corrupt(format!(
                "block decompressed to {} bytes, block size is {}",
                written, self.block_size
            )));
        }
        Ok(written)
    }
}

// The engine routing touches the private `Engine` enum, so this one check
// stays next to it; everything else is exercised from `tests/`.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_route_to_their_engines() {
        assert_eq!(engine_for(CompressionLevel::Fast), Engine::Fixed);
        assert_eq!(engine_for(CompressionLevel::Low), Engine::Fixed);
        assert_eq!(engine_for(CompressionLevel::Medium), Engine::Dynamic);
        assert_eq!(engine_for(CompressionLevel::High), Engine::Dynamic);
    }
}
