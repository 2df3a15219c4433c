//! MEL significance coder.
//!
//! Run-codes the per-sample significance flags of the cleanup pass. A 0 bit
//! stands for a full run of `2^k` insignificant samples and grows the run
//! state `k`; a 1 bit ends a run early, carries `k` remainder bits holding
//! the partial run length, and shrinks `k`. Output bytes use 0xFF stuffing,
//! so a stuffed `FF 00` pair can never alias a marker inside a tile payload.

/// MEL state ceiling.
const MAX_K: i32 = 12;

pub struct MelEncoder {
    buffer: Vec<u8>,
    current_byte: u8,
    bits_in_byte: u8,
    k: i32,
    /// Insignificant samples accumulated toward the current run.
    run: u32,
}

impl MelEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current_byte: 0,
            bits_in_byte: 0,
            k: 0,
            run: 0,
        }
    }

    fn write_bit(&mut self, bit: u8) {
        self.current_byte = (self.current_byte << 1) | (bit & 1);
        self.bits_in_byte += 1;
        if self.bits_in_byte == 8 {
            if self.current_byte == 0xFF {
                self.buffer.push(0xFF);
                self.buffer.push(0x00);
            } else {
                self.buffer.push(self.current_byte);
            }
            self.current_byte = 0;
            self.bits_in_byte = 0;
        }
    }

    fn write_bits(&mut self, value: u32, count: i32) {
        for i in (0..count).rev() {
            self.write_bit(((value >> i) & 1) as u8);
        }
    }

    /// Code one significance flag.
    pub fn encode(&mut self, significant: bool) {
        if significant {
            // End the run: a 1 bit plus k bits of partial run length.
            self.write_bit(1);
            self.write_bits(self.run, self.k);
            self.run = 0;
            self.k = (self.k - 1).max(0);
        } else {
            self.run += 1;
            if self.run == 1 << self.k {
                // A full run collapses to a single 0 bit.
                self.write_bit(0);
                self.run = 0;
                self.k = (self.k + 1).min(MAX_K);
            }
        }
    }

    /// Flush the pending partial run and the trailing byte (zero padded).
    pub fn finish(mut self) -> Vec<u8> {
        if self.run > 0 {
            // Mark the leftover zeros as one more full run; decoders stop
            // at the sample count, so the overrun is never observed.
            self.write_bit(0);
        }
        if self.bits_in_byte > 0 {
            let padding = 8 - self.bits_in_byte;
            self.current_byte <<= padding;
            if self.current_byte == 0xFF {
                self.buffer.push(0xFF);
                self.buffer.push(0x00);
            } else {
                self.buffer.push(self.current_byte);
            }
        }
        self.buffer
    }
}

impl Default for MelEncoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MelDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    current_byte: u8,
    bits_left: u8,
    /// Whether the previously consumed byte was 0xFF (next 0x00 is stuffing).
    after_ff: bool,
    k: i32,
    /// Insignificant samples remaining in the current run.
    run: u32,
    /// A significant sample is due once the current run drains.
    one_pending: bool,
}

impl<'a> MelDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            current_byte: 0,
            bits_left: 0,
            after_ff: false,
            k: 0,
            run: 0,
            one_pending: false,
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.after_ff {
            // Skip the stuffing byte that follows 0xFF.
            self.after_ff = false;
            self.pos += 1;
        }
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        if b == 0xFF {
            self.after_ff = true;
        }
        Some(b)
    }

    fn read_bit(&mut self) -> Option<u8> {
        if self.bits_left == 0 {
            self.current_byte = self.next_byte()?;
            self.bits_left = 8;
        }
        self.bits_left -= 1;
        Some((self.current_byte >> self.bits_left) & 1)
    }

    /// Missing bits read as zero, mirroring the encoder's padding.
    fn read_bits(&mut self, count: i32) -> u32 {
        let mut v = 0u32;
        for _ in 0..count {
            v = (v << 1) | self.read_bit().unwrap_or(0) as u32;
        }
        v
    }

    /// Decode one significance flag.
    pub fn decode(&mut self) -> bool {
        if self.run > 0 {
            self.run -= 1;
            return false;
        }
        if self.one_pending {
            self.one_pending = false;
            return true;
        }
        if self.read_bit().unwrap_or(0) == 0 {
            // A full run of 2^k zeros, this sample included.
            self.run = (1u32 << self.k) - 1;
            self.k = (self.k + 1).min(MAX_K);
            false
        } else {
            // Partial run, then the significant sample.
            let remainder = self.read_bits(self.k);
            self.k = (self.k - 1).max(0);
            if remainder > 0 {
                self.run = remainder - 1;
                self.one_pending = true;
                false
            } else {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(flags: &[bool]) -> Vec<u8> {
        let mut enc = MelEncoder::new();
        for &f in flags {
            enc.encode(f);
        }
        let bytes = enc.finish();
        let mut dec = MelDecoder::new(&bytes);
        for (i, &f) in flags.iter().enumerate() {
            assert_eq!(dec.decode(), f, "flag {i}");
        }
        bytes
    }

    #[test]
    fn test_roundtrip_mixed() {
        roundtrip(&[true, false, true, true, false, false, false, true, true]);
    }

    #[test]
    fn test_roundtrip_partial_runs() {
        // Runs broken before 2^k zeros exercise the remainder bits.
        let mut flags = vec![false; 5];
        flags.push(true);
        flags.extend([false; 3]);
        flags.push(true);
        flags.extend([false; 11]);
        flags.push(true);
        flags.extend([false; 2]);
        roundtrip(&flags);
    }

    #[test]
    fn test_roundtrip_all_significant_stuffs_ff() {
        // Consecutive ones produce an 0xFF byte that must be stuffed.
        let flags = vec![true; 20];
        let bytes = roundtrip(&flags);
        assert!(bytes.windows(2).any(|w| w == [0xFF, 0x00]));
    }

    #[test]
    fn test_roundtrip_all_insignificant() {
        roundtrip(&[false; 33]);
    }

    #[test]
    fn test_runs_compress_sparse_input() {
        // Run doubling covers long gaps in a handful of bits.
        let flags = vec![false; 1000];
        let bytes = roundtrip(&flags);
        assert!(bytes.len() <= 3, "{} bytes for 1000 zeros", bytes.len());
    }

    #[test]
    fn test_run_state_adapts() {
        // After a full run the next full run is twice as long.
        let mut enc = MelEncoder::new();
        for _ in 0..3 {
            enc.encode(false);
        }
        // Runs of 1 and 2 zeros consumed: two 0 bits, nothing pending.
        let bytes = enc.finish();
        assert_eq!(bytes.len(), 1);
        let mut dec = MelDecoder::new(&bytes);
        for _ in 0..3 {
            assert!(!dec.decode());
        }
    }

    #[test]
    fn test_empty_input_decodes_insignificant() {
        let mut dec = MelDecoder::new(&[]);
        assert!(!dec.decode());
        assert!(!dec.decode());
    }
}
