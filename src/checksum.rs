//! CRC-64 over the ECMA-182 polynomial, as bcache computes it.
//!
//! The register is processed most-significant-bit first, starts at all ones
//! and is inverted on output (the CRC-64/WE parameterisation).  Every
//! checksummed bcache record stores its checksum in the first 8 bytes and
//! covers the bytes after it; callers pass exactly that range.
//!
//! ```
//! use bcache_rescue::checksum::{checksum, Crc64};
//!
//! let mut h = Crc64::new();
//! h.update(b"1234");
//! h.update(b"56789");
//! assert_eq!(h.finalize(), checksum(b"123456789"));
//! ```

/// ECMA-182 generator polynomial, normal (non-reflected) form.
pub const ECMA_POLY: u64 = 0x42F0_E1EB_A9EA_3693;

static TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u64) << 56;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & (1 << 63) != 0 { (crc << 1) ^ ECMA_POLY } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-64 state.
#[derive(Debug, Clone)]
pub struct Crc64 {
    state: u64,
}

impl Crc64 {
    pub fn new() -> Self {
        Self { state: u64::MAX }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &b in bytes {
            crc = TABLE[((crc >> 56) as u8 ^ b) as usize] ^ (crc << 8);
        }
        self.state = crc;
    }

    pub fn finalize(self) -> u64 {
        self.state ^ u64::MAX
    }
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum `bytes` in one call.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut h = Crc64::new();
    h.update(bytes);
    h.finalize()
}

/// Find every record length at which `expected` matches.
///
/// `record` is a serialized record including its leading 8-byte checksum
/// field.  Returns each total length `n` (in `8..=record.len()`) for which
/// `checksum(&record[8..n]) == expected`.  Useful when the length a damaged
/// record was checksummed over is unknown.
pub fn probe_lengths(expected: u64, record: &[u8]) -> Vec<usize> {
    let mut found = Vec::new();
    if record.len() < 8 {
        return found;
    }
    let mut h = Crc64::new();
    if h.clone().finalize() == expected {
        found.push(8);
    }
    for (i, b) in record[8..].iter().enumerate() {
        h.update(std::slice::from_ref(b));
        if h.clone().finalize() == expected {
            found.push(8 + i + 1);
        }
    }
    found
}
