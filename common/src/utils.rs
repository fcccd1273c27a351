//! Common Utilities
//!
//! Bit packing and CRC helpers used across the PHY crates. Bits are carried one per byte
//! (`0` or `1`), most significant bit of each payload byte first.

/// CRC24A generator (transport block CRC), TS 36.212 5.1.1
pub const CRC24A_POLY: u32 = 0x1864CFB;
/// CRC24B generator (code block CRC), TS 36.212 5.1.1
pub const CRC24B_POLY: u32 = 0x1800063;
/// Number of parity bits of both 24-bit CRCs
pub const CRC24_LEN: usize = 24;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bitwise CRC over a stream of single-bit values
pub fn crc_bits<I>(bits: I, poly: u32, order: u32) -> u32
where
    I: IntoIterator<Item = u8>,
{
    let highbit = 1u64 << order;
    let poly = poly as u64;
    let mut remainder = 0u64;

    for bit in bits {
        remainder = (remainder << 1) | (bit & 1) as u64;
        if remainder & highbit != 0 {
            remainder ^= poly;
        }
    }

    // Flush the register with `order` zero bits
    for _ in 0..order {
        remainder <<= 1;
        if remainder & highbit != 0 {
            remainder ^= poly;
        }
    }

    (remainder & (highbit - 1)) as u32
}

/// CRC24A of a bit sequence
pub fn crc24a(bits: &[u8]) -> u32 {
    crc_bits(bits.iter().copied(), CRC24A_POLY, CRC24_LEN as u32)
}

/// CRC24B of a bit sequence
pub fn crc24b(bits: &[u8]) -> u32 {
    crc_bits(bits.iter().copied(), CRC24B_POLY, CRC24_LEN as u32)
}

/// Write a 24-bit CRC value as bits, MSB first
pub fn write_crc24(crc: u32, out: &mut [u8]) {
    for (i, bit) in out.iter_mut().take(CRC24_LEN).enumerate() {
        *bit = ((crc >> (CRC24_LEN - 1 - i)) & 1) as u8;
    }
}

/// Read a 24-bit CRC value from bits, MSB first
pub fn read_crc24(bits: &[u8]) -> u32 {
    bits.iter()
        .take(CRC24_LEN)
        .fold(0u32, |acc, &b| (acc << 1) | (b & 1) as u32)
}

/// Unpack bytes into single-bit values (MSB first), returns the number of bits written
pub fn unpack_bits_into(bytes: &[u8], nof_bits: usize, out: &mut [u8]) -> usize {
    let n = nof_bits.min(bytes.len() * 8).min(out.len());
    for (i, bit) in out.iter_mut().take(n).enumerate() {
        *bit = (bytes[i / 8] >> (7 - i % 8)) & 1;
    }
    n
}

/// Pack single-bit values into bytes (MSB first), returns the number of bytes written
pub fn pack_bits_into(bits: &[u8], out: &mut [u8]) -> usize {
    let nof_bytes = ((bits.len() + 7) / 8).min(out.len());
    for (byte_idx, byte) in out.iter_mut().take(nof_bytes).enumerate() {
        let chunk = &bits[byte_idx * 8..((byte_idx + 1) * 8).min(bits.len())];
        *byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << (7 - i)));
    }
    nof_bytes
}

/// Unpack bytes into single-bit values (MSB first)
pub fn unpack_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = vec![0u8; bytes.len() * 8];
    unpack_bits_into(bytes, bits.len(), &mut bits);
    bits
}
