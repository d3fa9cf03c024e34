//! Hashing and byte-comparison primitives shared by the match finders.

/// Read a little-endian `u32` at `pos`.
#[inline(always)]
pub fn read32(src: &[u8], pos: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&src[pos..pos + 4]);
    u32::from_le_bytes(b)
}

/// Read a little-endian `u64` at `pos`.
#[inline(always)]
pub fn read64(src: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&src[pos..pos + 8]);
    u64::from_le_bytes(b)
}

const PRIME_4BYTES: u32 = 2_654_435_761;
const PRIME_5BYTES: u64 = 889_523_592_379;
const PRIME_6BYTES: u64 = 227_718_039_650_203;
const PRIME_7BYTES: u64 = 58_295_818_150_454_627;
const PRIME_8BYTES: u64 = 0xCF1B_BCDC_B7A5_6463;

/// Hash of the 4 bytes at `pos` into `h_bits` bits.
#[inline(always)]
pub fn hash4(src: &[u8], pos: usize, h_bits: u32) -> usize {
    (read32(src, pos).wrapping_mul(PRIME_4BYTES) >> (32 - h_bits)) as usize
}

#[inline(always)]
fn hash_n(value: u64, prime: u64, nb_bytes: u32, h_bits: u32) -> usize {
    (((value << (64 - 8 * nb_bytes)).wrapping_mul(prime)) >> (64 - h_bits)) as usize
}

/// Hash of the first `mls` bytes at `pos` into `h_bits` bits.
///
/// `mls` below 4 hashes 4 bytes, above 8 hashes 8. When fewer than 8 bytes
/// remain after `pos`, only 4-byte hashing is safe.
#[inline(always)]
pub fn hash_ptr(src: &[u8], pos: usize, h_bits: u32, mls: u32) -> usize {
    match mls {
        5 => hash_n(read64(src, pos), PRIME_5BYTES, 5, h_bits),
        6 => hash_n(read64(src, pos), PRIME_6BYTES, 6, h_bits),
        7 => hash_n(read64(src, pos), PRIME_7BYTES, 7, h_bits),
        8.. => (read64(src, pos).wrapping_mul(PRIME_8BYTES) >> (64 - h_bits)) as usize,
        _ => hash4(src, pos, h_bits),
    }
}

/// Hash of 3 bytes, used by the small 3-byte table.
#[inline(always)]
pub fn hash3(src: &[u8], pos: usize, h_bits: u32) -> usize {
    ((read32(src, pos) << 8).wrapping_mul(PRIME_4BYTES) >> (32 - h_bits)) as usize
}

/// Index of the highest set bit. `v` must be non-zero.
#[inline(always)]
pub fn highbit32(v: u32) -> u32 {
    debug_assert!(v != 0);
    31 - v.leading_zeros()
}

/// Length of the common prefix of `src[ip..]` and `src[m..]`, not reading
/// at or past `iend`. `m` must be below `ip`.
#[inline]
pub fn count(src: &[u8], mut ip: usize, mut m: usize, iend: usize) -> usize {
    let start = ip;
    while ip + 8 <= iend {
        let diff = read64(src, ip) ^ read64(src, m);
        if diff != 0 {
            return ip - start + (diff.trailing_zeros() / 8) as usize;
        }
        ip += 8;
        m += 8;
    }
    while ip < iend && src[ip] == src[m] {
        ip += 1;
        m += 1;
    }
    ip - start
}

/// Common prefix length between `input[ip..iend]` and a match that starts in
/// `seg[m..m_end]` and may continue at `cont[0..]`.
///
/// Used when a candidate lies in a separate buffer (an attached dictionary)
/// whose end is logically followed by the start of the current prefix.
#[inline]
pub fn count_2segments(
    input: &[u8],
    ip: usize,
    iend: usize,
    seg: &[u8],
    m: usize,
    m_end: usize,
    cont: usize,
) -> usize {
    let first_limit = iend.min(ip + (m_end - m));
    let mut len = 0usize;
    while ip + len < first_limit && input[ip + len] == seg[m + len] {
        len += 1;
    }
    if ip + len != first_limit || first_limit == iend {
        return len;
    }
    len + count(input, ip + len, cont, iend)
}
