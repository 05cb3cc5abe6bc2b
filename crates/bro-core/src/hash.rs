//! SHA256 double-hashing and leading-zero measurement for the mining challenge.

use core::cmp::Ordering;

use sha2::{Digest, Sha256};

/// Number of hex digits in a 256-bit hash.
pub const HASH_HEX_LEN: usize = 64;

/// Maximum number of leading zero bits a 256-bit hash can have.
pub const MAX_LEADING_ZEROS: u32 = 256;

/// Bitcoin's double SHA256: SHA256(SHA256(data)).
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// Hash one mining attempt: SHA256(SHA256(challenge || decimal(nonce))).
///
/// The nonce is appended as its ASCII decimal representation, so nonce `42`
/// against challenge `"abc:0"` hashes the bytes `"abc:042"`.
pub fn hash_step(challenge: &[u8], nonce: u64) -> [u8; 32] {
    let mut preimage = NoncePreimage::new(challenge);
    preimage.hash(nonce)
}

/// Reusable buffer holding `challenge || decimal(nonce)`.
///
/// The mining loops hash millions of nonces against the same challenge, so
/// the challenge bytes are copied once and only the nonce suffix is rewritten.
#[derive(Debug, Clone)]
pub struct NoncePreimage {
    buf: Vec<u8>,
    prefix_len: usize,
}

impl NoncePreimage {
    /// Create a preimage buffer for a challenge.
    pub fn new(challenge: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(challenge.len() + 20);
        buf.extend_from_slice(challenge);
        NoncePreimage {
            buf,
            prefix_len: challenge.len(),
        }
    }

    /// Hash the challenge with the given nonce appended.
    #[inline]
    pub fn hash(&mut self, nonce: u64) -> [u8; 32] {
        self.buf.truncate(self.prefix_len);
        push_decimal(&mut self.buf, nonce);
        double_sha256(&self.buf)
    }
}

/// Append the ASCII decimal digits of `value` to `buf`.
fn push_decimal(buf: &mut Vec<u8>, mut value: u64) {
    // u64::MAX has 20 decimal digits
    let mut digits = [0u8; 20];
    let mut pos = digits.len();
    loop {
        pos -= 1;
        digits[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    buf.extend_from_slice(&digits[pos..]);
}

/// Convert a hash to lowercase hex, most significant byte first.
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

/// Parse a 64-digit hex hash (optional `0x` prefix).
pub fn parse_hash_hex(hash: &str) -> Option<[u8; 32]> {
    let trimmed = strip_hex_prefix(hash);
    if trimmed.len() != HASH_HEX_LEN {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(trimmed, &mut out).ok()?;
    Some(out)
}

/// Count leading zero bits of a raw hash, scanning from the first byte.
pub fn leading_zero_bits_bytes(hash: &[u8; 32]) -> u32 {
    let mut zeros = 0u32;
    for byte in hash.iter() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Count leading zero bits of a hex hash string.
///
/// The input is interpreted as a 256-bit big-endian number: shorter strings
/// are left-padded with zeros, longer ones keep only their last 64 digits.
/// Empty or non-hex input yields 0, which callers treat as "no result yet".
pub fn leading_zero_bits(hash: &str) -> u32 {
    let digits = strip_hex_prefix(hash);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return 0;
    }

    let digits = if digits.len() > HASH_HEX_LEN {
        &digits[digits.len() - HASH_HEX_LEN..]
    } else {
        digits
    };

    let padding = (HASH_HEX_LEN - digits.len()) as u32;
    let mut zeros = padding * 4;

    for c in digits.chars() {
        // validated above
        let nibble = c.to_digit(16).unwrap_or(0);
        if nibble == 0 {
            zeros += 4;
        } else {
            // nibble occupies the low 4 bits of a u32
            zeros += nibble.leading_zeros() - 28;
            break;
        }
    }
    zeros
}

/// Compare two hex hashes as 256-bit big-endian unsigned integers.
///
/// Returns `None` if either side is not valid hex.
pub fn compare_hashes(a: &str, b: &str) -> Option<Ordering> {
    let a = normalize_hex(a)?;
    let b = normalize_hex(b)?;
    Some(a.cmp(&b))
}

/// Decide whether a candidate replaces the current best.
///
/// More leading zeros always wins. On equal leading zeros the candidate wins
/// if nothing has been accepted yet, or if it is numerically smaller than the
/// current best. Recency never breaks ties.
pub fn is_better_hash(candidate_lz: u32, candidate: &str, best_lz: u32, best: &str) -> bool {
    if candidate_lz > best_lz {
        return true;
    }
    if candidate_lz < best_lz {
        return false;
    }
    if best.is_empty() {
        return true;
    }
    matches!(compare_hashes(candidate, best), Some(Ordering::Less))
}

fn strip_hex_prefix(hash: &str) -> &str {
    hash.strip_prefix("0x")
        .or_else(|| hash.strip_prefix("0X"))
        .unwrap_or(hash)
}

/// Lowercase, 64-digit, left-padded form so lexicographic order is numeric order.
fn normalize_hex(hash: &str) -> Option<String> {
    let digits = strip_hex_prefix(hash);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let digits = if digits.len() > HASH_HEX_LEN {
        &digits[digits.len() - HASH_HEX_LEN..]
    } else {
        digits
    };
    let mut out = String::with_capacity(HASH_HEX_LEN);
    for _ in digits.len()..HASH_HEX_LEN {
        out.push('0');
    }
    out.push_str(&digits.to_ascii_lowercase());
    Some(out)
}
