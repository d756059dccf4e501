//! Byte orderings for primary keys, and the numeric cell codecs.
//!
//! Two orderings exist:
//! - `Natural`: unsigned bytewise comparison, every byte is well-formed.
//! - `Base64`: comparison by position in a base-64 alphabet, only alphabet
//!   bytes are well-formed. Bytes outside the alphabet rank after all
//!   alphabet bytes so the order stays total.
//!
//! Each ordering has a two-character signature that is stored in exported
//! collections and checked on import.

use std::cmp::Ordering;
use std::fmt;

/// RFC 1521 base-64 alphabet.
pub const STANDARD_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// URL and file-name safe alphabet used for keys and `b64e` cells.
pub const ENHANCED_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const ABSENT: u8 = 0xFF;

const fn reverse(alphabet: &[u8; 64]) -> [u8; 256] {
    let mut table = [ABSENT; 256];
    let mut i = 0;
    while i < 64 {
        table[alphabet[i] as usize] = i as u8;
        i += 1;
    }
    table
}

static STANDARD_RANKS: [u8; 256] = reverse(STANDARD_ALPHABET);
static ENHANCED_RANKS: [u8; 256] = reverse(ENHANCED_ALPHABET);

/// Total order over primary-key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Natural { ascending: bool },
    Base64 { ascending: bool, rfc1521: bool },
}

impl ByteOrder {
    pub const NATURAL: ByteOrder = ByteOrder::Natural { ascending: true };
    pub const BASE64: ByteOrder = ByteOrder::Base64 {
        ascending: true,
        rfc1521: false,
    };
    pub const BASE64_STANDARD: ByteOrder = ByteOrder::Base64 {
        ascending: true,
        rfc1521: true,
    };

    /// Compares two keys. A strict prefix sorts first.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let ord = match self {
            ByteOrder::Natural { .. } => a.cmp(b),
            ByteOrder::Base64 { rfc1521, .. } => {
                let ranks = ranks(*rfc1521);
                let common = a.len().min(b.len());
                let mut ord = a.len().cmp(&b.len());
                for i in 0..common {
                    if a[i] != b[i] {
                        ord = rank(ranks, a[i]).cmp(&rank(ranks, b[i]));
                        break;
                    }
                }
                ord
            }
        };
        if self.is_ascending() {
            ord
        } else {
            ord.reverse()
        }
    }

    /// Returns true if every byte of `key` belongs to the ordering's domain.
    pub fn wellformed(&self, key: &[u8]) -> bool {
        match self {
            ByteOrder::Natural { .. } => true,
            ByteOrder::Base64 { rfc1521, .. } => {
                let ranks = ranks(*rfc1521);
                key.iter().all(|&b| ranks[b as usize] != ABSENT)
            }
        }
    }

    pub fn is_ascending(&self) -> bool {
        match self {
            ByteOrder::Natural { ascending } | ByteOrder::Base64 { ascending, .. } => *ascending,
        }
    }

    /// The same ordering with the direction flipped.
    pub fn reversed(&self) -> ByteOrder {
        match *self {
            ByteOrder::Natural { ascending } => ByteOrder::Natural {
                ascending: !ascending,
            },
            ByteOrder::Base64 { ascending, rfc1521 } => ByteOrder::Base64 {
                ascending: !ascending,
                rfc1521,
            },
        }
    }

    pub fn signature(&self) -> &'static str {
        match *self {
            ByteOrder::Natural { ascending: true } => "nu",
            ByteOrder::Natural { ascending: false } => "nd",
            ByteOrder::Base64 {
                ascending: true,
                rfc1521: false,
            } => "Bu",
            ByteOrder::Base64 {
                ascending: false,
                rfc1521: false,
            } => "Bd",
            ByteOrder::Base64 {
                ascending: true,
                rfc1521: true,
            } => "bu",
            ByteOrder::Base64 {
                ascending: false,
                rfc1521: true,
            } => "bd",
        }
    }

    pub fn by_signature(signature: &str) -> Option<ByteOrder> {
        match signature {
            "nu" => Some(ByteOrder::Natural { ascending: true }),
            "nd" => Some(ByteOrder::Natural { ascending: false }),
            "Bu" => Some(ByteOrder::Base64 {
                ascending: true,
                rfc1521: false,
            }),
            "Bd" => Some(ByteOrder::Base64 {
                ascending: false,
                rfc1521: false,
            }),
            "bu" => Some(ByteOrder::Base64 {
                ascending: true,
                rfc1521: true,
            }),
            "bd" => Some(ByteOrder::Base64 {
                ascending: false,
                rfc1521: true,
            }),
            _ => None,
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::NATURAL
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

fn ranks(rfc1521: bool) -> &'static [u8; 256] {
    if rfc1521 {
        &STANDARD_RANKS
    } else {
        &ENHANCED_RANKS
    }
}

#[inline]
fn rank(ranks: &[u8; 256], b: u8) -> u16 {
    match ranks[b as usize] {
        ABSENT => 64 + b as u16,
        r => r as u16,
    }
}

// ---------------------------------------------------------------------------
// Numeric cell codecs
// ---------------------------------------------------------------------------

/// Writes `value` big-endian into `out`, keeping the low-order bytes.
pub fn encode_b256(mut value: i64, out: &mut [u8]) {
    for b in out.iter_mut().rev() {
        *b = (value & 0xFF) as u8;
        value >>= 8;
    }
}

/// Reads a big-endian cardinal of up to eight bytes.
pub fn decode_b256(bytes: &[u8]) -> i64 {
    bytes.iter().fold(0i64, |acc, &b| (acc << 8) | b as i64)
}

/// Writes `value` as base-64 digits of the enhanced alphabet, most
/// significant digit first, six bits per byte of `out`.
pub fn encode_b64e(mut value: i64, out: &mut [u8]) {
    for b in out.iter_mut().rev() {
        *b = ENHANCED_ALPHABET[(value & 0x3F) as usize];
        value >>= 6;
    }
}

/// Reads a base-64 cardinal. Trailing `=` padding is ignored and bytes
/// outside the alphabet count as zero digits.
pub fn decode_b64e(bytes: &[u8]) -> i64 {
    let mut len = bytes.len();
    while len > 0 && bytes[len - 1] == b'=' {
        len -= 1;
    }
    bytes[..len].iter().fold(0i64, |acc, &b| {
        let digit = match ENHANCED_RANKS[b as usize] {
            ABSENT => 0,
            d => d as i64,
        };
        (acc << 6) | digit
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order_compare() {
        let order = ByteOrder::NATURAL;
        assert_eq!(order.compare(b"abc", b"abd"), Ordering::Less);
        assert_eq!(order.compare(b"abc", b"abc"), Ordering::Equal);
        assert_eq!(order.compare(&[0xFF], &[0x01]), Ordering::Greater);
        assert_eq!(order.compare(b"ab", b"abc"), Ordering::Less);
    }

    #[test]
    fn test_descending_order_reverses() {
        let order = ByteOrder::NATURAL.reversed();
        assert!(!order.is_ascending());
        assert_eq!(order.compare(b"abc", b"abd"), Ordering::Greater);
        assert_eq!(order.reversed(), ByteOrder::NATURAL);
    }

    #[test]
    fn test_base64_order_follows_alphabet() {
        let order = ByteOrder::BASE64;
        // 'Z' precedes 'a' and both precede digits in the alphabet
        assert_eq!(order.compare(b"Z", b"a"), Ordering::Less);
        assert_eq!(order.compare(b"z", b"0"), Ordering::Less);
        assert_eq!(order.compare(b"9", b"-"), Ordering::Less);
        assert_eq!(order.compare(b"-", b"_"), Ordering::Less);
        // natural order disagrees: '0' < 'A' in ASCII
        assert_eq!(ByteOrder::NATURAL.compare(b"0", b"A"), Ordering::Less);
        assert_eq!(order.compare(b"0", b"A"), Ordering::Greater);
    }

    #[test]
    fn test_base64_malformed_bytes_rank_last() {
        let order = ByteOrder::BASE64;
        assert_eq!(order.compare(b"_", b"!"), Ordering::Less);
        assert_eq!(order.compare(b"!", b"#"), Ordering::Less);
        assert_eq!(order.compare(b"!", b"!"), Ordering::Equal);
    }

    #[test]
    fn test_wellformed() {
        assert!(ByteOrder::NATURAL.wellformed(&[0, 1, 255]));
        assert!(ByteOrder::BASE64.wellformed(b"AZaz09-_"));
        assert!(!ByteOrder::BASE64.wellformed(b"AZ+/"));
        assert!(ByteOrder::BASE64_STANDARD.wellformed(b"AZ+/"));
        assert!(!ByteOrder::BASE64_STANDARD.wellformed(b"A\0"));
    }

    #[test]
    fn test_signatures() {
        for order in [
            ByteOrder::Natural { ascending: true },
            ByteOrder::Natural { ascending: false },
            ByteOrder::Base64 {
                ascending: true,
                rfc1521: false,
            },
            ByteOrder::Base64 {
                ascending: false,
                rfc1521: false,
            },
            ByteOrder::Base64 {
                ascending: true,
                rfc1521: true,
            },
            ByteOrder::Base64 {
                ascending: false,
                rfc1521: true,
            },
        ] {
            assert_eq!(order.signature().len(), 2);
            assert_eq!(ByteOrder::by_signature(order.signature()), Some(order));
        }
        assert_eq!(ByteOrder::BASE64.signature(), "Bu");
        assert_eq!(ByteOrder::NATURAL.to_string(), "nu");
        assert_eq!(ByteOrder::by_signature("__"), None);
    }

    #[test]
    fn test_b256_codec() {
        let mut buf = [0u8; 4];
        encode_b256(0x0102_0304, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(decode_b256(&buf), 0x0102_0304);

        let mut buf = [0u8; 2];
        encode_b256(0x1_FFFF, &mut buf);
        assert_eq!(buf, [0xFF, 0xFF]);

        let mut buf = [0u8; 8];
        encode_b256(-1, &mut buf);
        assert_eq!(decode_b256(&buf), -1);
    }

    #[test]
    fn test_b64e_codec() {
        let mut buf = [0u8; 4];
        encode_b64e(0, &mut buf);
        assert_eq!(&buf, b"AAAA");

        encode_b64e(63, &mut buf);
        assert_eq!(&buf, b"AAA_");
        assert_eq!(decode_b64e(&buf), 63);

        encode_b64e(64, &mut buf);
        assert_eq!(&buf, b"AABA");
        assert_eq!(decode_b64e(&buf), 64);
    }

    #[test]
    fn test_b64e_decode_ignores_padding() {
        assert_eq!(decode_b64e(b"BA=="), 64);
        assert_eq!(decode_b64e(b""), 0);
        // bytes outside the alphabet read as zero digits
        assert_eq!(decode_b64e(b"B!"), 64);
    }
}
