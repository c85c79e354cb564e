#![forbid(unsafe_code)]
//! Metadata log entry codec.
//!
//! One directory-log entry on the wire, ASCII with `;` separators:
//!
//! ```text
//! <state><type>;<nameLen>;<name>;<size>;<mtime>;<uuid>;<crc16hex>
//! ```
//!
//! `state` is `+` (add), `-` (remove) or `I` (self); `type` is `d` or `f`.
//! The trailing checksum is the CRC-16/CCITT of every byte up to but not
//! including the `;` that precedes it. Entries within a log are joined by a
//! single `\n`.
//!
//! Decoding is a total function: it never panics and it only accepts the
//! canonical rendering (minimal decimal integers, lowercase hyphenated UUID,
//! minimal lowercase hex CRC), so a successful decode re-encodes to the
//! exact input bytes.

use crc::{CRC_16_KERMIT, Crc};
use orfs_error::{OrfsError, Result};
use orfs_types::{Mode, Stat};
use uuid::Uuid;

/// Entry state: add a child binding.
pub const STATE_ADD: u8 = b'+';
/// Entry state: remove a child binding.
pub const STATE_REMOVE: u8 = b'-';
/// Entry state: the directory's own attributes.
pub const STATE_SELF: u8 = b'I';

/// Shortest possible entry length in bytes.
const MIN_ENTRY_LEN: usize = 12;

/// Canonical UUID text length (hyphenated form).
const UUID_TEXT_LEN: usize = 36;

/// CCITT (KERMIT) variant: reflected poly 0x1021, zero init, zero xorout.
/// This is the checksum the on-disk format has always carried.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// CRC-16/CCITT over `data`.
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Encode one entry, without a terminator.
#[must_use]
pub fn encode_entry(state: u8, stat: &Stat) -> Vec<u8> {
    let mut entry = Vec::with_capacity(64 + stat.name.len());
    entry.push(state);
    entry.push(if stat.is_dir { b'd' } else { b'f' });
    entry.push(b';');
    entry.extend_from_slice(stat.name.len().to_string().as_bytes());
    entry.push(b';');
    entry.extend_from_slice(stat.name.as_bytes());
    entry.push(b';');
    entry.extend_from_slice((stat.size as u64).to_string().as_bytes());
    entry.push(b';');
    entry.extend_from_slice((stat.mtime as u64).to_string().as_bytes());
    entry.push(b';');
    let mut uuid_buf = Uuid::encode_buffer();
    entry.extend_from_slice(
        stat.inode
            .hyphenated()
            .encode_lower(&mut uuid_buf)
            .as_bytes(),
    );

    let crc = crc16_ccitt(&entry);
    entry.push(b';');
    entry.extend_from_slice(format!("{crc:x}").as_bytes());
    entry
}

/// Encode one entry as an append fragment: a leading `\n` followed by the
/// entry, ready to be appended to an existing log object.
#[must_use]
pub fn encode_entry_newline(state: u8, stat: &Stat) -> Vec<u8> {
    let mut fragment = vec![b'\n'];
    fragment.extend_from_slice(&encode_entry(state, stat));
    fragment
}

/// Decode one entry into its state byte and stat snapshot.
///
/// The entry carries no mode bits; decoding fabricates the conventional
/// `0o755` directory / `0o644` file modes, matching what encode discards.
pub fn decode_entry(entry: &[u8]) -> Result<(u8, Stat)> {
    if entry.is_empty() {
        return Err(OrfsError::MdEmpty);
    }
    if entry.len() < MIN_ENTRY_LEN {
        return Err(OrfsError::MdTooShort { len: entry.len() });
    }

    // state + type
    let sep = find_sep(entry, 0)?;
    if sep != 2 {
        return Err(invalid("state/type field is not two bytes"));
    }
    let state = entry[0];
    let is_dir = match entry[1] {
        b'd' => true,
        b'f' => false,
        other => return Err(invalid(format!("unknown type byte {:?}", other as char))),
    };
    let pos = sep + 1;

    // name length, then exactly that many name bytes
    let (name_len, pos) = decimal_field(entry, pos)?;
    let name_len = usize::try_from(name_len)
        .map_err(|_| invalid("name length does not fit usize"))?;
    let name_end = pos
        .checked_add(name_len)
        .filter(|end| *end < entry.len())
        .ok_or_else(|| invalid("name length reads past end of entry"))?;
    let name = std::str::from_utf8(&entry[pos..name_end])
        .map_err(|_| invalid("name is not valid UTF-8"))?
        .to_owned();
    if entry[name_end] != b';' {
        return Err(invalid("missing separator after name"));
    }
    let pos = name_end + 1;

    // size, mtime
    let (size, pos) = decimal_field(entry, pos)?;
    let (mtime, pos) = decimal_field(entry, pos)?;

    // uuid (canonical lowercase hyphenated form)
    let uuid_end = pos
        .checked_add(UUID_TEXT_LEN)
        .filter(|end| *end < entry.len())
        .ok_or_else(|| invalid("truncated inode uuid"))?;
    let uuid_text = std::str::from_utf8(&entry[pos..uuid_end])
        .map_err(|_| invalid("inode uuid is not valid UTF-8"))?;
    let inode =
        Uuid::try_parse(uuid_text).map_err(|_| invalid("inode uuid does not parse"))?;
    let mut uuid_buf = Uuid::encode_buffer();
    if inode.hyphenated().encode_lower(&mut uuid_buf) != uuid_text {
        return Err(invalid("inode uuid is not in canonical form"));
    }
    if entry[uuid_end] != b';' {
        return Err(invalid("missing separator after inode uuid"));
    }
    let pos = uuid_end + 1;

    // checksum over everything before its separator
    let crc_text = std::str::from_utf8(&entry[pos..])
        .map_err(|_| invalid("checksum field is not valid UTF-8"))?;
    let parsed_crc =
        u16::from_str_radix(crc_text, 16).map_err(|_| invalid("checksum does not parse"))?;
    let computed_crc = crc16_ccitt(&entry[..pos - 1]);
    if parsed_crc != computed_crc {
        return Err(invalid(format!(
            "checksum mismatch: entry says {parsed_crc:#06x}, computed {computed_crc:#06x}"
        )));
    }
    if crc_text != format!("{computed_crc:x}") {
        return Err(invalid("checksum is not in canonical form"));
    }

    let mode = if is_dir {
        Mode::dir(0o755)
    } else {
        Mode::file(0o644)
    };

    Ok((
        state,
        Stat {
            name,
            size: size as i64,
            mode,
            mtime: mtime as i64,
            is_dir,
            inode,
        },
    ))
}

fn invalid(detail: impl Into<String>) -> OrfsError {
    OrfsError::MdInvalid(detail.into())
}

/// Position of the next `;` at or after `start`.
fn find_sep(entry: &[u8], start: usize) -> Result<usize> {
    entry[start..]
        .iter()
        .position(|b| *b == b';')
        .map(|offset| start + offset)
        .ok_or_else(|| invalid("missing field separator"))
}

/// Parse a `;`-terminated canonical decimal field starting at `pos`; returns
/// the value and the position just past the separator.
fn decimal_field(entry: &[u8], pos: usize) -> Result<(u64, usize)> {
    let sep = find_sep(entry, pos)?;
    let text = std::str::from_utf8(&entry[pos..sep])
        .map_err(|_| invalid("numeric field is not valid UTF-8"))?;
    let value: u64 = text
        .parse()
        .map_err(|_| invalid(format!("numeric field {text:?} does not parse")))?;
    if text != value.to_string() {
        return Err(invalid(format!(
            "numeric field {text:?} is not in canonical form"
        )));
    }
    Ok((value, sep + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stat(name: &str, size: i64, mtime: i64, is_dir: bool, inode: Uuid) -> Stat {
        Stat {
            name: name.to_owned(),
            size,
            mode: if is_dir {
                Mode::dir(0o755)
            } else {
                Mode::file(0o644)
            },
            mtime,
            is_dir,
            inode,
        }
    }

    #[test]
    fn encode_known_vector() {
        let inode = Uuid::try_parse("00000000-0000-0000-0000-000000000001").unwrap();
        let entry = encode_entry(STATE_ADD, &stat("x", 0, 0, false, inode));

        let body = b"+f;1;x;0;0;00000000-0000-0000-0000-000000000001";
        let expected_crc = format!("{:x}", crc16_ccitt(body));
        let mut expected = body.to_vec();
        expected.push(b';');
        expected.extend_from_slice(expected_crc.as_bytes());
        assert_eq!(entry, expected);

        let (state, decoded) = decode_entry(&entry).unwrap();
        assert_eq!(state, STATE_ADD);
        assert_eq!(decoded.name, "x");
        assert_eq!(decoded.size, 0);
        assert_eq!(decoded.mtime, 0);
        assert!(!decoded.is_dir);
        assert_eq!(decoded.inode, inode);
    }

    #[test]
    fn roundtrip_directory_entry() {
        let inode = Uuid::new_v4();
        let original = stat("projects", 4096, 1_700_000_000, true, inode);
        let entry = encode_entry(STATE_SELF, &original);
        let (state, decoded) = decode_entry(&entry).unwrap();
        assert_eq!(state, STATE_SELF);
        assert_eq!(decoded, original);
    }

    #[test]
    fn name_may_contain_separator_bytes() {
        // The name is length-prefixed, so `;` inside it must survive.
        let inode = Uuid::new_v4();
        let original = stat("we;rd;name", 7, 1, false, inode);
        let entry = encode_entry(STATE_ADD, &original);
        let (_, decoded) = decode_entry(&entry).unwrap();
        assert_eq!(decoded.name, "we;rd;name");
    }

    #[test]
    fn newline_fragment_prefixes_entry() {
        let inode = Uuid::new_v4();
        let s = stat("a", 0, 0, true, inode);
        let fragment = encode_entry_newline(STATE_ADD, &s);
        assert_eq!(fragment[0], b'\n');
        assert_eq!(&fragment[1..], encode_entry(STATE_ADD, &s).as_slice());
    }

    #[test]
    fn empty_entry() {
        assert!(matches!(decode_entry(b""), Err(OrfsError::MdEmpty)));
    }

    #[test]
    fn short_entry() {
        assert!(matches!(
            decode_entry(b"+f;1;x;0;0;"),
            Err(OrfsError::MdTooShort { len: 11 })
        ));
    }

    #[test]
    fn state_type_field_must_be_two_bytes() {
        assert!(matches!(
            decode_entry(b"+fd;1;x;0;0;00000000-0000-0000-0000-000000000001;0"),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn unknown_type_byte_rejected() {
        assert!(matches!(
            decode_entry(b"+x;1;x;0;0;00000000-0000-0000-0000-000000000001;0"),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn corrupted_crc_rejected() {
        let inode = Uuid::new_v4();
        let mut entry = encode_entry(STATE_ADD, &stat("x", 5, 9, false, inode));
        let last = entry.len() - 1;
        // Flip the last checksum nibble to a different hex digit.
        entry[last] = if entry[last] == b'0' { b'1' } else { b'0' };
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn corrupted_name_byte_rejected() {
        let inode = Uuid::new_v4();
        let mut entry = encode_entry(STATE_ADD, &stat("hello", 5, 9, false, inode));
        let pos = entry.iter().position(|b| *b == b'h').unwrap();
        entry[pos] = b'H';
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn name_length_past_end_rejected() {
        // Claims a 99-byte name but the entry is far shorter.
        let body = b"+f;99;x;0;0;00000000-0000-0000-0000-000000000001";
        let mut entry = body.to_vec();
        let crc = crc16_ccitt(&entry);
        entry.push(b';');
        entry.extend_from_slice(format!("{crc:x}").as_bytes());
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn non_canonical_integer_rejected() {
        // "007" parses but would not re-encode identically.
        let body = b"+f;1;x;007;0;00000000-0000-0000-0000-000000000001";
        let mut entry = body.to_vec();
        let crc = crc16_ccitt(&entry);
        entry.push(b';');
        entry.extend_from_slice(format!("{crc:x}").as_bytes());
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn non_canonical_uuid_rejected() {
        let body = b"+f;1;x;0;0;00000000-0000-0000-0000-00000000000A";
        let mut entry = body.to_vec();
        let crc = crc16_ccitt(&entry);
        entry.push(b';');
        entry.extend_from_slice(format!("{crc:x}").as_bytes());
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    #[test]
    fn truncated_uuid_rejected() {
        let body = b"+f;1;x;0;0;00000000-0000";
        let mut entry = body.to_vec();
        let crc = crc16_ccitt(&entry);
        entry.push(b';');
        entry.extend_from_slice(format!("{crc:x}").as_bytes());
        assert!(matches!(
            decode_entry(&entry),
            Err(OrfsError::MdInvalid(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn roundtrip_arbitrary_stats(
            state in prop::sample::select(vec![STATE_ADD, STATE_REMOVE, STATE_SELF]),
            name in ".{0,40}",
            size in any::<i64>(),
            mtime in any::<i64>(),
            is_dir in any::<bool>(),
            inode_bits in any::<u128>(),
        ) {
            let original = Stat {
                name,
                size,
                mode: if is_dir { Mode::dir(0o755) } else { Mode::file(0o644) },
                mtime,
                is_dir,
                inode: Uuid::from_u128(inode_bits),
            };
            let entry = encode_entry(state, &original);
            let (decoded_state, decoded) = decode_entry(&entry).unwrap();
            prop_assert_eq!(decoded_state, state);
            prop_assert_eq!(&decoded, &original);
            // Injectivity modulo equal stats: re-encoding is byte-identical.
            prop_assert_eq!(encode_entry(decoded_state, &decoded), entry);
        }

        #[test]
        fn decode_is_total_and_exact(bytes in prop::collection::vec(any::<u8>(), 0..=128)) {
            // Never panics; on success the re-encoding is byte-identical.
            if let Ok((state, stat)) = decode_entry(&bytes) {
                prop_assert_eq!(encode_entry(state, &stat), bytes);
            }
        }

        #[test]
        fn single_byte_corruption_never_misdecodes(
            name in "[a-z]{1,12}",
            size in 0_i64..1_000_000,
            mtime in 0_i64..2_000_000_000,
            flip_at in any::<prop::sample::Index>(),
            flip_bit in 0_u8..8,
        ) {
            let original = Stat {
                name,
                size,
                mode: Mode::file(0o644),
                mtime,
                is_dir: false,
                inode: Uuid::from_u128(0xDEAD_BEEF),
            };
            let entry = encode_entry(STATE_ADD, &original);
            let mut corrupted = entry.clone();
            let at = flip_at.index(corrupted.len());
            corrupted[at] ^= 1 << flip_bit;
            prop_assume!(corrupted != entry);
            // Either rejected, or (for a state-byte flip, which the checksum
            // does cover) never silently yields a different stat.
            if let Ok((_, decoded)) = decode_entry(&corrupted) {
                prop_assert_eq!(decoded, original);
            }
        }
    }
}
