//! Console fragment codec.
//!
//! An inner message `BE16(len) ‖ payload ‖ BE16(crc)` is base64 encoded and
//! cut into fragments:
//! ```text
//! first:         06 09 <base64 text> 0A
//! continuation:  14 04 <base64 text> 0A
//! ```
//! Reassembly works on a whole transmission; any fault discards all of it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serialprims_frame::{crc16_ccitt, CONSOLE_CRC_INIT};
use tracing::trace;

use crate::error::{ConsoleError, Result};

/// Marker opening the first fragment of a transmission.
pub const FIRST_MARKER: [u8; 2] = [0x06, 0x09];

/// Marker opening every later fragment.
pub const CONTINUATION_MARKER: [u8; 2] = [0x14, 0x04];

/// Byte closing every fragment.
pub const TERMINATOR: u8 = 0x0A;

/// Marker plus terminator.
pub const FRAGMENT_OVERHEAD: usize = 3;

/// Length prefix plus trailing CRC of the inner message.
pub const INNER_OVERHEAD: usize = 4;

/// Wrap a payload as `BE16(len(payload) + 2) ‖ payload ‖ BE16(crc)`.
pub fn encode_inner(payload: &[u8]) -> Result<Vec<u8>> {
    let declared = payload.len() + 2;
    let len = u16::try_from(declared).map_err(|_| ConsoleError::MessageTooLarge {
        size: payload.len(),
        max: u16::MAX as usize - 2,
    })?;

    let mut inner = Vec::with_capacity(payload.len() + INNER_OVERHEAD);
    inner.extend_from_slice(&len.to_be_bytes());
    inner.extend_from_slice(payload);
    inner.extend_from_slice(&crc16_ccitt(payload, CONSOLE_CRC_INIT).to_be_bytes());
    Ok(inner)
}

/// Validate the length prefix and CRC of an inner message and return its payload.
pub fn decode_inner(inner: &[u8]) -> Result<&[u8]> {
    if inner.len() < INNER_OVERHEAD {
        return Err(ConsoleError::LengthMismatch {
            declared: inner
                .get(..2)
                .map_or(0, |b| usize::from(u16::from_be_bytes([b[0], b[1]]))),
            actual: inner.len().saturating_sub(2),
        });
    }

    let declared = usize::from(u16::from_be_bytes([inner[0], inner[1]]));
    let rest = &inner[2..];
    if declared != rest.len() {
        return Err(ConsoleError::LengthMismatch {
            declared,
            actual: rest.len(),
        });
    }

    let (payload, crc) = rest.split_at(rest.len() - 2);
    let received = u16::from_be_bytes([crc[0], crc[1]]);
    let computed = crc16_ccitt(payload, CONSOLE_CRC_INIT);
    if received != computed {
        return Err(ConsoleError::ChecksumMismatch { received, computed });
    }
    Ok(payload)
}

/// Pack a payload into console fragments of at most `max_packet_size` bytes.
pub fn pack(payload: &[u8], max_packet_size: usize) -> Result<Vec<Vec<u8>>> {
    let chunk = max_packet_size
        .checked_sub(FRAGMENT_OVERHEAD)
        .filter(|chunk| *chunk > 0)
        .ok_or(ConsoleError::PacketSizeTooSmall {
            size: max_packet_size,
        })?;

    let text = STANDARD.encode(encode_inner(payload)?);
    let fragments = text
        .as_bytes()
        .chunks(chunk)
        .enumerate()
        .map(|(index, part)| {
            let marker = if index == 0 {
                FIRST_MARKER
            } else {
                CONTINUATION_MARKER
            };
            let mut fragment = Vec::with_capacity(part.len() + FRAGMENT_OVERHEAD);
            fragment.extend_from_slice(&marker);
            fragment.extend_from_slice(part);
            fragment.push(TERMINATOR);
            fragment
        })
        .collect();
    Ok(fragments)
}

/// Split a received run into fragments, each ending with its terminator.
pub fn split_fragments(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut fragments: Vec<&[u8]> = bytes.split_inclusive(|b| *b == TERMINATOR).collect();
    if let Some(last) = fragments.last() {
        if last.last() != Some(&TERMINATOR) {
            return Err(ConsoleError::Incomplete {
                trailing: last.len(),
            });
        }
    }
    fragments.retain(|f| !f.is_empty());
    Ok(fragments)
}

/// Reassemble one transmission and return the inner payload.
pub fn unpack(bytes: &[u8]) -> Result<Vec<u8>> {
    let fragments = split_fragments(bytes)?;
    if fragments.is_empty() {
        return Err(ConsoleError::Empty);
    }

    let mut text = Vec::with_capacity(bytes.len());
    for (index, fragment) in fragments.iter().enumerate() {
        if fragment.len() < FRAGMENT_OVERHEAD {
            return Err(ConsoleError::MalformedFragment {
                index,
                len: fragment.len(),
            });
        }
        let expected = if index == 0 {
            FIRST_MARKER
        } else {
            CONTINUATION_MARKER
        };
        let found = [fragment[0], fragment[1]];
        if found != expected {
            return Err(ConsoleError::InvalidMarker {
                index,
                found,
                expected,
            });
        }
        text.extend_from_slice(&fragment[2..fragment.len() - 1]);
    }

    if text.is_empty() {
        return Err(ConsoleError::Empty);
    }
    trace!(fragments = fragments.len(), text = text.len(), "reassembled console text");

    let inner = STANDARD.decode(&text)?;
    decode_inner(&inner).map(<[u8]>::to_vec)
}

/// Split a buffer holding back-to-back transmissions.
///
/// A new transmission begins at every first-fragment marker found at the
/// start of the buffer or directly after a terminator. Bytes ahead of the
/// first marker form their own (invalid) transmission so they get reported.
pub fn split_transmissions(buf: &[u8]) -> Vec<&[u8]> {
    let mut starts: Vec<usize> = (0..buf.len().saturating_sub(1))
        .filter(|&i| buf[i..i + 2] == FIRST_MARKER && (i == 0 || buf[i - 1] == TERMINATOR))
        .collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut transmissions = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(buf.len());
        if end > start {
            transmissions.push(&buf[start..end]);
        }
    }
    transmissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_PACKET_SIZE;

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn wire(fragments: &[Vec<u8>]) -> Vec<u8> {
        fragments.concat()
    }

    #[test]
    fn inner_message_layout() {
        let inner = encode_inner(&[0x01]).unwrap();
        assert_eq!(inner, vec![0x00, 0x03, 0x01, 0x10, 0x21]);
        assert_eq!(decode_inner(&inner).unwrap(), &[0x01]);
    }

    #[test]
    fn pack_empty_payload() {
        let fragments = pack(&[], DEFAULT_MAX_PACKET_SIZE).unwrap();
        let mut expected = vec![0x06, 0x09];
        expected.extend_from_slice(b"AAIAAA==");
        expected.push(0x0A);
        assert_eq!(fragments, vec![expected]);
    }

    #[test]
    fn pack_single_byte() {
        let fragments = pack(&[0x01], DEFAULT_MAX_PACKET_SIZE).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(&fragments[0][2..fragments[0].len() - 1], b"AAMBECE=");
    }

    #[test]
    fn roundtrip_boundary_sizes() {
        for len in [0usize, 1, 124, 125, 300] {
            let payload = payload_of(len);
            let fragments = pack(&payload, DEFAULT_MAX_PACKET_SIZE).unwrap();

            let text_len = (len + INNER_OVERHEAD).div_ceil(3) * 4;
            assert_eq!(fragments.len(), text_len.div_ceil(124), "len {len}");
            for (index, fragment) in fragments.iter().enumerate() {
                assert!(fragment.len() <= DEFAULT_MAX_PACKET_SIZE);
                let marker = if index == 0 {
                    FIRST_MARKER
                } else {
                    CONTINUATION_MARKER
                };
                assert_eq!(fragment[..2], marker);
                assert_eq!(fragment.last(), Some(&TERMINATOR));
            }

            assert_eq!(unpack(&wire(&fragments)).unwrap(), payload, "len {len}");
        }
    }

    #[test]
    fn small_packet_size_yields_more_fragments() {
        let payload = payload_of(40);
        let fragments = pack(&payload, 11).unwrap();
        assert!(fragments.iter().all(|f| f.len() <= 11));
        assert_eq!(fragments.len(), 8);
        assert_eq!(unpack(&wire(&fragments)).unwrap(), payload);
    }

    #[test]
    fn packet_size_must_leave_room() {
        assert!(matches!(
            pack(&[1], 3),
            Err(ConsoleError::PacketSizeTooSmall { size: 3 })
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; u16::MAX as usize];
        assert!(matches!(
            encode_inner(&payload),
            Err(ConsoleError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn wrong_first_marker_is_rejected() {
        let mut bytes = wire(&pack(&payload_of(10), DEFAULT_MAX_PACKET_SIZE).unwrap());
        bytes[0] = 0x14;
        bytes[1] = 0x04;
        assert!(matches!(
            unpack(&bytes),
            Err(ConsoleError::InvalidMarker { index: 0, .. })
        ));
    }

    #[test]
    fn wrong_continuation_marker_is_rejected() {
        let fragments = pack(&payload_of(200), DEFAULT_MAX_PACKET_SIZE).unwrap();
        let mut bytes = fragments[0].clone();
        let mut second = fragments[1].clone();
        second[..2].copy_from_slice(&FIRST_MARKER);
        bytes.extend(second);
        assert!(matches!(
            unpack(&bytes),
            Err(ConsoleError::InvalidMarker { index: 1, .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_incomplete() {
        let mut bytes = wire(&pack(&payload_of(10), DEFAULT_MAX_PACKET_SIZE).unwrap());
        bytes.extend_from_slice(&[0x14, 0x04, b'A']);
        assert!(matches!(
            unpack(&bytes),
            Err(ConsoleError::Incomplete { trailing: 3 })
        ));
    }

    #[test]
    fn bare_terminator_is_malformed() {
        let mut bytes = wire(&pack(&payload_of(10), DEFAULT_MAX_PACKET_SIZE).unwrap());
        bytes.push(TERMINATOR);
        assert!(matches!(
            unpack(&bytes),
            Err(ConsoleError::MalformedFragment { index: 1, len: 1 })
        ));
    }

    #[test]
    fn corrupted_text_fails_checksum_or_decode() {
        let mut bytes = wire(&pack(&payload_of(30), DEFAULT_MAX_PACKET_SIZE).unwrap());
        // Swap one base64 character for another valid one in the payload area.
        bytes[12] = if bytes[12] == b'A' { b'B' } else { b'A' };
        assert!(matches!(
            unpack(&bytes),
            Err(ConsoleError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let bytes = [0x06, 0x09, b'!', b'!', b'!', b'!', 0x0A];
        assert!(matches!(unpack(&bytes), Err(ConsoleError::Base64(_))));
    }

    #[test]
    fn length_prefix_mismatch_is_rejected() {
        let mut inner = encode_inner(&[1, 2, 3]).unwrap();
        inner[1] += 1;
        assert!(matches!(
            decode_inner(&inner),
            Err(ConsoleError::LengthMismatch {
                declared: 6,
                actual: 5
            })
        ));
        assert!(matches!(
            decode_inner(&[0x00]),
            Err(ConsoleError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(unpack(&[]), Err(ConsoleError::Empty)));
        assert!(matches!(
            unpack(&[0x06, 0x09, 0x0A]),
            Err(ConsoleError::Empty)
        ));
    }

    #[test]
    fn back_to_back_transmissions_split() {
        let a = wire(&pack(&payload_of(5), DEFAULT_MAX_PACKET_SIZE).unwrap());
        let b = wire(&pack(&payload_of(200), DEFAULT_MAX_PACKET_SIZE).unwrap());
        let mut buf = a.clone();
        buf.extend_from_slice(&b);

        let parts = split_transmissions(&buf);
        assert_eq!(parts, vec![a.as_slice(), b.as_slice()]);
        assert_eq!(unpack(parts[1]).unwrap(), payload_of(200));
    }

    #[test]
    fn leading_noise_forms_its_own_transmission() {
        let a = wire(&pack(&payload_of(5), DEFAULT_MAX_PACKET_SIZE).unwrap());
        let mut buf = b"boot\n".to_vec();
        buf.extend_from_slice(&a);

        let parts = split_transmissions(&buf);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"boot\n");
        assert!(unpack(parts[0]).is_err());
        assert_eq!(unpack(parts[1]).unwrap(), payload_of(5));
    }
}
