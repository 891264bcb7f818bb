//! ==============================================================================
//! frame.rs - display board frame encoder
//! ==============================================================================
//!
//! wire layout of one board message:
//!
//!     00 53 <addr> 03 <msg bytes ...> 04 <xor> <nonce>
//!
//! the xor covers every byte from the leading 00 through the 04. the nonce
//! trails the checksum so the plc can tell a fresh frame from a held one.
//! boards on a direct serial line get the same frame without the nonce.
//!
//! ==============================================================================

/// bytes around the message: 4 header, end marker, checksum, nonce
pub const FRAME_OVERHEAD: usize = 7;

/// bytes reserved per furnace in the field bus display block
pub const SLOT_STRIDE: usize = 16;

/// longest message that fits a slot
pub const MAX_MESSAGE_LEN: usize = SLOT_STRIDE - FRAME_OVERHEAD;

const HEADER: [u8; 2] = [0x00, 0x53];
const START_TEXT: u8 = 0x03;
const END_TEXT: u8 = 0x04;

pub fn frame_len(message_len: usize) -> usize {
    message_len + FRAME_OVERHEAD
}

/// Encode one frame into the front of `dst`, returning the bytes written.
///
/// # Panics
///
/// if `dst` is shorter than `frame_len(message.len())`.
pub fn encode_frame(dst: &mut [u8], address: u8, nonce: u8, message: &[u8]) -> usize {
    let len = frame_len(message.len());
    assert!(
        dst.len() >= len,
        "display frame needs {} bytes, buffer holds {}",
        len,
        dst.len()
    );

    dst[0] = HEADER[0];
    dst[1] = HEADER[1];
    dst[2] = address;
    dst[3] = START_TEXT;
    dst[4..4 + message.len()].copy_from_slice(message);
    let end = 4 + message.len();
    dst[end] = END_TEXT;

    dst[end + 1] = checksum(&dst[..=end]);
    dst[end + 2] = nonce;
    len
}

/// Frame for a board wired straight to a serial port (no nonce).
pub fn encode_serial_frame(address: u8, message: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; frame_len(message.len())];
    let len = encode_frame(&mut buf, address, 0, message);
    buf.truncate(len - 1);
    buf
}

/// Frame content for one furnace slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    pub address: u8,
    pub nonce: u8,
    pub text: String,
}

/// Lay out one frame per furnace at a fixed 16 byte stride.
///
/// Slots without a message stay zeroed.
pub fn encode_slots(slots: &[Option<DisplayMessage>]) -> Vec<u8> {
    let mut buf = vec![0u8; slots.len() * SLOT_STRIDE];
    for (i, slot) in slots.iter().enumerate() {
        if let Some(msg) = slot {
            let start = i * SLOT_STRIDE;
            encode_frame(
                &mut buf[start..start + SLOT_STRIDE],
                msg.address,
                msg.nonce,
                msg.text.as_bytes(),
            );
        }
    }
    buf
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_frame() {
        let mut buf = [0u8; 12];
        let n = encode_frame(&mut buf, 0x07, 0x2A, b"12:34");
        assert_eq!(n, 12);

        let body = [0x00u8, 0x53, 0x07, 0x03, 0x31, 0x32, 0x3A, 0x33, 0x34, 0x04];
        let xor = body.iter().fold(0u8, |a, b| a ^ b);
        assert_eq!(&buf[..10], &body);
        assert_eq!(buf[10], xor);
        assert_eq!(buf[11], 0x2A);
    }

    #[test]
    fn test_exact_capacity_is_enough() {
        let mut buf = vec![0u8; frame_len(MAX_MESSAGE_LEN)];
        assert_eq!(buf.len(), SLOT_STRIDE);
        let n = encode_frame(&mut buf, 1, 1, &[b'8'; MAX_MESSAGE_LEN]);
        assert_eq!(n, SLOT_STRIDE);
    }

    #[test]
    fn test_nonce_excluded_from_checksum() {
        let mut a = [0u8; 12];
        let mut b = [0u8; 12];
        encode_frame(&mut a, 1, 0, b"00:00");
        encode_frame(&mut b, 1, 255, b"00:00");
        assert_eq!(a[10], b[10]);
        assert_ne!(a[11], b[11]);
    }

    #[test]
    fn test_message_byte_changes_checksum() {
        let mut base = [0u8; 12];
        encode_frame(&mut base, 0x07, 0, b"12:34");
        for i in 0..5 {
            let mut msg = *b"12:34";
            msg[i] ^= 0x01;
            let mut other = [0u8; 12];
            encode_frame(&mut other, 0x07, 0, &msg);
            assert_ne!(base[10], other[10], "byte {} did not affect checksum", i);
        }
    }

    #[test]
    #[should_panic(expected = "display frame needs")]
    fn test_short_buffer_panics() {
        let mut buf = [0u8; 11];
        encode_frame(&mut buf, 1, 0, b"12:34");
    }

    #[test]
    fn test_serial_frame_drops_nonce() {
        let frame = encode_serial_frame(0x07, b"12:34");
        assert_eq!(frame.len(), 11);
        assert_eq!(frame[9], 0x04);
        assert_eq!(frame[10], frame[..10].iter().fold(0u8, |a, b| a ^ b));
    }

    #[test]
    fn test_slots_fixed_stride() {
        let slots = vec![
            Some(DisplayMessage { address: 1, nonce: 5, text: "01:00".into() }),
            None,
            Some(DisplayMessage { address: 3, nonce: 6, text: "00 07".into() }),
        ];
        let buf = encode_slots(&slots);
        assert_eq!(buf.len(), 48);
        assert_eq!(&buf[0..4], &[0x00, 0x53, 1, 0x03]);
        assert_eq!(buf[11], 5);
        assert!(buf[12..32].iter().all(|b| *b == 0));
        assert_eq!(&buf[32..36], &[0x00, 0x53, 3, 0x03]);
        assert_eq!(buf[43], 6);
    }
}
