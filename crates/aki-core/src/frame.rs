//! Frame Reader: extracts complete MLLP-style framed messages from an
//! append-only byte buffer produced by a socket.
//!
//! Framing: `0x0B <payload> 0x1C 0x0D`. The payload must not itself contain
//! `0x0B`/`0x1C`; if it does, any byte that is not the trailer is treated as
//! payload until a proper end-of-block is seen (see `extract_frames`).

/// Start-of-block control byte.
pub const START_OF_BLOCK: u8 = 0x0B;
/// End-of-block control byte.
pub const END_OF_BLOCK: u8 = 0x1C;
/// Carriage-return trailer byte that must follow end-of-block.
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// The fixed upstream acknowledgement frame sent after every processed
/// message (see spec §6).
pub const ACK_HL7: &str =
    "MSH|^~\\&|ACK_APP|ACK_FAC|SIMULATOR|SIM_FAC|20250129090000||ACK|12345|P|2.3\rMSA|AA|12345\r";

/// The framed acknowledgement, ready to write to the socket.
pub fn ack_frame() -> Vec<u8> {
    frame_message(ACK_HL7.as_bytes())
}

/// Pre-built framed acknowledgement bytes, for callers that don't want to
/// rebuild it on every send.
pub static ACK_FRAME: &[u8] = b"\x0BMSH|^~\\&|ACK_APP|ACK_FAC|SIMULATOR|SIM_FAC|20250129090000||ACK|12345|P|2.3\rMSA|AA|12345\r\x1C\x0D";

/// Wrap a raw payload in MLLP-style framing.
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(START_OF_BLOCK);
    out.extend_from_slice(payload);
    out.push(END_OF_BLOCK);
    out.push(CARRIAGE_RETURN);
    out
}

/// Scan `buffer` for zero or more complete frames, returning the extracted
/// payloads in order plus the unconsumed tail.
///
/// Bytes before the first `0x0B` are discarded. An in-progress frame with no
/// trailer yet is retained from its `0x0B` onward in the returned tail, so
/// the next call (after more bytes are appended) can complete it. A lone
/// `0x1C` not followed by `0x0D` is not a frame terminator: the scan treats
/// it as ordinary payload and continues looking for a real trailer.
pub fn extract_frames(buffer: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    let mut messages = Vec::new();
    let len = buffer.len();
    let mut i = 0usize;
    let mut frame_start: Option<usize> = None;

    while i < len {
        match frame_start {
            None => {
                if buffer[i] == START_OF_BLOCK {
                    frame_start = Some(i);
                }
                i += 1;
            }
            Some(start) => {
                if buffer[i] == END_OF_BLOCK {
                    if i + 1 < len {
                        if buffer[i + 1] == CARRIAGE_RETURN {
                            messages.push(buffer[start + 1..i].to_vec());
                            i += 2;
                            frame_start = None;
                        } else {
                            // End-of-block not followed by CR: protocol
                            // violation, resynchronise by continuing to scan.
                            i += 1;
                        }
                    } else {
                        // Trailer incomplete (0x1C is the last byte we have);
                        // wait for more data.
                        break;
                    }
                } else {
                    i += 1;
                }
            }
        }
    }

    let leftover = match frame_start {
        Some(start) => buffer[start..].to_vec(),
        None => Vec::new(),
    };
    (messages, leftover)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message_round_trips() {
        let framed = frame_message(b"HL7_MESSAGE");
        let (messages, leftover) = extract_frames(&framed);
        assert_eq!(messages, vec![b"HL7_MESSAGE".to_vec()]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn multiple_messages_in_one_buffer() {
        let mut buffer = frame_message(b"MSG1");
        buffer.extend(frame_message(b"MSG2"));
        let (messages, leftover) = extract_frames(&buffer);
        assert_eq!(messages, vec![b"MSG1".to_vec(), b"MSG2".to_vec()]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn split_across_reads() {
        let framed = frame_message(b"MSH...\rPID...");
        let split = framed.len() - 3;
        let (first_chunk, second_chunk) = framed.split_at(split);

        let (messages, leftover) = extract_frames(first_chunk);
        assert!(messages.is_empty());
        assert!(!leftover.is_empty());

        let mut rejoined = leftover;
        rejoined.extend_from_slice(second_chunk);
        let (messages, leftover) = extract_frames(&rejoined);
        assert_eq!(messages, vec![b"MSH...\rPID...".to_vec()]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn partial_tail_is_preserved_verbatim() {
        let mut buffer = frame_message(b"COMPLETE");
        buffer.push(START_OF_BLOCK);
        buffer.extend_from_slice(b"partial, no trailer yet");
        let (messages, leftover) = extract_frames(&buffer);
        assert_eq!(messages, vec![b"COMPLETE".to_vec()]);
        assert_eq!(leftover[0], START_OF_BLOCK);
        assert_eq!(&leftover[1..], b"partial, no trailer yet");
    }

    #[test]
    fn bytes_before_first_start_of_block_are_discarded() {
        let mut buffer = vec![0xFF, 0xAB, 0x00];
        buffer.extend(frame_message(b"MSG"));
        let (messages, leftover) = extract_frames(&buffer);
        assert_eq!(messages, vec![b"MSG".to_vec()]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn stray_end_of_block_without_cr_does_not_terminate_frame() {
        // 0x1C followed by something other than 0x0D should be treated as
        // payload and scanning continues for the real trailer.
        let mut buffer = vec![START_OF_BLOCK];
        buffer.extend_from_slice(b"AB");
        buffer.push(END_OF_BLOCK);
        buffer.push(b'X'); // not a CR -> not a valid trailer
        buffer.extend_from_slice(b"CD");
        buffer.push(END_OF_BLOCK);
        buffer.push(CARRIAGE_RETURN);

        let (messages, leftover) = extract_frames(&buffer);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], b"AB\x1CXCD".to_vec());
        assert!(leftover.is_empty());
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let (messages, leftover) = extract_frames(&[]);
        assert!(messages.is_empty());
        assert!(leftover.is_empty());
    }

    #[test]
    fn ack_frame_matches_fixed_wire_format() {
        let built = ack_frame();
        assert_eq!(built, ACK_FRAME.to_vec());
        assert!(built.starts_with(&[START_OF_BLOCK]));
        assert!(built.ends_with(&[END_OF_BLOCK, CARRIAGE_RETURN]));
        let (messages, leftover) = extract_frames(&built);
        assert_eq!(messages.len(), 1);
        assert!(leftover.is_empty());
        let payload = std::str::from_utf8(&messages[0]).unwrap();
        assert!(payload.contains("MSH|^~\\&|ACK_APP|ACK_FAC|SIMULATOR|SIM_FAC"));
        assert!(payload.contains("MSA|AA|12345"));
    }
}
