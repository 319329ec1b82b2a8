use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::fix::message::{Message, MsgType};
use crate::fix::tags;
use crate::simulator::error::{SimulatorError, SimulatorResult};

/// Field delimiter
pub const SOH: u8 = 0x01;

/// `10=ccc<SOH>`
const TRAILER_LEN: usize = 7;

/// Upper bound on `8=..<SOH>9=..<SOH>` before a frame is declared garbage
const MAX_FRAME_HEADER: usize = 64;

/// Largest BodyLength a peer may announce
pub const MAX_BODY_LENGTH: usize = 64 * 1024;

pub const DEFAULT_BEGIN_STRING: &str = "FIX.4.4";

/// Sum of byte values mod 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[inline]
fn push_field(out: &mut Vec<u8>, tag: u32, value: &str) {
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b'=');
    out.extend_from_slice(value.as_bytes());
    out.push(SOH);
}

fn malformed(reason: impl Into<String>) -> SimulatorError {
    SimulatorError::MalformedMessage(reason.into())
}

/// Split one `tag=value` field (without its delimiter).
fn parse_field(raw: &[u8]) -> SimulatorResult<(u32, &str)> {
    let text = std::str::from_utf8(raw).map_err(|_| malformed("field is not valid UTF-8"))?;
    let (tag, value) = text
        .split_once('=')
        .ok_or_else(|| malformed(format!("field '{}' has no '='", text)))?;
    let tag = tag
        .parse::<u32>()
        .map_err(|_| malformed(format!("field '{}' has a non-numeric tag", text)))?;
    Ok((tag, value))
}

/// Read the field starting at `offset`; returns tag, value and the offset
/// just past its delimiter.
fn read_field(raw: &[u8], offset: usize) -> SimulatorResult<(u32, &str, usize)> {
    let rest = raw
        .get(offset..)
        .ok_or_else(|| malformed("truncated header"))?;
    let end = rest
        .iter()
        .position(|b| *b == SOH)
        .ok_or_else(|| malformed("unterminated header field"))?;
    let (tag, value) = parse_field(&rest[..end])?;
    Ok((tag, value, offset + end + 1))
}

/// Bidirectional mapping between a `Message` and its wire bytes.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    begin_string: String,
}

impl MessageCodec {
    pub fn new(begin_string: impl Into<String>) -> Self {
        Self {
            begin_string: begin_string.into(),
        }
    }

    /// Serialize as `8 9 35 <header> <body> 10`. Header fields (49, 56, 34,
    /// 52) are normalized to the front; body fields keep insertion order.
    pub fn encode(&self, message: &Message) -> Bytes {
        let mut body = Vec::with_capacity(128);
        push_field(&mut body, tags::MSG_TYPE, message.msg_type().as_str());
        for tag in tags::HEADER_ORDER {
            if let Ok(value) = message.get_field(tag) {
                push_field(&mut body, tag, value);
            }
        }
        for field in message.fields() {
            if !tags::HEADER_ORDER.contains(&field.tag) {
                push_field(&mut body, field.tag, &field.value);
            }
        }

        let mut out = Vec::with_capacity(body.len() + 32);
        push_field(&mut out, tags::BEGIN_STRING, &self.begin_string);
        push_field(&mut out, tags::BODY_LENGTH, &body.len().to_string());
        out.extend_from_slice(&body);

        let sum = checksum(&out);
        push_field(&mut out, tags::CHECKSUM, &format!("{:03}", sum));

        Bytes::from(out)
    }

    pub fn decode(&self, raw: &[u8]) -> SimulatorResult<Message> {
        if raw.len() < TRAILER_LEN || raw[raw.len() - 1] != SOH {
            return Err(malformed("missing trailing delimiter"));
        }

        // Trailer
        let trailer_start = raw.len() - TRAILER_LEN;
        let trailer = &raw[trailer_start..];
        if !trailer.starts_with(b"10=") || (trailer_start > 0 && raw[trailer_start - 1] != SOH) {
            return Err(malformed("checksum field (10) missing"));
        }
        let digits = &trailer[3..6];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed("checksum is not three digits"));
        }
        let declared: u32 = digits
            .iter()
            .fold(0, |acc, d| acc * 10 + u32::from(d - b'0'));
        let computed = checksum(&raw[..trailer_start]);
        if declared != u32::from(computed) {
            return Err(malformed(format!(
                "checksum mismatch: declared {:03}, computed {:03}",
                declared, computed
            )));
        }

        // Framing header
        let (tag, begin_string, offset) = read_field(raw, 0)?;
        if tag != tags::BEGIN_STRING {
            return Err(malformed("BeginString (8) must be the first field"));
        }
        if begin_string != self.begin_string {
            return Err(malformed(format!(
                "unexpected BeginString '{}', expected '{}'",
                begin_string, self.begin_string
            )));
        }
        let (tag, body_length, body_start) = read_field(raw, offset)?;
        if tag != tags::BODY_LENGTH {
            return Err(malformed("BodyLength (9) must be the second field"));
        }
        let body_length: usize = body_length
            .parse()
            .map_err(|_| malformed(format!("BodyLength '{}' is not a number", body_length)))?;
        if trailer_start < body_start || trailer_start - body_start != body_length {
            return Err(malformed(format!(
                "BodyLength {} does not match actual body of {} bytes",
                body_length,
                trailer_start.saturating_sub(body_start)
            )));
        }

        // Body
        let body = &raw[body_start..trailer_start];
        let mut msg_type = None;
        let mut fields = Vec::new();
        if !body.is_empty() {
            for raw_field in body[..body.len() - 1].split(|b| *b == SOH) {
                let (tag, value) = parse_field(raw_field)?;
                match tag {
                    tags::MSG_TYPE if msg_type.is_none() => msg_type = Some(MsgType::parse(value)),
                    t if tags::is_framing_tag(t) => {
                        return Err(malformed(format!("framing tag {} repeated in body", t)))
                    }
                    t => fields.push((t, value)),
                }
            }
        }

        let msg_type = msg_type.ok_or_else(|| malformed("MsgType (35) missing"))?;
        let mut message = Message::new(msg_type);
        for (tag, value) in fields {
            message.push_field(tag, value);
        }
        Ok(message)
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BEGIN_STRING)
    }
}

/// Position of the next `<SOH>8=` boundary, pointing at the `8`.
fn next_frame_start(buf: &[u8]) -> Option<usize> {
    buf.windows(3)
        .position(|w| w == [SOH, b'8', b'='])
        .map(|pos| pos + 1)
}

fn discard_garbage(buf: &mut BytesMut, reason: &str) -> SimulatorError {
    let skip = next_frame_start(buf).unwrap_or(buf.len());
    buf.advance(skip);
    malformed(format!("{}; discarded {} bytes", reason, skip))
}

/// Pull one complete message off the front of a stream buffer.
///
/// Returns `Ok(None)` when more bytes are needed. Unframeable data is
/// dropped up to the next message start and reported as `MalformedMessage`.
/// Checksum validation is left to `MessageCodec::decode`.
pub fn split_frame(buf: &mut BytesMut) -> SimulatorResult<Option<Bytes>> {
    if buf.len() < 2 {
        if buf.first().map_or(true, |b| *b == b'8') {
            return Ok(None);
        }
        return Err(discard_garbage(buf, "unframed data"));
    }
    if !buf.starts_with(b"8=") {
        return Err(discard_garbage(buf, "unframed data"));
    }

    let first_soh = match buf.iter().position(|b| *b == SOH) {
        Some(pos) => pos,
        None if buf.len() > MAX_FRAME_HEADER => {
            return Err(discard_garbage(buf, "unterminated BeginString"))
        }
        None => return Ok(None),
    };

    let after_begin = &buf[first_soh + 1..];
    if after_begin.len() < 2 {
        return Ok(None);
    }
    if !after_begin.starts_with(b"9=") {
        return Err(discard_garbage(buf, "BodyLength (9) must follow BeginString"));
    }

    let second_soh = match after_begin.iter().position(|b| *b == SOH) {
        Some(pos) => first_soh + 1 + pos,
        None if buf.len() > MAX_FRAME_HEADER => {
            return Err(discard_garbage(buf, "unterminated BodyLength"))
        }
        None => return Ok(None),
    };

    let body_length = std::str::from_utf8(&buf[first_soh + 3..second_soh])
        .ok()
        .and_then(|s| s.parse::<usize>().ok());
    let body_length = match body_length {
        Some(len) => len,
        None => return Err(discard_garbage(buf, "BodyLength is not a number")),
    };

    if body_length > MAX_BODY_LENGTH {
        return Err(discard_garbage(buf, "BodyLength exceeds limit"));
    }
    let total = match (second_soh + 1 + TRAILER_LEN).checked_add(body_length) {
        Some(total) => total,
        None => return Err(discard_garbage(buf, "BodyLength exceeds limit")),
    };
    if buf.len() < total {
        return Ok(None);
    }

    trace!("Framed message of {} bytes", total);
    Ok(Some(buf.split_to(total).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn soh(text: &str) -> Vec<u8> {
        text.replace('|', "\x01").into_bytes()
    }

    fn sample_order() -> Message {
        Message::new(MsgType::NewOrderSingle)
            .with_field(tags::CL_ORD_ID, "abc-000001")
            .with_field(tags::SYMBOL, "EUR/USD")
            .with_field(tags::SIDE, "1")
            .with_field(tags::ORDER_QTY, 1000)
            .with_field(tags::ORD_TYPE, "1")
            .with_field(tags::MSG_SEQ_NUM, 2)
            .with_field(tags::SENDER_COMP_ID, "CLIENT")
    }

    #[test]
    fn test_encode_layout() {
        let codec = MessageCodec::default();
        let wire = codec.encode(&sample_order());
        let text = String::from_utf8(wire.to_vec()).unwrap().replace('\x01', "|");

        let body = "35=D|49=CLIENT|34=2|11=abc-000001|55=EUR/USD|54=1|38=1000|40=1|";
        assert!(text.starts_with(&format!("8=FIX.4.4|9={}|{}", body.len(), body)));
        assert!(text.ends_with('|'));
        assert_eq!(&text[text.len() - 7..text.len() - 4], "10=");
    }

    #[test]
    fn test_encode_is_byte_stable() {
        let codec = MessageCodec::default();
        assert_eq!(codec.encode(&sample_order()), codec.encode(&sample_order()));
    }

    #[test]
    fn test_known_checksum() {
        let codec = MessageCodec::default();
        let wire = codec.encode(&Message::new(MsgType::Heartbeat));
        let prefix = soh("8=FIX.4.4|9=5|35=0|");
        let expected: u32 = prefix.iter().map(|b| u32::from(*b)).sum::<u32>() % 256;

        assert_eq!(&wire[..prefix.len()], prefix.as_slice());
        assert_eq!(
            &wire[prefix.len()..],
            soh(&format!("10={:03}|", expected)).as_slice()
        );
    }

    #[test]
    fn test_decode_round_trip() {
        let codec = MessageCodec::default();
        let original = sample_order();
        let decoded = codec.decode(&codec.encode(&original)).unwrap();

        assert_eq!(decoded.msg_type(), &MsgType::NewOrderSingle);
        for field in original.fields() {
            assert_eq!(decoded.get_field(field.tag).unwrap(), field.value);
        }
        assert_eq!(decoded.fields().len(), original.fields().len());
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let codec = MessageCodec::default();
        let mut wire = codec.encode(&sample_order()).to_vec();
        let len = wire.len();
        // Flip a body byte without touching the trailer
        wire[len - 12] = b'9';

        match codec.decode(&wire) {
            Err(SimulatorError::MalformedMessage(reason)) => {
                assert!(reason.contains("checksum mismatch"))
            }
            other => panic!("expected checksum failure, got {:?}", other),
        }
    }

    fn with_checksum(prefix: &str) -> Vec<u8> {
        let mut raw = soh(prefix);
        let sum = checksum(&raw);
        raw.extend_from_slice(&soh(&format!("10={:03}|", sum)));
        raw
    }

    #[test]
    fn test_decode_rejects_bad_body_length() {
        let codec = MessageCodec::default();
        let raw = with_checksum("8=FIX.4.4|9=99|35=D|55=EUR/USD|");

        match codec.decode(&raw) {
            Err(SimulatorError::MalformedMessage(reason)) => assert!(reason.contains("BodyLength")),
            other => panic!("expected framing failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_requires_msg_type() {
        let codec = MessageCodec::default();
        let raw = with_checksum("8=FIX.4.4|9=11|55=EUR/USD|");

        assert_eq!(
            codec.decode(&raw),
            Err(SimulatorError::MalformedMessage("MsgType (35) missing".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_foreign_begin_string() {
        let codec = MessageCodec::default();
        let raw = with_checksum("8=FIX.4.2|9=5|35=0|");
        assert!(matches!(
            codec.decode(&raw),
            Err(SimulatorError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_then_field_not_found() {
        let codec = MessageCodec::default();
        let raw = with_checksum("8=FIX.4.4|9=5|35=D|");
        let message = codec.decode(&raw).unwrap();

        assert_eq!(
            message.get_field(tags::SYMBOL),
            Err(SimulatorError::FieldNotFound(tags::SYMBOL))
        );
    }

    #[test]
    fn test_split_frame_waits_for_complete_message() {
        let codec = MessageCodec::default();
        let first = codec.encode(&sample_order());
        let second = codec.encode(&Message::new(MsgType::Heartbeat));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first[..10]);
        assert_eq!(split_frame(&mut buf).unwrap(), None);

        buf.extend_from_slice(&first[10..]);
        buf.extend_from_slice(&second[..4]);
        assert_eq!(split_frame(&mut buf).unwrap(), Some(first.clone()));
        assert_eq!(split_frame(&mut buf).unwrap(), None);

        buf.extend_from_slice(&second[4..]);
        assert_eq!(split_frame(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame_skips_garbage() {
        let codec = MessageCodec::default();
        let wire = codec.encode(&Message::new(MsgType::Heartbeat));

        let mut buf = BytesMut::from(&b"noise\x01"[..]);
        buf.extend_from_slice(&wire);

        assert!(matches!(
            split_frame(&mut buf),
            Err(SimulatorError::MalformedMessage(_))
        ));
        assert_eq!(split_frame(&mut buf).unwrap(), Some(wire));
    }

    #[test]
    fn test_split_frame_rejects_oversized_body_length() {
        let codec = MessageCodec::default();
        let wire = codec.encode(&Message::new(MsgType::Heartbeat));

        for header in [
            "8=FIX.4.4|9=18446744073709551615|35=0|",
            "8=FIX.4.4|9=65537|35=0|",
        ] {
            let mut buf = BytesMut::from(soh(header).as_slice());
            buf.extend_from_slice(&wire);

            match split_frame(&mut buf) {
                Err(SimulatorError::MalformedMessage(reason)) => {
                    assert!(reason.contains("BodyLength exceeds limit"), "{}", reason)
                }
                other => panic!("expected MalformedMessage, got {:?}", other),
            }
            assert_eq!(split_frame(&mut buf).unwrap(), Some(wire.clone()));
        }
    }

    fn body_tag() -> impl Strategy<Value = u32> {
        (11u32..400).prop_filter("codec-owned tag", |t| !tags::is_framing_tag(*t))
    }

    proptest! {
        #[test]
        fn round_trip_preserves_values(
            fields in prop::collection::btree_map(body_tag(), "[A-Za-z0-9/.=-]{0,16}", 0..10)
        ) {
            let codec = MessageCodec::default();
            let mut message = Message::new(MsgType::ExecutionReport);
            for (tag, value) in &fields {
                message.set_field(*tag, value);
            }

            let decoded = codec.decode(&codec.encode(&message)).unwrap();
            prop_assert_eq!(decoded.msg_type(), &MsgType::ExecutionReport);
            for (tag, value) in &fields {
                prop_assert_eq!(decoded.get_field(*tag).unwrap(), value.as_str());
            }
        }

        #[test]
        fn trailer_is_checksum_of_preceding_bytes(
            fields in prop::collection::btree_map(body_tag(), "[ -~]{1,24}", 0..10)
        ) {
            let codec = MessageCodec::default();
            let mut message = Message::new(MsgType::NewOrderSingle);
            for (tag, value) in &fields {
                message.set_field(*tag, value);
            }

            let wire = codec.encode(&message);
            let split = wire.len() - TRAILER_LEN;
            let expected = wire[..split].iter().map(|b| u32::from(*b)).sum::<u32>() % 256;
            let trailer = soh(&format!("10={:03}|", expected));
            prop_assert_eq!(&wire[split..], trailer.as_slice());
        }
    }
}
