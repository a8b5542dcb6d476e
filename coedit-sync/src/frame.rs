//! Binary wire framing.
//!
//! Fixed 18-byte big-endian header followed by three length-delimited
//! fields:
//!
//! ```text
//! +-----+------+----------------+-----------+----------+------------+
//! | ver | type | ts (unix ms)   | senderLen | msgIdLen | payloadLen |
//! | 1B  | 1B   | 8B             | 2B        | 2B       | 4B         |
//! +-----+------+----------------+-----------+----------+------------+
//! | senderId (UTF-8) | messageId (UTF-8) | payload (JSON)           |
//! +------------------+-------------------+--------------------------+
//! ```
//!
//! Decoding rejects unknown versions and opcodes, truncated buffers, and
//! trailing garbage. A rejected frame is dropped by the connection — it
//! never tears the socket down.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{Message, MessageType, PROTOCOL_VERSION};
use coedit_types::{MessageId, PeerId};

/// Size of the fixed header.
pub const HEADER_LEN: usize = 18;

/// Encodes a message into one wire frame.
pub fn encode(message: &Message) -> SyncResult<Vec<u8>> {
    let sender = message.sender.to_string();
    let message_id = message.message_id.to_string();
    let payload = message.payload_bytes()?;

    if sender.len() > usize::from(u16::MAX) {
        return Err(SyncError::Protocol("sender id too long".into()));
    }
    if message_id.len() > usize::from(u16::MAX) {
        return Err(SyncError::Protocol("message id too long".into()));
    }
    if u32::try_from(payload.len()).is_err() {
        return Err(SyncError::Protocol("payload too large".into()));
    }

    let mut buf =
        Vec::with_capacity(HEADER_LEN + sender.len() + message_id.len() + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(message.message_type.code());
    buf.extend_from_slice(&message.timestamp.to_be_bytes());
    buf.extend_from_slice(&(sender.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(message_id.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(message_id.as_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one wire frame back into a message.
pub fn decode(buf: &[u8]) -> SyncResult<Message> {
    if buf.len() < HEADER_LEN {
        return Err(SyncError::Protocol(format!(
            "truncated frame header: {} bytes",
            buf.len()
        )));
    }

    let version = buf[0];
    if version != PROTOCOL_VERSION {
        return Err(SyncError::Protocol(format!(
            "unsupported frame version: {version}"
        )));
    }

    let message_type = MessageType::from_code(buf[1])
        .ok_or_else(|| SyncError::Protocol(format!("unknown opcode: {}", buf[1])))?;

    let timestamp = read_u64(&buf[2..10]);
    let sender_len = usize::from(read_u16(&buf[10..12]));
    let message_id_len = usize::from(read_u16(&buf[12..14]));
    let payload_len = read_u32(&buf[14..18]) as usize;

    let total = HEADER_LEN + sender_len + message_id_len + payload_len;
    if buf.len() < total {
        return Err(SyncError::Protocol(format!(
            "truncated frame body: have {} bytes, need {total}",
            buf.len()
        )));
    }
    if buf.len() > total {
        return Err(SyncError::Protocol(format!(
            "trailing bytes after frame: {}",
            buf.len() - total
        )));
    }

    let sender_end = HEADER_LEN + sender_len;
    let id_end = sender_end + message_id_len;

    let sender = parse_utf8(&buf[HEADER_LEN..sender_end], "sender id")?;
    let sender = PeerId::parse(sender)
        .map_err(|_| SyncError::Protocol(format!("invalid sender id: {sender}")))?;

    let message_id = parse_utf8(&buf[sender_end..id_end], "message id")?;
    let message_id = message_id
        .parse::<MessageId>()
        .map_err(|_| SyncError::Protocol(format!("invalid message id: {message_id}")))?;

    let payload = Message::payload_from(message_type, &buf[id_end..total])?;

    Ok(Message {
        message_type,
        timestamp,
        sender,
        message_id,
        payload,
    })
}

fn parse_utf8<'a>(bytes: &'a [u8], field: &str) -> SyncResult<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|_| SyncError::Protocol(format!("{field} is not valid UTF-8")))
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    u64::from_be_bytes(out)
}
