//! MQTT Packet Decoder

use bytes::Bytes;

use super::{read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, Publish, QoS, SubAck, Subscribe,
    Subscription, PROTOCOL_LEVEL,
};

/// MQTT Packet Decoder (v3.1.1)
///
/// Incremental: `decode` returns `Ok(None)` until a complete packet is
/// buffered, so callers can feed it straight from a socket read buffer.
pub struct Decoder {
    /// Maximum accepted packet size
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Decode a packet from the buffer
    /// Returns (packet, bytes_consumed) or error
    pub fn decode(&mut self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        let total_len = 1 + len_bytes + remaining_length as usize;

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        // Wait for complete packet
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload_start = 1 + len_bytes;
        let payload = &buf[payload_start..total_len];

        let packet = match packet_type {
            1 => Self::decode_connect(flags, payload)?,
            2 => Self::decode_connack(flags, payload)?,
            3 => Self::decode_publish(flags, payload)?,
            8 => Self::decode_subscribe(flags, payload)?,
            9 => Self::decode_suback(flags, payload)?,
            12 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PingReq
            }
            13 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PingResp
            }
            14 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::Disconnect
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connect(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let (protocol_name, mut pos) = read_string(payload)?;
        if protocol_name != "MQTT" {
            return Err(DecodeError::MalformedPacket("invalid protocol name"));
        }

        if payload.len() < pos + 4 {
            return Err(DecodeError::InsufficientData);
        }
        if payload[pos] != PROTOCOL_LEVEL {
            return Err(DecodeError::MalformedPacket("unsupported protocol level"));
        }
        pos += 1;

        let connect_flags = payload[pos];
        pos += 1;
        // Will and credential flags never appear on the bridge's connections
        if (connect_flags & !0x02) != 0 {
            return Err(DecodeError::MalformedPacket("unsupported connect flags"));
        }
        let clean_session = (connect_flags & 0x02) != 0;

        let keep_alive = read_u16(&payload[pos..])?;
        pos += 2;

        let (client_id, _) = read_string(&payload[pos..])?;

        Ok(Packet::Connect(Connect {
            client_id: client_id.to_string(),
            clean_session,
            keep_alive,
        }))
    }

    fn decode_connack(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if payload.len() < 2 {
            return Err(DecodeError::InsufficientData);
        }

        if (payload[0] & 0xFE) != 0 {
            return Err(DecodeError::MalformedPacket("connack reserved bits set"));
        }
        let session_present = (payload[0] & 0x01) != 0;
        let return_code = ConnectReturnCode::from_u8(payload[1])
            .ok_or(DecodeError::InvalidReturnCode(payload[1]))?;

        Ok(Packet::ConnAck(ConnAck {
            session_present,
            return_code,
        }))
    }

    fn decode_publish(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let qos = QoS::from_u8((flags >> 1) & 0x03).ok_or(DecodeError::InvalidQoS(flags >> 1))?;
        let retain = (flags & 0x01) != 0;

        let (topic, mut pos) = read_string(payload)?;
        let topic = topic.to_string();

        // QoS 1/2 carry a packet identifier the bridge only needs to skip;
        // the broker grants QoS 0 for our subscriptions, but be tolerant.
        if qos != QoS::AtMostOnce {
            if payload.len() < pos + 2 {
                return Err(DecodeError::InsufficientData);
            }
            pos += 2;
        }

        let body = Bytes::copy_from_slice(&payload[pos..]);

        Ok(Packet::Publish(Publish {
            topic,
            payload: body,
            retain,
        }))
    }

    fn decode_subscribe(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0x02 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;
        let mut pos = 2;

        let mut subscriptions = Vec::new();
        while pos < payload.len() {
            let (filter, consumed) = read_string(&payload[pos..])?;
            pos += consumed;
            if pos >= payload.len() {
                return Err(DecodeError::InsufficientData);
            }
            let qos = QoS::from_u8(payload[pos]).ok_or(DecodeError::InvalidQoS(payload[pos]))?;
            pos += 1;
            subscriptions.push(Subscription {
                filter: filter.to_string(),
                qos,
            });
        }

        if subscriptions.is_empty() {
            return Err(DecodeError::MalformedPacket("subscribe with no topics"));
        }

        Ok(Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions,
        }))
    }

    fn decode_suback(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;
        let return_codes = payload[2..].to_vec();
        if return_codes.is_empty() {
            return Err(DecodeError::MalformedPacket("suback with no return codes"));
        }

        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes,
        }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
