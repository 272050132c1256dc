//! Wire format: one header line of space separated fields, CRLF, an empty
//! line, then the raw body for the kinds that carry one.

use super::{Body, ChunkId, FileId, Message, MessageKind};
use crate::chord::types::{ChordNode, Endpoint, NodeId, NodePorts};
use crate::error::MessageError;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::IpAddr;

const HEADER_END: &[u8] = b"\r\n\r\n";

pub fn encode(message: &Message) -> Bytes {
    let mut fields: Vec<String> = vec![
        message.kind().as_str().to_string(),
        message.sender.to_string(),
    ];
    let mut payload: Option<&Bytes> = None;

    match &message.body {
        Body::PutChunk {
            chunk,
            remaining,
            reply_to,
            data,
        } => {
            push_chunk(&mut fields, chunk);
            fields.push(remaining.to_string());
            push_endpoint(&mut fields, reply_to);
            payload = Some(data);
        }
        Body::GiveChunk {
            chunk,
            reply_to,
            barrier,
            data,
        } => {
            push_chunk(&mut fields, chunk);
            push_endpoint(&mut fields, reply_to);
            fields.push(barrier.to_string());
            payload = Some(data);
        }
        Body::Stored { chunk } | Body::Removed { chunk } => push_chunk(&mut fields, chunk),
        Body::Chunk { chunk, data } => {
            push_chunk(&mut fields, chunk);
            payload = Some(data);
        }
        Body::GetChunk { chunk, reply_to } => {
            push_chunk(&mut fields, chunk);
            push_endpoint(&mut fields, reply_to);
        }
        Body::Delete { file_id, reply_to } => {
            fields.push(file_id.to_string());
            push_endpoint(&mut fields, reply_to);
        }
        Body::Deleted { file_id } => fields.push(file_id.to_string()),
        Body::FindSuccessor { key, reply_to } => {
            fields.push(key.to_string());
            push_endpoint(&mut fields, reply_to);
        }
        Body::ReturnSuccessor { key, node } => {
            fields.push(key.to_string());
            push_node(&mut fields, node);
        }
        Body::SetSuccessor { node }
        | Body::SetPredecessor { node }
        | Body::GetPredecessor { node }
        | Body::ReturnPredecessor { node }
        | Body::Notify { node } => push_node(&mut fields, node),
        Body::CheckActive => {}
    }

    let header = fields.join(" ");
    let body_len = payload.map_or(0, |p| p.len());
    let mut frame = BytesMut::with_capacity(header.len() + HEADER_END.len() + body_len);
    frame.put_slice(header.as_bytes());
    frame.put_slice(HEADER_END);
    if let Some(data) = payload {
        frame.put_slice(data);
    }
    frame.freeze()
}

pub fn decode(frame: Bytes) -> Result<Message, MessageError> {
    let split = frame
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .ok_or_else(|| MessageError::InvalidFormat("missing header terminator".into()))?;
    let header = std::str::from_utf8(&frame[..split])
        .map_err(|_| MessageError::InvalidFormat("header is not ASCII".into()))?;
    let data = frame.slice(split + HEADER_END.len()..);

    let fields: Vec<&str> = header.split(' ').filter(|f| !f.is_empty()).collect();
    let [kind, sender, rest @ ..] = fields.as_slice() else {
        return Err(MessageError::InvalidFormat(format!(
            "header too short: {:?}",
            header
        )));
    };
    let kind: MessageKind = kind.parse()?;
    let sender = node_id("senderId", sender)?;

    if !kind.carries_body() && !data.is_empty() {
        return Err(MessageError::UnexpectedBody(kind.as_str()));
    }

    let body = match (kind, rest) {
        (MessageKind::PutChunk, [file, index, remaining, ip, port]) => Body::PutChunk {
            chunk: chunk_id(file, index)?,
            remaining: number("remainingReplication", remaining)?,
            reply_to: endpoint(ip, port)?,
            data,
        },
        (MessageKind::GiveChunk, [file, index, ip, port, barrier]) => Body::GiveChunk {
            chunk: chunk_id(file, index)?,
            reply_to: endpoint(ip, port)?,
            barrier: node_id("barrierNodeId", barrier)?,
            data,
        },
        (MessageKind::Stored, [file, index]) => Body::Stored {
            chunk: chunk_id(file, index)?,
        },
        (MessageKind::Removed, [file, index]) => Body::Removed {
            chunk: chunk_id(file, index)?,
        },
        (MessageKind::Chunk, [file, index]) => Body::Chunk {
            chunk: chunk_id(file, index)?,
            data,
        },
        (MessageKind::GetChunk, [file, index, ip, port]) => Body::GetChunk {
            chunk: chunk_id(file, index)?,
            reply_to: endpoint(ip, port)?,
        },
        (MessageKind::Delete, [file, ip, port]) => Body::Delete {
            file_id: file.parse()?,
            reply_to: endpoint(ip, port)?,
        },
        (MessageKind::Deleted, [file]) => Body::Deleted {
            file_id: file.parse()?,
        },
        (MessageKind::FindSuccessor, [key, ip, port]) => Body::FindSuccessor {
            key: node_id("key", key)?,
            reply_to: endpoint(ip, port)?,
        },
        (MessageKind::ReturnSuccessor, [key, node @ ..]) if node.len() == 6 => {
            Body::ReturnSuccessor {
                key: node_id("key", key)?,
                node: chord_node(node)?,
            }
        }
        (MessageKind::SetSuccessor, node) if node.len() == 6 => Body::SetSuccessor {
            node: chord_node(node)?,
        },
        (MessageKind::SetPredecessor, node) if node.len() == 6 => Body::SetPredecessor {
            node: chord_node(node)?,
        },
        (MessageKind::GetPredecessor, node) if node.len() == 6 => Body::GetPredecessor {
            node: chord_node(node)?,
        },
        (MessageKind::ReturnPredecessor, node) if node.len() == 6 => Body::ReturnPredecessor {
            node: chord_node(node)?,
        },
        (MessageKind::Notify, node) if node.len() == 6 => Body::Notify {
            node: chord_node(node)?,
        },
        (MessageKind::CheckActive, []) => Body::CheckActive,
        (kind, rest) => {
            return Err(MessageError::FieldCount {
                kind: kind.as_str(),
                expected: kind.field_count(),
                actual: rest.len() + 2,
            })
        }
    };

    Ok(Message { sender, body })
}

fn push_chunk(fields: &mut Vec<String>, chunk: &ChunkId) {
    fields.push(chunk.file_id.to_string());
    fields.push(chunk.index.to_string());
}

fn push_endpoint(fields: &mut Vec<String>, endpoint: &Endpoint) {
    fields.push(endpoint.ip.to_string());
    fields.push(endpoint.port.to_string());
}

fn push_node(fields: &mut Vec<String>, node: &ChordNode) {
    fields.push(node.id.to_string());
    fields.push(node.ip.to_string());
    fields.extend(node.ports.to_array().iter().map(|p| p.to_string()));
}

fn invalid(field: &'static str, value: &str) -> MessageError {
    MessageError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, MessageError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn node_id(field: &'static str, value: &str) -> Result<NodeId, MessageError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn chunk_id(file: &str, index: &str) -> Result<ChunkId, MessageError> {
    Ok(ChunkId::new(file.parse::<FileId>()?, number("chunkIndex", index)?))
}

fn ip(value: &str) -> Result<IpAddr, MessageError> {
    value.parse().map_err(|_| invalid("ip", value))
}

fn endpoint(ip_field: &str, port: &str) -> Result<Endpoint, MessageError> {
    Ok(Endpoint::new(ip(ip_field)?, number("port", port)?))
}

fn chord_node(fields: &[&str]) -> Result<ChordNode, MessageError> {
    let [id, address, control, backup, restore, delete] = fields else {
        return Err(MessageError::InvalidFormat(format!(
            "node descriptor needs 6 fields, got {}",
            fields.len()
        )));
    };
    let ports = NodePorts {
        control: number("port", control)?,
        backup: number("port", backup)?,
        restore: number("port", restore)?,
        delete: number("port", delete)?,
    };
    Ok(ChordNode::new(node_id("nodeId", id)?, ip(address)?, ports))
}
