pub mod codec;

use crate::chord::types::{Channel, ChordNode, Endpoint, NodeId};
use crate::error::MessageError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Content address of a backed-up file: SHA-256 of its path and modification time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    pub const HEX_LEN: usize = 64;

    pub fn compute(path: &str, modified_millis: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update(modified_millis.to_string().as_bytes());
        FileId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", &self.0[..8])
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileId {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(FileId(s.to_string()))
        } else {
            Err(MessageError::InvalidField {
                field: "fileId",
                value: s.to_string(),
            })
        }
    }
}

impl TryFrom<String> for FileId {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

/// A chunk is identified by its file and its position in that file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId {
    pub file_id: FileId,
    pub index: u32,
}

impl ChunkId {
    pub fn new(file_id: FileId, index: u32) -> Self {
        Self { file_id, index }
    }

    /// Ring position whose successor receives the first copy.
    pub fn ring_key(&self) -> NodeId {
        NodeId::from_key(format!("{}{}", self.file_id, self.index).as_bytes())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.index)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || MessageError::InvalidField {
            field: "chunkId",
            value: value.clone(),
        };
        let (file, index) = value.split_once(':').ok_or_else(invalid)?;
        Ok(ChunkId {
            file_id: file.parse()?,
            index: index.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PutChunk,
    GiveChunk,
    Stored,
    Removed,
    Chunk,
    GetChunk,
    Delete,
    Deleted,
    FindSuccessor,
    ReturnSuccessor,
    SetSuccessor,
    SetPredecessor,
    GetPredecessor,
    ReturnPredecessor,
    Notify,
    CheckActive,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PutChunk => "PUTCHUNK",
            MessageKind::GiveChunk => "GIVECHUNK",
            MessageKind::Stored => "STORED",
            MessageKind::Removed => "REMOVED",
            MessageKind::Chunk => "CHUNK",
            MessageKind::GetChunk => "GETCHUNK",
            MessageKind::Delete => "DELETE",
            MessageKind::Deleted => "DELETED",
            MessageKind::FindSuccessor => "FIND_SUCCESSOR",
            MessageKind::ReturnSuccessor => "RETURN_SUCCESSOR",
            MessageKind::SetSuccessor => "SET_SUCCESSOR",
            MessageKind::SetPredecessor => "SET_PREDECESSOR",
            MessageKind::GetPredecessor => "GET_PREDECESSOR",
            MessageKind::ReturnPredecessor => "RETURN_PREDECESSOR",
            MessageKind::Notify => "NOTIFY",
            MessageKind::CheckActive => "CHECK_ACTIVE",
        }
    }

    /// Header field count, type and senderId included.
    pub fn field_count(&self) -> usize {
        match self {
            MessageKind::PutChunk | MessageKind::GiveChunk => 7,
            MessageKind::GetChunk => 6,
            MessageKind::Delete | MessageKind::FindSuccessor => 5,
            MessageKind::Stored | MessageKind::Removed | MessageKind::Chunk => 4,
            MessageKind::Deleted => 3,
            MessageKind::ReturnSuccessor => 9,
            MessageKind::SetSuccessor
            | MessageKind::SetPredecessor
            | MessageKind::GetPredecessor
            | MessageKind::ReturnPredecessor
            | MessageKind::Notify => 8,
            MessageKind::CheckActive => 2,
        }
    }

    pub fn carries_body(&self) -> bool {
        matches!(
            self,
            MessageKind::PutChunk | MessageKind::GiveChunk | MessageKind::Chunk
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PUTCHUNK" => MessageKind::PutChunk,
            "GIVECHUNK" => MessageKind::GiveChunk,
            "STORED" => MessageKind::Stored,
            "REMOVED" => MessageKind::Removed,
            "CHUNK" => MessageKind::Chunk,
            "GETCHUNK" => MessageKind::GetChunk,
            "DELETE" => MessageKind::Delete,
            "DELETED" => MessageKind::Deleted,
            "FIND_SUCCESSOR" => MessageKind::FindSuccessor,
            "RETURN_SUCCESSOR" => MessageKind::ReturnSuccessor,
            "SET_SUCCESSOR" => MessageKind::SetSuccessor,
            "SET_PREDECESSOR" => MessageKind::SetPredecessor,
            "GET_PREDECESSOR" => MessageKind::GetPredecessor,
            "RETURN_PREDECESSOR" => MessageKind::ReturnPredecessor,
            "NOTIFY" => MessageKind::Notify,
            "CHECK_ACTIVE" => MessageKind::CheckActive,
            other => return Err(MessageError::UnknownKind(other.to_string())),
        })
    }
}

/// Per-kind message contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    PutChunk {
        chunk: ChunkId,
        remaining: u32,
        reply_to: Endpoint,
        data: Bytes,
    },
    GiveChunk {
        chunk: ChunkId,
        reply_to: Endpoint,
        barrier: NodeId,
        data: Bytes,
    },
    Stored {
        chunk: ChunkId,
    },
    Removed {
        chunk: ChunkId,
    },
    Chunk {
        chunk: ChunkId,
        data: Bytes,
    },
    GetChunk {
        chunk: ChunkId,
        reply_to: Endpoint,
    },
    Delete {
        file_id: FileId,
        reply_to: Endpoint,
    },
    Deleted {
        file_id: FileId,
    },
    FindSuccessor {
        key: NodeId,
        reply_to: Endpoint,
    },
    ReturnSuccessor {
        key: NodeId,
        node: ChordNode,
    },
    SetSuccessor {
        node: ChordNode,
    },
    SetPredecessor {
        node: ChordNode,
    },
    GetPredecessor {
        node: ChordNode,
    },
    ReturnPredecessor {
        node: ChordNode,
    },
    Notify {
        node: ChordNode,
    },
    CheckActive,
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::PutChunk { .. } => MessageKind::PutChunk,
            Body::GiveChunk { .. } => MessageKind::GiveChunk,
            Body::Stored { .. } => MessageKind::Stored,
            Body::Removed { .. } => MessageKind::Removed,
            Body::Chunk { .. } => MessageKind::Chunk,
            Body::GetChunk { .. } => MessageKind::GetChunk,
            Body::Delete { .. } => MessageKind::Delete,
            Body::Deleted { .. } => MessageKind::Deleted,
            Body::FindSuccessor { .. } => MessageKind::FindSuccessor,
            Body::ReturnSuccessor { .. } => MessageKind::ReturnSuccessor,
            Body::SetSuccessor { .. } => MessageKind::SetSuccessor,
            Body::SetPredecessor { .. } => MessageKind::SetPredecessor,
            Body::GetPredecessor { .. } => MessageKind::GetPredecessor,
            Body::ReturnPredecessor { .. } => MessageKind::ReturnPredecessor,
            Body::Notify { .. } => MessageKind::Notify,
            Body::CheckActive => MessageKind::CheckActive,
        }
    }

    /// Listener of the receiving node this message belongs on.
    pub fn channel(&self) -> Channel {
        match self {
            Body::PutChunk { .. } | Body::GiveChunk { .. } | Body::Stored { .. } => Channel::Backup,
            Body::GetChunk { .. } | Body::Chunk { .. } => Channel::Restore,
            Body::Delete { .. } | Body::Deleted { .. } | Body::Removed { .. } => Channel::Delete,
            _ => Channel::Control,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sender: NodeId,
    pub body: Body,
}

impl Message {
    pub fn new(sender: NodeId, body: Body) -> Self {
        Self { sender, body }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}
