use std::fmt;

use serde::{Deserialize, Serialize};

use crate::content::ChunkId;
use crate::crypto::PublicKey;
use crate::peer::PeerAddr;
use crate::publication::{RecordKey, SignedRecord};

/// Something a node can provide to the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    /// Records (and, by convention, chunks) of an owner
    Owner(PublicKey),
    /// A single encrypted chunk
    Chunk(ChunkId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Owner(key) => write!(f, "owner:{}", key.short()),
            Subject::Chunk(id) => write!(f, "chunk:{}", &id.to_hex()[..12]),
        }
    }
}

/// Requests a node can send to another; one per stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Introduce ourselves; answered with peers the receiver knows
    Hello { from: PeerAddr },
    /// We hold these subjects, remember us for `ttl_secs`
    Announce {
        from: PeerAddr,
        subjects: Vec<Subject>,
        ttl_secs: u64,
    },
    /// Who do you know holding this subject?
    FindProviders(Subject),
    /// Store this record if it is newer than yours
    Publish(SignedRecord),
    /// Send me your current record for this key
    Lookup(RecordKey),
    /// Send me the envelope for this chunk
    FetchChunk(ChunkId),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Announce { .. } => "announce",
            Message::FindProviders(_) => "find_providers",
            Message::Publish(_) => "publish",
            Message::Lookup(_) => "lookup",
            Message::FetchChunk(_) => "fetch_chunk",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Peers(Vec<PeerAddr>),
    Ack,
    Providers(Vec<PeerAddr>),
    Record(Option<SignedRecord>),
    Chunk(Option<Vec<u8>>),
    /// The request was understood but refused
    Rejected(String),
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Peers(_) => "peers",
            Reply::Ack => "ack",
            Reply::Providers(_) => "providers",
            Reply::Record(_) => "record",
            Reply::Chunk(_) => "chunk",
            Reply::Rejected(_) => "rejected",
        }
    }
}
