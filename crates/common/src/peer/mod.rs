mod addr;
mod chunk_store;
pub mod directory;
mod endpoint;
pub mod jobs;
pub mod protocol;
pub mod transfer;
pub mod transport;

pub use addr::{PeerAddr, PeerAddrError};
pub use chunk_store::{ChunkStore, ChunkStoreError};
pub use directory::{
    BootstrapPolicy, DirectoryConfig, DirectoryError, DirectoryState, PeerDirectory,
};
pub use endpoint::IrohTransport;
pub use jobs::{Job, JobDispatcher, JobReceiver};
pub use protocol::{Message, Reply, Subject, ALPN};
pub use transfer::{TransferConfig, TransferEngine, TransferError};
pub use transport::{MessageHandler, Transport, TransportError};
