//! rdv-services: stateful pieces and network loops of the rendezvous system.
//!
//! Control plane: [`ControlDispatcher`] behind [`ControlServer`] on the
//! rendezvous host, [`ControlClient`] on each peer. Transfer plane:
//! [`TransferServer`] and [`TransferClient`] between peers.

pub mod chunking;
pub mod control_client;
pub mod control_server;
pub mod directory;
pub mod dispatch;
pub mod file_root;
pub mod framing;
pub mod ledger;
pub mod reassembly;
pub mod sqlite_directory;
pub mod transfer_client;
pub mod transfer_server;

pub use chunking::ChunkReader;
pub use control_client::{ControlClient, ControlError};
pub use control_server::ControlServer;
pub use directory::{Directory, DirectoryError, MemoryDirectory};
pub use dispatch::{ControlDispatcher, Outcome};
pub use file_root::{FileRoot, FileRootError};
pub use framing::FrameError;
pub use ledger::{DedupLedger, LedgerEntry, RequestLedger};
pub use reassembly::ChunkBuffer;
pub use sqlite_directory::SqliteDirectory;
pub use transfer_client::{TransferClient, TransferError};
pub use transfer_server::TransferServer;
