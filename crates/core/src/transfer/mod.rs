//! Transfer client boundary: the narrow interface to the download client.

mod slskd;
mod types;

pub use slskd::SlskdClient;
pub use types::{
    TransferClient, TransferError, TransferHandle, TransferSnapshot, TransferState,
};
