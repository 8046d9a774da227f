//! IPC control surface over a Unix domain socket

pub mod protocol;
pub mod server;

pub use protocol::FileInfo;
pub use server::IpcServer;
