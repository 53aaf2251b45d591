//! IPC: s-expression protocol between the daemon and presentation shells.
//!
//! Wire format: 4-byte big-endian length prefix followed by a UTF-8
//! s-expression.  The shell supplies viewport and key geometry, may
//! forward pointer enter/leave, and receives hover, progress and text
//! events.

pub mod dispatch;
pub mod server;

pub use server::IpcServer;
