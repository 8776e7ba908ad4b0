mod auth;
mod file_ops;
mod pool;
mod session;

pub use pool::SessionCache;
pub use session::{ConnectionParams, ExecResult, SshConnection};
