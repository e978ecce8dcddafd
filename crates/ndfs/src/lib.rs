#![forbid(unsafe_code)]
//! Client-side access core for a distributed filesystem's metadata service.
//!
//! A [`Handle`] is a session with one name node. It is opened with a
//! [`Builder`], keeps a working directory that relative paths resolve
//! against, and offers the namespace operations: existence checks, stat,
//! paginated listing, mkdir, rename, delete, replication, ownership,
//! permissions, times, block size and capacity queries.
//!
//! # Example
//!
//! ```no_run
//! use ndfs::{Builder, ObjectKind};
//!
//! let fs = Builder::new()
//!     .namenode("hdfs://nn.example.com/")
//!     .user("alice")
//!     .connect()?;
//!
//! fs.mkdir("reports")?;
//! for entry in fs.list_directory("/user/alice")? {
//!     let kind = if entry.kind == ObjectKind::Directory { "d" } else { "-" };
//!     println!("{} {:o} {} {}", kind, entry.permissions, entry.size, entry.name);
//! }
//! fs.disconnect();
//! # Ok::<(), ndfs::Error>(())
//! ```
//!
//! # Configuration
//!
//! Keys are set on the builder with [`Builder::conf`]. Deprecated key names
//! are mapped to their current names. Keys read at connect time:
//! - `fs.defaultFS` - name node URI when none is given to the builder
//! - `dfs.namenode.rpc-address` - `host[:port]` overriding the URI host
//! - `fs.permissions.umask-mode` - octal umask applied by `mkdir` (`022`)
//! - `dfs.client.write.exclude.nodes.cache.expiry.interval.millis` - dead
//!   node timeout in milliseconds (`600000`)
//!
//! Setting `dfs.nameservice.id` makes [`Builder::connect`] fail with
//! `ENOTSUP`: HA and federated configurations are not handled.
//!
//! # Errors
//!
//! Every failure is an [`Error`] carrying a POSIX errno and a message naming
//! the operation and its arguments. Errors reported by the name node keep
//! the errno it sent. [`compat`] wraps the operations with C-style return
//! codes and a per-thread last error.
//!
//! # Wire protocol
//!
//! Frames are `size[4] type[1] call_id[4] body`, little endian. [`srv`]
//! holds the serving side: implement [`srv::Namesystem`] and pass it to
//! [`srv::srv_async`].
#[macro_use]
pub mod utils;
pub mod compat;
pub mod conf;
mod connect;
mod cwd;
pub mod error;
mod info;
mod listing;
mod meta;
pub mod permission;
pub mod proto;
pub mod serialize;
pub mod srv;
pub mod transport;
pub mod uri;

#[cfg(test)]
mod testing;

pub use crate::connect::Builder;
pub use crate::error::Error;
pub use crate::error::ErrorKind;
pub use crate::error::errno;
pub use crate::info::{FileInfo, ObjectKind};
pub use crate::meta::Handle;
pub use crate::proto::*;
pub use crate::transport::{Connector, NameNodeAddr, TcpConnector, TcpTransport, Transport};
pub use crate::utils::Result;
