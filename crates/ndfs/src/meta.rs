//! Metadata operations on a connected [`Handle`].
//!
//! Each operation resolves its path(s) against the working directory, sends
//! exactly one request and turns the reply into a value or one [`Error`]
//! naming the operation and path. A `false` result field in a reply is a
//! domain failure with its own errno, never a transport error.

use std::{fmt, time::Duration};

use log::info;

use crate::{
    cwd::WorkingDir,
    info::FileInfo,
    proto::*,
    transport::{NameNodeAddr, Transport},
    utils::Result,
};

/// One session with a metadata authority.
///
/// All settings except the working directory are fixed at connect time.
/// Calls from several threads are serialized by the transport.
pub struct Handle {
    pub(crate) addr: NameNodeAddr,
    pub(crate) scheme: String,
    pub(crate) authority: String,
    pub(crate) user: String,
    pub(crate) url_prefix: String,
    pub(crate) cwd: WorkingDir,
    pub(crate) umask: u32,
    pub(crate) default_block_size: u64,
    pub(crate) dead_node_timeout: Duration,
    pub(crate) transport: Box<dyn Transport>,
}

pub(crate) fn unexpected<T>(op: impl fmt::Display, resp: &Call) -> Result<T> {
    Err(ndfs_err!(
        EIO,
        "{}: unexpected response {:?}",
        op,
        MsgType::from(resp)
    ))
}

impl Handle {
    /// Resolve `uri` to an absolute path for operation `op`.
    pub(crate) fn build_path(&self, op: &str, uri: &str) -> Result<String> {
        self.cwd
            .resolve(uri)
            .map_err(|e| e.prepend(format!("{}({})", op, uri)))
    }

    pub(crate) fn call(&self, ctx: impl fmt::Display, body: Call) -> Result<Call> {
        self.transport.call(body).map_err(|e| e.prepend(ctx))
    }

    /// Close the session, releasing the connection.
    pub fn disconnect(self) {
        info!("disconnecting from {} ({})", self.url_prefix, self.addr);
    }

    /// Whether `uri` names an existing object.
    pub fn exists(&self, uri: &str) -> Result<bool> {
        match self.stat(uri) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete `uri`. A non-empty directory needs `recursive`.
    pub fn delete(&self, uri: &str, recursive: bool) -> Result<()> {
        let src = self.build_path("delete", uri)?;
        let ctx = format!("delete({}, recursive={})", src, recursive);
        match self.call(&ctx, Call::TDelete { src, recursive })? {
            Call::RDelete { result: true } => Ok(()),
            Call::RDelete { result: false } => Err(ndfs_err!(
                ENOENT,
                "{}: deletion failed on the server",
                ctx
            )),
            other => unexpected(ctx, &other),
        }
    }

    /// Rename `src` to `dst`. An existing destination is never overwritten.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src = self.build_path("rename", src)?;
        let dst = self.build_path("rename", dst)?;
        let ctx = format!("rename({}, {})", src, dst);
        match self.call(
            &ctx,
            Call::TRename2 {
                src,
                dst,
                overwrite_dest: false,
            },
        )? {
            Call::RRename2 => Ok(()),
            other => unexpected(ctx, &other),
        }
    }

    /// Create `uri` and any missing parents with mode `0777 & !umask`.
    pub fn mkdir(&self, uri: &str) -> Result<()> {
        let src = self.build_path("mkdir", uri)?;
        let ctx = format!("mkdir({})", src);
        let req = Call::TMkdirs {
            src,
            masked: 0o777 & !self.umask,
            create_parent: true,
        };
        match self.call(&ctx, req)? {
            Call::RMkdirs { result: true } => Ok(()),
            Call::RMkdirs { result: false } => Err(ndfs_err!(
                EEXIST,
                "{}: a path component already exists as a non-directory",
                ctx
            )),
            other => unexpected(ctx, &other),
        }
    }

    pub fn set_replication(&self, uri: &str, replication: u16) -> Result<()> {
        let src = self.build_path("set_replication", uri)?;
        let ctx = format!("set_replication({}, {})", src, replication);
        match self.call(&ctx, Call::TSetReplication { src, replication })? {
            Call::RSetReplication { result: true } => Ok(()),
            Call::RSetReplication { result: false } => Err(ndfs_err!(
                EINVAL,
                "{}: path does not exist or is not a regular file",
                ctx
            )),
            other => unexpected(ctx, &other),
        }
    }

    /// Metadata of `uri`, named by its absolute display URI.
    pub fn stat(&self, uri: &str) -> Result<FileInfo> {
        let src = self.build_path("stat", uri)?;
        let ctx = format!("stat({})", src);
        let prefix = format!("{}{}", self.url_prefix, src);
        match self.call(&ctx, Call::TGetFileInfo { src })? {
            Call::RGetFileInfo { fs: Some(status) } => Ok(FileInfo::from_status(&status, &prefix)),
            Call::RGetFileInfo { fs: None } => {
                Err(ndfs_err!(ENOENT, "{}: no such file or directory", ctx))
            }
            other => unexpected(ctx, &other),
        }
    }

    /// Server-wide default block size learned at connect time.
    pub fn default_block_size(&self) -> u64 {
        self.default_block_size
    }

    /// Preferred block size of the file at `uri`.
    pub fn default_block_size_at(&self, uri: &str) -> Result<u64> {
        let src = self.build_path("default_block_size_at", uri)?;
        let ctx = format!("default_block_size_at({})", src);
        match self.call(&ctx, Call::TGetPreferredBlockSize { src })? {
            Call::RGetPreferredBlockSize { bsize } => Ok(bsize),
            other => unexpected(ctx, &other),
        }
    }

    pub fn fs_stats(&self) -> Result<FsStats> {
        match self.call("fs_stats", Call::TGetFsStats)? {
            Call::RGetFsStats { stats } => Ok(stats),
            other => unexpected("fs_stats", &other),
        }
    }

    /// Raw capacity of the filesystem in bytes.
    pub fn capacity(&self) -> Result<u64> {
        self.fs_stats().map(|s| s.capacity)
    }

    /// Bytes in use across the filesystem.
    pub fn used(&self) -> Result<u64> {
        self.fs_stats().map(|s| s.used)
    }

    /// Change owner and/or group; `None` leaves that field unchanged.
    pub fn chown(&self, uri: &str, user: Option<&str>, group: Option<&str>) -> Result<()> {
        let src = self.build_path("chown", uri)?;
        let ctx = format!("chown({}, {:?}, {:?})", src, user, group);
        let req = Call::TSetOwner {
            src,
            username: user.map(str::to_owned),
            groupname: group.map(str::to_owned),
        };
        match self.call(&ctx, req)? {
            Call::RSetOwner => Ok(()),
            other => unexpected(ctx, &other),
        }
    }

    pub fn chmod(&self, uri: &str, mode: u32) -> Result<()> {
        let src = self.build_path("chmod", uri)?;
        let ctx = format!("chmod({}, {:o})", src, mode);
        match self.call(
            &ctx,
            Call::TSetPermission {
                src,
                permission: mode,
            },
        )? {
            Call::RSetPermission => Ok(()),
            other => unexpected(ctx, &other),
        }
    }

    /// Set modification and access times in whole seconds since the epoch.
    ///
    /// `None` leaves a time unchanged. Times go over the wire in
    /// milliseconds.
    pub fn set_times(&self, uri: &str, mtime: Option<i64>, atime: Option<i64>) -> Result<()> {
        let src = self.build_path("set_times", uri)?;
        let ctx = format!("set_times({}, {:?}, {:?})", src, mtime, atime);
        let to_ms = |secs: Option<i64>| -> Result<Option<u64>> {
            secs.map(|s| {
                u64::try_from(s)
                    .ok()
                    .and_then(|s| s.checked_mul(1000))
                    .ok_or_else(|| ndfs_err!(EINVAL, "{}: time {} out of range", ctx, s))
            })
            .transpose()
        };
        let req = Call::TSetTimes {
            mtime: to_ms(mtime)?,
            atime: to_ms(atime)?,
            src,
        };
        match self.call(&ctx, req)? {
            Call::RSetTimes => Ok(()),
            other => unexpected(ctx, &other),
        }
    }

    /// The working directory as a full URI, e.g. `hdfs:///user/alice/`.
    pub fn working_directory(&self) -> String {
        self.cwd.get()
    }

    /// Copy the working directory into `buf`, NUL terminated, returning its
    /// length. `ENAMETOOLONG` if `buf` is too small.
    pub fn working_directory_into(&self, buf: &mut [u8]) -> Result<usize> {
        self.cwd.get_into(buf)
    }

    /// Change the working directory; relative paths resolve against the
    /// current one.
    pub fn set_working_directory(&self, uri: &str) -> Result<()> {
        self.cwd.set(uri)
    }

    pub fn address(&self) -> &NameNodeAddr {
        &self.addr
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host the handle was configured with.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// `scheme://host[:port]` prefix of display URIs; the port is omitted
    /// when it is the default.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn umask(&self) -> u32 {
        self.umask
    }

    pub fn dead_node_timeout(&self) -> Duration {
        self.dead_node_timeout
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Handle")
            .field("addr", &self.addr)
            .field("url_prefix", &self.url_prefix)
            .field("user", &self.user)
            .field("cwd", &self.cwd.get())
            .field("umask", &format_args!("{:o}", self.umask))
            .field("default_block_size", &self.default_block_size)
            .field("dead_node_timeout", &self.dead_node_timeout)
            .finish()
    }
}
