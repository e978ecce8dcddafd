//! Calls following the libhdfs return conventions.
//!
//! Integer results are `0` on success and `-1` on failure; value results are
//! `Some` or `None`. The error behind a failure is kept per thread and read
//! back with [`errno`] and [`last_error_message`], like C `errno`.

use std::cell::RefCell;

use log::warn;

use crate::{
    connect::Builder,
    error::{Error, errno::*},
    info::FileInfo,
    meta::Handle,
    utils::Result,
};

thread_local! {
    static LAST_ERROR: RefCell<Option<(Errno, String)>> = const { RefCell::new(None) };
}

/// Code of the last failure on this thread, `UnknownErrno` if none.
pub fn errno() -> Errno {
    LAST_ERROR.with(|e| e.borrow().as_ref().map_or(Errno::UnknownErrno, |(c, _)| *c))
}

/// Message of the last failure on this thread.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow().as_ref().map(|(_, m)| m.clone()))
}

fn record(op: &str, err: Error) {
    warn!("{}: {}", op, err);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some((err.errno(), err.message().to_owned())));
}

fn errno_and_retcode(op: &str, res: Result<()>) -> i32 {
    match res {
        Ok(()) => 0,
        Err(e) => {
            record(op, e);
            -1
        }
    }
}

fn errno_and_retptr<T>(op: &str, res: Result<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            record(op, e);
            None
        }
    }
}

fn errno_and_retval(op: &str, res: Result<u64>) -> i64 {
    match res.and_then(|v| {
        i64::try_from(v).map_err(|_| ndfs_err!(EOVERFLOW, "value {} does not fit in 64 bits", v))
    }) {
        Ok(v) => v,
        Err(e) => {
            record(op, e);
            -1
        }
    }
}

pub fn hdfs_connect(bld: Builder) -> Option<Handle> {
    errno_and_retptr("hdfs_connect", bld.connect())
}

pub fn hdfs_disconnect(fs: Handle) -> i32 {
    fs.disconnect();
    0
}

/// `0` if `path` exists, `-1` otherwise.
pub fn hdfs_exists(fs: &Handle, path: &str) -> i32 {
    errno_and_retcode("hdfs_exists", fs.stat(path).map(drop))
}

pub fn hdfs_delete(fs: &Handle, path: &str, recursive: i32) -> i32 {
    errno_and_retcode("hdfs_delete", fs.delete(path, recursive != 0))
}

pub fn hdfs_rename(fs: &Handle, old_path: &str, new_path: &str) -> i32 {
    errno_and_retcode("hdfs_rename", fs.rename(old_path, new_path))
}

/// Copy the working directory into `buf`; `None` with `ENAMETOOLONG` when
/// it does not fit.
pub fn hdfs_get_working_directory<'a>(fs: &Handle, buf: &'a mut [u8]) -> Option<&'a str> {
    let len = errno_and_retptr("hdfs_get_working_directory", fs.working_directory_into(buf))?;
    let buf: &'a [u8] = buf;
    std::str::from_utf8(&buf[..len]).ok()
}

pub fn hdfs_set_working_directory(fs: &Handle, path: &str) -> i32 {
    errno_and_retcode("hdfs_set_working_directory", fs.set_working_directory(path))
}

pub fn hdfs_create_directory(fs: &Handle, path: &str) -> i32 {
    errno_and_retcode("hdfs_create_directory", fs.mkdir(path))
}

pub fn hdfs_set_replication(fs: &Handle, path: &str, replication: i16) -> i32 {
    let res = u16::try_from(replication)
        .map_err(|_| ndfs_err!(EINVAL, "invalid replication factor {}", replication))
        .and_then(|r| fs.set_replication(path, r));
    errno_and_retcode("hdfs_set_replication", res)
}

/// Entries of the directory at `path`; the entry count is the length.
pub fn hdfs_list_directory(fs: &Handle, path: &str) -> Option<Vec<FileInfo>> {
    errno_and_retptr("hdfs_list_directory", fs.list_directory(path))
}

pub fn hdfs_get_path_info(fs: &Handle, path: &str) -> Option<FileInfo> {
    errno_and_retptr("hdfs_get_path_info", fs.stat(path))
}

/// Release entries returned by [`hdfs_list_directory`] or
/// [`hdfs_get_path_info`].
pub fn hdfs_free_file_info(infos: Vec<FileInfo>) {
    drop(infos)
}

pub fn hdfs_get_default_block_size(fs: &Handle) -> i64 {
    errno_and_retval("hdfs_get_default_block_size", Ok(fs.default_block_size()))
}

pub fn hdfs_get_default_block_size_at_path(fs: &Handle, path: &str) -> i64 {
    errno_and_retval(
        "hdfs_get_default_block_size_at_path",
        fs.default_block_size_at(path),
    )
}

pub fn hdfs_get_capacity(fs: &Handle) -> i64 {
    errno_and_retval("hdfs_get_capacity", fs.capacity())
}

pub fn hdfs_get_used(fs: &Handle) -> i64 {
    errno_and_retval("hdfs_get_used", fs.used())
}

pub fn hdfs_chown(fs: &Handle, path: &str, owner: Option<&str>, group: Option<&str>) -> i32 {
    errno_and_retcode("hdfs_chown", fs.chown(path, owner, group))
}

pub fn hdfs_chmod(fs: &Handle, path: &str, mode: i16) -> i32 {
    errno_and_retcode("hdfs_chmod", fs.chmod(path, mode as u16 as u32))
}

/// Set times in seconds; a negative time leaves that time unchanged.
pub fn hdfs_utime(fs: &Handle, path: &str, mtime: i64, atime: i64) -> i32 {
    let unchanged_if_negative = |t: i64| (t >= 0).then_some(t);
    errno_and_retcode(
        "hdfs_utime",
        fs.set_times(path, unchanged_if_negative(mtime), unchanged_if_negative(atime)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{proto::*, testing::*};

    #[test]
    fn failures_set_errno() {
        let (fs, t) = handle();
        t.reply(Ok(Call::RGetListing { dir_list: None }));
        assert_eq!(hdfs_list_directory(&fs, "/missing"), None);
        assert_eq!(errno(), ENOENT);
        assert!(last_error_message().unwrap().contains("/missing"));

        t.reply(Ok(Call::RGetFileInfo {
            fs: Some(status(FileType::Dir, "")),
        }));
        assert_eq!(hdfs_exists(&fs, "/data"), 0);
        t.reply(Ok(Call::RGetFileInfo { fs: None }));
        assert_eq!(hdfs_exists(&fs, "/nope"), -1);
        assert_eq!(errno(), ENOENT);
    }

    #[test]
    fn utime_negative_means_unchanged() {
        let (fs, t) = handle();
        t.reply(Ok(Call::RSetTimes));
        assert_eq!(hdfs_utime(&fs, "/f", -1, 5000), 0);
        assert_eq!(
            t.last_sent(),
            Call::TSetTimes {
                src: "/f".to_owned(),
                mtime: None,
                atime: Some(5_000_000),
            }
        );
    }

    #[test]
    fn working_directory_buffer() {
        let (fs, _) = handle();
        let mut small = [0u8; 8];
        assert_eq!(hdfs_get_working_directory(&fs, &mut small), None);
        assert_eq!(errno(), ENAMETOOLONG);

        let mut buf = [0u8; 128];
        assert_eq!(
            hdfs_get_working_directory(&fs, &mut buf),
            Some("hdfs:///user/alice/")
        );
    }

    #[test]
    fn numeric_results() {
        let (fs, t) = handle();
        assert_eq!(hdfs_get_default_block_size(&fs), 64 << 20);
        t.reply(Err(ndfs_err!(EIO, "boom")));
        assert_eq!(hdfs_get_capacity(&fs), -1);
        assert_eq!(errno(), EIO);
        assert_eq!(hdfs_set_replication(&fs, "/f", -3), -1);
        assert_eq!(errno(), EINVAL);
    }
}
