use {
    ndfs::*,
    nix::unistd::{Gid, Group, Uid, User},
    std::{
        fs::Metadata,
        os::unix::prelude::*,
        path::{Component, Path, PathBuf},
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// Map an absolute namespace path onto `root`.
///
/// `..` components are refused so every result stays below `root`.
pub fn real_path(root: &Path, src: &str) -> Result<PathBuf> {
    if !src.starts_with('/') {
        return Err(ndfs_err!(EINVAL, "{}: path is not absolute", src));
    }

    let mut path = root.to_path_buf();
    for component in Path::new(src).components() {
        match component {
            Component::Normal(name) => path.push(name),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(ndfs_err!(EACCES, "{}: path escapes the export", src));
            }
        }
    }
    Ok(path)
}

pub fn file_type(attr: &Metadata) -> FileType {
    let typ = attr.file_type();
    if typ.is_dir() {
        FileType::Dir
    } else if typ.is_symlink() {
        FileType::Symlink
    } else {
        FileType::File
    }
}

pub fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

pub fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

fn millis(secs: i64, nsecs: i64) -> u64 {
    u64::try_from(secs.saturating_mul(1000).saturating_add(nsecs / 1_000_000)).unwrap_or(0)
}

/// Wire status of a local object. Only regular files carry replication
/// (always 1) and a block size.
pub fn status_from_attr(attr: &Metadata, name: &[u8], block_size: u64) -> FileStatus {
    let file_type = file_type(attr);
    let regular = attr.file_type().is_file();

    FileStatus {
        file_type,
        path: Data(name.to_vec()),
        length: if file_type == FileType::Dir { 0 } else { attr.len() },
        permission: attr.mode() & 0o7777,
        owner: user_name(attr.uid()),
        group: group_name(attr.gid()),
        modification_time: millis(attr.mtime(), attr.mtime_nsec()),
        access_time: millis(attr.atime(), attr.atime_nsec()),
        block_replication: regular.then_some(1),
        blocksize: regular.then_some(block_size),
    }
}

pub fn system_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
