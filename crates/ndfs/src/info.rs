//! Client-facing file metadata.

use crate::proto::{FileStatus, FileType};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Directory,
}

/// Metadata of one namespace object, as returned by `stat` and listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: ObjectKind,
    /// Absolute display URI, e.g. `hdfs://nn/user/alice/part-0`
    pub name: String,
    /// Seconds since the epoch
    pub last_mod: i64,
    pub size: u64,
    /// `None` when the authority did not report a replication factor
    pub replication: Option<u16>,
    /// `None` when the authority did not report a block size
    pub block_size: Option<u64>,
    pub owner: String,
    pub group: String,
    pub permissions: u32,
    /// Seconds since the epoch
    pub last_access: i64,
}

impl FileInfo {
    /// Translate a status record, naming it `prefix` followed by the
    /// record's raw path bytes.
    ///
    /// Symlinks are reported as files. Times are truncated to seconds.
    pub fn from_status(status: &FileStatus, prefix: &str) -> FileInfo {
        let kind = match status.file_type {
            FileType::Dir => ObjectKind::Directory,
            FileType::File | FileType::Symlink => ObjectKind::File,
        };
        let mut name = String::with_capacity(prefix.len() + status.path.0.len());
        name.push_str(prefix);
        name.push_str(&String::from_utf8_lossy(status.path.as_bytes()));

        FileInfo {
            kind,
            name,
            last_mod: ms_to_secs(status.modification_time),
            size: status.length,
            replication: status.block_replication,
            block_size: status.blocksize,
            owner: status.owner.clone(),
            group: status.group.clone(),
            permissions: status.permission,
            last_access: ms_to_secs(status.access_time),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ObjectKind::Directory
    }
}

fn ms_to_secs(ms: u64) -> i64 {
    (ms / 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Data;

    fn status(file_type: FileType) -> FileStatus {
        FileStatus {
            file_type,
            path: Data(b"part-0".to_vec()),
            length: 4096,
            permission: 0o640,
            owner: "alice".to_owned(),
            group: "staff".to_owned(),
            modification_time: 1_700_000_000_999,
            access_time: 1_600_000_000_001,
            block_replication: None,
            blocksize: Some(128 << 20),
        }
    }

    #[test]
    fn translates_every_field() {
        let info = FileInfo::from_status(&status(FileType::File), "hdfs://nn/data/");
        assert_eq!(info.kind, ObjectKind::File);
        assert_eq!(info.name, "hdfs://nn/data/part-0");
        assert_eq!(info.last_mod, 1_700_000_000);
        assert_eq!(info.last_access, 1_600_000_000);
        assert_eq!(info.size, 4096);
        assert_eq!(info.replication, None);
        assert_eq!(info.block_size, Some(128 << 20));
        assert_eq!((info.owner.as_str(), info.group.as_str()), ("alice", "staff"));
        assert_eq!(info.permissions, 0o640);
    }

    #[test]
    fn symlinks_are_files() {
        assert!(FileInfo::from_status(&status(FileType::Dir), "").is_dir());
        assert_eq!(
            FileInfo::from_status(&status(FileType::Symlink), "").kind,
            ObjectKind::File
        );
    }
}
