//! Metadata protocol data types and constants.
//!
//! Every request (`T*`) is answered by exactly one response (`R*`) carrying
//! the same call id, or by `RError`.

use std::mem::size_of;

use enum_primitive::*;

/// Protocol name announced in `TConnect`
pub const CLIENT_PROTOCOL: &str = "org.apache.hadoop.hdfs.protocol.ClientProtocol";

/// Well-known metadata authority RPC port
pub const DEFAULT_PORT: u16 = 8020;

/// Scheme assumed for bare `host[:port]` name node strings
pub const DEFAULT_SCHEME: &str = "hdfs";

/// Size of the message header after the length prefix: type[1] call_id[4]
pub const MSG_HDRSZ: usize = size_of::<u8>() + size_of::<u32>();

enum_from_primitive! {
    #[doc = "Kind of namespace object in a `FileStatus`"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum FileType {
        Dir     = 1,
        File    = 2,
        Symlink = 3,
    }
}

/// Raw byte string; path names on the wire are not required to be UTF-8
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(pub Vec<u8>);

impl Data {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data(s.as_bytes().to_vec())
    }
}

/// Status of one namespace object as reported by the authority.
///
/// Replication and block size are only present for some object types; an
/// absent value is never replaced by a guess.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub file_type: FileType,
    /// Local name (listing) or empty (single stat)
    pub path: Data,
    pub length: u64,
    pub permission: u32,
    pub owner: String,
    pub group: String,
    /// Milliseconds since the epoch
    pub modification_time: u64,
    /// Milliseconds since the epoch
    pub access_time: u64,
    pub block_replication: Option<u16>,
    pub blocksize: Option<u64>,
}

/// One page of a directory listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub partial_listing: Vec<FileStatus>,
    /// Entries left after this page at the time it was produced
    pub remaining_entries: u32,
}

/// Server-wide defaults returned by `TGetServerDefaults`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerDefaults {
    pub block_size: u64,
    pub bytes_per_checksum: u32,
    pub write_packet_size: u32,
    pub replication: u32,
    pub file_buffer_size: u32,
}

/// Whole-filesystem statistics returned by `TGetFsStats`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FsStats {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
    pub under_replicated: u64,
    pub corrupt_blocks: u64,
    pub missing_blocks: u64,
}

enum_from_primitive! {
    #[doc = "Message type"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum MsgType {
        TError                  = 0,    // Illegal, never used
        RError,
        TConnect                = 2,
        RConnect,
        TGetServerDefaults      = 10,
        RGetServerDefaults,
        TGetFileInfo            = 12,
        RGetFileInfo,
        TGetListing             = 14,
        RGetListing,
        TMkdirs                 = 16,
        RMkdirs,
        TDelete                 = 18,
        RDelete,
        TRename2                = 20,
        RRename2,
        TSetReplication         = 22,
        RSetReplication,
        TSetPermission          = 24,
        RSetPermission,
        TSetOwner               = 26,
        RSetOwner,
        TSetTimes               = 28,
        RSetTimes,
        TGetPreferredBlockSize  = 30,
        RGetPreferredBlockSize,
        TGetFsStats             = 32,
        RGetFsStats,
    }
}

impl MsgType {
    /// If the message type is a request
    pub fn is_t(&self) -> bool {
        !self.is_r()
    }

    /// If the message type is a response; responses have odd numbers
    pub fn is_r(&self) -> bool {
        (*self as u8) & 1 == 1
    }

    /// The response type that answers this request type
    pub fn response(&self) -> Option<MsgType> {
        if self.is_r() {
            return None;
        }
        MsgType::from_u8(*self as u8 + 1)
    }
}

impl<'a> From<&'a Call> for MsgType {
    fn from(call: &'a Call) -> MsgType {
        match *call {
            Call::RError { .. } => MsgType::RError,
            Call::TConnect { .. } => MsgType::TConnect,
            Call::RConnect => MsgType::RConnect,
            Call::TGetServerDefaults => MsgType::TGetServerDefaults,
            Call::RGetServerDefaults { .. } => MsgType::RGetServerDefaults,
            Call::TGetFileInfo { .. } => MsgType::TGetFileInfo,
            Call::RGetFileInfo { .. } => MsgType::RGetFileInfo,
            Call::TGetListing { .. } => MsgType::TGetListing,
            Call::RGetListing { .. } => MsgType::RGetListing,
            Call::TMkdirs { .. } => MsgType::TMkdirs,
            Call::RMkdirs { .. } => MsgType::RMkdirs,
            Call::TDelete { .. } => MsgType::TDelete,
            Call::RDelete { .. } => MsgType::RDelete,
            Call::TRename2 { .. } => MsgType::TRename2,
            Call::RRename2 => MsgType::RRename2,
            Call::TSetReplication { .. } => MsgType::TSetReplication,
            Call::RSetReplication { .. } => MsgType::RSetReplication,
            Call::TSetPermission { .. } => MsgType::TSetPermission,
            Call::RSetPermission => MsgType::RSetPermission,
            Call::TSetOwner { .. } => MsgType::TSetOwner,
            Call::RSetOwner => MsgType::RSetOwner,
            Call::TSetTimes { .. } => MsgType::TSetTimes,
            Call::RSetTimes => MsgType::RSetTimes,
            Call::TGetPreferredBlockSize { .. } => MsgType::TGetPreferredBlockSize,
            Call::RGetPreferredBlockSize { .. } => MsgType::RGetPreferredBlockSize,
            Call::TGetFsStats => MsgType::TGetFsStats,
            Call::RGetFsStats { .. } => MsgType::RGetFsStats,
        }
    }
}

/// A data type encapsulating the various protocol messages
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    RError {
        ecode: u32,
        message: String,
    },
    TConnect {
        protocol: String,
        user: String,
    },
    RConnect,
    TGetServerDefaults,
    RGetServerDefaults {
        defaults: ServerDefaults,
    },
    TGetFileInfo {
        src: String,
    },
    /// `fs` is absent when the path does not exist.
    RGetFileInfo {
        fs: Option<FileStatus>,
    },
    TGetListing {
        src: String,
        /// Exclusive cursor; empty means "from the first entry"
        start_after: Data,
        need_location: bool,
    },
    /// `dir_list` is absent when the directory does not exist.
    RGetListing {
        dir_list: Option<DirectoryListing>,
    },
    TMkdirs {
        src: String,
        masked: u32,
        create_parent: bool,
    },
    RMkdirs {
        result: bool,
    },
    TDelete {
        src: String,
        recursive: bool,
    },
    RDelete {
        result: bool,
    },
    TRename2 {
        src: String,
        dst: String,
        overwrite_dest: bool,
    },
    RRename2,
    TSetReplication {
        src: String,
        replication: u16,
    },
    RSetReplication {
        result: bool,
    },
    TSetPermission {
        src: String,
        permission: u32,
    },
    RSetPermission,
    TSetOwner {
        src: String,
        username: Option<String>,
        groupname: Option<String>,
    },
    RSetOwner,
    /// Times are milliseconds; `None` leaves the value unchanged.
    TSetTimes {
        src: String,
        mtime: Option<u64>,
        atime: Option<u64>,
    },
    RSetTimes,
    TGetPreferredBlockSize {
        src: String,
    },
    RGetPreferredBlockSize {
        bsize: u64,
    },
    TGetFsStats,
    RGetFsStats {
        stats: FsStats,
    },
}

impl Call {
    /// Get the path(s) a request refers to
    pub fn paths(&self) -> Vec<&str> {
        match *self {
            Call::TGetFileInfo { ref src }
            | Call::TGetListing { ref src, .. }
            | Call::TMkdirs { ref src, .. }
            | Call::TDelete { ref src, .. }
            | Call::TSetReplication { ref src, .. }
            | Call::TSetPermission { ref src, .. }
            | Call::TSetOwner { ref src, .. }
            | Call::TSetTimes { ref src, .. }
            | Call::TGetPreferredBlockSize { ref src } => vec![src],
            Call::TRename2 {
                ref src, ref dst, ..
            } => vec![src, dst],
            _ => Vec::new(),
        }
    }
}

/// Envelope for protocol messages
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Msg {
    /// Chosen by the client to identify the call.
    /// The reply to the message will have the same call id
    pub call_id: u32,
    /// Message body
    pub body: Call,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_pair_with_requests() {
        assert_eq!(
            MsgType::TGetListing.response(),
            Some(MsgType::RGetListing)
        );
        assert_eq!(MsgType::TConnect.response(), Some(MsgType::RConnect));
        assert_eq!(MsgType::RDelete.response(), None);
        assert!(MsgType::RError.is_r());
        assert!(MsgType::TSetTimes.is_t());
    }

    #[test]
    fn rename_reports_both_paths() {
        let call = Call::TRename2 {
            src: "/a".to_owned(),
            dst: "/b".to_owned(),
            overwrite_dest: false,
        };
        assert_eq!(call.paths(), vec!["/a", "/b"]);
        assert!(Call::TGetFsStats.paths().is_empty());
    }
}
