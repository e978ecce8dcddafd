//! Key/value connection configuration.

use std::collections::HashMap;

use crate::utils::Result;

/// Namenode URI used when the builder names none
pub const FS_DEFAULT_FS: &str = "fs.defaultFS";
/// Logical nameservice id; federated and HA setups are rejected
pub const DFS_NAMESERVICE_ID: &str = "dfs.nameservice.id";
/// Explicit `host[:port]` of the namenode RPC endpoint
pub const DFS_NAMENODE_RPC_ADDRESS: &str = "dfs.namenode.rpc-address";
pub const FS_PERMISSIONS_UMASK_MODE: &str = "fs.permissions.umask-mode";
pub const DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL: &str =
    "dfs.client.write.exclude.nodes.cache.expiry.interval.millis";

/// Modern key name followed by its deprecated aliases
const DEPRECATIONS: &[(&str, &[&str])] = &[
    (FS_DEFAULT_FS, &["fs.default.name"]),
    (FS_PERMISSIONS_UMASK_MODE, &["dfs.umaskmode"]),
    ("dfs.client.socket-timeout", &["dfs.socket.timeout"]),
    ("dfs.client-write-packet-size", &["dfs.write.packet.size"]),
];

fn modern_key(key: &str) -> &str {
    DEPRECATIONS
        .iter()
        .find(|(_, old)| old.contains(&key))
        .map_or(key, |(modern, _)| modern)
}

/// Immutable configuration map. Deprecated keys are stored and looked up
/// under their modern names.
#[derive(Clone, Debug, Default)]
pub struct Conf {
    table: HashMap<String, String>,
}

impl Conf {
    pub fn new() -> Conf {
        Conf::default()
    }

    /// Builder-style insert, later values win.
    pub fn with(mut self, key: &str, value: &str) -> Conf {
        self.set(key, value);
        self
    }

    pub(crate) fn set(&mut self, key: &str, value: &str) {
        self.table
            .insert(modern_key(key).to_owned(), value.to_owned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(modern_key(key)).map(String::as_str)
    }

    /// Integer lookup; `None` when unset, `EINVAL` when not a number.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(val) => val.trim().parse().map(Some).map_err(|_| {
                ndfs_err!(
                    EINVAL,
                    "failed to parse the value '{}' of key {} as an integer",
                    val,
                    key
                )
            }),
        }
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self.get_i64(key)?.unwrap_or(default))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Conf {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut conf = Conf::new();
        for (k, v) in iter {
            conf.set(k.as_ref(), v.as_ref());
        }
        conf
    }
}
