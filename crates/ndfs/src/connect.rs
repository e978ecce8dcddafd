//! Session bootstrap.
//!
//! Everything a [`Handle`] needs is built into locals first; the handle is
//! only assembled once the connectivity probe has succeeded, so an early
//! return drops whatever was acquired, the transport included.

use std::time::Duration;

use log::{debug, info};
use nix::unistd::{User, geteuid};

use crate::{
    conf::*,
    cwd::WorkingDir,
    meta::{Handle, unexpected},
    permission::parse_permission,
    proto::*,
    transport::{Connector, NameNodeAddr, TcpConnector},
    uri::{Uri, UriFlags, namenode_uri_text},
    utils::Result,
};

const FS_PERMISSIONS_UMASK_DEFAULT: &str = "022";
const DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL_DEFAULT: i64 = 10 * 60 * 1000;

/// Connection parameters.
///
/// ```no_run
/// let fs = ndfs::Builder::new()
///     .namenode("hdfs://nn.example.com:8020/")
///     .user("alice")
///     .conf("fs.permissions.umask-mode", "027")
///     .connect()?;
/// println!("{}", fs.working_directory());
/// # Ok::<(), ndfs::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Builder {
    nn: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    conf: Conf,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Name node URI, or a bare `host[:port]`.
    pub fn namenode(mut self, nn: &str) -> Builder {
        self.nn = Some(nn.to_owned());
        self
    }

    /// Port used when neither the URI nor the RPC address names one.
    pub fn port(mut self, port: u16) -> Builder {
        self.port = Some(port);
        self
    }

    /// User to connect as when the URI carries no user info.
    pub fn user(mut self, user: &str) -> Builder {
        self.user = Some(user.to_owned());
        self
    }

    /// Set a configuration key.
    pub fn conf(mut self, key: &str, value: &str) -> Builder {
        self.conf.set(key, value);
        self
    }

    /// Connect over TCP.
    pub fn connect(self) -> Result<Handle> {
        Handle::connect_with(self, &TcpConnector)
    }
}

fn effective_user() -> Result<String> {
    let uid = geteuid();
    match User::from_uid(uid)? {
        Some(user) => Ok(user.name),
        None => Ok(uid.to_string()),
    }
}

/// Address of the namenode from the configuration or the connection URI.
fn namenode_addr(conn_uri: &Uri, conf: &Conf, port: Option<u16>) -> Result<NameNodeAddr> {
    if let Some(rpc_addr) = conf.get(DFS_NAMENODE_RPC_ADDRESS) {
        return NameNodeAddr::parse(rpc_addr, port);
    }
    if conn_uri.host().is_empty() {
        return Err(ndfs_err!(
            EINVAL,
            "get_namenode_addr: no namenode host in {}",
            conn_uri
        ));
    }
    Ok(NameNodeAddr {
        host: conn_uri.host().to_owned(),
        port: port.filter(|p| *p > 0).unwrap_or(DEFAULT_PORT),
    })
}

impl Handle {
    /// Connect using `connector` to open the transport.
    ///
    /// Federated configurations are rejected before the connector is used.
    pub fn connect_with(bld: Builder, connector: &dyn Connector) -> Result<Handle> {
        Handle::bootstrap(bld, connector).map_err(|e| e.prepend("connect"))
    }

    fn bootstrap(bld: Builder, connector: &dyn Connector) -> Result<Handle> {
        let Builder {
            nn,
            port,
            user,
            conf,
        } = bld;

        if conf.get(DFS_NAMESERVICE_ID).is_some() {
            return Err(ndfs_err!(
                ENOTSUP,
                "get_namenode_addr: we don't yet support HA or federated configurations"
            ));
        }

        let uri_text = match nn {
            Some(nn) => namenode_uri_text(&nn),
            None => conf
                .get(FS_DEFAULT_FS)
                .map(str::to_owned)
                .ok_or_else(|| ndfs_err!(EINVAL, "no namenode given and {} is unset", FS_DEFAULT_FS))?,
        };
        let conn_uri = Uri::parse(&uri_text, None, UriFlags::empty())?;

        let user = match (conn_uri.user_info(), user) {
            (info, _) if !info.is_empty() => info.to_owned(),
            (_, Some(user)) => user,
            (_, None) => effective_user()?,
        };
        // The URI's port overrides the one given to the builder.
        let port = conn_uri.port().or(port);
        let addr = namenode_addr(&conn_uri, &conf, port)?;

        let scheme = conn_uri.scheme().to_owned();
        let authority = conn_uri.host().to_owned();
        let url_prefix = if addr.port == DEFAULT_PORT {
            format!("{}://{}", scheme, authority)
        } else {
            format!("{}://{}:{}", scheme, authority, addr.port)
        };

        let working_uri = Uri::parse(
            &format!("{}:///user/{}/", scheme, user),
            None,
            UriFlags::APPEND_SLASH,
        )
        .map_err(|e| e.prepend("error parsing working directory"))?;

        let umask_str = conf
            .get(FS_PERMISSIONS_UMASK_MODE)
            .unwrap_or(FS_PERMISSIONS_UMASK_DEFAULT);
        let umask = parse_permission(umask_str)
            .map_err(|e| e.prepend(format!("error handling {}", FS_PERMISSIONS_UMASK_MODE)))?;
        let timeout_ms = conf.get_i64_or(
            DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL,
            DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL_DEFAULT,
        )?;
        let timeout_ms = u64::try_from(timeout_ms).map_err(|_| {
            ndfs_err!(
                EINVAL,
                "{} must not be negative, got {}",
                DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL,
                timeout_ms
            )
        })?;

        debug!(
            "connecting: uri={}, addr={}, user={}, url_prefix={}",
            conn_uri, addr, user, url_prefix
        );
        let transport = connector.connect(&addr, &user)?;

        // Fetch the server defaults. This also checks that the namenode
        // answers with the current configuration.
        let default_block_size = match transport
            .call(Call::TGetServerDefaults)
            .map_err(|e| e.prepend("get_server_defaults"))?
        {
            Call::RGetServerDefaults { defaults } => defaults.block_size,
            other => return unexpected("get_server_defaults", &other),
        };

        info!("connected to {} ({}) as {}", url_prefix, addr, user);

        Ok(Handle {
            addr,
            scheme,
            authority,
            user,
            url_prefix,
            cwd: WorkingDir::new(working_uri),
            umask,
            default_block_size,
            dead_node_timeout: Duration::from_millis(timeout_ms),
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, testing::*};
    use std::sync::{Arc, atomic::Ordering};

    #[test]
    fn federated_config_never_connects() {
        let connector = MockConnector::default();
        let bld = Builder::new()
            .namenode("hdfs://nn/")
            .conf(DFS_NAMESERVICE_ID, "ns1");
        let err = Handle::connect_with(bld, &connector).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert!(connector.transport.sent().is_empty());
    }

    #[test]
    fn failed_probe_releases_transport() {
        let connector = MockConnector::default();
        connector
            .transport
            .reply(Err(ndfs_err!(ECONNRESET, "connection reset by peer")));
        let err = Handle::connect_with(Builder::new().namenode("nn:9000").user("bob"), &connector)
            .unwrap_err();
        assert_eq!(err.errno(), crate::errno::ECONNRESET);
        assert!(err.message().starts_with("connect: get_server_defaults"));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&connector.transport.0), 1);
    }

    #[test]
    fn settings_come_from_uri_and_conf() {
        let connector = MockConnector::default();
        connector.transport.reply(defaults_reply(128 << 20));
        let fs = Handle::connect_with(
            Builder::new()
                .namenode("hdfs://carol@nn.example.com:9000/")
                .port(1234)
                .user("ignored")
                .conf("dfs.umaskmode", "077")
                .conf(DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL, "30000"),
            &connector,
        )
        .unwrap();

        assert_eq!(fs.user(), "carol");
        assert_eq!(fs.address().port, 9000);
        assert_eq!(fs.url_prefix(), "hdfs://nn.example.com:9000");
        assert_eq!(fs.working_directory(), "hdfs:///user/carol/");
        assert_eq!(fs.umask(), 0o077);
        assert_eq!(fs.dead_node_timeout(), Duration::from_secs(30));
        assert_eq!(fs.default_block_size(), 128 << 20);
        assert_eq!(
            connector.transport.sent(),
            vec![Call::TGetServerDefaults]
        );
        assert_eq!(
            connector.last_addr.lock().unwrap().clone(),
            Some((
                NameNodeAddr {
                    host: "nn.example.com".to_owned(),
                    port: 9000
                },
                "carol".to_owned()
            ))
        );
    }

    #[test]
    fn default_port_is_left_out_of_prefix() {
        let (fs, _) = handle();
        assert_eq!(fs.address().port, DEFAULT_PORT);
        assert_eq!(fs.url_prefix(), "hdfs://nn.example.com");
        assert_eq!(fs.umask(), 0o022);
        assert_eq!(fs.dead_node_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn rpc_address_wins_over_uri() {
        let connector = MockConnector::default();
        connector.transport.reply(defaults_reply(1));
        let fs = Handle::connect_with(
            Builder::new()
                .namenode("hdfs://logical/")
                .user("alice")
                .conf(DFS_NAMENODE_RPC_ADDRESS, "10.0.0.7:8021"),
            &connector,
        )
        .unwrap();
        assert_eq!(fs.address().host, "10.0.0.7");
        assert_eq!(fs.url_prefix(), "hdfs://logical:8021");
    }

    #[test]
    fn bad_settings_fail_before_connecting() {
        for bld in [
            Builder::new().user("a"),
            Builder::new().namenode("nn").user("a").conf(FS_PERMISSIONS_UMASK_MODE, "u=rwx"),
            Builder::new().namenode("nn").user("a").conf(DFS_NAMENODE_RPC_ADDRESS, "nn:0"),
            Builder::new()
                .namenode("nn")
                .user("a")
                .conf(DFS_CLIENT_WRITE_EXCLUDE_NODES_CACHE_EXPIRY_INTERVAL, "soon"),
        ] {
            let connector = MockConnector::default();
            assert!(Handle::connect_with(bld, &connector).is_err());
            assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn default_fs_is_used_without_namenode() {
        let connector = MockConnector::default();
        connector.transport.reply(defaults_reply(1));
        let fs = Handle::connect_with(
            Builder::new().user("alice").conf("fs.default.name", "hdfs://nn2:8020"),
            &connector,
        )
        .unwrap();
        assert_eq!(fs.url_prefix(), "hdfs://nn2");
    }
}
