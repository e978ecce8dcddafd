//! Asynchronous server side of the metadata protocol.
//!
//! Implement [`Namesystem`] and hand it to [`srv_async`] or [`serve`]. Each
//! connection is read frame by frame; every request is dispatched on its own
//! task and its reply written back with the request's call id.

use {
    crate::{
        error::{self, errno::*},
        io_err,
        proto::*,
        serialize,
        utils::{self, Result},
    },
    async_trait::async_trait,
    bytes::buf::{Buf, BufMut},
    futures::sink::SinkExt,
    log::{error, info},
    std::{
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, UnixListener},
        sync::Mutex,
    },
    tokio_stream::StreamExt,
    tokio_util::codec::length_delimited::LengthDelimitedCodec,
};

fn unsupported() -> Result<Call> {
    Err(error::Error::new(EOPNOTSUPP, "operation not supported"))
}

/// Metadata authority trait.
///
/// Implementors return the matching `R*` [`Call`] or an `Err`, which is sent
/// to the client as `RError` with the error's errno and message. Every
/// method defaults to `EOPNOTSUPP`.
///
/// # Example
/// ```no_run
/// use ndfs::{Call, Result, ServerDefaults, srv::{Namesystem, srv_async}};
/// use async_trait::async_trait;
///
/// #[derive(Clone)]
/// struct Empty;
///
/// #[async_trait]
/// impl Namesystem for Empty {
///     async fn rconnect(&self, _protocol: &str, _user: &str) -> Result<Call> {
///         Ok(Call::RConnect)
///     }
///
///     async fn rget_server_defaults(&self) -> Result<Call> {
///         Ok(Call::RGetServerDefaults { defaults: ServerDefaults::default() })
///     }
/// }
///
/// # async fn run() -> Result<()> {
/// srv_async(Empty, "tcp!127.0.0.1!8020").await
/// # }
/// ```
#[async_trait]
pub trait Namesystem: Send + Sync {
    /// First exchange on a connection.
    async fn rconnect(&self, _protocol: &str, _user: &str) -> Result<Call> {
        unsupported()
    }

    async fn rget_server_defaults(&self) -> Result<Call> {
        unsupported()
    }

    /// `RGetFileInfo { fs: None }` when `src` does not exist.
    async fn rget_file_info(&self, _src: &str) -> Result<Call> {
        unsupported()
    }

    /// One page of entries strictly after `start_after`;
    /// `RGetListing { dir_list: None }` when `src` does not exist.
    async fn rget_listing(
        &self,
        _src: &str,
        _start_after: &Data,
        _need_location: bool,
    ) -> Result<Call> {
        unsupported()
    }

    async fn rmkdirs(&self, _src: &str, _masked: u32, _create_parent: bool) -> Result<Call> {
        unsupported()
    }

    async fn rdelete(&self, _src: &str, _recursive: bool) -> Result<Call> {
        unsupported()
    }

    async fn rrename2(&self, _src: &str, _dst: &str, _overwrite_dest: bool) -> Result<Call> {
        unsupported()
    }

    async fn rset_replication(&self, _src: &str, _replication: u16) -> Result<Call> {
        unsupported()
    }

    async fn rset_permission(&self, _src: &str, _permission: u32) -> Result<Call> {
        unsupported()
    }

    async fn rset_owner(
        &self,
        _src: &str,
        _username: Option<&str>,
        _groupname: Option<&str>,
    ) -> Result<Call> {
        unsupported()
    }

    /// Times in milliseconds; `None` leaves a time unchanged.
    async fn rset_times(&self, _src: &str, _mtime: Option<u64>, _atime: Option<u64>) -> Result<Call> {
        unsupported()
    }

    async fn rget_preferred_block_size(&self, _src: &str) -> Result<Call> {
        unsupported()
    }

    async fn rget_fs_stats(&self) -> Result<Call> {
        unsupported()
    }
}

async fn dispatch_once<Ns>(msg: &Msg, ns: Arc<Ns>) -> Result<Call>
where
    Ns: Namesystem + ?Sized,
{
    use crate::proto::Call::*;

    let fut = match msg.body {
        TConnect { ref protocol, ref user }                         => ns.rconnect(protocol, user),
        TGetServerDefaults                                          => ns.rget_server_defaults(),
        TGetFileInfo { ref src }                                    => ns.rget_file_info(src),
        TGetListing { ref src, ref start_after, need_location }     => ns.rget_listing(src, start_after, need_location),
        TMkdirs { ref src, masked, create_parent }                  => ns.rmkdirs(src, masked, create_parent),
        TDelete { ref src, recursive }                              => ns.rdelete(src, recursive),
        TRename2 { ref src, ref dst, overwrite_dest }               => ns.rrename2(src, dst, overwrite_dest),
        TSetReplication { ref src, replication }                    => ns.rset_replication(src, replication),
        TSetPermission { ref src, permission }                      => ns.rset_permission(src, permission),
        TSetOwner { ref src, ref username, ref groupname }          => ns.rset_owner(src, username.as_deref(), groupname.as_deref()),
        TSetTimes { ref src, mtime, atime }                         => ns.rset_times(src, mtime, atime),
        TGetPreferredBlockSize { ref src }                          => ns.rget_preferred_block_size(src),
        TGetFsStats                                                 => ns.rget_fs_stats(),
        _                                                           => return Err(error::Error::new(EPROTO, "not a request")),
    };

    let response = fut.await?;
    let expected = MsgType::from(&msg.body).response();
    if Some(MsgType::from(&response)) != expected {
        return Err(error::Error::new(
            EPROTO,
            format!("namesystem answered {:?} with {:?}", MsgType::from(&msg.body), MsgType::from(&response)),
        ));
    }
    Ok(response)
}

async fn dispatch<Ns, Reader, Writer>(ns: Arc<Ns>, reader: Reader, writer: Writer) -> Result<()>
where
    Ns: 'static + Namesystem + ?Sized,
    Reader: 'static + AsyncRead + Send + std::marker::Unpin,
    Writer: 'static + AsyncWrite + Send + std::marker::Unpin,
{
    let mut framedread = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_read(reader);
    let framedwrite = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_write(writer);
    let framedwrite = Arc::new(Mutex::new(framedwrite));

    while let Some(bytes) = framedread.next().await {
        let bytes = bytes?;

        let msg = serialize::read_msg(&mut bytes.reader())?;
        info!("\t← {:?}", msg);

        let ns = ns.clone();
        let framedwrite = framedwrite.clone();

        tokio::spawn(async move {
            let body = dispatch_once(&msg, ns).await.unwrap_or_else(|e| {
                error!("{:?}: Error: \"{}\"", MsgType::from(&msg.body), e);
                Call::RError {
                    ecode: e.errno() as u32,
                    message: e.message().to_owned(),
                }
            });
            let response = Msg {
                call_id: msg.call_id,
                body,
            };

            let mut writer = bytes::BytesMut::with_capacity(4096).writer();
            if let Err(e) = serialize::write_msg(&mut writer, &response) {
                error!("Failed to serialize response for call {}: {:?}", msg.call_id, e);
                return;
            }

            let frozen = writer.into_inner().freeze();
            {
                let mut framedwrite_locked = framedwrite.lock().await;
                if let Err(e) = framedwrite_locked.send(frozen).await {
                    error!("Failed to send response for call {}: {:?}", msg.call_id, e);
                    return;
                }
            }
            info!("\t→ {:?}", response);
        });
    }

    Ok(())
}

/// Serve connections accepted on `listener` until accepting fails.
pub async fn serve<Ns>(ns: Ns, listener: TcpListener) -> Result<()>
where
    Ns: 'static + Namesystem,
{
    let ns = Arc::new(ns);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {:?}", peer);

        let ns = ns.clone();
        tokio::spawn(async move {
            let (readhalf, writehalf) = stream.into_split();
            let res = dispatch(ns, readhalf, writehalf).await;
            if let Err(e) = res {
                error!("Error: {}: {:?}", e, e);
            }
        });
    }
}

async fn srv_async_tcp<Ns>(ns: Ns, addr: &str) -> Result<()>
where
    Ns: 'static + Namesystem,
{
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    serve(ns, listener).await
}

struct DeleteOnDrop {
    path: PathBuf,
    listener: UnixListener,
}

impl DeleteOnDrop {
    fn bind(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_owned();
        UnixListener::bind(&path).map(|listener| DeleteOnDrop { path, listener })
    }
}

impl std::ops::Deref for DeleteOnDrop {
    type Target = UnixListener;

    fn deref(&self) -> &Self::Target {
        &self.listener
    }
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            error!("Failed to remove socket file {:?}: {}", self.path, e);
        }
    }
}

/// Serve on a unix domain socket until SIGTERM or SIGINT, removing the
/// socket file afterwards.
pub async fn srv_async_unix<Ns>(ns: Ns, addr: impl AsRef<Path>) -> Result<()>
where
    Ns: 'static + Namesystem,
{
    use tokio::signal::unix::{SignalKind, signal};

    let listener = DeleteOnDrop::bind(addr)?;
    let ns = Arc::new(ns);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let running = Arc::new(AtomicBool::new(true));

    {
        let running = running.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = result?;
                info!("accepted: {:?}", peer);

                let ns = ns.clone();
                tokio::spawn(async move {
                    let (readhalf, writehalf) = tokio::io::split(stream);
                    if let Err(e) = dispatch(ns, readhalf, writehalf).await {
                        error!("Error: {:?}", e);
                    }
                });
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Serve `ns` on `tcp!host!port` or `unix!path!suffix`.
pub async fn srv_async<Ns>(ns: Ns, addr: &str) -> Result<()>
where
    Ns: 'static + Namesystem,
{
    let (proto, host, port) = utils::parse_proto(addr)
        .ok_or_else(|| io_err!(InvalidInput, "Invalid protocol or address"))?;

    match proto {
        "tcp" => srv_async_tcp(ns, &format!("{}:{}", host, port)).await,
        "unix" => srv_async_unix(ns, format!("{}{}", host, port)).await,
        _ => Err(From::from(io_err!(InvalidInput, "Protocol not supported"))),
    }
}
