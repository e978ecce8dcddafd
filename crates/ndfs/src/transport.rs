//! Synchronous request/response transport to the metadata authority.
//!
//! Messages travel over one persistent TCP connection framed by a 4-byte
//! little-endian length that counts itself. The caller's thread is blocked
//! for the whole round trip; a handle never has more than one request in
//! flight.
//!
//! [`TcpTransport`] owns a private current-thread runtime. Called from a
//! thread that is already running tokio, each round trip is driven on a
//! short-lived scoped thread instead.

use {
    crate::{
        error::{Error, errno::*},
        io_err,
        proto::*,
        serialize,
        utils::Result,
    },
    bytes::buf::{Buf, BufMut},
    futures::sink::SinkExt,
    log::{debug, info},
    std::{
        fmt,
        future::Future,
        io,
        net::SocketAddr,
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicU32, Ordering},
        },
        thread,
    },
    tokio::{
        net::{TcpStream, lookup_host},
        runtime::{Builder, Runtime},
    },
    tokio_stream::StreamExt,
    tokio_util::codec::{Framed, length_delimited::LengthDelimitedCodec},
};

/// One synchronous round trip to the authority.
///
/// An `RError` reply is returned as `Err` carrying the authority's errno and
/// message; every other failure is `EIO` with the lower error as its cause.
pub trait Transport: Send + Sync {
    fn call(&self, body: Call) -> Result<Call>;
}

/// Opens transports. The bootstrapper only reaches the network through
/// this seam.
pub trait Connector {
    fn connect(&self, addr: &NameNodeAddr, user: &str) -> Result<Box<dyn Transport>>;
}

/// Host and port of the namenode RPC endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameNodeAddr {
    pub host: String,
    pub port: u16,
}

impl NameNodeAddr {
    /// Parse `host` or `host:port`.
    ///
    /// Without a port in `input` the `default_port` is used, and without
    /// that the well-known port. An explicit port must be in 1..=65535.
    pub fn parse(input: &str, default_port: Option<u16>) -> Result<NameNodeAddr> {
        let port = default_port.filter(|p| *p > 0).unwrap_or(DEFAULT_PORT);
        match input.split_once(':') {
            None => Ok(NameNodeAddr {
                host: input.to_owned(),
                port,
            }),
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) if port > 0 => Ok(NameNodeAddr {
                    host: host.to_owned(),
                    port,
                }),
                _ => Err(ndfs_err!(
                    EINVAL,
                    "parse_rpc_addr: invalid port string {}",
                    port_str
                )),
            },
        }
    }
}

impl fmt::Display for NameNodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_codec()
}

/// Connects to a namenode over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: &NameNodeAddr, user: &str) -> Result<Box<dyn Transport>> {
        let transport = TcpTransport::connect(addr, user)?;
        Ok(Box::new(transport))
    }
}

pub struct TcpTransport {
    /// `None` only once the transport is being dropped.
    rt: Option<Runtime>,
    framed: Mutex<Framed<TcpStream, LengthDelimitedCodec>>,
    next_id: AtomicU32,
    peer: SocketAddr,
}

/// Drive `fut` on the transport's private runtime.
///
/// A thread that is already inside a tokio context cannot block on another
/// runtime, so the future is moved to a scoped thread there.
fn block_on<F>(rt: &Runtime, fut: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return rt.block_on(fut);
    }
    thread::scope(|s| match s.spawn(|| rt.block_on(fut)).join() {
        Ok(out) => out,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

impl TcpTransport {
    /// Resolve `addr`, connect, and perform the `TConnect` handshake as `user`.
    pub fn connect(addr: &NameNodeAddr, user: &str) -> Result<TcpTransport> {
        let rt = Builder::new_current_thread().enable_all().build()?;

        let connected = block_on(&rt, async {
            let addrs: Vec<SocketAddr> =
                lookup_host((addr.host.as_str(), addr.port)).await?.collect();
            let peer = addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| io_err!(NotFound, "no addresses found"))?;
            let stream = TcpStream::connect(peer).await?;
            stream.set_nodelay(true)?;
            Ok::<_, io::Error>((peer, stream))
        });
        let (peer, stream) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                rt.shutdown_background();
                return Err(Error::from(e).prepend(format!("connect({})", addr)));
            }
        };

        info!("connected to {} ({}) as {}", addr, peer, user);

        let transport = TcpTransport {
            rt: Some(rt),
            framed: Mutex::new(Framed::new(stream, codec())),
            next_id: AtomicU32::new(0),
            peer,
        };
        match transport.call(Call::TConnect {
            protocol: CLIENT_PROTOCOL.to_owned(),
            user: user.to_owned(),
        })? {
            Call::RConnect => Ok(transport),
            other => Err(ndfs_err!(
                EIO,
                "connect({}): unexpected handshake reply {:?}",
                addr,
                MsgType::from(&other)
            )),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn round_trip(&self, frozen: bytes::Bytes) -> io::Result<bytes::BytesMut> {
        let rt = self
            .rt
            .as_ref()
            .ok_or_else(|| io_err!(NotConnected, "transport is shut down"))?;
        let mut guard = self.framed.lock().unwrap_or_else(PoisonError::into_inner);
        let framed = &mut *guard;
        block_on(rt, async move {
            framed.send(frozen).await?;
            framed
                .next()
                .await
                .transpose()?
                .ok_or_else(|| io_err!(UnexpectedEof, "connection closed by peer"))
        })
    }
}

impl Transport for TcpTransport {
    fn call(&self, body: Call) -> Result<Call> {
        let typ = MsgType::from(&body);
        if let Some(path) = body.paths().into_iter().find(|p| p.len() > u16::MAX as usize) {
            return Err(ndfs_err!(
                ENAMETOOLONG,
                "{:?}: path of {} bytes starting {:?} exceeds the {} byte limit",
                typ,
                path.len(),
                path.chars().take(32).collect::<String>(),
                u16::MAX
            ));
        }

        let call_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let msg = Msg { call_id, body };

        let mut writer = bytes::BytesMut::with_capacity(256).writer();
        serialize::write_msg(&mut writer, &msg).map_err(|e| {
            let code = match e.kind() {
                io::ErrorKind::InvalidInput => EINVAL,
                _ => EIO,
            };
            Error::with_cause(code, format!("{:?}: failed to encode request", typ), e)
        })?;
        let frozen = writer.into_inner().freeze();

        debug!("\t→ {:?}", msg);

        let bytes = self.round_trip(frozen).map_err(|e| {
            Error::internal(format!("{:?} to {}: transport failure", typ, self.peer), e)
        })?;

        let resp = serialize::read_msg(&mut bytes.reader())
            .map_err(|e| Error::internal(format!("{:?}: failed to decode response", typ), e))?;

        debug!("\t← {:?}", resp);

        if resp.call_id != call_id {
            return Err(ndfs_err!(
                EIO,
                "{:?}: response call id {} does not match request call id {}",
                typ,
                resp.call_id,
                call_id
            ));
        }
        match resp.body {
            Call::RError { ecode, message } => {
                Err(Error::new(Errno::from_raw(ecode as i32), message))
            }
            body if Some(MsgType::from(&body)) == typ.response() => Ok(body),
            body => Err(ndfs_err!(
                EIO,
                "{:?}: unexpected response type {:?}",
                typ,
                MsgType::from(&body)
            )),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
        info!("disconnected from {}", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::io::{Read, Write};

    /// Accept one connection, answer the handshake, then answer every
    /// request with `reply(request)` until the client hangs up.
    fn scripted_server(reply: fn(Msg) -> Msg) -> NameNodeAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut handshake = true;
            while let Ok(size) = stream.read_u32::<LittleEndian>() {
                let mut frame = vec![0; size as usize - 4];
                stream.read_exact(&mut frame).unwrap();
                let request = serialize::read_msg(&mut &frame[..]).unwrap();
                let response = if handshake {
                    handshake = false;
                    Msg {
                        call_id: request.call_id,
                        body: Call::RConnect,
                    }
                } else {
                    reply(request)
                };
                let mut body = Vec::new();
                serialize::write_msg(&mut body, &response).unwrap();
                stream
                    .write_u32::<LittleEndian>(body.len() as u32 + 4)
                    .unwrap();
                stream.write_all(&body).unwrap();
            }
        });
        NameNodeAddr {
            host: "127.0.0.1".to_owned(),
            port,
        }
    }

    fn fs_stats_reply(request: Msg) -> Msg {
        Msg {
            call_id: request.call_id,
            body: Call::RGetFsStats {
                stats: FsStats {
                    capacity: 100,
                    ..FsStats::default()
                },
            },
        }
    }

    #[test]
    fn rpc_addr_defaults_port() {
        assert_eq!(
            NameNodeAddr::parse("nn.example.com", None).unwrap(),
            NameNodeAddr {
                host: "nn.example.com".to_owned(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(NameNodeAddr::parse("nn", Some(9000)).unwrap().port, 9000);
        assert_eq!(NameNodeAddr::parse("nn", Some(0)).unwrap().port, DEFAULT_PORT);
        assert_eq!(NameNodeAddr::parse("nn:9001", Some(9000)).unwrap().port, 9001);
    }

    #[test]
    fn rpc_addr_rejects_bad_ports() {
        for input in ["nn:0", "nn:65536", "nn:http", "nn:"] {
            let err = NameNodeAddr::parse(input, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", input);
        }
    }

    #[test]
    fn connection_refused_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = NameNodeAddr {
            host: "127.0.0.1".to_owned(),
            port,
        };
        let err = TcpConnector.connect(&addr, "alice").err().unwrap();
        assert!(err.message().starts_with(&format!("connect({})", addr)));
    }

    #[test]
    fn mismatched_call_id_is_internal() {
        let addr = scripted_server(|request| Msg {
            call_id: request.call_id + 1,
            ..fs_stats_reply(request)
        });
        let transport = TcpTransport::connect(&addr, "alice").unwrap();
        let err = transport.call(Call::TGetFsStats).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("call id"), "{}", err);
    }

    #[test]
    fn unpaired_response_type_is_internal() {
        let addr = scripted_server(|request| Msg {
            call_id: request.call_id,
            body: Call::RDelete { result: true },
        });
        let transport = TcpTransport::connect(&addr, "alice").unwrap();
        let err = transport
            .call(Call::TGetFileInfo {
                src: "/user/alice".to_owned(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("RDelete"), "{}", err);
    }

    #[test]
    fn authority_error_keeps_its_errno() {
        let addr = scripted_server(|request| Msg {
            call_id: request.call_id,
            body: Call::RError {
                ecode: ENOENT as u32,
                message: "/nope: no such file".to_owned(),
            },
        });
        let transport = TcpTransport::connect(&addr, "alice").unwrap();
        let err = transport
            .call(Call::TGetFileInfo {
                src: "/nope".to_owned(),
            })
            .unwrap_err();
        assert_eq!(err.errno(), ENOENT);
        assert_eq!(err.message(), "/nope: no such file");
    }

    #[test]
    fn oversized_path_is_name_too_long() {
        let addr = scripted_server(fs_stats_reply);
        let transport = TcpTransport::connect(&addr, "alice").unwrap();
        let long = format!("/{}", "a".repeat(70_000));

        let err = transport
            .call(Call::TGetFileInfo { src: long.clone() })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameTooLong);
        assert!(err.message().contains("70001 bytes"), "{}", err);

        let err = transport
            .call(Call::TRename2 {
                src: "/short".to_owned(),
                dst: long,
                overwrite_dest: false,
            })
            .unwrap_err();
        assert_eq!(err.errno(), ENAMETOOLONG);

        // The connection is still usable afterwards.
        assert!(transport.call(Call::TGetFsStats).is_ok());
    }

    #[tokio::test]
    async fn usable_from_inside_a_runtime() {
        let addr = scripted_server(fs_stats_reply);
        let transport = TcpTransport::connect(&addr, "alice").unwrap();
        match transport.call(Call::TGetFsStats).unwrap() {
            Call::RGetFsStats { stats } => assert_eq!(stats.capacity, 100),
            other => panic!("unexpected reply {:?}", other),
        }
        drop(transport);
    }

    #[tokio::test]
    async fn refused_connection_inside_a_runtime_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = NameNodeAddr {
            host: "127.0.0.1".to_owned(),
            port,
        };
        assert!(TcpTransport::connect(&addr, "alice").is_err());
    }
}
