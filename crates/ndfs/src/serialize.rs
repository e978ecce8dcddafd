//! Serialize/deserialize metadata protocol messages into/from binary.

use crate::{io_err, proto::*, res};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{Read, Result};
use std::mem;
use std::ops::Shl;

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };
}

/// Read `size` bytes, growing the buffer only as bytes actually arrive.
fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    Read::take(&mut *r, size as u64).read_to_end(&mut buf)?;
    if buf.len() != size {
        return res!(io_err!(
            UnexpectedEof,
            format!("declared length {} but only {} bytes follow", size, buf.len())
        ));
    }
    Ok(buf)
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<W> SResult<Encoder<W>> {
    fn written(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A wrapper class of ReadBytesExt for decoding values one after another
#[derive(Clone, Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }
    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for bool {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (*self as u8).encode(w)
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        if self.len() > u16::MAX as usize {
            return res!(io_err!(InvalidInput, "String too long to encode"));
        }
        let mut bytes = (self.len() as u16).encode(w)?;
        bytes += w.write_all(self.as_bytes()).and(Ok(self.len()))?;
        Ok(bytes)
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.0.len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(&self.0)?;
        Ok(bytes)
    }
}

impl Encodable for FileType {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (*self as u8).encode(w)
    }
}

impl<T: Encodable> Encodable for Option<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match *self {
            Some(ref v) => (Encoder::new(w) << &1u8 << v).written(),
            None => 0u8.encode(w),
        }
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        self.iter()
            .fold(Encoder::new(w) << &(self.len() as u32), |acc, s| acc << s)
            .written()
    }
}

impl Encodable for FileStatus {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.file_type
            << &self.path
            << &self.length
            << &self.permission
            << &self.owner
            << &self.group
            << &self.modification_time
            << &self.access_time
            << &self.block_replication
            << &self.blocksize)
            .written()
    }
}

impl Encodable for DirectoryListing {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.partial_listing << &self.remaining_entries).written()
    }
}

impl Encodable for ServerDefaults {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.block_size
            << &self.bytes_per_checksum
            << &self.write_packet_size
            << &self.replication
            << &self.file_buffer_size)
            .written()
    }
}

impl Encodable for FsStats {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &self.capacity
            << &self.used
            << &self.remaining
            << &self.under_replicated
            << &self.corrupt_blocks
            << &self.missing_blocks)
            .written()
    }
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        use crate::proto::Call::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.call_id;

        let buf = match self.body {
            RError {
                ref ecode,
                ref message,
            } => buf << ecode << message,
            TConnect {
                ref protocol,
                ref user,
            } => buf << protocol << user,
            RConnect => buf,
            TGetServerDefaults => buf,
            RGetServerDefaults { ref defaults } => buf << defaults,
            TGetFileInfo { ref src } => buf << src,
            RGetFileInfo { ref fs } => buf << fs,
            TGetListing {
                ref src,
                ref start_after,
                ref need_location,
            } => buf << src << start_after << need_location,
            RGetListing { ref dir_list } => buf << dir_list,
            TMkdirs {
                ref src,
                ref masked,
                ref create_parent,
            } => buf << src << masked << create_parent,
            RMkdirs { ref result } => buf << result,
            TDelete {
                ref src,
                ref recursive,
            } => buf << src << recursive,
            RDelete { ref result } => buf << result,
            TRename2 {
                ref src,
                ref dst,
                ref overwrite_dest,
            } => buf << src << dst << overwrite_dest,
            RRename2 => buf,
            TSetReplication {
                ref src,
                ref replication,
            } => buf << src << replication,
            RSetReplication { ref result } => buf << result,
            TSetPermission {
                ref src,
                ref permission,
            } => buf << src << permission,
            RSetPermission => buf,
            TSetOwner {
                ref src,
                ref username,
                ref groupname,
            } => buf << src << username << groupname,
            RSetOwner => buf,
            TSetTimes {
                ref src,
                ref mtime,
                ref atime,
            } => buf << src << mtime << atime,
            RSetTimes => buf,
            TGetPreferredBlockSize { ref src } => buf << src,
            RGetPreferredBlockSize { ref bsize } => buf << bsize,
            TGetFsStats => buf,
            RGetFsStats { ref stats } => buf << stats,
        };

        buf.written()
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Decodable for bool {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => res!(io_err!(InvalidData, "Invalid boolean")),
        }
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        String::from_utf8(read_exact(r, len as usize)?)
            .map_err(|_| io_err!(InvalidData, "Invalid UTF-8 sequence"))
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl Decodable for FileType {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        FileType::from_u8(r.read_u8()?).ok_or_else(|| io_err!(InvalidData, "Invalid file type"))
    }
}

impl<T: Decodable> Decodable for Option<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        if <bool as Decodable>::decode(r)? {
            Ok(Some(Decodable::decode(r)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        let mut buf = Vec::new();
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Decodable for FileStatus {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(FileStatus {
            file_type: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
            length: Decodable::decode(r)?,
            permission: Decodable::decode(r)?,
            owner: Decodable::decode(r)?,
            group: Decodable::decode(r)?,
            modification_time: Decodable::decode(r)?,
            access_time: Decodable::decode(r)?,
            block_replication: Decodable::decode(r)?,
            blocksize: Decodable::decode(r)?,
        })
    }
}

impl Decodable for DirectoryListing {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(DirectoryListing {
            partial_listing: Decodable::decode(r)?,
            remaining_entries: Decodable::decode(r)?,
        })
    }
}

impl Decodable for ServerDefaults {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(ServerDefaults {
            block_size: Decodable::decode(r)?,
            bytes_per_checksum: Decodable::decode(r)?,
            write_packet_size: Decodable::decode(r)?,
            replication: Decodable::decode(r)?,
            file_buffer_size: Decodable::decode(r)?,
        })
    }
}

impl Decodable for FsStats {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(FsStats {
            capacity: Decodable::decode(r)?,
            used: Decodable::decode(r)?,
            remaining: Decodable::decode(r)?,
            under_replicated: Decodable::decode(r)?,
            corrupt_blocks: Decodable::decode(r)?,
            missing_blocks: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        use crate::proto::MsgType::*;

        let mut buf = r;

        let msg_type = MsgType::from_u8(decode!(buf));
        let call_id = decode!(buf);
        let body = match msg_type {
            Some(RError) => Call::RError {
                ecode: decode!(buf),
                message: decode!(buf),
            },
            Some(TConnect) => Call::TConnect {
                protocol: decode!(buf),
                user: decode!(buf),
            },
            Some(RConnect) => Call::RConnect,
            Some(TGetServerDefaults) => Call::TGetServerDefaults,
            Some(RGetServerDefaults) => Call::RGetServerDefaults {
                defaults: decode!(buf),
            },
            Some(TGetFileInfo) => Call::TGetFileInfo { src: decode!(buf) },
            Some(RGetFileInfo) => Call::RGetFileInfo { fs: decode!(buf) },
            Some(TGetListing) => Call::TGetListing {
                src: decode!(buf),
                start_after: decode!(buf),
                need_location: decode!(buf),
            },
            Some(RGetListing) => Call::RGetListing {
                dir_list: decode!(buf),
            },
            Some(TMkdirs) => Call::TMkdirs {
                src: decode!(buf),
                masked: decode!(buf),
                create_parent: decode!(buf),
            },
            Some(RMkdirs) => Call::RMkdirs {
                result: decode!(buf),
            },
            Some(TDelete) => Call::TDelete {
                src: decode!(buf),
                recursive: decode!(buf),
            },
            Some(RDelete) => Call::RDelete {
                result: decode!(buf),
            },
            Some(TRename2) => Call::TRename2 {
                src: decode!(buf),
                dst: decode!(buf),
                overwrite_dest: decode!(buf),
            },
            Some(RRename2) => Call::RRename2,
            Some(TSetReplication) => Call::TSetReplication {
                src: decode!(buf),
                replication: decode!(buf),
            },
            Some(RSetReplication) => Call::RSetReplication {
                result: decode!(buf),
            },
            Some(TSetPermission) => Call::TSetPermission {
                src: decode!(buf),
                permission: decode!(buf),
            },
            Some(RSetPermission) => Call::RSetPermission,
            Some(TSetOwner) => Call::TSetOwner {
                src: decode!(buf),
                username: decode!(buf),
                groupname: decode!(buf),
            },
            Some(RSetOwner) => Call::RSetOwner,
            Some(TSetTimes) => Call::TSetTimes {
                src: decode!(buf),
                mtime: decode!(buf),
                atime: decode!(buf),
            },
            Some(RSetTimes) => Call::RSetTimes,
            Some(TGetPreferredBlockSize) => Call::TGetPreferredBlockSize { src: decode!(buf) },
            Some(RGetPreferredBlockSize) => Call::RGetPreferredBlockSize {
                bsize: decode!(buf),
            },
            Some(TGetFsStats) => Call::TGetFsStats,
            Some(RGetFsStats) => Call::RGetFsStats {
                stats: decode!(buf),
            },
            Some(TError) | None => return res!(io_err!(InvalidData, "Invalid message type")),
        };

        Ok(Msg { call_id, body })
    }
}

/// Helper function to read a message from a byte-oriented stream
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Helper function to write a message into a byte-oriented stream
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    msg.encode(w)
}

#[test]
fn header_is_type_then_call_id() {
    let msg = Msg {
        call_id: 0x0403_0201,
        body: Call::TGetFsStats,
    };
    let mut buf = Vec::new();
    let n = write_msg(&mut buf, &msg).unwrap();

    assert_eq!(n, MSG_HDRSZ);
    assert_eq!(buf, vec![MsgType::TGetFsStats as u8, 1, 2, 3, 4]);
}

#[test]
fn optional_fields_are_flagged() {
    let mut buf = Vec::new();
    Some(7u16).encode(&mut buf).unwrap();
    None::<u16>.encode(&mut buf).unwrap();
    assert_eq!(buf, vec![1, 7, 0, 0]);

    let mut decoder = Decoder::new(std::io::Cursor::new(buf));
    let a: Option<u16> = decoder.decode().unwrap();
    let b: Option<u16> = decoder.decode().unwrap();
    assert_eq!((a, b), (Some(7), None));
}

#[test]
fn listing_msg_decodes() {
    use std::io::Cursor;

    let expected = Msg {
        call_id: 9,
        body: Call::RGetListing {
            dir_list: Some(DirectoryListing {
                partial_listing: vec![FileStatus {
                    file_type: FileType::File,
                    path: Data(b"part-0\xff".to_vec()),
                    length: 42,
                    permission: 0o644,
                    owner: "alice".to_owned(),
                    group: "staff".to_owned(),
                    modification_time: 1_700_000_000_123,
                    access_time: 1_700_000_000_000,
                    block_replication: Some(3),
                    blocksize: None,
                }],
                remaining_entries: 5,
            }),
        },
    };
    let mut buf = Vec::new();
    let _ = expected.encode(&mut buf);

    let mut readbuf = Cursor::new(buf);
    let actual = read_msg(&mut readbuf);

    assert_eq!(expected, actual.unwrap());
}

#[test]
fn bad_bool_is_rejected() {
    use std::io::Cursor;

    // RDelete with result byte 2
    let buf = vec![MsgType::RDelete as u8, 0, 0, 0, 0, 2];
    assert!(read_msg(&mut Cursor::new(buf)).is_err());
}

#[test]
fn declared_length_must_be_present() {
    use std::io::Cursor;

    // Data claiming u32::MAX bytes, followed by three
    let buf = vec![0xff, 0xff, 0xff, 0xff, 1, 2, 3];
    let err = <Data as Decodable>::decode(&mut Cursor::new(buf)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

    let buf = vec![5, 0, b'a', b'b'];
    assert!(<String as Decodable>::decode(&mut Cursor::new(buf)).is_err());
}
