use std::ffi::OsStr;
use std::path::PathBuf;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SftpError};

/// Largest packet accepted from the client (length field value).
pub const MAX_PACKET_LEN: usize = 256 * 1024;

/// Length prefix size.
const HEADER_SIZE: usize = 4;

/// Packet type bytes.
pub mod kind {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    pub const WRITE: u8 = 6;
    pub const LSTAT: u8 = 7;
    pub const FSTAT: u8 = 8;
    pub const SETSTAT: u8 = 9;
    pub const FSETSTAT: u8 = 10;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const READLINK: u8 = 19;
    pub const SYMLINK: u8 = 20;
    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;
    pub const EXTENDED: u8 = 200;
}

/// `STATUS` codes.
pub mod status {
    pub const OK: u32 = 0;
    pub const EOF: u32 = 1;
    pub const NO_SUCH_FILE: u32 = 2;
    pub const PERMISSION_DENIED: u32 = 3;
    pub const FAILURE: u32 = 4;
    pub const BAD_MESSAGE: u32 = 5;
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// `OPEN` pflags.
pub mod open_flags {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const APPEND: u32 = 0x04;
    pub const CREAT: u32 = 0x08;
    pub const TRUNC: u32 = 0x10;
    pub const EXCL: u32 = 0x20;
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read one length-prefixed packet body (type byte onwards).
///
/// Returns `Ok(None)` when the stream ends cleanly before a new packet starts.
/// A stream that ends part-way through a packet is a protocol error.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SftpError::Protocol(
                "stream ended inside a packet header".to_string(),
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(SftpError::Protocol("empty packet".to_string()));
    }
    if len > MAX_PACKET_LEN {
        return Err(SftpError::PacketTooLarge {
            len,
            max: MAX_PACKET_LEN,
        });
    }

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SftpError::Protocol(format!("stream ended inside a {len} byte packet"))
        } else {
            SftpError::Io(e)
        }
    })?;
    Ok(Some(body.freeze()))
}

/// Cursor over a packet body with bounds-checked SSH wire decoding.
pub struct Payload {
    buf: Bytes,
}

impl Payload {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(SftpError::Protocol(format!(
                "truncated {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4, "uint32")?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8, "uint64")?;
        Ok(self.buf.get_u64())
    }

    /// A `string` field: uint32 length followed by raw bytes.
    pub fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.need(len, "string")?;
        Ok(self.buf.split_to(len))
    }

    /// A `string` field holding a UTF-8 value (handles, extension names).
    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| SftpError::Protocol("string is not valid UTF-8".to_string()))
    }

    /// A `string` field holding a filesystem path.
    pub fn path(&mut self) -> Result<PathBuf> {
        let raw = self.bytes()?;
        Ok(bytes_to_path(&raw))
    }
}

#[cfg(unix)]
fn bytes_to_path(raw: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(raw))
}

#[cfg(not(unix))]
fn bytes_to_path(raw: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

#[cfg(unix)]
pub(crate) fn os_str_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
pub(crate) fn os_str_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    match s.to_string_lossy() {
        std::borrow::Cow::Borrowed(s) => std::borrow::Cow::Borrowed(s.as_bytes()),
        std::borrow::Cow::Owned(s) => std::borrow::Cow::Owned(s.into_bytes()),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Builder for one outgoing packet. The length prefix is filled in by
/// [`Reply::finish`].
pub struct Reply {
    buf: BytesMut,
}

impl Reply {
    pub fn new(kind: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(0);
        buf.put_u8(kind);
        Self { buf }
    }

    /// A reply that echoes the request id.
    pub fn to(kind: u8, id: u32) -> Self {
        let mut reply = Self::new(kind);
        reply.put_u32(id);
        reply
    }

    pub fn status(id: u32, code: u32, message: &str) -> Bytes {
        let mut reply = Self::to(kind::STATUS, id);
        reply.put_u32(code);
        reply.put_string(message.as_bytes());
        reply.put_string(b"");
        reply.finish()
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_string(&mut self, data: &[u8]) {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn put_os_str(&mut self, s: &OsStr) {
        self.put_string(&os_str_bytes(s));
    }

    pub(crate) fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn finish(mut self) -> Bytes {
        let len = (self.buf.len() - HEADER_SIZE) as u32;
        self.buf[..HEADER_SIZE].copy_from_slice(&len.to_be_bytes());
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_framed_packet() {
        let wire: &[u8] = &[0, 0, 0, 5, kind::INIT, 0, 0, 0, 3];
        let mut reader = wire;
        let body = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(&body[..], &[kind::INIT, 0, 0, 0, 3]);
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_body_is_protocol_error() {
        let wire: &[u8] = &[0, 0, 0, 9, kind::INIT, 0];
        let mut reader = wire;
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, SftpError::Protocol(_)), "{err}");
    }

    #[tokio::test]
    async fn truncated_header_is_protocol_error() {
        let wire: &[u8] = &[0, 0];
        let mut reader = wire;
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(SftpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_packet_rejected() {
        let len = (MAX_PACKET_LEN as u32 + 1).to_be_bytes();
        let mut reader: &[u8] = &len;
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(SftpError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn payload_decodes_fields_in_order() {
        let mut buf = BytesMut::new();
        buf.put_u8(7);
        buf.put_u32(42);
        buf.put_u64(1 << 40);
        buf.put_u32(3);
        buf.put_slice(b"abc");
        let mut payload = Payload::new(buf.freeze());

        assert_eq!(payload.u8().unwrap(), 7);
        assert_eq!(payload.u32().unwrap(), 42);
        assert_eq!(payload.u64().unwrap(), 1 << 40);
        assert_eq!(payload.string().unwrap(), "abc");
        assert_eq!(payload.remaining(), 0);
    }

    #[test]
    fn payload_rejects_overlong_string() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"short");
        let err = Payload::new(buf.freeze()).bytes().unwrap_err();
        assert!(err.to_string().contains("truncated string"), "{err}");
    }

    #[test]
    fn status_reply_layout() {
        let packet = Reply::status(9, status::EOF, "eof");
        assert_eq!(
            &packet[..],
            &[
                0, 0, 0, 20, // length
                kind::STATUS,
                0, 0, 0, 9, // id
                0, 0, 0, 1, // code
                0, 0, 0, 3, b'e', b'o', b'f', // message
                0, 0, 0, 0, // language tag
            ]
        );
    }
}
