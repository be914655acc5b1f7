use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::SFTP_VERSION;
use crate::attrs::FileAttrs;
use crate::codec::{Payload, Reply, kind, open_flags, read_packet, status};
use crate::error::{Result, SftpError};
use crate::path::Confinement;

/// Largest `DATA` payload returned for one `READ`.
const MAX_READ_LEN: usize = crate::codec::MAX_PACKET_LEN - 1024;

/// Directory entries returned per `READDIR`.
const READDIR_BATCH: usize = 100;

/// Serves one directory tree to a single SFTP client per [`serve`] call.
///
/// [`serve`]: SftpServer::serve
#[derive(Debug, Clone)]
pub struct SftpServer {
    confinement: Confinement,
    readonly: bool,
}

impl SftpServer {
    pub fn new(root: impl AsRef<Path>, readonly: bool) -> Self {
        Self {
            confinement: Confinement::new(root.as_ref()),
            readonly,
        }
    }

    pub fn root(&self) -> &Path {
        self.confinement.root()
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Answer requests on `stream` until the client closes it or `cancel`
    /// fires. Both end the session with `Ok(())`.
    ///
    /// Framing violations and a stream that ends mid-packet are errors.
    /// Failures of individual requests are reported to the client as
    /// `STATUS` replies.
    pub async fn serve<S>(&self, stream: S, cancel: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufStream::new(stream);
        let mut session = Session::new(self);
        debug!(root = %self.root().display(), readonly = self.readonly, "sftp session started");

        loop {
            let more = tokio::select! {
                _ = cancel.cancelled() => None,
                more = session.step(&mut stream) => Some(more?),
            };
            match more {
                Some(true) => {}
                Some(false) => {
                    debug!(requests = session.requests, "sftp client closed the stream");
                    return Ok(());
                }
                None => {
                    debug!(requests = session.requests, "sftp session cancelled");
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-request failures
// ---------------------------------------------------------------------------

/// A failed request, answered with `STATUS`.
#[derive(Debug)]
struct Status {
    code: u32,
    message: String,
}

impl Status {
    fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn denied(message: &str) -> Self {
        Self::new(status::PERMISSION_DENIED, message)
    }

    fn bad_handle() -> Self {
        Self::new(status::FAILURE, "invalid handle")
    }

    fn eof() -> Self {
        Self::new(status::EOF, "End of file")
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        let code = match e.kind() {
            io::ErrorKind::NotFound => status::NO_SUCH_FILE,
            io::ErrorKind::PermissionDenied => status::PERMISSION_DENIED,
            _ => status::FAILURE,
        };
        Self::new(code, e.to_string())
    }
}

impl From<SftpError> for Status {
    fn from(e: SftpError) -> Self {
        Self::new(status::BAD_MESSAGE, e.to_string())
    }
}

type Outcome = std::result::Result<Bytes, Status>;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

enum Handle {
    File {
        file: File,
        path: PathBuf,
        writable: bool,
    },
    Dir {
        path: PathBuf,
        pending: VecDeque<Listing>,
    },
}

struct Listing {
    name: OsString,
    attrs: FileAttrs,
}

struct Session<'a> {
    server: &'a SftpServer,
    initialized: bool,
    handles: HashMap<String, Handle>,
    next_handle: u64,
    requests: u64,
}

impl<'a> Session<'a> {
    fn new(server: &'a SftpServer) -> Self {
        Self {
            server,
            initialized: false,
            handles: HashMap::new(),
            next_handle: 0,
            requests: 0,
        }
    }

    /// Handle one packet. Returns `false` on clean end-of-stream.
    async fn step<S>(&mut self, stream: &mut S) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(packet) = read_packet(stream).await? else {
            return Ok(false);
        };
        let reply = self.dispatch(packet).await?;
        stream.write_all(&reply).await?;
        stream.flush().await?;
        Ok(true)
    }

    async fn dispatch(&mut self, packet: Bytes) -> Result<Bytes> {
        let mut payload = Payload::new(packet);
        let packet_type = payload.u8()?;

        if packet_type == kind::INIT {
            let client_version = payload.u32()?;
            debug!(client_version, "sftp init");
            self.initialized = true;
            let mut reply = Reply::new(kind::VERSION);
            reply.put_u32(SFTP_VERSION);
            return Ok(reply.finish());
        }
        if !self.initialized {
            return Err(SftpError::Protocol(format!(
                "request type {packet_type} received before INIT"
            )));
        }

        let id = payload.u32()?;
        self.requests += 1;
        trace!(id, packet_type, "sftp request");

        Ok(match self.handle(packet_type, id, &mut payload).await {
            Ok(reply) => reply,
            Err(failure) => {
                trace!(id, code = failure.code, message = %failure.message, "sftp request failed");
                Reply::status(id, failure.code, &failure.message)
            }
        })
    }

    async fn handle(&mut self, packet_type: u8, id: u32, p: &mut Payload) -> Outcome {
        match packet_type {
            kind::REALPATH => self.realpath(id, p),
            kind::STAT => self.stat(id, p, true).await,
            kind::LSTAT => self.stat(id, p, false).await,
            kind::FSTAT => self.fstat(id, p).await,
            kind::OPEN => self.open(id, p).await,
            kind::CLOSE => self.close(id, p),
            kind::READ => self.read(id, p).await,
            kind::WRITE => self.write(id, p).await,
            kind::OPENDIR => self.opendir(id, p).await,
            kind::READDIR => self.readdir(id, p),
            kind::MKDIR => self.mkdir(id, p).await,
            kind::RMDIR => {
                let path = self.writable_path(p)?;
                fs::remove_dir(&path).await?;
                ok(id)
            }
            kind::REMOVE => {
                let path = self.writable_path(p)?;
                fs::remove_file(&path).await?;
                ok(id)
            }
            kind::RENAME => {
                let from = self.writable_path(p)?;
                let to = self.path(p)?;
                fs::rename(&from, &to).await?;
                ok(id)
            }
            kind::SETSTAT => {
                let path = self.writable_path(p)?;
                let attrs = FileAttrs::decode(p)?;
                apply_attrs(&path, &attrs).await?;
                ok(id)
            }
            kind::FSETSTAT => self.fsetstat(id, p).await,
            kind::READLINK => {
                let path = self.path(p)?;
                let target = fs::read_link(&path).await?;
                Ok(single_name(id, target.as_os_str()))
            }
            kind::SYMLINK => self.symlink(id, p).await,
            other => {
                debug!(packet_type = other, "unsupported sftp request");
                Err(Status::new(status::OP_UNSUPPORTED, "Operation unsupported"))
            }
        }
    }

    // -- helpers ------------------------------------------------------------

    fn path(&self, p: &mut Payload) -> std::result::Result<PathBuf, Status> {
        let requested = p.path()?;
        self.server.confinement.resolve(&requested).ok_or_else(|| {
            debug!(path = %requested.display(), "request outside the served root");
            Status::denied("path is outside the served root")
        })
    }

    fn ensure_writable(&self) -> std::result::Result<(), Status> {
        if self.server.readonly {
            return Err(Status::denied("read-only mount"));
        }
        Ok(())
    }

    fn writable_path(&self, p: &mut Payload) -> std::result::Result<PathBuf, Status> {
        let path = self.path(p)?;
        self.ensure_writable()?;
        Ok(path)
    }

    fn insert_handle(&mut self, handle: Handle) -> String {
        self.next_handle += 1;
        let key = self.next_handle.to_string();
        self.handles.insert(key.clone(), handle);
        key
    }

    fn file(&mut self, key: &str) -> std::result::Result<(&mut File, bool), Status> {
        match self.handles.get_mut(key) {
            Some(Handle::File { file, writable, .. }) => Ok((file, *writable)),
            _ => Err(Status::bad_handle()),
        }
    }

    // -- requests -----------------------------------------------------------

    fn realpath(&self, id: u32, p: &mut Payload) -> Outcome {
        let path = self.path(p)?;
        Ok(single_name(id, path.as_os_str()))
    }

    async fn stat(&self, id: u32, p: &mut Payload, follow: bool) -> Outcome {
        let path = self.path(p)?;
        let meta = if follow {
            fs::metadata(&path).await?
        } else {
            fs::symlink_metadata(&path).await?
        };
        Ok(attrs_reply(id, &FileAttrs::from_metadata(&meta)))
    }

    async fn fstat(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        let meta = match self.handles.get(&key) {
            Some(Handle::File { file, .. }) => file.metadata().await?,
            Some(Handle::Dir { path, .. }) => fs::metadata(path).await?,
            None => return Err(Status::bad_handle()),
        };
        Ok(attrs_reply(id, &FileAttrs::from_metadata(&meta)))
    }

    async fn open(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let path = self.path(p)?;
        let pflags = p.u32()?;
        let attrs = FileAttrs::decode(p)?;

        let mutating =
            open_flags::WRITE | open_flags::APPEND | open_flags::CREAT | open_flags::TRUNC;
        let writable = pflags & mutating != 0;
        if writable {
            self.ensure_writable()?;
        }

        let mut options = OpenOptions::new();
        options
            .read(pflags & open_flags::READ != 0)
            .write(pflags & open_flags::WRITE != 0)
            .append(pflags & open_flags::APPEND != 0);
        if pflags & open_flags::CREAT != 0 {
            if pflags & open_flags::EXCL != 0 {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }
        if pflags & open_flags::TRUNC != 0 {
            options.truncate(true);
        }
        set_create_mode(&mut options, &attrs);

        let file = options.open(&path).await?;
        debug!(path = %path.display(), pflags, "opened file");
        let key = self.insert_handle(Handle::File {
            file,
            path,
            writable,
        });
        Ok(handle_reply(id, &key))
    }

    fn close(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        match self.handles.remove(&key) {
            Some(_) => ok(id),
            None => Err(Status::bad_handle()),
        }
    }

    async fn read(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        let offset = p.u64()?;
        let len = (p.u32()? as usize).min(MAX_READ_LEN);
        let (file, _) = self.file(&key)?;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Err(Status::eof());
        }

        let mut reply = Reply::to(kind::DATA, id);
        reply.put_string(&buf[..filled]);
        Ok(reply.finish())
    }

    async fn write(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        let offset = p.u64()?;
        let data = p.bytes()?;
        self.ensure_writable()?;
        let (file, writable) = self.file(&key)?;
        if !writable {
            return Err(Status::denied("handle was not opened for writing"));
        }

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        // tokio hands writes to a blocking task; wait for it before replying.
        file.flush().await?;
        ok(id)
    }

    async fn opendir(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let path = self.path(p)?;
        let mut entries = fs::read_dir(&path).await?;
        let mut pending = VecDeque::new();
        while let Some(entry) = entries.next_entry().await? {
            let attrs = match fs::symlink_metadata(entry.path()).await {
                Ok(meta) => FileAttrs::from_metadata(&meta),
                Err(_) => FileAttrs::default(),
            };
            pending.push_back(Listing {
                name: entry.file_name(),
                attrs,
            });
        }
        debug!(path = %path.display(), entries = pending.len(), "opened directory");
        let key = self.insert_handle(Handle::Dir { path, pending });
        Ok(handle_reply(id, &key))
    }

    fn readdir(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        let Some(Handle::Dir { pending, .. }) = self.handles.get_mut(&key) else {
            return Err(Status::bad_handle());
        };
        if pending.is_empty() {
            return Err(Status::eof());
        }

        let count = pending.len().min(READDIR_BATCH);
        let mut reply = Reply::to(kind::NAME, id);
        reply.put_u32(count as u32);
        for listing in pending.drain(..count) {
            let name = listing.name.to_string_lossy();
            reply.put_os_str(&listing.name);
            reply.put_string(listing.attrs.long_name(&name).as_bytes());
            listing.attrs.encode(&mut reply);
        }
        Ok(reply.finish())
    }

    async fn mkdir(&self, id: u32, p: &mut Payload) -> Outcome {
        let path = self.writable_path(p)?;
        let attrs = FileAttrs::decode(p)?;
        fs::create_dir(&path).await?;
        if let Some(perm) = attrs.permissions {
            set_mode(&path, perm).await?;
        }
        ok(id)
    }

    async fn fsetstat(&mut self, id: u32, p: &mut Payload) -> Outcome {
        let key = p.string()?;
        let attrs = FileAttrs::decode(p)?;
        self.ensure_writable()?;
        let path = match self.handles.get(&key) {
            Some(Handle::File { path, .. } | Handle::Dir { path, .. }) => path.clone(),
            None => return Err(Status::bad_handle()),
        };
        apply_attrs(&path, &attrs).await?;
        ok(id)
    }

    async fn symlink(&self, id: u32, p: &mut Payload) -> Outcome {
        // OpenSSH order: link contents first, then the new link's path.
        let target = p.path()?;
        let link = self.writable_path(p)?;
        make_symlink(&target, &link).await?;
        ok(id)
    }
}

// ---------------------------------------------------------------------------
// Replies and filesystem helpers
// ---------------------------------------------------------------------------

fn ok(id: u32) -> Outcome {
    Ok(Reply::status(id, status::OK, "Success"))
}

fn handle_reply(id: u32, key: &str) -> Bytes {
    let mut reply = Reply::to(kind::HANDLE, id);
    reply.put_string(key.as_bytes());
    reply.finish()
}

fn attrs_reply(id: u32, attrs: &FileAttrs) -> Bytes {
    let mut reply = Reply::to(kind::ATTRS, id);
    attrs.encode(&mut reply);
    reply.finish()
}

/// `NAME` reply with one entry and no attributes (`REALPATH`, `READLINK`).
fn single_name(id: u32, name: &std::ffi::OsStr) -> Bytes {
    let mut reply = Reply::to(kind::NAME, id);
    reply.put_u32(1);
    reply.put_os_str(name);
    reply.put_os_str(name);
    FileAttrs::default().encode(&mut reply);
    reply.finish()
}

/// Apply `SETSTAT` attributes in the order size, permissions, times, owner.
async fn apply_attrs(path: &Path, attrs: &FileAttrs) -> io::Result<()> {
    if let Some(size) = attrs.size {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(size).await?;
    }
    if let Some(perm) = attrs.permissions {
        set_mode(path, perm).await?;
    }
    if let Some((accessed, modified)) = attrs.times_as_system() {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let times = std::fs::FileTimes::new()
                .set_accessed(accessed)
                .set_modified(modified);
            std::fs::File::open(&path)?.set_times(times)
        })
        .await
        .map_err(io::Error::other)??;
    }
    if let Some((uid, gid)) = attrs.uid_gid {
        set_owner(path, uid, gid).await?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_create_mode(options: &mut OpenOptions, attrs: &FileAttrs) {
    if let Some(perm) = attrs.permissions {
        options.mode(perm & 0o7777);
    }
}

#[cfg(not(unix))]
fn set_create_mode(_options: &mut OpenOptions, _attrs: &FileAttrs) {}

#[cfg(unix)]
async fn set_mode(path: &Path, perm: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(perm & 0o7777)).await
}

#[cfg(not(unix))]
async fn set_mode(path: &Path, perm: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path).await?.permissions();
    permissions.set_readonly(perm & 0o200 == 0);
    fs::set_permissions(path, permissions).await
}

#[cfg(unix)]
async fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::os::unix::fs::chown(path, Some(uid), Some(gid)))
        .await
        .map_err(io::Error::other)?
}

#[cfg(not(unix))]
async fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
