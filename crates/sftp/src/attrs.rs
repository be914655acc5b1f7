use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BufMut;

use crate::codec::{Payload, Reply};
use crate::error::Result;

const FLAG_SIZE: u32 = 0x0000_0001;
const FLAG_UIDGID: u32 = 0x0000_0002;
const FLAG_PERMISSIONS: u32 = 0x0000_0004;
const FLAG_ACMODTIME: u32 = 0x0000_0008;
const FLAG_EXTENDED: u32 = 0x8000_0000;

/// File type bits carried in `permissions`.
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// The `ATTRS` structure of SFTP version 3. Absent fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub size: Option<u64>,
    pub uid_gid: Option<(u32, u32)>,
    pub permissions: Option<u32>,
    /// `(atime, mtime)` in seconds since the epoch.
    pub times: Option<(u32, u32)>,
}

impl FileAttrs {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let times = Some((
            epoch_secs(meta.accessed().ok()),
            epoch_secs(meta.modified().ok()),
        ));
        Self {
            size: Some(meta.len()),
            uid_gid: uid_gid(meta),
            permissions: Some(permissions(meta)),
            times,
        }
    }

    pub fn decode(payload: &mut Payload) -> Result<Self> {
        let flags = payload.u32()?;
        let mut attrs = Self::default();
        if flags & FLAG_SIZE != 0 {
            attrs.size = Some(payload.u64()?);
        }
        if flags & FLAG_UIDGID != 0 {
            attrs.uid_gid = Some((payload.u32()?, payload.u32()?));
        }
        if flags & FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(payload.u32()?);
        }
        if flags & FLAG_ACMODTIME != 0 {
            attrs.times = Some((payload.u32()?, payload.u32()?));
        }
        if flags & FLAG_EXTENDED != 0 {
            let count = payload.u32()?;
            for _ in 0..count {
                payload.bytes()?;
                payload.bytes()?;
            }
        }
        Ok(attrs)
    }

    pub fn encode(&self, reply: &mut Reply) {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= FLAG_SIZE;
        }
        if self.uid_gid.is_some() {
            flags |= FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= FLAG_PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= FLAG_ACMODTIME;
        }

        let buf = reply.buf_mut();
        buf.put_u32(flags);
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some((uid, gid)) = self.uid_gid {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(perm) = self.permissions {
            buf.put_u32(perm);
        }
        if let Some((atime, mtime)) = self.times {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
    }

    pub fn is_dir(&self) -> bool {
        self.permissions.is_some_and(|p| p & S_IFMT == S_IFDIR)
    }

    /// An `ls -l` style line for `READDIR` replies.
    pub fn long_name(&self, name: &str) -> String {
        let perm = self.permissions.unwrap_or(0);
        let (uid, gid) = self.uid_gid.unwrap_or((0, 0));
        format!(
            "{} 1 {:<8} {:<8} {:>8} {}",
            mode_string(perm),
            uid,
            gid,
            self.size.unwrap_or(0),
            name
        )
    }

    pub(crate) fn times_as_system(&self) -> Option<(SystemTime, SystemTime)> {
        self.times.map(|(atime, mtime)| {
            (
                UNIX_EPOCH + Duration::from_secs(u64::from(atime)),
                UNIX_EPOCH + Duration::from_secs(u64::from(mtime)),
            )
        })
    }
}

fn epoch_secs(time: Option<SystemTime>) -> u32 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

#[cfg(unix)]
fn uid_gid(meta: &Metadata) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn uid_gid(_meta: &Metadata) -> Option<(u32, u32)> {
    None
}

#[cfg(unix)]
fn permissions(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn permissions(meta: &Metadata) -> u32 {
    let kind = if meta.is_dir() {
        S_IFDIR | 0o111
    } else if meta.file_type().is_symlink() {
        S_IFLNK
    } else {
        S_IFREG
    };
    let access = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    kind | access
}

fn mode_string(mode: u32) -> String {
    let kind = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFREG => '-',
        _ => '?',
    };
    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}
