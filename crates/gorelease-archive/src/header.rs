//! Owned tar entry metadata
//!
//! `tar::Header` is a raw 512-byte block whose name field cannot hold long
//! paths, so adjustments work on this owned copy instead and the writer
//! re-encodes it (emitting GNU long-name records where needed).

use std::io::{self, Read, Write};

use tar::{Builder, Entry, EntryType, Header};

use crate::ArchiveError;

/// Metadata for one archive entry as it flows through the adjustment chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Entry path inside the archive, `/`-separated; directories keep their trailing `/`
    pub name: String,
    /// Permission bits
    pub mode: u32,
    /// Content length in bytes; content is copied verbatim, so adjustments must not change it
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    pub username: Option<String>,
    pub groupname: Option<String>,
    pub entry_type: EntryType,
    /// Target of a symlink or hard link
    pub link_name: Option<String>,
}

impl EntryHeader {
    /// Clone the header of an entry read from a source archive
    ///
    /// Blank or NUL-filled numeric fields read as 0.
    pub fn from_entry<R: Read>(entry: &Entry<'_, R>) -> Result<Self, ArchiveError> {
        let header = entry.header();
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let link_name = entry
            .link_name_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        Ok(Self {
            name,
            mode: header.mode().unwrap_or(0),
            size: entry.size(),
            mtime: header.mtime().unwrap_or(0),
            uid: header.uid().unwrap_or(0),
            gid: header.gid().unwrap_or(0),
            username: header.username().ok().flatten().map(str::to_string),
            groupname: header.groupname().ok().flatten().map(str::to_string),
            entry_type: header.entry_type(),
            link_name,
        })
    }

    /// A directory header with mode 0755
    pub fn directory(name: impl Into<String>, mtime: u64) -> Self {
        Self {
            name: name.into(),
            mode: 0o755,
            size: 0,
            mtime,
            uid: 0,
            gid: 0,
            username: None,
            groupname: None,
            entry_type: EntryType::Directory,
            link_name: None,
        }
    }

    /// A regular file header
    pub fn file(name: impl Into<String>, size: u64, mode: u32, mtime: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            size,
            mtime,
            uid: 0,
            gid: 0,
            username: None,
            groupname: None,
            entry_type: EntryType::Regular,
            link_name: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type.is_dir()
    }

    /// Whether any executable bit is set
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }

    /// Encode this header and copy `data` as the entry body
    pub(crate) fn append<W: Write>(&self, builder: &mut Builder<W>, data: impl Read) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(self.entry_type);
        header.set_mode(self.mode);
        header.set_mtime(self.mtime);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        if let Some(ref username) = self.username {
            header.set_username(username)?;
        }
        if let Some(ref groupname) = self.groupname {
            header.set_groupname(groupname)?;
        }

        match (&self.link_name, self.entry_type) {
            (Some(target), EntryType::Symlink | EntryType::Link) => {
                header.set_size(0);
                builder.append_link(&mut header, &self.name, target)
            }
            _ => {
                header.set_size(self.size);
                builder.append_data(&mut header, &self.name, data)
            }
        }
    }
}
