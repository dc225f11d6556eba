//! File open configuration and flag mapping.
//!
//! The same mapping is applied by both backends:
//!
//! | Mode | Flags |
//! |------|-------|
//! | `Read` | `O_RDONLY` |
//! | `Write`, `AttrWrite` | `O_WRONLY \| O_CREAT` |
//! | `Append` | `O_WRONLY \| O_APPEND` |
//!
//! | Creation | Extra flags |
//! |----------|-------------|
//! | `OpenExisting` | none |
//! | `IfNeeded` | `O_CREAT` |
//! | `AlwaysNew` | `O_CREAT \| O_EXCL` |
//! | `TruncateExisting` | `O_TRUNC` |
//!
//! `O_CLOEXEC` is always set; created files get mode `0644`.

use std::path::PathBuf;

/// Requested access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Read access.
    #[default]
    Read,
    /// Write access, creating the file if missing.
    Write,
    /// Write access intended for attribute updates.
    AttrWrite,
    /// Append-only write access.
    Append,
}

/// How the file is created or required to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Creation {
    /// The file must already exist.
    #[default]
    OpenExisting,
    /// Create the file if it does not exist.
    IfNeeded,
    /// Create the file; fail if it already exists.
    AlwaysNew,
    /// Truncate an existing file.
    TruncateExisting,
}

/// Kernel caching behavior request. Carried for API parity; no flag is
/// derived from it today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caching {
    /// Leave caching behavior unchanged.
    #[default]
    Unchanged,
}

/// A fully described open request, ready for `openat(2)`.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Path to open, resolved relative to `dirfd`.
    pub path: PathBuf,
    /// Directory fd the path is resolved against (`AT_FDCWD` by default).
    pub dirfd: libc::c_int,
    /// Computed open flags.
    pub flags: libc::c_int,
    /// Computed creation mode.
    pub mode: libc::mode_t,
}

impl OpenRequest {
    /// Builds the request for `path` from the option enums.
    #[must_use]
    pub fn new(
        path: PathBuf,
        mode: Mode,
        creation: Creation,
        _caching: Caching,
        dirfd: Option<libc::c_int>,
    ) -> Self {
        Self {
            path,
            dirfd: dirfd.unwrap_or(libc::AT_FDCWD),
            flags: open_flags(mode, creation),
            mode: file_mode(mode),
        }
    }
}

/// Maps the option enums onto `open(2)` flags.
#[must_use]
pub fn open_flags(mode: Mode, creation: Creation) -> libc::c_int {
    let mut flags = libc::O_CLOEXEC;
    match mode {
        Mode::Write | Mode::AttrWrite => flags |= libc::O_WRONLY,
        Mode::Append => flags |= libc::O_WRONLY | libc::O_APPEND,
        Mode::Read => flags |= libc::O_RDONLY,
    }
    match creation {
        Creation::IfNeeded => flags |= libc::O_CREAT,
        Creation::AlwaysNew => flags |= libc::O_CREAT | libc::O_EXCL,
        Creation::TruncateExisting => flags |= libc::O_TRUNC,
        Creation::OpenExisting => {}
    }
    if matches!(mode, Mode::Write | Mode::AttrWrite) {
        flags |= libc::O_CREAT;
    }
    flags
}

/// The permission bits used when a file may be created.
#[must_use]
pub fn file_mode(mode: Mode) -> libc::mode_t {
    match mode {
        Mode::Write | Mode::AttrWrite | Mode::Append => 0o644,
        Mode::Read => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_open_existing() {
        let flags = open_flags(Mode::Read, Creation::OpenExisting);
        assert_eq!(flags, libc::O_CLOEXEC | libc::O_RDONLY);
        assert_eq!(file_mode(Mode::Read), 0);
    }

    #[test]
    fn write_implies_creat() {
        let flags = open_flags(Mode::Write, Creation::OpenExisting);
        assert_ne!(flags & libc::O_CREAT, 0);
        assert_ne!(flags & libc::O_WRONLY, 0);
        assert_eq!(file_mode(Mode::Write), 0o644);
    }

    #[test]
    fn always_new_is_exclusive() {
        let flags = open_flags(Mode::Write, Creation::AlwaysNew);
        assert_ne!(flags & libc::O_EXCL, 0);
        assert_ne!(flags & libc::O_CREAT, 0);
    }

    #[test]
    fn append_does_not_create() {
        let flags = open_flags(Mode::Append, Creation::OpenExisting);
        assert_ne!(flags & libc::O_APPEND, 0);
        assert_eq!(flags & libc::O_CREAT, 0);
    }

    #[test]
    fn cloexec_always_set() {
        for mode in [Mode::Read, Mode::Write, Mode::AttrWrite, Mode::Append] {
            for creation in [
                Creation::OpenExisting,
                Creation::IfNeeded,
                Creation::AlwaysNew,
                Creation::TruncateExisting,
            ] {
                assert_ne!(open_flags(mode, creation) & libc::O_CLOEXEC, 0);
            }
        }
    }
}
