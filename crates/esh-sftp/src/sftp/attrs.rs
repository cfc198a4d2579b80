// ── Mode bits & attribute classification ─────────────────────────────────────

use chrono::{DateTime, Utc};
use esh_core::FileAttributes;
use esh_ssh::RemoteStat;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Classifies raw server attributes. Missing fields read as zero.
pub fn file_attributes(stat: &RemoteStat) -> FileAttributes {
    let mode = stat.perm.unwrap_or(0);
    let kind = mode & S_IFMT;
    FileAttributes {
        size: stat.size.unwrap_or(0),
        mtime: stat.mtime.unwrap_or(0),
        atime: stat.atime.unwrap_or(0),
        mode,
        uid: stat.uid.unwrap_or(0),
        gid: stat.gid.unwrap_or(0),
        is_directory: kind == S_IFDIR,
        is_file: kind == S_IFREG,
        is_symbolic_link: kind == S_IFLNK,
    }
}

pub(crate) fn is_directory(stat: &RemoteStat) -> bool {
    stat.perm.unwrap_or(0) & S_IFMT == S_IFDIR
}

/// `ls -l` style permission string, e.g. `drwxr-xr-x`.
pub fn format_permissions(mode: u32) -> String {
    let mut s = String::with_capacity(10);

    s.push(match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        S_IFBLK => 'b',
        S_IFCHR => 'c',
        _ => '-',
    });

    let special = |set: u32, exec: u32, lower: char, upper: char| {
        match (mode & set != 0, mode & exec != 0) {
            (true, true) => lower,
            (true, false) => upper,
            (false, true) => 'x',
            (false, false) => '-',
        }
    };

    s.push(if mode & 0o400 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o200 != 0 { 'w' } else { '-' });
    s.push(special(0o4000, 0o100, 's', 'S'));

    s.push(if mode & 0o040 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o020 != 0 { 'w' } else { '-' });
    s.push(special(0o2000, 0o010, 's', 'S'));

    s.push(if mode & 0o004 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o002 != 0 { 'w' } else { '-' });
    s.push(special(0o1000, 0o001, 't', 'T'));

    s
}

/// One `ls -l` line for a listing entry.
pub fn long_name(filename: &str, attrs: &FileAttributes) -> String {
    let when = DateTime::<Utc>::from_timestamp(attrs.mtime as i64, 0)
        .map(|t| t.format("%b %e %H:%M").to_string())
        .unwrap_or_default();
    format!(
        "{} 1 {:<8} {:<8} {:>8} {} {}",
        format_permissions(attrs.mode),
        attrs.uid,
        attrs.gid,
        attrs.size,
        when,
        filename
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(perm: u32) -> RemoteStat {
        RemoteStat {
            size: Some(10),
            perm: Some(perm),
            ..RemoteStat::default()
        }
    }

    #[test]
    fn classifies_by_mode_mask() {
        let file = file_attributes(&stat(0o100644));
        assert!(file.is_file && !file.is_directory && !file.is_symbolic_link);

        let dir = file_attributes(&stat(0o040755));
        assert!(dir.is_directory && !dir.is_file);

        let link = file_attributes(&stat(0o120777));
        assert!(link.is_symbolic_link && !link.is_file && !link.is_directory);

        let fifo = file_attributes(&stat(0o010600));
        assert!(!fifo.is_file && !fifo.is_directory && !fifo.is_symbolic_link);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let attrs = file_attributes(&RemoteStat::default());
        assert_eq!(attrs, FileAttributes::default());
    }

    #[test]
    fn permission_strings() {
        assert_eq!(format_permissions(0o040755), "drwxr-xr-x");
        assert_eq!(format_permissions(0o100644), "-rw-r--r--");
        assert_eq!(format_permissions(0o120777), "lrwxrwxrwx");
        assert_eq!(format_permissions(0o104755), "-rwsr-xr-x");
        assert_eq!(format_permissions(0o041777), "drwxrwxrwt");
        assert_eq!(format_permissions(0o102644), "-rw-r-Sr--");
    }

    #[test]
    fn long_name_ends_with_filename() {
        let attrs = file_attributes(&stat(0o100644));
        let line = long_name("a.txt", &attrs);
        assert!(line.starts_with("-rw-r--r-- 1 "));
        assert!(line.ends_with(" a.txt"));
    }
}
