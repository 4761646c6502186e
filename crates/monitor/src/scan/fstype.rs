//! Filesystem type detection for scan annotation.

use std::path::Path;

// statfs f_type magic numbers from the kernel headers.
const XFS_MAGIC: i64 = 0x5846_5342;
const EXT4_MAGIC: i64 = 0xEF53;
const BTRFS_MAGIC: i64 = 0x9123_683E;
const NFS_MAGIC: i64 = 0x6969;
const CIFS_MAGIC: i64 = 0xFF53_4D42;
const TMPFS_MAGIC: i64 = 0x0102_1994;
const RAMFS_MAGIC: i64 = 0x8584_58F6;

pub(crate) fn name_for_magic(magic: i64) -> String {
    match magic {
        XFS_MAGIC => "xfs".to_string(),
        EXT4_MAGIC => "ext4".to_string(),
        BTRFS_MAGIC => "btrfs".to_string(),
        NFS_MAGIC => "nfs".to_string(),
        CIFS_MAGIC => "cifs".to_string(),
        TMPFS_MAGIC => "tmpfs".to_string(),
        RAMFS_MAGIC => "ramfs".to_string(),
        other => format!("unknown(0x{other:x})"),
    }
}

/// The filesystem type name for the mount containing `path`.
#[cfg(target_os = "linux")]
pub fn filesystem_type(path: &Path) -> String {
    match nix::sys::statfs::statfs(path) {
        Ok(stats) => name_for_magic(stats.filesystem_type().0 as i64),
        Err(_) => "unknown".to_string(),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn filesystem_type(_path: &Path) -> String {
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_magics() {
        assert_eq!(name_for_magic(EXT4_MAGIC), "ext4");
        assert_eq!(name_for_magic(XFS_MAGIC), "xfs");
        assert_eq!(name_for_magic(BTRFS_MAGIC), "btrfs");
        assert_eq!(name_for_magic(NFS_MAGIC), "nfs");
        assert_eq!(name_for_magic(CIFS_MAGIC), "cifs");
        assert_eq!(name_for_magic(TMPFS_MAGIC), "tmpfs");
        assert_eq!(name_for_magic(RAMFS_MAGIC), "ramfs");
    }

    #[test]
    fn test_unknown_magic_is_hex_tagged() {
        assert_eq!(name_for_magic(0xDEAD), "unknown(0xdead)");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_filesystem_type_of_tmp_is_not_empty() {
        let name = filesystem_type(Path::new("/tmp"));
        assert!(!name.is_empty());
    }
}
