//! Direct mount execution on a Linux host.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use nix::mount::{MntFlags, MsFlags};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{
    DISK_BY_ID_DIR, MountError, MountFuture, Mounter, VolumeStats, disk_by_id_candidates,
};

const PROC_MOUNTS: &str = "/proc/self/mounts";
/// `blkid` exit status when the device carries no recognisable signature.
const BLKID_NOTHING_FOUND: i32 = 2;

/// One line of the kernel mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or source.
    pub source: String,
    /// Mount point.
    pub target: Utf8PathBuf,
    /// Filesystem type.
    pub fs_type: String,
    /// Mount options.
    pub options: Vec<String>,
}

/// Parses `/proc/self/mounts` content, decoding octal escapes.
#[must_use]
pub fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape_octal(source),
                target: Utf8PathBuf::from(unescape_octal(target)),
                fs_type: fs_type.to_owned(),
                options: options.split(',').map(str::to_owned).collect(),
            })
        })
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => {
                out.push(char::from(byte));
                chars.nth(2);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Splits mount options into kernel flags and filesystem data.
fn split_mount_options(options: &[String]) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options {
        match option.as_str() {
            "bind" => flags |= MsFlags::MS_BIND,
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rw" | "defaults" => {}
            "remount" => flags |= MsFlags::MS_REMOUNT,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodiratime" => flags |= MsFlags::MS_NODIRATIME,
            "relatime" => flags |= MsFlags::MS_RELATIME,
            "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
            other => data.push(other),
        }
    }
    let joined = (!data.is_empty()).then(|| data.join(","));
    (flags, joined)
}

#[derive(Debug, Default, Eq, PartialEq)]
struct BlkidProbe {
    fs_type: Option<String>,
    partition_table: Option<String>,
}

fn parse_blkid_export(output: &str) -> BlkidProbe {
    let mut probe = BlkidProbe::default();
    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("TYPE", value)) => probe.fs_type = Some(value.to_owned()),
            Some(("PTTYPE", value)) => probe.partition_table = Some(value.to_owned()),
            _ => {}
        }
    }
    probe
}

fn mkfs_args(fs_type: &str, device: &Utf8Path) -> Vec<String> {
    let mut args = match fs_type {
        "ext2" | "ext3" | "ext4" => vec![String::from("-F"), String::from("-m0")],
        "xfs" => vec![String::from("-f")],
        _ => Vec::new(),
    };
    args.push(device.to_string());
    args
}

/// Mounter that acts on the local host directly. Requires `CAP_SYS_ADMIN`.
#[derive(Clone, Debug)]
pub struct LinuxMounter {
    mounts_file: Utf8PathBuf,
    by_id_dir: Utf8PathBuf,
}

impl Default for LinuxMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxMounter {
    /// Mounter reading the live mount table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts_file: Utf8PathBuf::from(PROC_MOUNTS),
            by_id_dir: Utf8PathBuf::from(DISK_BY_ID_DIR),
        }
    }

    /// Reads the mount table from `path` instead.
    #[must_use]
    pub fn with_mounts_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Looks up device symlinks under `dir` instead.
    #[must_use]
    pub fn with_by_id_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.by_id_dir = dir.into();
        self
    }

    async fn run(program: &str, args: &[String]) -> Result<std::process::Output, MountError> {
        debug!(program, ?args, "running helper");
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|err| MountError::Command {
                program: program.to_owned(),
                message: err.to_string(),
            })
    }

    async fn run_checked(program: &str, args: &[String]) -> Result<String, MountError> {
        let output = Self::run(program, args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(MountError::Command {
            program: program.to_owned(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }

    async fn probe(device: &Utf8Path) -> Result<BlkidProbe, MountError> {
        let args = [
            String::from("-p"),
            String::from("-s"),
            String::from("TYPE"),
            String::from("-s"),
            String::from("PTTYPE"),
            String::from("-o"),
            String::from("export"),
            device.to_string(),
        ];
        let output = Self::run("blkid", &args).await?;
        if output.status.code() == Some(BLKID_NOTHING_FOUND) {
            return Ok(BlkidProbe::default());
        }
        if !output.status.success() {
            return Err(MountError::Command {
                program: String::from("blkid"),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn mount_table(&self) -> Result<Vec<MountEntry>, MountError> {
        let contents = tokio::fs::read_to_string(&self.mounts_file)
            .await
            .map_err(|err| MountError::io("read mount table", &self.mounts_file, &err))?;
        Ok(parse_mounts(&contents))
    }

    async fn check_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError> {
        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(resolved) => Utf8PathBuf::from_path_buf(resolved).unwrap_or_else(|_| path.to_owned()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(MountError::io("canonicalize", path, &err)),
        };
        Ok(self
            .mount_table()
            .await?
            .iter()
            .any(|entry| entry.target == path || entry.target == canonical))
    }

    async fn sys_mount(
        source: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let (flags, data) = split_mount_options(options);
        let source_owned = source.to_string();
        let target_owned = target.to_string();
        let fs_owned = (!fs_type.is_empty()).then(|| fs_type.to_owned());
        let remount_ro = flags.contains(MsFlags::MS_BIND | MsFlags::MS_RDONLY);

        tokio::task::spawn_blocking(move || {
            nix::mount::mount(
                Some(source_owned.as_str()),
                target_owned.as_str(),
                fs_owned.as_deref(),
                flags,
                data.as_deref(),
            )?;
            if remount_ro {
                // The kernel ignores MS_RDONLY on the initial bind.
                nix::mount::mount(
                    None::<&str>,
                    target_owned.as_str(),
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None::<&str>,
                )?;
            }
            Ok::<(), nix::Error>(())
        })
        .await
        .map_err(|err| MountError::Io {
            operation: String::from("mount"),
            path: target.to_owned(),
            message: err.to_string(),
        })?
        .map_err(|errno| MountError::Io {
            operation: String::from("mount"),
            path: target.to_owned(),
            message: errno.desc().to_owned(),
        })
    }

    #[instrument(skip(self, options))]
    async fn format_then_mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let probe = Self::probe(device).await?;
        let mount_fs = match probe.fs_type {
            Some(existing) => {
                if existing != fs_type {
                    warn!(%device, %existing, requested = fs_type, "device already formatted, mounting existing filesystem");
                }
                existing
            }
            None => {
                if let Some(table) = probe.partition_table {
                    return Err(MountError::UnsafeFormat {
                        device: device.to_owned(),
                        reason: format!("device carries a {table} partition table"),
                    });
                }
                info!(%device, fs_type, "formatting device");
                Self::run_checked(&format!("mkfs.{fs_type}"), &mkfs_args(fs_type, device)).await?;
                fs_type.to_owned()
            }
        };
        let mut mount_options = options.to_vec();
        mount_options.push(String::from("defaults"));
        Self::sys_mount(device, target, &mount_fs, &mount_options).await
    }

    async fn grow(&self, device: &Utf8Path, mount_path: &Utf8Path) -> Result<(), MountError> {
        let probe = Self::probe(device).await?;
        match probe.fs_type.as_deref() {
            Some("ext2" | "ext3" | "ext4") => {
                Self::run_checked("resize2fs", &[device.to_string()]).await?;
            }
            Some("xfs") => {
                Self::run_checked("xfs_growfs", &[String::from("-d"), mount_path.to_string()])
                    .await?;
            }
            other => {
                return Err(MountError::UnsupportedFilesystem {
                    fs_type: other.unwrap_or_default().to_owned(),
                    operation: String::from("resize"),
                });
            }
        }
        info!(%device, %mount_path, "filesystem resized");
        Ok(())
    }

    async fn device_size(device: &Utf8Path) -> Result<u64, MountError> {
        let output = Self::run_checked(
            "blockdev",
            &[String::from("--getsize64"), device.to_string()],
        )
        .await?;
        output.trim().parse().map_err(|err| MountError::Command {
            program: String::from("blockdev"),
            message: format!("unparsable size {:?}: {err}", output.trim()),
        })
    }

    async fn stats(path: &Utf8Path) -> Result<VolumeStats, MountError> {
        let owned = path.to_string();
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(owned.as_str()))
            .await
            .map_err(|err| MountError::Io {
                operation: String::from("statvfs"),
                path: path.to_owned(),
                message: err.to_string(),
            })?
            .map_err(|errno| {
                MountError::io("statvfs", path, &std::io::Error::from(errno))
            })?;
        let fragment = stat.fragment_size();
        let total_inodes = stat.files();
        let free_inodes = stat.files_free();
        Ok(VolumeStats {
            available_bytes: stat.blocks_available().saturating_mul(fragment),
            total_bytes: stat.blocks().saturating_mul(fragment),
            used_bytes: stat
                .blocks()
                .saturating_sub(stat.blocks_free())
                .saturating_mul(fragment),
            total_inodes,
            free_inodes,
            used_inodes: total_inodes.saturating_sub(free_inodes),
        })
    }

    async fn resolve_device(candidates: &[Utf8PathBuf]) -> Result<Utf8PathBuf, MountError> {
        let mut found = None;
        let mut resolved = BTreeSet::new();
        for candidate in candidates {
            match tokio::fs::canonicalize(candidate).await {
                Ok(target) => {
                    resolved.insert(target);
                    found.get_or_insert_with(|| candidate.clone());
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(MountError::io("canonicalize", candidate, &err)),
            }
        }
        if resolved.len() > 1 {
            return Err(MountError::AmbiguousDevice {
                candidates: candidates.to_vec(),
            });
        }
        found.ok_or_else(|| MountError::DeviceNotFound {
            candidates: candidates.to_vec(),
        })
    }
}

impl Mounter for LinuxMounter {
    fn is_mount_point<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, bool> {
        Box::pin(async move { self.check_mount_point(path).await })
    }

    fn make_dir<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|err| MountError::io("mkdir", path, &err))
        })
    }

    fn make_file<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| MountError::io("mkdir", parent, &err))?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)
                .await
                .map(drop)
                .map_err(|err| MountError::io("create file", path, &err))
        })
    }

    fn remove_path<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            let metadata = match tokio::fs::symlink_metadata(path).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(MountError::io("stat", path, &err)),
            };
            let removed = if metadata.is_dir() {
                tokio::fs::remove_dir(path).await
            } else {
                tokio::fs::remove_file(path).await
            };
            match removed {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(MountError::io("remove", path, &err)),
            }
        })
    }

    fn mount<'a>(
        &'a self,
        source: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(async move {
            Self::sys_mount(source, target, fs_type, options).await?;
            info!(%source, %target, fs_type, "mounted");
            Ok(())
        })
    }

    fn unmount<'a>(&'a self, target: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            let owned = target.to_string();
            tokio::task::spawn_blocking(move || {
                nix::mount::umount2(owned.as_str(), MntFlags::empty())
            })
            .await
            .map_err(|err| MountError::Io {
                operation: String::from("umount"),
                path: target.to_owned(),
                message: err.to_string(),
            })?
            .map_err(|errno| MountError::Io {
                operation: String::from("umount"),
                path: target.to_owned(),
                message: errno.desc().to_owned(),
            })?;
            info!(%target, "unmounted");
            Ok(())
        })
    }

    fn format_and_mount<'a>(
        &'a self,
        device: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(async move { self.format_then_mount(device, target, fs_type, options).await })
    }

    fn resize<'a>(
        &'a self,
        device: &'a Utf8Path,
        mount_path: &'a Utf8Path,
    ) -> MountFuture<'a, ()> {
        Box::pin(async move { self.grow(device, mount_path).await })
    }

    fn block_size_bytes<'a>(&'a self, device: &'a Utf8Path) -> MountFuture<'a, u64> {
        Box::pin(async move { Self::device_size(device).await })
    }

    fn volume_stats<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, VolumeStats> {
        Box::pin(async move { Self::stats(path).await })
    }

    fn disk_by_id_paths(&self, device_name: &str, partition: &str) -> Vec<Utf8PathBuf> {
        disk_by_id_candidates(&self.by_id_dir, device_name, partition)
    }

    fn verify_device_path<'a>(
        &'a self,
        candidates: &'a [Utf8PathBuf],
    ) -> MountFuture<'a, Utf8PathBuf> {
        Box::pin(async move { Self::resolve_device(candidates).await })
    }
}
