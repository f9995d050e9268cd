//! Rendezvous descriptors and the file they are published through.
//!
//! The producer root binds a fresh socket and writes its descriptor to a
//! well-known file; the consumer reads the first line of that file and
//! connects. The descriptor is opaque to everything except
//! [`Descriptor::socket_path`].

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ChannelError, Result};

/// Scheme prefix of every descriptor.
pub const DESCRIPTOR_SCHEME: &str = "unix:";

/// Default descriptor file name inside the temp directory.
pub const DEFAULT_DESCRIPTOR_FILE: &str = "fieldcast-port.txt";

/// Default location of the descriptor file.
pub fn default_descriptor_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DESCRIPTOR_FILE)
}

/// An endpoint descriptor such as `unix:/tmp/fieldcast-123-ab-0.sock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor(String);

impl Descriptor {
    /// Descriptor for a bound socket.
    pub fn for_socket(path: &Path) -> Self {
        Self(format!("{DESCRIPTOR_SCHEME}{}", path.display()))
    }

    /// Parse a descriptor string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.strip_prefix(DESCRIPTOR_SCHEME) {
            Some(path) if !path.is_empty() => Ok(Self(raw.to_string())),
            _ => Err(ChannelError::InvalidDescriptor(raw.to_string())),
        }
    }

    /// Socket path the descriptor points at.
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(&self.0[DESCRIPTOR_SCHEME.len()..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the descriptor from the first line of `path`.
pub fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let contents = fs::read_to_string(path).map_err(|source| ChannelError::DescriptorUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let first = contents.lines().next().unwrap_or_default();
    Descriptor::parse(first)
}

/// Write `descriptor` to `path`.
///
/// The file is written under a temporary name and renamed into place, so a
/// reader never observes a partial line.
pub fn publish(path: &Path, descriptor: &Descriptor) -> Result<PublishedDescriptor> {
    let map_err = |source| ChannelError::DescriptorPublish {
        path: path.to_path_buf(),
        source,
    };

    let staging = staging_path(path);
    let mut file = fs::File::create(&staging).map_err(map_err)?;
    writeln!(file, "{descriptor}").map_err(map_err)?;
    file.sync_all().map_err(map_err)?;
    drop(file);

    if let Err(err) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(map_err(err));
    }

    tracing::debug!(path = %path.display(), %descriptor, "descriptor published");
    Ok(PublishedDescriptor {
        path: path.to_path_buf(),
        descriptor: descriptor.clone(),
        removed: false,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// A descriptor file this process wrote.
///
/// Removing it only deletes the file while it still holds this descriptor;
/// a newer producer may have replaced it in the meantime.
#[derive(Debug)]
pub struct PublishedDescriptor {
    path: PathBuf,
    descriptor: Descriptor,
    removed: bool,
}

impl PublishedDescriptor {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Remove the file if it is still ours. Safe to call more than once.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match read_descriptor(&self.path) {
            Ok(current) if current == self.descriptor => {
                if let Err(err) = fs::remove_file(&self.path) {
                    tracing::debug!(path = %self.path.display(), error = %err, "descriptor removal failed");
                }
            }
            Ok(current) => {
                tracing::debug!(
                    path = %self.path.display(),
                    %current,
                    "descriptor file was replaced; leaving it"
                );
            }
            Err(_) => {}
        }
    }
}

impl Drop for PublishedDescriptor {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fcd-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("port.txt")
    }

    #[test]
    fn parse_and_socket_path() {
        let descriptor = Descriptor::parse("  unix:/tmp/fc.sock \n").unwrap();
        assert_eq!(descriptor.as_str(), "unix:/tmp/fc.sock");
        assert_eq!(descriptor.socket_path(), PathBuf::from("/tmp/fc.sock"));
        assert_eq!(
            Descriptor::for_socket(Path::new("/tmp/fc.sock")),
            descriptor
        );
    }

    #[test]
    fn parse_rejects_other_schemes() {
        assert!(matches!(
            Descriptor::parse("tcp:127.0.0.1:4000"),
            Err(ChannelError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            Descriptor::parse("unix:"),
            Err(ChannelError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            Descriptor::parse(""),
            Err(ChannelError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let path = temp_path("missing");
        let err = read_descriptor(&path).unwrap_err();
        assert!(matches!(err, ChannelError::DescriptorUnavailable { .. }));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn publish_then_read_first_line() {
        let path = temp_path("publish");
        let descriptor = Descriptor::for_socket(Path::new("/tmp/fc-test.sock"));

        let published = publish(&path, &descriptor).unwrap();
        assert_eq!(read_descriptor(&path).unwrap(), descriptor);
        assert_eq!(published.descriptor(), &descriptor);

        drop(published);
        assert!(!path.exists());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn replaced_file_is_left_alone() {
        let path = temp_path("replaced");
        let ours = Descriptor::for_socket(Path::new("/tmp/fc-ours.sock"));
        let theirs = Descriptor::for_socket(Path::new("/tmp/fc-theirs.sock"));

        let mut published = publish(&path, &ours).unwrap();
        fs::write(&path, format!("{theirs}\n")).unwrap();

        published.remove();
        assert_eq!(read_descriptor(&path).unwrap(), theirs);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn extra_lines_are_ignored() {
        let path = temp_path("lines");
        fs::write(&path, "unix:/tmp/first.sock\nunix:/tmp/second.sock\n").unwrap();
        assert_eq!(
            read_descriptor(&path).unwrap().socket_path(),
            PathBuf::from("/tmp/first.sock")
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
