//! Startup script and operator key injected into new resources.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::config::MistConfig;
use crate::driver::BackendKind;
use crate::error::ProvisionError;

/// File contents handed to a driver when it builds a resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartupAssets {
    /// Per-distribution startup script.
    pub script: String,
    /// Operator SSH public key.
    pub public_key: String,
}

impl StartupAssets {
    /// Reads the startup script for `distro` and the operator public key.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Asset`] when either file cannot be read.
    pub fn load(
        config: &MistConfig,
        kind: BackendKind,
        distro: &str,
    ) -> Result<Self, ProvisionError> {
        let script = read_to_string_ambient(&config.startup_script_for(kind, distro))?;
        let public_key = read_to_string_ambient(&config.public_key_path())?;
        Ok(Self {
            script,
            public_key: public_key.trim_end().to_owned(),
        })
    }
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, ProvisionError> {
    read_ambient(path).map_err(|err| ProvisionError::Asset {
        path: path.to_string(),
        message: err.to_string(),
    })
}

/// Reads `path` through a capability handle on its parent directory.
pub(crate) fn read_ambient(path: &Utf8Path) -> io::Result<String> {
    let (dir_path, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path has no file name",
            ));
        }
    };

    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())?;
    dir.read_to_string(file_name)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::sample_config;

    fn workspace() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        (tmp, root)
    }

    #[test]
    fn loads_script_and_trims_key() {
        let (_tmp, root) = workspace();
        fs::create_dir_all(root.join("scripts/gce")).expect("script dir");
        fs::write(root.join("scripts/gce/ubuntu"), "#!/bin/sh\necho hi\n").expect("script");
        fs::write(root.join("id.pub"), "ssh-ed25519 AAAA operator\n").expect("key");

        let mut config = sample_config();
        config.startup_script_path = root.join("scripts").into_string();
        config.ssh_public_key = root.join("id.pub").into_string();

        let assets = StartupAssets::load(&config, BackendKind::CloudVm, "ubuntu")
            .expect("assets should load");

        assert_eq!(assets.script, "#!/bin/sh\necho hi\n");
        assert_eq!(assets.public_key, "ssh-ed25519 AAAA operator");
    }

    #[test]
    fn missing_script_is_reported_with_path() {
        let (_tmp, root) = workspace();
        let mut config = sample_config();
        config.startup_script_path = root.into_string();

        let err = StartupAssets::load(&config, BackendKind::Container, "alpine")
            .expect_err("missing script should fail");

        let ProvisionError::Asset { path, .. } = err else {
            panic!("expected asset error, got {err:?}");
        };
        assert!(path.ends_with("lxc/alpine"), "unexpected path: {path}");
    }
}
