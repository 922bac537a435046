//! Loadable units: turning code bytes into something the sandbox can launch.
//!
//! Each packaging format implements [`LoadableUnit`]; the sandbox picks one with
//! [`loader_for`] and never special-cases formats itself.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::domain::UnitFormat;
use crate::error::SandboxError;

/// File name used for single-file units inside the working directory.
pub(crate) const FUNCTION_FILE: &str = "function";

/// Directory an archive is unpacked into.
pub(crate) const CODE_DIR: &str = "code";

/// Program plus leading arguments; job arguments are appended after these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: OsString,
    pub args: Vec<OsString>,
}

#[async_trait]
pub trait LoadableUnit: Send + Sync {
    /// Write `code` into `workdir` and describe how to start it.
    async fn materialize(&self, code: Vec<u8>, workdir: &Path) -> Result<Launch, SandboxError>;
}

pub fn loader_for(format: &UnitFormat) -> Box<dyn LoadableUnit> {
    match format {
        UnitFormat::Script { interpreter } => Box::new(ScriptUnit {
            interpreter: interpreter.clone(),
        }),
        UnitFormat::Executable => Box::new(ExecutableUnit),
        UnitFormat::Archive {
            entrypoint,
            interpreter,
        } => Box::new(ArchiveUnit {
            entrypoint: entrypoint.clone(),
            interpreter: interpreter.clone(),
        }),
    }
}

/// Source file run as `<interpreter> function`.
pub struct ScriptUnit {
    interpreter: String,
}

#[async_trait]
impl LoadableUnit for ScriptUnit {
    async fn materialize(&self, code: Vec<u8>, workdir: &Path) -> Result<Launch, SandboxError> {
        let path = workdir.join(FUNCTION_FILE);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| SandboxError::Load(format!("writing script: {e}")))?;
        Ok(Launch {
            program: OsString::from(&self.interpreter),
            args: vec![path.into_os_string()],
        })
    }
}

/// File executed directly.
pub struct ExecutableUnit;

#[async_trait]
impl LoadableUnit for ExecutableUnit {
    async fn materialize(&self, code: Vec<u8>, workdir: &Path) -> Result<Launch, SandboxError> {
        let path = workdir.join(FUNCTION_FILE);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| SandboxError::Load(format!("writing executable: {e}")))?;
        make_executable(&path).await?;
        Ok(Launch {
            program: path.into_os_string(),
            args: Vec::new(),
        })
    }
}

/// Gzip'd tarball unpacked into `code/`, started through `entrypoint`.
pub struct ArchiveUnit {
    entrypoint: String,
    interpreter: Option<String>,
}

#[async_trait]
impl LoadableUnit for ArchiveUnit {
    async fn materialize(&self, code: Vec<u8>, workdir: &Path) -> Result<Launch, SandboxError> {
        let entrypoint = relative_path(&self.entrypoint).ok_or_else(|| {
            SandboxError::Load(format!("invalid entrypoint {:?}", self.entrypoint))
        })?;
        let code_dir = workdir.join(CODE_DIR);

        let target = code_dir.clone();
        tokio::task::spawn_blocking(move || unpack(&code, &target))
            .await
            .map_err(|e| SandboxError::Load(format!("unpack task failed: {e}")))??;

        let entry = code_dir.join(entrypoint);
        if !entry.is_file() {
            return Err(SandboxError::Load(format!(
                "entrypoint {:?} not found in archive",
                self.entrypoint
            )));
        }

        match &self.interpreter {
            Some(interpreter) => Ok(Launch {
                program: OsString::from(interpreter),
                args: vec![entry.into_os_string()],
            }),
            None => {
                make_executable(&entry).await?;
                Ok(Launch {
                    program: entry.into_os_string(),
                    args: Vec::new(),
                })
            }
        }
    }
}

fn unpack(code: &[u8], target: &Path) -> Result<(), SandboxError> {
    std::fs::create_dir_all(target)
        .map_err(|e| SandboxError::Load(format!("creating code dir: {e}")))?;

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(code));
    let entries = archive
        .entries()
        .map_err(|e| SandboxError::Load(format!("reading archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| SandboxError::Load(format!("reading archive: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| SandboxError::Load(format!("archive entry path: {e}")))?
            .into_owned();
        if path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(SandboxError::Load(format!(
                "archive entry {} escapes the code directory",
                path.display()
            )));
        }
        let unpacked = entry
            .unpack_in(target)
            .map_err(|e| SandboxError::Load(format!("unpacking {}: {e}", path.display())))?;
        if !unpacked {
            return Err(SandboxError::Load(format!(
                "archive entry {} escapes the code directory",
                path.display()
            )));
        }
    }
    Ok(())
}

/// `raw` as a path that stays below its base directory.
fn relative_path(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    let ok = !raw.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    ok.then(|| path.to_path_buf())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), SandboxError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| SandboxError::Load(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), SandboxError> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a `.tar.gz` holding `files` (path, contents, mode).
    pub(crate) fn tarball(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (path, contents, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn script_unit_runs_through_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let unit = loader_for(&UnitFormat::Script {
            interpreter: "sh".into(),
        });

        let launch = unit.materialize(b"echo hi".to_vec(), dir.path()).await.unwrap();

        assert_eq!(launch.program, OsString::from("sh"));
        assert_eq!(launch.args, vec![dir.path().join(FUNCTION_FILE).into_os_string()]);
        assert_eq!(std::fs::read(dir.path().join(FUNCTION_FILE)).unwrap(), b"echo hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_unit_sets_exec_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();

        let launch = loader_for(&UnitFormat::Executable)
            .materialize(b"#!/bin/sh\necho hi\n".to_vec(), dir.path())
            .await
            .unwrap();

        let path = dir.path().join(FUNCTION_FILE);
        assert_eq!(launch.program, path.clone().into_os_string());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn archive_unit_unpacks_and_finds_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        let code = tarball(&[
            ("bin/run.sh", b"echo from archive", 0o644),
            ("lib/helper.txt", b"data", 0o644),
        ]);
        let unit = loader_for(&UnitFormat::Archive {
            entrypoint: "bin/run.sh".into(),
            interpreter: Some("sh".into()),
        });

        let launch = unit.materialize(code, dir.path()).await.unwrap();

        assert_eq!(launch.program, OsString::from("sh"));
        assert!(dir.path().join("code/lib/helper.txt").is_file());
        assert_eq!(
            launch.args,
            vec![dir.path().join("code/bin/run.sh").into_os_string()]
        );
    }

    #[tokio::test]
    async fn archive_without_entrypoint_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let code = tarball(&[("other.sh", b"true", 0o755)]);
        let unit = loader_for(&UnitFormat::Archive {
            entrypoint: "main.sh".into(),
            interpreter: None,
        });

        let err = unit.materialize(code, dir.path()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Load(msg) if msg.contains("main.sh")));
    }

    #[tokio::test]
    async fn archive_rejects_entrypoint_outside_code_dir() {
        let dir = tempfile::tempdir().unwrap();
        let unit = loader_for(&UnitFormat::Archive {
            entrypoint: "../../etc/passwd".into(),
            interpreter: None,
        });

        let err = unit
            .materialize(tarball(&[("a", b"", 0o644)]), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Load(_)));
    }

    #[tokio::test]
    async fn garbage_archive_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let unit = loader_for(&UnitFormat::Archive {
            entrypoint: "main.sh".into(),
            interpreter: None,
        });

        let err = unit
            .materialize(b"definitely not gzip".to_vec(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Load(_)));
    }
}
