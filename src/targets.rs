use crate::error::Error;
use crate::state::ResolvedTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// How the target name written to the import file is derived from the image reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetNameStyle {
    /// The image reference verbatim.
    FullReference,
    /// The last two path segments, e.g. `team/app:1.2`.
    #[default]
    PathSuffix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFileEntry {
    pub org_id: String,
    pub integration_id: String,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
}

/// Document consumed by the Snyk API import tool.
#[derive(Debug, Default, Serialize)]
pub struct TargetFile {
    pub targets: Vec<TargetFileEntry>,
}

pub fn build(resolved: &ResolvedTarget, style: TargetNameStyle) -> TargetFileEntry {
    let name = match style {
        TargetNameStyle::FullReference => resolved.image_reference.to_string(),
        TargetNameStyle::PathSuffix => match resolved.image_reference.path_suffix() {
            Some(suffix) => suffix.to_string(),
            None => {
                debug!(
                    "Image {} has a single path segment, using the full reference as target name",
                    resolved.image_reference
                );
                resolved.image_reference.to_string()
            }
        },
    };

    TargetFileEntry {
        org_id: resolved.org_id.clone(),
        integration_id: resolved.integration_id.clone(),
        target: Target { name },
    }
}

impl TargetFile {
    pub fn from_resolved(resolved: &[ResolvedTarget], style: TargetNameStyle) -> Self {
        TargetFile {
            targets: resolved.iter().map(|r| build(r, style)).collect(),
        }
    }

    /// Writes the file atomically: a temp file next to `path` is renamed over it.
    ///
    /// The written file keeps the mode of the file it replaces, or gets `0644`.
    pub fn write_to(&self, path: &Path) -> Result<(), Error> {
        let output_error = |source: std::io::Error| Error::Output {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp_file = NamedTempFile::new_in(&dir).map_err(output_error)?;
        serde_json::to_writer_pretty(&mut tmp_file, self)
            .map_err(|e| output_error(std::io::Error::other(e)))?;
        tmp_file.write_all(b"\n").map_err(output_error)?;
        tmp_file.flush().map_err(output_error)?;
        #[cfg(unix)]
        tmp_file
            .as_file()
            .set_permissions(output_permissions(path))
            .map_err(output_error)?;
        tmp_file.as_file().sync_all().map_err(output_error)?;
        tmp_file.persist(path).map_err(|e| output_error(e.error))?;

        info!(
            "Wrote {} targets to {}",
            self.targets.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn output_permissions(path: &Path) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;

    match fs::metadata(path) {
        Ok(metadata) => metadata.permissions(),
        Err(_) => fs::Permissions::from_mode(0o644),
    }
}
