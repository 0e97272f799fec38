//! Job descriptors and archival.

use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Malformed job descriptor '{}': {}", .path.display(), .source)]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Export file '{}' does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("Failed to read job descriptor '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to archive export to '{}': {}", .path.display(), .source)]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One unit of work dropped into the watch directory.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDescriptor {
    /// The export file this job uploads.
    pub xml_path: PathBuf,
    /// Bearer token the job authenticates with.
    pub token: String,
    /// Archive bucket; descriptors without one land under "unknown".
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "unknown".to_string()
}

impl JobDescriptor {
    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let content = std::fs::read_to_string(path).map_err(|source| JobError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| JobError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Whether a path follows the descriptor naming convention:
/// `.json` extension with a stem ending in `_job`.
pub fn is_job_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
        && path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.ends_with("_job"))
}

/// Move a completed export into the per-user archive directory.
///
/// The archive name carries a timestamp plus a short random suffix so two
/// exports archived within the same second cannot collide.
pub fn archive_export(
    xml_path: &Path,
    processed_dir: &Path,
    user_id: &str,
) -> Result<PathBuf, JobError> {
    let user_dir = processed_dir.join(user_id);
    std::fs::create_dir_all(&user_dir).map_err(|source| JobError::Archive {
        path: user_dir.clone(),
        source,
    })?;

    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}_{}_export.xml",
        Local::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    );
    let dest = user_dir.join(name);

    move_file(xml_path, &dest).map_err(|source| JobError::Archive {
        path: dest.clone(),
        source,
    })?;
    Ok(dest)
}

/// Rename, falling back to copy+remove when the watch directory and the
/// archive sit on different filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_job_file() {
        assert!(is_job_file(Path::new("/drop/export_job.json")));
        assert!(is_job_file(Path::new("alice_2024_job.json")));

        assert!(!is_job_file(Path::new("/drop/export.json")));
        assert!(!is_job_file(Path::new("/drop/export_job.txt")));
        assert!(!is_job_file(Path::new("/drop/export_job")));
        assert!(!is_job_file(Path::new("/drop/jobs.json")));
    }

    #[test]
    fn test_load_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice_job.json");
        std::fs::write(
            &path,
            r#"{"xml_path": "/data/export.xml", "token": "tok-1", "user_id": "alice"}"#,
        )
        .unwrap();

        let job = JobDescriptor::load(&path).unwrap();
        assert_eq!(job.xml_path, PathBuf::from("/data/export.xml"));
        assert_eq!(job.token, "tok-1");
        assert_eq!(job.user_id, "alice");
    }

    #[test]
    fn test_load_descriptor_defaults_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anon_job.json");
        std::fs::write(&path, r#"{"xml_path": "/data/export.xml", "token": "tok"}"#).unwrap();

        let job = JobDescriptor::load(&path).unwrap();
        assert_eq!(job.user_id, "unknown");
    }

    #[test]
    fn test_load_descriptor_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_job.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            JobDescriptor::load(&path),
            Err(JobError::Malformed { .. })
        ));
    }

    #[test]
    fn test_load_descriptor_missing_file() {
        assert!(matches!(
            JobDescriptor::load(Path::new("/nonexistent/x_job.json")),
            Err(JobError::Io { .. })
        ));
    }

    #[test]
    fn test_archive_moves_into_per_user_dir() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("export.xml");
        std::fs::write(&export, "<HealthData/>").unwrap();
        let processed = dir.path().join("processed");

        let archived = archive_export(&export, &processed, "alice").unwrap();

        assert!(!export.exists());
        assert!(archived.exists());
        assert!(archived.starts_with(processed.join("alice")));

        let name = archived.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_export.xml"));
        // "YYYYMMDD_HHMMSS_xxxxxxxx_export.xml"
        assert_eq!(name.len(), "20240310_091500_0123abcd_export.xml".len());
        assert_eq!(std::fs::read_to_string(&archived).unwrap(), "<HealthData/>");
    }

    #[test]
    fn test_archive_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");

        let mut names = std::collections::HashSet::new();
        for i in 0..5 {
            let export = dir.path().join(format!("export{i}.xml"));
            std::fs::write(&export, "x").unwrap();
            let archived = archive_export(&export, &processed, "bob").unwrap();
            assert!(names.insert(archived));
        }
    }
}
