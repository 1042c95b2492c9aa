use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

pub mod archive;
pub mod config;
pub mod s3;
pub mod validator;

use archive::Archiver;
use s3::{upload_to_bucket, ObjectStore};
use validator::validate_archive;

/// A single "zip this directory and drop it in a bucket" run.
#[derive(Clone, Debug, Parser)]
pub struct Job {
    /// Directory to archive, relative to the working directory or absolute.
    pub target_directory: PathBuf,
    /// Base name of the archive, without the `.zip` extension.
    pub output_name: String,
    /// Destination bucket.
    pub target_bucket: String,
    /// Prepended verbatim to `<OUTPUT_NAME>.zip` to form the object key.
    /// Include a trailing `/` to get directory-like keys.
    #[clap(allow_hyphen_values = true)]
    pub prefix: String,
}

#[derive(Default)]
pub struct RunOpts {
    /// Check the archive against the directory before uploading.
    pub verify: bool,
}

#[derive(Clone, Debug)]
pub struct JobReport {
    pub archive: PathBuf,
    pub entries: usize,
    pub bucket: String,
    pub key: String,
    pub bytes_uploaded: u64,
}

/// Storage key for an archive. Plain concatenation, no separator is added.
pub fn object_key(prefix: &str, output_name: &str) -> String {
    format!("{prefix}{output_name}.zip")
}

/// Absolute path for `target`, resolved against `cwd`. `.` and `..` are
/// handled lexically, symlinks are left alone.
pub fn resolve_path(cwd: &Path, target: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in cwd.join(target).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }

    resolved
}

impl Job {
    pub fn new(
        target_directory: impl Into<PathBuf>,
        output_name: &str,
        target_bucket: &str,
        prefix: &str,
    ) -> Self {
        Job {
            target_directory: target_directory.into(),
            output_name: output_name.to_string(),
            target_bucket: target_bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    /// Parse a job from a full argument list, program name first.
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Job::try_parse_from(args)
    }

    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.output_name)
    }

    pub fn key(&self) -> String {
        object_key(&self.prefix, &self.output_name)
    }

    /// Archive the target directory into `<cwd>/<output_name>.zip` and upload
    /// it. The local archive is left in place whether or not the upload works.
    pub async fn run(
        &self,
        cwd: &Path,
        store: &dyn ObjectStore,
        opts: &RunOpts,
    ) -> Result<JobReport> {
        let source = resolve_path(cwd, &self.target_directory);
        let destination = resolve_path(cwd, Path::new(&self.archive_name()));

        log::info!(
            "archiving {} into {}",
            source.display(),
            destination.display()
        );
        let summary = Archiver::create(&source, &destination)
            .with_context(|| format!("Unable to archive {}", source.display()))?;
        log::info!(
            "created {} ({} entries, {} bytes)",
            summary.path.display(),
            summary.entries,
            summary.bytes
        );

        if opts.verify {
            validate_archive(&source, &summary.path)?;
        }

        let key = self.key();
        let bytes_uploaded = upload_to_bucket(store, &summary.path, &self.target_bucket, &key)
            .await
            .with_context(|| {
                format!(
                    "Unable to upload {} to s3://{}/{}",
                    summary.path.display(),
                    self.target_bucket,
                    key
                )
            })?;

        Ok(JobReport {
            archive: summary.path,
            entries: summary.entries,
            bucket: self.target_bucket.clone(),
            key,
            bytes_uploaded,
        })
    }
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use crate::s3::test::MemoryStore;
    use crate::{object_key, resolve_path, Job, RunOpts};

    fn workspace() -> tempfile::TempDir {
        let cwd = tempfile::tempdir().expect("tempdir");
        let site = cwd.path().join("site");
        std::fs::create_dir_all(site.join("assets")).expect("mkdir");
        std::fs::write(site.join("index.html"), "<html></html>").expect("write");
        std::fs::write(site.join("assets/app.js"), "console.log(1);").expect("write");
        cwd
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("builds/", "app"), "builds/app.zip");
        assert_eq!(object_key("", "app"), "app.zip");
        assert_eq!(object_key("builds", "app"), "buildsapp.zip");
    }

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/work/project");
        assert_eq!(
            resolve_path(cwd, Path::new("dist")),
            PathBuf::from("/work/project/dist")
        );
        assert_eq!(
            resolve_path(cwd, Path::new("./../other/./dist")),
            PathBuf::from("/work/other/dist")
        );
        assert_eq!(
            resolve_path(cwd, Path::new("/abs/dir")),
            PathBuf::from("/abs/dir")
        );
        assert_eq!(resolve_path(cwd, Path::new(".")), PathBuf::from("/work/project"));
    }

    #[test]
    fn test_from_args() {
        let job = Job::from_args(["zipdrop", "dist", "app", "my-bucket", "builds/"])
            .expect("valid args");
        assert_eq!(job.target_directory, PathBuf::from("dist"));
        assert_eq!(job.archive_name(), "app.zip");
        assert_eq!(job.key(), "builds/app.zip");

        let job = Job::from_args(["zipdrop", "dist", "app", "my-bucket", ""]).expect("valid args");
        assert_eq!(job.key(), "app.zip");
    }

    #[test]
    fn test_from_args_too_few() {
        assert!(Job::from_args(["zipdrop"]).is_err());
        assert!(Job::from_args(["zipdrop", "dist", "app", "my-bucket"]).is_err());
    }

    #[tokio::test]
    async fn test_run() {
        let cwd = workspace();
        let store = MemoryStore::default();
        let job = Job::new("site", "app", "my-bucket", "builds/");

        let report = job
            .run(cwd.path(), &store, &RunOpts { verify: true })
            .await
            .expect("Unable to run job");

        let archive = cwd.path().join("app.zip");
        assert_eq!(report.archive, archive);
        assert_eq!(report.key, "builds/app.zip");
        assert_eq!(report.bucket, "my-bucket");
        assert_eq!(report.entries, 3);

        let local = std::fs::read(&archive).expect("archive left on disk");
        assert_eq!(report.bytes_uploaded, local.len() as u64);
        assert_eq!(store.get("my-bucket", "builds/app.zip"), Some(local));
    }

    #[tokio::test]
    async fn test_run_missing_directory() {
        let cwd = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::default();
        let job = Job::new("missing", "app", "my-bucket", "");

        let res = job.run(cwd.path(), &store, &RunOpts::default()).await;
        assert!(res.is_err());
        assert_eq!(store.call_count(), 0);
        assert!(!cwd.path().join("app.zip").exists());
    }

    #[tokio::test]
    async fn test_run_denied_keeps_archive() {
        let cwd = workspace();
        let store = MemoryStore::denying();
        let job = Job::new("site", "app", "my-bucket", "builds/");

        let res = job.run(cwd.path(), &store, &RunOpts::default()).await;
        assert!(res.is_err());
        assert_eq!(store.call_count(), 1);
        assert!(cwd.path().join("app.zip").exists());
    }

    #[tokio::test]
    async fn test_rerun_overwrites() {
        let cwd = workspace();
        let store = MemoryStore::default();
        let job = Job::new("site", "app", "my-bucket", "builds/");

        job.run(cwd.path(), &store, &RunOpts::default())
            .await
            .expect("first run");
        let first = std::fs::read(cwd.path().join("app.zip")).expect("archive");

        job.run(cwd.path(), &store, &RunOpts::default())
            .await
            .expect("second run");
        let second = std::fs::read(cwd.path().join("app.zip")).expect("archive");

        assert_eq!(first, second);
        assert_eq!(store.call_count(), 2);
        assert_eq!(store.objects.lock().expect("poisoned").len(), 1);
        assert_eq!(store.get("my-bucket", "builds/app.zip"), Some(second));
    }

    #[tokio::test]
    async fn test_run_current_directory() {
        let cwd = workspace();
        let store = MemoryStore::default();
        let job = Job::new(".", "everything", "my-bucket", "");

        let report = job
            .run(cwd.path(), &store, &RunOpts { verify: true })
            .await
            .expect("Unable to run job");

        assert_eq!(report.key, "everything.zip");
        // site/, site/assets/, site/assets/app.js, site/index.html
        assert_eq!(report.entries, 4);
    }
}
