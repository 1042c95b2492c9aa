use std::io::{BufReader, BufWriter};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub struct Archiver {
    path: PathBuf,
    writer: ZipWriter<BufWriter<File>>,
    entries: usize,
}

/// What ended up on disk after archiving a directory.
#[derive(Clone, Debug)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Number of zip entries written, directories included.
    pub entries: usize,
    /// Size of the finished archive file.
    pub bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

fn needs_zip64(len: u64) -> bool {
    len >= 0xFFFFFFFF
}

/// Zip stores paths with forward slashes regardless of platform.
fn entry_name(relative: &Path) -> anyhow::Result<String> {
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| anyhow!("Non UTF-8 path in archive: {}", relative.display()))
        })
        .collect::<anyhow::Result<Vec<&str>>>()?;

    Ok(parts.join("/"))
}

impl Archiver {
    /// Creates (or truncates) the archive at `path`.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Unable to create archive {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: ZipWriter::new(BufWriter::new(file)),
            entries: 0,
        })
    }

    fn options() -> FileOptions {
        FileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Entries of 4 GiB or more need ZIP64 headers.
    fn file_options(len: u64) -> FileOptions {
        let options = Self::options();
        if needs_zip64(len) {
            log::debug!("using zip64 for entry of {} bytes", len);
            return options.large_file(true);
        }

        options
    }

    /// Zip up everything under `source_dir` into `destination`.
    ///
    /// The source is checked before the destination is touched, so a bad
    /// source directory never leaves an empty archive behind.
    pub fn create(source_dir: &Path, destination: &Path) -> anyhow::Result<ArchiveSummary> {
        if !source_dir.is_dir() {
            return Err(anyhow!(
                "Unable to archive {}: not a directory",
                source_dir.display()
            ));
        }

        let mut archiver = Archiver::new(destination)?;
        archiver.add_dir(source_dir)?;
        archiver.finish()
    }

    /// Recursively add the contents of `source_dir`. Entry names are relative
    /// to `source_dir`, and the root itself is not written.
    pub fn add_dir(&mut self, source_dir: &Path) -> anyhow::Result<usize> {
        let walker = WalkDir::new(source_dir)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        let mut added = 0;
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            // Don't archive the archive when it lives inside the source tree.
            if path == self.path {
                log::debug!("skipping {}, output archive", path.display());
                continue;
            }

            let relative = path.strip_prefix(source_dir)?;
            let name = entry_name(relative)?;

            if path.is_file() {
                let len = std::fs::metadata(path)?.len();
                self.writer.start_file(name.as_str(), Self::file_options(len))?;
                let mut file = File::open(path)
                    .with_context(|| format!("Unable to read {}", path.display()))?;
                std::io::copy(&mut file, &mut self.writer)?;
            } else if entry.file_type().is_dir() {
                // Explicit directory entries so empty directories survive.
                self.writer.add_directory(name.as_str(), Self::options())?;
            } else {
                log::debug!("skipping {}, not a file or directory", path.display());
                continue;
            }

            log::trace!("added {}", name);
            added += 1;
        }

        self.entries += added;
        Ok(added)
    }

    pub fn finish(mut self) -> anyhow::Result<ArchiveSummary> {
        use std::io::Write;
        let mut writer = self.writer.finish()?;
        writer.flush()?;
        drop(writer);

        let bytes = std::fs::metadata(&self.path)?.len();
        Ok(ArchiveSummary {
            path: self.path,
            entries: self.entries,
            bytes,
        })
    }

    /// List the entries of an existing archive, in stored order.
    pub fn entries(path: &Path) -> anyhow::Result<Vec<ArchiveEntry>> {
        let file = File::open(path)
            .with_context(|| format!("Unable to open archive {}", path.display()))?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let mut entries = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let file = archive.by_index(idx)?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                is_dir: file.is_dir(),
                size: file.size(),
            });
        }

        Ok(entries)
    }
}
