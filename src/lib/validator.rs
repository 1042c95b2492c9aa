use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use walkdir::WalkDir;

use crate::archive::Archiver;

/// Check that `archive` holds exactly the files under `source_dir`, with
/// matching sizes. Directory entries are ignored.
pub fn validate_archive(source_dir: &Path, archive: &Path) -> Result<()> {
    log::info!("Validating archive {}", archive.display());

    let mut expected: BTreeMap<String, u64> = BTreeMap::new();
    for entry in WalkDir::new(source_dir).min_depth(1) {
        let entry = entry?;
        let path = entry.path();
        if path == archive || !path.is_file() {
            continue;
        }

        let relative = path.strip_prefix(source_dir)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        expected.insert(name, std::fs::metadata(path)?.len());
    }

    let mut failed_validation = false;
    let mut found: BTreeMap<String, u64> = BTreeMap::new();
    for entry in Archiver::entries(archive)? {
        if entry.is_dir {
            continue;
        }

        match expected.get(&entry.name) {
            Some(size) if *size != entry.size => {
                log::error!(
                    "Size mismatch for {}: {} on disk, {} in archive",
                    entry.name,
                    size,
                    entry.size
                );
                failed_validation = true;
            }
            None => {
                log::error!("Unexpected entry in archive: {}", entry.name);
                failed_validation = true;
            }
            _ => {}
        }

        found.insert(entry.name, entry.size);
    }

    let missing: Vec<&String> = expected.keys().filter(|k| !found.contains_key(*k)).collect();
    if !missing.is_empty() {
        log::error!("{} missing files", missing.len());
        log::error!("{:?}", missing);
        failed_validation = true;
    }

    log::info!("Found & validated {} files", found.len());
    if failed_validation {
        Err(anyhow!("Failed validation"))
    } else {
        Ok(())
    }
}
