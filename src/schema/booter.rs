//! # Booter
//!
//! The `.bt` file holds the catalog's entry point: the 8-byte UID of the
//! newest table row. Updates are atomic by construction — write the new
//! bytes to `.bt_tmp`, sync, rename over `.bt` — so a crash mid-update
//! leaves either the old head or the new one, never a torn file. A stray
//! temp file from a crashed update is deleted on open.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

pub const BOOTER_SUFFIX: &str = ".bt";
pub const BOOTER_TMP_SUFFIX: &str = ".bt_tmp";

pub struct Booter {
    path: PathBuf,
    tmp_path: PathBuf,
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

impl Booter {
    pub fn create(prefix: &Path) -> Result<Self> {
        let booter = Self::paths(prefix);
        booter.remove_stale_tmp()?;
        File::options()
            .write(true)
            .create_new(true)
            .open(&booter.path)
            .wrap_err_with(|| format!("failed to create booter file at {:?}", booter.path))?;
        Ok(booter)
    }

    pub fn open(prefix: &Path) -> Result<Self> {
        let booter = Self::paths(prefix);
        booter.remove_stale_tmp()?;
        ensure!(
            booter.path.exists(),
            "booter file missing at {:?}",
            booter.path
        );
        Ok(booter)
    }

    fn paths(prefix: &Path) -> Self {
        Self {
            path: suffixed(prefix, BOOTER_SUFFIX),
            tmp_path: suffixed(prefix, BOOTER_TMP_SUFFIX),
        }
    }

    fn remove_stale_tmp(&self) -> Result<()> {
        if self.tmp_path.exists() {
            fs::remove_file(&self.tmp_path)
                .wrap_err("failed to remove stale booter temp file")?;
        }
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).wrap_err_with(|| format!("failed to read booter at {:?}", self.path))
    }

    /// Replaces the booter contents atomically.
    pub fn update(&self, data: &[u8]) -> Result<()> {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.tmp_path)
            .wrap_err("failed to create booter temp file")?;
        tmp.write_all(data).wrap_err("failed to write booter temp file")?;
        tmp.sync_all().wrap_err("failed to sync booter temp file")?;
        drop(tmp);

        fs::rename(&self.tmp_path, &self.path).wrap_err("failed to swap booter file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn update_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let booter = Booter::create(&dir.path().join("db")).unwrap();

        booter.update(&42u64.to_be_bytes()).unwrap();
        assert_eq!(booter.load().unwrap(), 42u64.to_be_bytes());

        booter.update(&7u64.to_be_bytes()).unwrap();
        assert_eq!(booter.load().unwrap(), 7u64.to_be_bytes());
    }

    #[test]
    fn open_requires_existing_file() {
        let dir = tempdir().unwrap();
        assert!(Booter::open(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn stale_tmp_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let booter = Booter::create(&prefix).unwrap();
        booter.update(&1u64.to_be_bytes()).unwrap();

        let tmp = suffixed(&prefix, BOOTER_TMP_SUFFIX);
        fs::write(&tmp, b"half-written").unwrap();

        let booter = Booter::open(&prefix).unwrap();
        assert!(!tmp.exists());
        assert_eq!(booter.load().unwrap(), 1u64.to_be_bytes());
    }

    #[test]
    fn create_rejects_existing_file() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        Booter::create(&prefix).unwrap();
        assert!(Booter::create(&prefix).is_err());
    }
}
