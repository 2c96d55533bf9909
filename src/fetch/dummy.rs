//! Source-less recipes: an empty directory with a fixed identity

use super::{Fetch, SourceKind};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hash reported for every dummy source
pub const DUMMY_HASH: &str = "dummy";

#[derive(Debug, Default)]
pub struct Dummy {
    target: PathBuf,
}

impl Dummy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetch for Dummy {
    fn kind(&self) -> SourceKind {
        SourceKind::Dummy
    }

    fn uri(&self) -> &str {
        ""
    }

    fn target(&self) -> &Path {
        &self.target
    }

    fn bind(&mut self, target: PathBuf, _timeout: Duration) {
        self.target = target;
    }

    fn ready(&self) -> bool {
        self.target.is_dir()
    }

    fn acquire(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.target)?;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn current_hash(&self) -> Result<String> {
        Ok(DUMMY_HASH.to_string())
    }

    fn src_hash(&mut self) -> Result<String> {
        Ok(DUMMY_HASH.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_creates_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sources/meta");
        let mut dummy = Dummy::new();
        dummy.bind(target.clone(), Duration::from_secs(1));

        assert!(!dummy.ready());
        dummy.acquire().unwrap();
        assert!(dummy.ready());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
        dummy.release().unwrap();
        assert_eq!(dummy.src_hash().unwrap(), DUMMY_HASH);
    }
}
