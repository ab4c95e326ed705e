use std::collections::BTreeMap;

use crate::error::{PuppetryError, PuppetryResult};

/// Byte retrieval by model-relative path. File systems, archives and
/// platform asset managers all sit behind this.
pub trait AssetSource {
    fn read(&self, path: &str) -> PuppetryResult<Vec<u8>>;

    fn read_string(&self, path: &str) -> PuppetryResult<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes)
            .map_err(|_| PuppetryError::load(format!("asset '{path}' is not valid UTF-8")))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryAssets {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }
}

impl AssetSource for MemoryAssets {
    fn read(&self, path: &str) -> PuppetryResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| PuppetryError::load(format!("asset not found: '{path}'")))
    }
}

/// Joins a directory prefix (everything up to the final '/') with a
/// descriptor-relative file reference.
pub fn resolve_relative(base_path: &str, file: &str) -> String {
    match base_path.rfind('/') {
        Some(pos) => format!("{}{}", &base_path[..=pos], file),
        None => file.to_string(),
    }
}
