use crate::{CatalogError, RegisterDescriptor};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    registers: Vec<RegisterDescriptor>,
}

/// Ordered, read-only collection of register descriptors.
#[derive(Debug, Default, Clone)]
pub struct RegisterCatalog {
    registers: Vec<RegisterDescriptor>,
    index: HashMap<String, usize>,
}

impl RegisterCatalog {
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = RegisterCatalog::default();
        for desc in descriptors {
            catalog.push(desc)?;
        }
        Ok(catalog)
    }

    fn push(&mut self, desc: RegisterDescriptor) -> Result<(), CatalogError> {
        desc.validate()?;
        if self.index.contains_key(&desc.id) {
            return Err(CatalogError::DuplicateId(desc.id));
        }
        if desc.scale == 0.0 {
            debug!(register = %desc.id, "zero scale: register decodes to its offset and cannot be written");
        }
        self.index.insert(desc.id.clone(), self.registers.len());
        self.registers.push(desc);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RegisterDescriptor> {
        self.index.get(id).map(|&i| &self.registers[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter()
    }

    pub fn writable(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(|d| d.is_writable())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Drop registers belonging to heating circuits that are not installed.
    ///
    /// Registers grouped as `circuit_<n>` or `circuit_<n>_<suffix>` are kept
    /// only when `n <= installed`; a `circuit_` group without a numeric index
    /// is dropped.
    pub fn retain_circuits(self, installed: u32) -> Self {
        let kept = self.registers.into_iter().filter(|desc| {
            let Some(group) = desc.presentation.group.as_deref() else {
                return true;
            };
            if !group.starts_with("circuit_") {
                return true;
            }
            let index = group.split('_').nth(1).unwrap_or_default();
            match index.parse::<u32>() {
                Ok(n) if n <= installed => true,
                Ok(n) => {
                    debug!(register = %desc.id, circuit = n, "filtering register for non-installed circuit");
                    false
                }
                Err(_) => {
                    debug!(register = %desc.id, group, "skipping circuit register with unexpected group");
                    false
                }
            }
        });
        let mut out = RegisterCatalog::default();
        for desc in kept {
            out.index.insert(desc.id.clone(), out.registers.len());
            out.registers.push(desc);
        }
        out
    }
}

impl<'a> IntoIterator for &'a RegisterCatalog {
    type Item = &'a RegisterDescriptor;
    type IntoIter = std::slice::Iter<'a, RegisterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.registers.iter()
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

fn read_descriptors(path: &Path) -> anyhow::Result<Vec<RegisterDescriptor>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading catalog: {}", path.display()))?;
    let file: CatalogFile = if is_yaml(path) {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    };
    debug!(
        path = %path.display(),
        n = file.registers.len(),
        "loaded registers"
    );
    Ok(file.registers)
}

pub fn load_catalog_file(path: impl AsRef<Path>) -> anyhow::Result<RegisterCatalog> {
    let path = path.as_ref();
    let descriptors = read_descriptors(path)?;
    let catalog = RegisterCatalog::from_descriptors(descriptors)
        .with_context(|| format!("validating catalog: {}", path.display()))?;
    info!(path = %path.display(), n = catalog.len(), "loaded register catalog");
    Ok(catalog)
}

/// Load every `.json`, `.yaml` and `.yml` file in `dir`, in file-name order.
pub fn load_catalog_dir(dir: impl AsRef<Path>) -> anyhow::Result<RegisterCatalog> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading catalog dir: {}", dir.display()))?
    {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            if ext == "json" || ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    let mut catalog = RegisterCatalog::default();
    for p in entries {
        for desc in read_descriptors(&p)? {
            catalog
                .push(desc)
                .with_context(|| format!("validating catalog: {}", p.display()))?;
        }
    }
    info!(dir = %dir.display(), n = catalog.len(), "loaded register catalog");
    Ok(catalog)
}

/// Load a catalog from a single file or a directory of files.
pub fn load_catalog(path: impl AsRef<Path>) -> anyhow::Result<RegisterCatalog> {
    let path = path.as_ref();
    if path.is_dir() {
        load_catalog_dir(path)
    } else {
        load_catalog_file(path)
    }
}
