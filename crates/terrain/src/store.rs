//! Layered persistence behind [`LayerStore`].

use crate::error::{Result, TerrainError};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tinstore::{LayerData, LayerKind, TinFile};

/// How a layer write treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the layer already exists.
    Create,
    Append,
    Replace,
}

/// What a layer write does to the terrain's CRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsUpdate<'a> {
    Keep,
    /// Set the CRS to exactly this value; `None` clears it.
    Set(Option<&'a str>),
}

/// A store of named terrains, each holding up to one layer per kind.
///
/// Records keep insertion order. The CRS is opaque text.
pub trait LayerStore {
    fn list_layers(&self, name: &str) -> Result<Vec<LayerKind>>;

    /// Records of a layer, empty if the layer does not exist.
    fn read(&self, name: &str, kind: LayerKind) -> Result<LayerData>;

    fn write(
        &mut self,
        name: &str,
        mode: WriteMode,
        data: LayerData,
        crs: CrsUpdate<'_>,
    ) -> Result<()>;

    fn crs(&self, name: &str) -> Result<Option<String>>;
}

fn apply_write(
    tin: &mut TinFile,
    mode: WriteMode,
    data: LayerData,
    crs: CrsUpdate<'_>,
) -> Result<()> {
    let kind = data.kind();

    match mode {
        WriteMode::Create if tin.layer(kind).is_some() => {
            return Err(TerrainError::Precondition(format!(
                "layer {} already exists",
                kind
            )));
        }
        WriteMode::Append => match tin.layer_mut(kind) {
            Some(existing) => {
                existing.extend(data);
            }
            None => tin.set_layer(data),
        },
        _ => tin.set_layer(data),
    }

    if let CrsUpdate::Set(crs) = crs {
        if tin.crs.is_some() && tin.crs.as_deref() != crs {
            warn!("CRS changes from {:?} to {:?}", tin.crs, crs);
        }
        tin.crs = crs.map(str::to_owned);
    }

    Ok(())
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(TerrainError::InvalidParameter(format!(
            "invalid terrain name {:?}",
            name
        )));
    }
    Ok(())
}

/// One `<root>/<name>.tin` file per terrain.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    deflate: bool,
}

impl FileStore {
    /// Open (and create if needed) the store directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            deflate: false,
        })
    }

    /// Compress layer payloads on subsequent writes.
    pub fn with_deflate(mut self, deflate: bool) -> Self {
        self.deflate = deflate;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.tin", name))
    }

    /// Names of all terrains in the store, sorted.
    pub fn terrains(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tin") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<TinFile> {
        check_name(name)?;
        let path = self.path_of(name);
        if !path.exists() {
            return Ok(TinFile::default());
        }
        Ok(tinstore::read_file(&path)?)
    }
}

impl LayerStore for FileStore {
    fn list_layers(&self, name: &str) -> Result<Vec<LayerKind>> {
        Ok(self.load(name)?.layer_kinds())
    }

    fn read(&self, name: &str, kind: LayerKind) -> Result<LayerData> {
        let mut tin = self.load(name)?;
        let pos = tin.layers.iter().position(|l| l.kind() == kind);
        Ok(match pos {
            Some(i) => tin.layers.swap_remove(i),
            None => LayerData::empty(kind),
        })
    }

    fn write(
        &mut self,
        name: &str,
        mode: WriteMode,
        data: LayerData,
        crs: CrsUpdate<'_>,
    ) -> Result<()> {
        let mut tin = self.load(name)?;
        let kind = data.kind();
        let count = data.len();

        apply_write(&mut tin, mode, data, crs)?;
        tin.deflate = self.deflate;

        let path = self.path_of(name);
        tinstore::write_file(&path, &tin)?;

        debug!(
            "Wrote {} {} records to {} ({:?})",
            count,
            kind,
            path.display(),
            mode
        );
        Ok(())
    }

    fn crs(&self, name: &str) -> Result<Option<String>> {
        Ok(self.load(name)?.crs)
    }
}

/// Volatile store, mainly for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    terrains: hashbrown::HashMap<String, TinFile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LayerStore for MemoryStore {
    fn list_layers(&self, name: &str) -> Result<Vec<LayerKind>> {
        Ok(self
            .terrains
            .get(name)
            .map(TinFile::layer_kinds)
            .unwrap_or_default())
    }

    fn read(&self, name: &str, kind: LayerKind) -> Result<LayerData> {
        Ok(self
            .terrains
            .get(name)
            .and_then(|tin| tin.layer(kind))
            .cloned()
            .unwrap_or_else(|| LayerData::empty(kind)))
    }

    fn write(
        &mut self,
        name: &str,
        mode: WriteMode,
        data: LayerData,
        crs: CrsUpdate<'_>,
    ) -> Result<()> {
        check_name(name)?;
        let tin = self.terrains.entry(name.to_string()).or_default();
        apply_write(tin, mode, data, crs)
    }

    fn crs(&self, name: &str) -> Result<Option<String>> {
        Ok(self.terrains.get(name).and_then(|tin| tin.crs.clone()))
    }
}
