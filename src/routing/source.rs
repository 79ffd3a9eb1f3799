//! Edge function discovery.
//!
//! # Responsibilities
//! - Find user edge functions in the configured directories
//! - Load functions bundled with the tool itself (internal functions)
//! - Load and merge import maps
//!
//! # Design Decisions
//! - Missing directories are not an error; a project may not have any
//! - Discovery order is deterministic (sorted by name, first directory wins)

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FunctionDeclaration;

/// File extensions recognised as edge function entry points.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "ts", "tsx"];

const INTERNAL_MANIFEST: &str = "manifest.json";

/// Error raised while reading function sources from disk.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A function name bound to loadable source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisteredFunction {
    pub name: String,
    pub path: PathBuf,
}

impl RegisteredFunction {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// An import map as understood by the sandbox runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, BTreeMap<String, String>>,
}

impl ImportMap {
    /// Read an import map file. Relative targets are resolved against the
    /// directory containing the file.
    pub async fn load(path: &Path) -> Result<Self, SourceError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut map: ImportMap =
            serde_json::from_str(&content).map_err(|source| SourceError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for target in map
            .imports
            .values_mut()
            .chain(map.scopes.values_mut().flat_map(|s| s.values_mut()))
        {
            if target.starts_with("./") || target.starts_with("../") {
                *target = base.join(&*target).to_string_lossy().into_owned();
            }
        }
        Ok(map)
    }

    /// Merge `other` into `self`; entries from `other` win.
    pub fn merge(&mut self, other: ImportMap) {
        self.imports.extend(other.imports);
        for (scope, entries) in other.scopes {
            self.scopes.entry(scope).or_default().extend(entries);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty()
    }
}

/// Supplies the user's edge functions.
#[async_trait]
pub trait FunctionSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<RegisteredFunction>, SourceError>;
}

/// Scans directories for edge function entry points.
///
/// `name.ts` registers `name`; `name/index.ts` or `name/name.ts` registers
/// `name` as well.
#[derive(Debug, Clone)]
pub struct DirectoryFunctionSource {
    dirs: Vec<PathBuf>,
}

impl DirectoryFunctionSource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl FunctionSource for DirectoryFunctionSource {
    async fn discover(&self) -> Result<Vec<RegisteredFunction>, SourceError> {
        let mut seen = HashSet::new();
        let mut functions = Vec::new();

        for dir in &self.dirs {
            let mut found = scan_directory(dir).await?;
            found.sort_by(|a, b| a.name.cmp(&b.name));
            for function in found {
                if seen.insert(function.name.clone()) {
                    functions.push(function);
                } else {
                    tracing::debug!(
                        function = %function.name,
                        path = ?function.path,
                        "Skipping shadowed edge function"
                    );
                }
            }
        }
        Ok(functions)
    }
}

async fn scan_directory(dir: &Path) -> Result<Vec<RegisteredFunction>, SourceError> {
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };

    let mut functions = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(io_err)?;

        if file_type.is_file() {
            if let Some(name) = entry_point_name(&path) {
                functions.push(RegisteredFunction::new(name, path));
            }
        } else if file_type.is_dir() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if let Some(entry_point) = find_nested_entry_point(&path, &name).await {
                functions.push(RegisteredFunction::new(name, entry_point));
            }
        }
    }
    Ok(functions)
}

fn entry_point_name(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if !SUPPORTED_EXTENSIONS.contains(&ext) {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

async fn find_nested_entry_point(dir: &Path, name: &str) -> Option<PathBuf> {
    for stem in ["index", name] {
        for ext in SUPPORTED_EXTENSIONS {
            let candidate = dir.join(format!("{stem}.{ext}"));
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
    }
    None
}

/// Functions bundled with the tool itself.
#[derive(Debug, Clone, Default)]
pub struct InternalFunctions {
    pub functions: Vec<RegisteredFunction>,
    pub declarations: Vec<FunctionDeclaration>,
    pub import_map: Option<PathBuf>,
    pub path: Option<PathBuf>,
}

/// Supplies internal functions.
#[async_trait]
pub trait InternalFunctionSupplier: Send + Sync {
    async fn internal_functions(&self) -> Result<InternalFunctions, SourceError>;
}

#[derive(Debug, Default, Deserialize)]
struct InternalManifest {
    #[serde(default)]
    functions: Vec<FunctionDeclaration>,
    #[serde(default)]
    import_map: Option<PathBuf>,
}

/// Internal functions read from a directory with an optional `manifest.json`
/// declaring their routes.
#[derive(Debug, Clone, Default)]
pub struct InternalDirectory {
    dir: Option<PathBuf>,
}

impl InternalDirectory {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl InternalFunctionSupplier for InternalDirectory {
    async fn internal_functions(&self) -> Result<InternalFunctions, SourceError> {
        let Some(dir) = &self.dir else {
            return Ok(InternalFunctions::default());
        };

        let mut functions = scan_directory(dir).await?;
        functions.sort_by(|a, b| a.name.cmp(&b.name));

        let manifest_path = dir.join(INTERNAL_MANIFEST);
        let manifest = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(content) => serde_json::from_str::<InternalManifest>(&content).map_err(|source| {
                SourceError::Json {
                    path: manifest_path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => InternalManifest::default(),
            Err(source) => {
                return Err(SourceError::Io {
                    path: manifest_path,
                    source,
                })
            }
        };

        Ok(InternalFunctions {
            functions,
            declarations: manifest.functions,
            import_map: manifest.import_map.map(|p| dir.join(p)),
            path: Some(dir.clone()),
        })
    }
}
