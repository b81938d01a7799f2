//! Module loaders
//!
//! Turns a path into a validated [`ModuleImage`] plus whatever keeps its code
//! mapped. [`DylibLoader`] opens dynamic libraries with `libloading`;
//! [`StaticLoader`] serves modules compiled into the host.

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::ffi::*;
use crate::generation::GenerationId;
use crate::module::{ModuleBacking, ModuleId, ModuleImage};
use libloading::{Library, Symbol};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single load, as seen by a loader
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    /// Path as given by the caller
    pub path: &'a Path,
    /// Generation the module will join
    pub generation: GenerationId,
    /// Id reserved for the module
    pub module: ModuleId,
}

/// Result of a successful load
#[derive(Debug)]
pub struct LoadedModule {
    /// Resolved path of the module
    pub path: PathBuf,
    pub image: ModuleImage,
    pub backing: ModuleBacking,
}

/// Source of module code
pub trait ModuleLoader: Send + Sync {
    /// Load and validate a module. Must not leave anything behind on error.
    fn load(&self, request: &LoadRequest<'_>) -> Result<LoadedModule, LoadError>;
}

impl<L: ModuleLoader + ?Sized> ModuleLoader for Arc<L> {
    fn load(&self, request: &LoadRequest<'_>) -> Result<LoadedModule, LoadError> {
        (**self).load(request)
    }
}

/// Removes a shadow copy unless kept
struct ShadowFile(Option<PathBuf>);

impl ShadowFile {
    fn keep(mut self) -> Option<PathBuf> {
        self.0.take()
    }
}

impl Drop for ShadowFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Loads modules from dynamic libraries
pub struct DylibLoader {
    config: LoaderConfig,
}

impl DylibLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    fn absolute(path: &Path) -> Result<PathBuf, LoadError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let cwd = std::env::current_dir().map_err(|e| LoadError::open(path, e.to_string()))?;
        Ok(cwd.join(path))
    }

    /// Copy the module so the original can be rebuilt, and so reloading the
    /// same path opens a fresh library instead of the still-resident one.
    fn shadow_copy(&self, path: &Path, request: &LoadRequest<'_>) -> Result<PathBuf, LoadError> {
        let dir = self.config.shadow_dir();
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("module");
        let mut file_name = format!(
            "{}-{}-{}-{}",
            stem,
            std::process::id(),
            request.generation,
            request.module
        );
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            file_name.push('.');
            file_name.push_str(ext);
        }
        let target = dir.join(file_name);

        std::fs::create_dir_all(&dir)
            .and_then(|()| std::fs::copy(path, &target))
            .map_err(|source| LoadError::ShadowCopy {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(target)
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<LoadedModule, LoadError> {
        let path = Self::absolute(request.path)?;
        if !path.is_file() {
            return Err(LoadError::NotFound { path });
        }

        let shadow = if self.config.shadow_copy {
            ShadowFile(Some(self.shadow_copy(&path, request)?))
        } else {
            ShadowFile(None)
        };
        let open_path = shadow.0.clone().unwrap_or_else(|| path.clone());

        // Declared after `shadow` so it is closed before the copy is removed.
        let library = unsafe { Library::new(&open_path) }
            .map_err(|e| LoadError::open(&path, e.to_string()))?;

        let descriptor_fn: ModuleDescriptorFn = unsafe {
            let symbol: Symbol<ModuleDescriptorFn> = library
                .get(MODULE_DESCRIPTOR_SYMBOL)
                .map_err(|_| LoadError::MissingDescriptor { path: path.clone() })?;
            *symbol
        };

        let fallback_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let image =
            unsafe { ModuleImage::from_descriptor(descriptor_fn(), &path, &fallback_name)? };

        log::info!(
            "Opened module '{}' v{} from {} ({} types)",
            image.name(),
            image.version(),
            path.display(),
            image.types().len()
        );

        Ok(LoadedModule {
            path,
            image,
            backing: ModuleBacking::Library {
                library,
                shadow: shadow.keep(),
            },
        })
    }
}

/// Serves module images registered by path, for code linked into the host
#[derive(Default)]
pub struct StaticLoader {
    images: RwLock<HashMap<PathBuf, ModuleImage>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` loadable under `path`, replacing any earlier image
    pub fn register(&self, path: impl Into<PathBuf>, image: ModuleImage) {
        self.images.write().insert(path.into(), image);
    }

    /// Builder-style [`StaticLoader::register`]
    pub fn with(self, path: impl Into<PathBuf>, image: ModuleImage) -> Self {
        self.register(path, image);
        self
    }

    /// Forget the image registered under `path`
    pub fn unregister(&self, path: impl AsRef<Path>) -> Option<ModuleImage> {
        self.images.write().remove(path.as_ref())
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<LoadedModule, LoadError> {
        let image = self
            .images
            .read()
            .get(request.path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                path: request.path.to_path_buf(),
            })?;

        Ok(LoadedModule {
            path: request.path.to_path_buf(),
            image,
            backing: ModuleBacking::Static,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request(path: &Path) -> LoadRequest<'_> {
        LoadRequest {
            path,
            generation: GenerationId(1),
            module: ModuleId(1),
        }
    }

    #[test]
    fn test_dylib_missing_file() {
        let loader = DylibLoader::default();
        let result = loader.load(&request(Path::new("/no/such/module.so")));
        assert!(matches!(result, Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_dylib_rejects_non_library_and_cleans_shadow() {
        let shadow_dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::Builder::new().suffix(".so").tempfile().unwrap();
        writeln!(file, "this is not a shared object").unwrap();

        let loader = DylibLoader::new(LoaderConfig {
            shadow_copy: true,
            shadow_dir: Some(shadow_dir.path().to_path_buf()),
        });
        let result = loader.load(&request(file.path()));
        assert!(matches!(result, Err(LoadError::Open { .. })));

        let leftovers = std::fs::read_dir(shadow_dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_static_loader() {
        let image = ModuleImage::builder("core").ty("Void.Core", |t| t).build().unwrap();
        let loader = StaticLoader::new().with("core", image);

        let loaded = loader.load(&request(Path::new("core"))).unwrap();
        assert_eq!(loaded.image.name(), "core");
        assert!(matches!(loaded.backing, ModuleBacking::Static));

        assert!(loader.unregister("core").is_some());
        assert!(matches!(
            loader.load(&request(Path::new("core"))),
            Err(LoadError::NotFound { .. })
        ));
    }
}
