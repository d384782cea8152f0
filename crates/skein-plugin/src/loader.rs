//! Dynamic plugin loader.
//!
//! Loads plugins from shared libraries at runtime. The loader owns both
//! the library handle and the created instance; the handle must not be
//! closed until the plugin's `skein_destroy_plugin` has returned, so
//! teardown always runs destroy-then-close. Registry consumers address
//! loaded instances through the loader rather than holding their own
//! handles, which keeps every borrow inside the loader entry's lifetime.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, error, info, warn};

use skein_types::{Config, SkeinError};

use crate::abi::{
    CreatePluginFn, DestroyPluginFn, GetPluginInfoFn, LoadedPluginInfo, CREATE_PLUGIN_SYMBOL,
    DESTROY_PLUGIN_SYMBOL, GET_PLUGIN_INFO_SYMBOL,
};
use crate::plugin::Plugin;

/// A created plugin instance together with its destructor.
struct DynamicInstance {
    raw: *mut c_void,
    destroy: DestroyPluginFn,
}

// The raw pointer targets a `Box<dyn Plugin>` and `Plugin: Send + Sync`;
// the destroy function pointer is plain code.
unsafe impl Send for DynamicInstance {}
unsafe impl Sync for DynamicInstance {}

impl DynamicInstance {
    /// View the instance as a plugin.
    ///
    /// Valid while the owning [`LoadedPlugin`] is alive and not torn down.
    fn as_plugin(&self) -> &dyn Plugin {
        // SAFETY: `raw` was produced by `skein_create_plugin` as a leaked
        // `Box<Box<dyn Plugin>>` and is only invalidated in `teardown`,
        // which takes the instance out of the entry first.
        unsafe { (*(self.raw as *const Box<dyn Plugin>)).as_ref() }
    }
}

/// A plugin loaded from a shared library.
struct LoadedPlugin {
    path: PathBuf,
    info: LoadedPluginInfo,
    // Declaration order matters: `instance` is destroyed explicitly in
    // `teardown` before `library` is dropped (library close).
    instance: Option<DynamicInstance>,
    library: Option<Library>,
}

impl LoadedPlugin {
    /// Shut the instance down, destroy it, then close the library.
    fn teardown(&mut self) {
        if let Some(instance) = self.instance.take() {
            instance.as_plugin().shutdown();
            // SAFETY: `raw` came from this library's create function and
            // is destroyed exactly once; the library is still open here.
            unsafe { (instance.destroy)(instance.raw) };
        }
        self.library = None;
    }
}

impl Drop for LoadedPlugin {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Loader for shared-library plugins.
pub struct PluginLoader {
    plugins: Vec<LoadedPlugin>,
    name_index: HashMap<String, usize>,
    search_paths: Vec<PathBuf>,
    last_error: Option<String>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader {
    /// Loader with the default search paths.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            name_index: HashMap::new(),
            search_paths: vec![
                PathBuf::from("./plugins"),
                PathBuf::from("/usr/lib/skein/plugins"),
                PathBuf::from("/usr/local/lib/skein/plugins"),
            ],
            last_error: None,
        }
    }

    /// Prepend a search path (highest priority).
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.insert(0, path.into());
    }

    /// Current search paths in priority order.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Candidate file names tried for a bare plugin name.
    fn candidate_names(name: &str) -> Vec<String> {
        let ext = std::env::consts::DLL_EXTENSION;
        vec![
            name.to_string(),
            format!("{name}.{ext}"),
            format!("lib{name}.{ext}"),
            format!("skein_{name}.{ext}"),
            format!("libskein_{name}.{ext}"),
        ]
    }

    /// Resolve a bare plugin name to an existing file under the search
    /// paths, trying each candidate name in order.
    fn find_plugin(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.search_paths {
            for candidate in Self::candidate_names(name) {
                let path = dir.join(&candidate);
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        None
    }

    fn set_error(&mut self, error: String) {
        error!("{error}");
        self.last_error = Some(error);
    }

    /// Load a plugin from a path or bare name.
    ///
    /// Loading a plugin whose declared name is already present destroys
    /// the fresh instance, closes its library, and succeeds as a no-op.
    pub fn load(&mut self, path_or_name: &str) -> Result<(), SkeinError> {
        let given = Path::new(path_or_name);
        let full_path = if path_or_name.contains(std::path::MAIN_SEPARATOR) && given.is_file() {
            given.to_path_buf()
        } else {
            match self.find_plugin(path_or_name) {
                Some(p) => p,
                None => {
                    let reason = format!("plugin not found: {path_or_name}");
                    self.set_error(reason.clone());
                    return Err(SkeinError::Plugin {
                        plugin: path_or_name.into(),
                        reason,
                    });
                }
            }
        };

        let mut entry = match self.load_impl(&full_path) {
            Ok(entry) => entry,
            Err(reason) => {
                self.set_error(format!("{}: {reason}", full_path.display()));
                return Err(SkeinError::Plugin {
                    plugin: full_path.display().to_string(),
                    reason,
                });
            }
        };

        if self.name_index.contains_key(&entry.info.name) {
            warn!(plugin = %entry.info.name, "plugin already loaded, skipping");
            // Drop destroys the fresh instance and closes the library.
            entry.teardown();
            return Ok(());
        }

        info!(
            plugin = %entry.info.name,
            version = %entry.info.version,
            kind = %entry.info.kind,
            path = %entry.path.display(),
            "loaded plugin"
        );
        self.name_index
            .insert(entry.info.name.clone(), self.plugins.len());
        self.plugins.push(entry);
        Ok(())
    }

    /// Open the library, resolve the three exports, and create the instance.
    fn load_impl(&self, path: &Path) -> Result<LoadedPlugin, String> {
        // SAFETY: loading arbitrary shared libraries executes their
        // initializers; that is the point of a plugin loader. Symbol
        // signatures are fixed by the ABI contract in `abi`.
        let library =
            unsafe { Library::new(path) }.map_err(|e| format!("failed to open library: {e}"))?;

        let info = unsafe {
            let get_info: libloading::Symbol<GetPluginInfoFn> = library
                .get(GET_PLUGIN_INFO_SYMBOL)
                .map_err(|e| format!("missing skein_get_plugin_info: {e}"))?;
            LoadedPluginInfo::from_raw(&get_info())
        };

        let (raw, destroy) = unsafe {
            let create: libloading::Symbol<CreatePluginFn> = library
                .get(CREATE_PLUGIN_SYMBOL)
                .map_err(|e| format!("missing skein_create_plugin: {e}"))?;
            let destroy: libloading::Symbol<DestroyPluginFn> = library
                .get(DESTROY_PLUGIN_SYMBOL)
                .map_err(|e| format!("missing skein_destroy_plugin: {e}"))?;
            let raw = create();
            if raw.is_null() {
                return Err("create_plugin returned null".into());
            }
            (raw, *destroy)
        };

        Ok(LoadedPlugin {
            path: path.to_path_buf(),
            info,
            instance: Some(DynamicInstance { raw, destroy }),
            library: Some(library),
        })
    }

    /// Load every shared library in a directory. Returns how many loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> usize {
        let ext = std::env::consts::DLL_EXTENSION;
        let Ok(entries) = std::fs::read_dir(dir.as_ref()) else {
            return 0;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|x| x == ext).unwrap_or(false)
                    && !p
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(true)
            })
            .collect();
        paths.sort();

        let mut count = 0;
        for path in paths {
            if self.load(&path.to_string_lossy()).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Load plugins named in the config's `plugins` section: an ordered
    /// list of names, or an object keyed by name whose values may carry
    /// `{"enabled": bool}`. Entries that fail to load are logged and
    /// skipped. Returns how many loaded.
    pub fn load_from_config(&mut self, cfg: &Config) -> usize {
        let section = cfg.get_section("plugins").clone();
        let mut count = 0;

        if let Some(list) = section.as_array() {
            for item in list {
                if let Some(name) = item.as_str() {
                    if !name.is_empty() && self.load(name).is_ok() {
                        count += 1;
                    }
                }
            }
        } else if let Some(map) = section.as_object() {
            for (name, value) in map {
                let enabled = value
                    .get("enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if !enabled {
                    debug!(plugin = %name, "plugin disabled in config");
                    continue;
                }
                if self.load(name).is_ok() {
                    count += 1;
                }
            }
        }

        count
    }

    /// Unload a plugin by its declared name. Unknown names are a no-op.
    pub fn unload(&mut self, name: &str) {
        let Some(idx) = self.name_index.remove(name) else {
            return;
        };
        self.plugins[idx].teardown();
        info!(plugin = %name, "unloaded plugin");
    }

    /// Unload everything in reverse load order.
    pub fn unload_all(&mut self) {
        for entry in self.plugins.iter_mut().rev() {
            entry.teardown();
        }
        self.plugins.clear();
        self.name_index.clear();
    }

    /// Borrow a loaded plugin instance by name.
    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        let idx = *self.name_index.get(name)?;
        self.plugins[idx]
            .instance
            .as_ref()
            .map(DynamicInstance::as_plugin)
    }

    /// Whether a plugin with this name is currently loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    /// Metadata of every loaded plugin, in load order.
    pub fn loaded(&self) -> Vec<LoadedPluginInfo> {
        self.plugins
            .iter()
            .filter(|p| p.instance.is_some())
            .map(|p| p.info.clone())
            .collect()
    }

    /// Number of live plugin instances.
    pub fn len(&self) -> usize {
        self.name_index.len()
    }

    /// Whether no plugins are loaded.
    pub fn is_empty(&self) -> bool {
        self.name_index.is_empty()
    }

    /// Most recent load error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run every loaded plugin's `init`; failures are logged and counted
    /// into the aggregate result.
    pub fn init_all(&self, cfg: &Config) -> bool {
        let mut all_ok = true;
        for entry in &self.plugins {
            if let Some(instance) = &entry.instance {
                let plugin = instance.as_plugin();
                if let Err(e) = plugin.init(cfg) {
                    warn!(plugin = %plugin.name(), error = %e, "dynamic plugin init failed");
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        self.unload_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_names_cover_prefixes() {
        let names = PluginLoader::candidate_names("foo");
        let ext = std::env::consts::DLL_EXTENSION;
        assert_eq!(names[0], "foo");
        assert!(names.contains(&format!("foo.{ext}")));
        assert!(names.contains(&format!("libfoo.{ext}")));
        assert!(names.contains(&format!("skein_foo.{ext}")));
        assert!(names.contains(&format!("libskein_foo.{ext}")));
    }

    #[test]
    fn find_plugin_walks_search_paths_in_order() {
        let ext = std::env::consts::DLL_EXTENSION;
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join(format!("libfoo.{ext}")), b"x").unwrap();
        std::fs::write(first.path().join(format!("skein_foo.{ext}")), b"x").unwrap();

        let mut loader = PluginLoader::new();
        loader.add_search_path(second.path());
        loader.add_search_path(first.path()); // highest priority

        let found = loader.find_plugin("foo").unwrap();
        assert_eq!(found, first.path().join(format!("skein_foo.{ext}")));
    }

    #[test]
    fn find_plugin_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = PluginLoader::new();
        loader.search_paths = vec![dir.path().to_path_buf()];
        assert!(loader.find_plugin("ghost").is_none());

        let err = loader.load("ghost").unwrap_err();
        assert!(err.to_string().contains("plugin not found"));
        assert!(loader.last_error().unwrap().contains("ghost"));
    }

    #[test]
    fn load_rejects_non_library_file() {
        let ext = std::env::consts::DLL_EXTENSION;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("bogus.{ext}"));
        std::fs::write(&path, b"not a shared library").unwrap();

        let mut loader = PluginLoader::new();
        loader.search_paths = vec![dir.path().to_path_buf()];
        assert!(loader.load("bogus").is_err());
        assert!(loader.is_empty());
        assert!(loader.last_error().is_some());
    }

    #[test]
    fn load_from_config_array_and_object_shapes() {
        // No libraries exist, so nothing loads; the shapes must still be
        // traversed without error and disabled entries skipped.
        let dir = tempfile::tempdir().unwrap();
        let mut loader = PluginLoader::new();
        loader.search_paths = vec![dir.path().to_path_buf()];

        let cfg = Config::load_str(r#"{"plugins": ["a", "b"]}"#).unwrap();
        assert_eq!(loader.load_from_config(&cfg), 0);

        let cfg = Config::load_str(
            r#"{"plugins": {"a": {"enabled": false}, "b": {}, "c": {"enabled": true}}}"#,
        )
        .unwrap();
        assert_eq!(loader.load_from_config(&cfg), 0);
    }

    #[test]
    fn unload_unknown_is_noop() {
        let mut loader = PluginLoader::new();
        loader.unload("nope");
        loader.unload_all();
        assert!(loader.is_empty());
        assert!(loader.loaded().is_empty());
    }
}
