use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, RwLock};

use libloading::Library;

use crate::clients::{Client, ClientInner};
use crate::values::NamedValue;
use crate::{Api, Error, invoke_pjrt_api_error_fn};
use self::ffi::*;

/// Name of the environment variable holding the colon-separated plugin search path. Empty
/// segments are dropped. When unset, a platform-conventional default path is searched.
pub const PLUGIN_SEARCH_PATH_ENV: &str = "PJRT_PLUGIN_LIBRARY_PATH";

/// Name of the symbol every PJRT plugin exports to hand out its API vtable.
const GET_PJRT_API_SYMBOL: &[u8] = b"GetPjrtApi";

/// A loaded PJRT plugin: a dynamic-library handle plus its cached API vtable. Plugins are
/// loaded at most once per process (cached globally by name) and shared by every client
/// created from them; they stay alive until [`free_all`].
#[derive(Debug)]
pub struct Plugin {
    name: String,
    path: PathBuf,
    api: Api,
    /// Keeps the shared library mapped for as long as the plugin lives.
    _library: Library,
    /// Guards the one-time `PJRT_Plugin_Initialize` call.
    initialization: Once,
    /// Clients created from this plugin, released by [`free_all`] before the plugin itself.
    pub(crate) clients: Mutex<Vec<std::sync::Weak<ClientInner>>>,
}

impl Plugin {
    /// Name this plugin was resolved under (e.g. `cpu`, `cuda`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the shared library backing this plugin.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PJRT API version reported by the plugin.
    pub fn version(&self) -> crate::Version {
        self.api().version()
    }

    pub(crate) fn api(&self) -> Api {
        self.initialization.call_once(|| {
            let result = invoke_pjrt_api_error_fn!(self.api, PJRT_Plugin_Initialize);
            if let Err(error) = result {
                tracing::warn!(plugin = %self.name, %error, "PJRT plugin initialization failed");
            }
        });
        self.api
    }

    /// Creates a new [`Client`] on this plugin. `options` is a mapping of plugin-recognized
    /// keys; unknown keys are passed through to the plugin unmodified.
    pub fn client(self: &Arc<Self>, options: &[NamedValue]) -> Result<Client, Error> {
        let client = Client::create(self.api(), options)?;
        self.clients.lock().unwrap().push(Arc::downgrade(client.inner()));
        Ok(client)
    }

    fn load(name: String, path: PathBuf) -> Result<Self, Error> {
        tracing::debug!(plugin = %name, path = %path.display(), "loading PJRT plugin");
        let library = unsafe { Library::new(&path) }
            .map_err(|error| Error::plugin_load(path.display().to_string(), error.to_string()))?;
        let get_pjrt_api = unsafe {
            library
                .get::<unsafe extern "C" fn() -> *const crate::ffi::PJRT_Api>(GET_PJRT_API_SYMBOL)
                .map_err(|error| Error::plugin_load(path.display().to_string(), error.to_string()))?
        };
        let handle = unsafe { get_pjrt_api() };
        if handle.is_null() {
            return Err(Error::plugin_load(
                path.display().to_string(),
                "the plugin's GetPjrtApi returned a null API table",
            ));
        }
        let api = unsafe { Api::from_c_api(handle) }?;
        Ok(Self {
            name,
            path,
            api,
            _library: library,
            initialization: Once::new(),
            clients: Mutex::new(Vec::new()),
        })
    }
}

unsafe impl Send for Plugin {}
unsafe impl Sync for Plugin {}

/// Process-global table of loaded plugins, keyed by name. Loading is serialized by the write
/// lock; cache hits take only the read lock.
static LOADED_PLUGINS: RwLock<Option<HashMap<String, Arc<Plugin>>>> = RwLock::new(None);

/// Splits a `PJRT_PLUGIN_LIBRARY_PATH`-style value into its non-empty segments.
fn split_search_paths(value: &str) -> Vec<PathBuf> {
    value.split(':').filter(|segment| !segment.is_empty()).map(PathBuf::from).collect()
}

/// Directories searched for plugin libraries, in priority order.
fn plugin_search_paths() -> Vec<PathBuf> {
    if let Ok(value) = std::env::var(PLUGIN_SEARCH_PATH_ENV) {
        return split_search_paths(&value);
    }
    let mut paths = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(home).join(".local/lib/sable"));
    }
    paths.push(PathBuf::from("/usr/local/lib/sable"));
    let dynamic_loader_env = if cfg!(target_os = "macos") { "DYLD_LIBRARY_PATH" } else { "LD_LIBRARY_PATH" };
    if let Ok(value) = std::env::var(dynamic_loader_env) {
        paths.extend(split_search_paths(&value));
    }
    paths.push(PathBuf::from("/usr/local/lib"));
    paths.push(PathBuf::from("/usr/lib"));
    paths
}

/// Extracts the plugin name from a library filename matching one of the recognized patterns
/// (`pjrt_c_api_<name>_plugin.<ext>` or `pjrt[-_]plugin[-_]<name>.<ext>` with extension `so`,
/// `dylib`, or `dll`), or [`None`] when the filename is not a plugin.
pub(crate) fn path_to_plugin_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = ["so", "dylib", "dll"].iter().find_map(|extension| {
        file_name.strip_suffix(&format!(".{extension}"))
    })?;
    if let Some(name) = stem.strip_prefix("pjrt_c_api_").and_then(|rest| rest.strip_suffix("_plugin")) {
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    for prefix in ["pjrt_plugin_", "pjrt-plugin-", "pjrt_plugin-", "pjrt-plugin_"] {
        if let Some(name) = stem.strip_prefix(prefix) {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Searches the plugin directories and returns a mapping from plugin name to the absolute path
/// of its shared library. Already-loaded plugins are included; when several directories hold a
/// plugin with the same name, the first directory in search order wins.
pub fn available_plugins() -> HashMap<String, PathBuf> {
    let mut plugins = HashMap::new();
    if let Some(loaded) = LOADED_PLUGINS.read().unwrap().as_ref() {
        for (name, plugin) in loaded {
            plugins.insert(name.clone(), plugin.path().to_path_buf());
        }
    }
    for directory in plugin_search_paths() {
        let Ok(entries) = std::fs::read_dir(&directory) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path_to_plugin_name(&path) {
                plugins.entry(name).or_insert(path);
            }
        }
    }
    plugins
}

/// Loads the PJRT plugin identified by `name_or_path` and returns the shared handle.
///
/// Absolute paths are loaded directly; relative names are resolved by walking the search path
/// in order and taking the first matching library. Repeated calls with the same name are
/// idempotent and return the cached plugin.
pub fn get_plugin<N: AsRef<str>>(name_or_path: N) -> Result<Arc<Plugin>, Error> {
    let name_or_path = name_or_path.as_ref();

    // Fast path: already loaded.
    if let Some(loaded) = LOADED_PLUGINS.read().unwrap().as_ref() {
        if let Some(plugin) = loaded.get(name_or_path) {
            return Ok(plugin.clone());
        }
        if Path::new(name_or_path).is_absolute() {
            for plugin in loaded.values() {
                if plugin.path() == Path::new(name_or_path) {
                    return Ok(plugin.clone());
                }
            }
        }
    }

    let mut table = LOADED_PLUGINS.write().unwrap();
    let loaded = table.get_or_insert_with(HashMap::new);
    if let Some(plugin) = loaded.get(name_or_path) {
        return Ok(plugin.clone());
    }

    let (cache_key, name, path) = if Path::new(name_or_path).is_absolute() {
        let path = PathBuf::from(name_or_path);
        let name = path_to_plugin_name(&path).unwrap_or_else(|| name_or_path.to_string());
        (name_or_path.to_string(), name, path)
    } else {
        let searched = plugin_search_paths();
        let path = searched
            .iter()
            .find_map(|directory| {
                let Ok(entries) = std::fs::read_dir(directory) else {
                    return None;
                };
                entries.flatten().map(|entry| entry.path()).find(|path| {
                    path_to_plugin_name(path).as_deref() == Some(name_or_path)
                })
            })
            .ok_or_else(|| {
                Error::plugin_not_found(
                    name_or_path,
                    searched.iter().map(|path| path.display().to_string()).collect(),
                )
            })?;
        (name_or_path.to_string(), name_or_path.to_string(), path)
    };

    let plugin = Arc::new(Plugin::load(name, path)?);
    loaded.insert(cache_key, plugin.clone());
    Ok(plugin)
}

/// Destroys every registered plugin after destroying the clients it still tracks. Buffers and
/// executables should already be destroyed; this is only safe as the final teardown step of a
/// process that is done with PJRT.
pub fn free_all() {
    let mut table = LOADED_PLUGINS.write().unwrap();
    if let Some(loaded) = table.take() {
        for (name, plugin) in loaded {
            let clients = std::mem::take(&mut *plugin.clients.lock().unwrap());
            for client in clients {
                if let Some(client) = client.upgrade() {
                    client.destroy();
                }
            }
            tracing::debug!(plugin = %name, "released PJRT plugin");
        }
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use crate::errors::ffi::PJRT_Error;
    use crate::ffi::PJRT_Extension_Base;

    #[repr(C)]
    pub struct PJRT_Plugin_Initialize_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
    }

    impl PJRT_Plugin_Initialize_Args {
        pub fn new() -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut() }
        }
    }

    pub type PJRT_Plugin_Initialize = unsafe extern "C" fn(args: *mut PJRT_Plugin_Initialize_Args) -> *mut PJRT_Error;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_plugin_name() {
        let cases = [
            ("/usr/local/lib/sable/pjrt_c_api_cpu_plugin.so", Some("cpu")),
            ("/opt/pjrt_c_api_cuda12_plugin.dylib", Some("cuda12")),
            ("pjrt_c_api_tpu_plugin.dll", Some("tpu")),
            ("/lib/pjrt-plugin-metal.so", Some("metal")),
            ("/lib/pjrt_plugin_rocm.so", Some("rocm")),
            ("/lib/pjrt_plugin_rocm.txt", None),
            ("/lib/libfoo.so", None),
            ("/lib/pjrt_c_api__plugin.so", None),
        ];
        for (path, want) in cases {
            assert_eq!(
                path_to_plugin_name(Path::new(path)).as_deref(),
                want,
                "unexpected name for {path}"
            );
        }
    }

    #[test]
    fn test_split_search_paths_drops_empty_segments() {
        let paths = split_search_paths("/a::/b:");
        assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(split_search_paths("").is_empty());
    }

    #[test]
    fn test_get_plugin_not_found() {
        let error = get_plugin("definitely_not_a_real_plugin").unwrap_err();
        assert!(matches!(error, Error::PluginNotFound { ref name, .. } if name == "definitely_not_a_real_plugin"));
    }
}
