//! Transport plugin discovery: binds each URI scheme to its factory.
//!
//! Enumerates candidates, invokes each one's entry point with the local node
//! id and the lifecycle callbacks, merges the returned `scheme -> factory`
//! maps (later entry wins, logged), and isolates failures so one bad plugin
//! never blocks the rest.
//!
//! The default, always-compiled path is a static registration table handed
//! in by the caller. Behind the `dynamic-plugins` feature, a plugin root can
//! instead be scanned for dynamic libraries: library files directly under
//! the root whose file stem does not begin with `_`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::identity::NodeIdentity;
use crate::manager::PluginCallbacks;
use crate::transport::TransportFactory;

/// One statically-linked plugin: a name (for logging) and its `register` entry point.
pub struct StaticPlugin {
    pub name: &'static str,
    pub constructor: PluginConstructor,
}

/// A plugin's `register` entry point: local node id, lifecycle callbacks,
/// desired schemes and formats in, `scheme -> factory` map out. Failures are
/// reported as `Err(reason)`, never by panicking.
pub type PluginConstructor = fn(
    NodeIdentity,
    PluginCallbacks,
    &[String],
    &[String],
) -> Result<HashMap<String, Arc<dyn TransportFactory>>, String>;

pub struct PluginRegistry;

impl PluginRegistry {
    /// Registers every plugin in `plugins` against `schemes`/`formats`,
    /// merging their contributed factories. A later entry wins on scheme
    /// collision, logged at `warn`. A failing plugin is logged and skipped —
    /// it never prevents the others from registering.
    pub fn register_static(
        plugins: &[StaticPlugin],
        local_id: &NodeIdentity,
        callbacks: &PluginCallbacks,
        schemes: &[String],
        formats: &[String],
    ) -> HashMap<String, Arc<dyn TransportFactory>> {
        let mut transports = HashMap::new();
        for plugin in plugins {
            match (plugin.constructor)(local_id.clone(), callbacks.clone(), schemes, formats) {
                Ok(contributed) => {
                    tracing::debug!(plugin = plugin.name, schemes = contributed.len(), "registered transport plugin");
                    for (scheme, factory) in contributed {
                        if transports.contains_key(&scheme) {
                            tracing::warn!(plugin = plugin.name, scheme, "scheme already bound, overriding with later plugin");
                        }
                        transports.insert(scheme, factory);
                    }
                }
                Err(reason) => {
                    tracing::warn!(plugin = plugin.name, reason, "plugin failed to register, skipping");
                }
            }
        }
        transports
    }
}

#[cfg(feature = "dynamic-plugins")]
pub use dynamic::register_dynamic;

#[cfg(feature = "dynamic-plugins")]
mod dynamic {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::path::Path;
    use std::sync::Arc;

    use libloading::{Library, Symbol};

    use crate::error::Error;
    use crate::identity::NodeIdentity;
    use crate::manager::PluginCallbacks;
    use crate::transport::TransportFactory;

    /// Signature a plugin dynamic library must export under the symbol name
    /// `register`. Crossing this boundary assumes the plugin was built
    /// against the exact same crate version — the same caveat any Rust
    /// (not C-ABI) dynamic plugin loader carries.
    type RawRegisterFn = unsafe fn(
        NodeIdentity,
        PluginCallbacks,
        &[String],
        &[String],
    ) -> Result<HashMap<String, Arc<dyn TransportFactory>>, String>;

    /// Scans `plugin_root` for dynamic libraries whose file stem does not
    /// start with `_`, loads each, and calls its `register` symbol. One
    /// plugin failing to load or register never stops the others.
    pub fn register_dynamic(
        plugin_root: &Path,
        local_id: &NodeIdentity,
        callbacks: &PluginCallbacks,
        schemes: &[String],
        formats: &[String],
    ) -> Result<HashMap<String, Arc<dyn TransportFactory>>, Error> {
        let mut transports = HashMap::new();

        let entries = std::fs::read_dir(plugin_root).map_err(|err| Error::PluginRegisterError {
            plugin: plugin_root.display().to_string(),
            reason: err.to_string(),
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
            if stem.starts_with('_') {
                continue;
            }

            match load_one(&path, local_id, callbacks, schemes, formats) {
                Ok(contributed) => {
                    for (scheme, factory) in contributed {
                        if transports.contains_key(&scheme) {
                            tracing::warn!(plugin = %path.display(), scheme, "scheme already bound, overriding with later plugin");
                        }
                        transports.insert(scheme, factory);
                    }
                }
                Err(reason) => {
                    tracing::warn!(plugin = %path.display(), reason = %reason, "dynamic plugin failed to register, skipping");
                }
            }
        }

        Ok(transports)
    }

    fn load_one(
        path: &Path,
        local_id: &NodeIdentity,
        callbacks: &PluginCallbacks,
        schemes: &[String],
        formats: &[String],
    ) -> Result<HashMap<String, Arc<dyn TransportFactory>>, String> {
        // Safety: the plugin is trusted to export `register` with the exact
        // `RawRegisterFn` signature and to have been built against this
        // crate's ABI. A mismatch is undefined behavior, same as any other
        // Rust dynamic plugin loader (not a C-ABI boundary).
        unsafe {
            let library = Library::new(path).map_err(|err| err.to_string())?;
            let register: Symbol<RawRegisterFn> = library.get(b"register").map_err(|err| err.to_string())?;
            let result = register(local_id.clone(), callbacks.clone(), schemes, formats);
            // Leak the library: plugin factories hold function pointers into
            // it for the remaining lifetime of the process.
            std::mem::forget(library);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::LinkManager;
    use crate::mock::MockTransportFactory;

    fn callbacks() -> PluginCallbacks {
        LinkManager::spawn(NodeIdentity::from("local"), None).callbacks()
    }

    #[tokio::test]
    async fn isolates_a_failing_plugin_from_a_good_one() {
        let good: PluginConstructor = |_local, _callbacks, _schemes, _formats| {
            let mut map: HashMap<String, Arc<dyn TransportFactory>> = HashMap::new();
            map.insert("tcp".into(), MockTransportFactory::new());
            Ok(map)
        };
        let bad: PluginConstructor = |_local, _callbacks, _schemes, _formats| Err("boom".into());

        let plugins = [
            StaticPlugin { name: "bad", constructor: bad },
            StaticPlugin { name: "good", constructor: good },
        ];

        let transports = PluginRegistry::register_static(
            &plugins,
            &NodeIdentity::from("local"),
            &callbacks(),
            &["tcp".into()],
            &["json".into()],
        );

        assert!(transports.contains_key("tcp"));
        assert_eq!(transports.len(), 1);
    }

    #[tokio::test]
    async fn later_plugin_wins_on_scheme_collision() {
        let factory_a: PluginConstructor = |_l, _c, _s, _f| {
            let mut map: HashMap<String, Arc<dyn TransportFactory>> = HashMap::new();
            map.insert("tcp".into(), MockTransportFactory::new());
            Ok(map)
        };
        let factory_b = factory_a;

        let plugins = [
            StaticPlugin { name: "a", constructor: factory_a },
            StaticPlugin { name: "b", constructor: factory_b },
        ];

        let transports = PluginRegistry::register_static(
            &plugins,
            &NodeIdentity::from("local"),
            &callbacks(),
            &["tcp".into()],
            &[],
        );
        assert_eq!(transports.len(), 1);
    }
}
