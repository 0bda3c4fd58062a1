//! Dynamic library boundary
//!
//! A plugin library is a `cdylib` that exports a [`PluginDeclaration`] with
//! [`export_plugin!`]. Loading checks the compiler and core versions the
//! library was built against before calling its registration function.
//!
//! ```ignore
//! fn register(registrar: &mut dyn PluginRegistrar) {
//!     registrar.register("fairness_metrics", Capability::Algorithm(Arc::new(Fairness)));
//! }
//!
//! verity_plugin::export_plugin!(register);
//! ```

use crate::capability::Capability;
use crate::error::{RegistryError, RegistryResult};
use libloading::Library;
use std::path::Path;
use std::sync::Arc;

/// Version of this crate, must match between host and plugin
pub static CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compiler the host was built with, must match between host and plugin
pub static RUSTC_VERSION: &str = env!("VERITY_RUSTC_VERSION");

/// Exported symbol name
pub const DECLARATION_SYMBOL: &[u8] = b"verity_plugin_declaration\0";

/// Receives the capabilities a library provides
pub trait PluginRegistrar {
    fn register(&mut self, id: &str, capability: Capability);
}

/// Static exported by every plugin library
#[derive(Clone, Copy)]
pub struct PluginDeclaration {
    pub rustc_version: &'static str,
    pub core_version: &'static str,
    pub register: fn(&mut dyn PluginRegistrar),
}

/// Export a registration function from a plugin library
#[macro_export]
macro_rules! export_plugin {
    ($register:expr) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static verity_plugin_declaration: $crate::loader::PluginDeclaration =
            $crate::loader::PluginDeclaration {
                rustc_version: $crate::loader::RUSTC_VERSION,
                core_version: $crate::loader::CORE_VERSION,
                register: $register,
            };
    };
}

#[derive(Default)]
struct CollectingRegistrar {
    capabilities: Vec<(String, Capability)>,
}

impl PluginRegistrar for CollectingRegistrar {
    fn register(&mut self, id: &str, capability: Capability) {
        self.capabilities.push((id.to_string(), capability));
    }
}

/// A loaded library and everything it registered.
///
/// The library must outlive every capability taken from it.
pub struct LoadedLibrary {
    pub library: Arc<Library>,
    pub capabilities: Vec<(String, Capability)>,
}

/// Load a plugin library and collect its capabilities
pub fn load_library(path: &Path) -> RegistryResult<LoadedLibrary> {
    let error = |reason: String| RegistryError::Library {
        path: path.to_path_buf(),
        reason,
    };

    // SAFETY: loading runs the library's initialisers. Plugin directories
    // are trusted configuration.
    let library = unsafe { Library::new(path) }.map_err(|e| error(e.to_string()))?;

    // SAFETY: the symbol is the static emitted by `export_plugin!`, its type
    // is only trusted after the version check below.
    let declaration = unsafe {
        library
            .get::<*const PluginDeclaration>(DECLARATION_SYMBOL)
            .map_err(|e| error(e.to_string()))?
            .read()
    };

    check_versions(&declaration).map_err(error)?;

    let mut registrar = CollectingRegistrar::default();
    (declaration.register)(&mut registrar);

    Ok(LoadedLibrary {
        library: Arc::new(library),
        capabilities: registrar.capabilities,
    })
}

fn check_versions(declaration: &PluginDeclaration) -> Result<(), String> {
    if declaration.rustc_version != RUSTC_VERSION {
        return Err(format!(
            "built with {}, host uses {}",
            declaration.rustc_version, RUSTC_VERSION
        ));
    }
    if declaration.core_version != CORE_VERSION {
        return Err(format!(
            "built against verity-plugin {}, host uses {}",
            declaration.core_version, CORE_VERSION
        ));
    }
    Ok(())
}
