//! C ABI for dynamically loaded plugins.
//!
//! A plugin shared library exports three C-linkage symbols:
//!
//! - `skein_get_plugin_info() -> PluginInfo`
//! - `skein_create_plugin() -> *mut c_void`
//! - `skein_destroy_plugin(*mut c_void)`
//!
//! The instance pointer convention is a leaked `Box<Box<dyn Plugin>>`;
//! host and plugin must be built with the same toolchain. The
//! [`declare_plugin!`] macro generates conforming exports for plugin
//! authors.

use std::ffi::{c_char, c_void, CStr};

/// Plugin metadata returned by `skein_get_plugin_info`.
///
/// All strings are NUL-terminated and must remain valid for the lifetime
/// of the library (static storage in practice).
#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    /// One of `"channel"`, `"tool"`, `"ai"`.
    pub kind: *const c_char,
}

/// `skein_get_plugin_info` signature.
pub type GetPluginInfoFn = unsafe extern "C" fn() -> PluginInfo;

/// `skein_create_plugin` signature. Returns a leaked `Box<Box<dyn Plugin>>`.
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut c_void;

/// `skein_destroy_plugin` signature. Consumes the instance pointer.
pub type DestroyPluginFn = unsafe extern "C" fn(*mut c_void);

/// Symbol name for [`GetPluginInfoFn`].
pub const GET_PLUGIN_INFO_SYMBOL: &[u8] = b"skein_get_plugin_info\0";
/// Symbol name for [`CreatePluginFn`].
pub const CREATE_PLUGIN_SYMBOL: &[u8] = b"skein_create_plugin\0";
/// Symbol name for [`DestroyPluginFn`].
pub const DESTROY_PLUGIN_SYMBOL: &[u8] = b"skein_destroy_plugin\0";

/// Owned copy of a [`PluginInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub kind: String,
}

impl LoadedPluginInfo {
    /// Copy a raw [`PluginInfo`] into owned strings.
    ///
    /// # Safety
    ///
    /// Every non-null pointer in `info` must point to a valid
    /// NUL-terminated string.
    pub unsafe fn from_raw(info: &PluginInfo) -> Self {
        unsafe fn copy(ptr: *const c_char) -> String {
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
        Self {
            name: copy(info.name),
            version: copy(info.version),
            description: copy(info.description),
            kind: copy(info.kind),
        }
    }
}

/// Generate the three C-ABI exports for a plugin crate.
///
/// ```rust,ignore
/// skein_plugin::declare_plugin!(
///     MyChannel,
///     MyChannel::new,
///     "my-channel",
///     "0.1.0",
///     "Example channel plugin",
///     "channel"
/// );
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($ty:ty, $ctor:path, $name:literal, $version:literal, $desc:literal, $kind:literal) => {
        #[no_mangle]
        pub extern "C" fn skein_get_plugin_info() -> $crate::abi::PluginInfo {
            $crate::abi::PluginInfo {
                name: concat!($name, "\0").as_ptr() as *const std::ffi::c_char,
                version: concat!($version, "\0").as_ptr() as *const std::ffi::c_char,
                description: concat!($desc, "\0").as_ptr() as *const std::ffi::c_char,
                kind: concat!($kind, "\0").as_ptr() as *const std::ffi::c_char,
            }
        }

        #[no_mangle]
        pub extern "C" fn skein_create_plugin() -> *mut std::ffi::c_void {
            let plugin: Box<dyn $crate::Plugin> = Box::new($ctor());
            Box::into_raw(Box::new(plugin)) as *mut std::ffi::c_void
        }

        /// # Safety
        ///
        /// `ptr` must be a pointer previously returned by
        /// `skein_create_plugin` that has not already been destroyed.
        #[no_mangle]
        pub unsafe extern "C" fn skein_destroy_plugin(ptr: *mut std::ffi::c_void) {
            if !ptr.is_null() {
                drop(Box::from_raw(ptr as *mut Box<dyn $crate::Plugin>));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_info_from_raw() {
        let name = c"demo";
        let version = c"1.2.3";
        let info = PluginInfo {
            name: name.as_ptr(),
            version: version.as_ptr(),
            description: std::ptr::null(),
            kind: c"tool".as_ptr(),
        };
        let owned = unsafe { LoadedPluginInfo::from_raw(&info) };
        assert_eq!(owned.name, "demo");
        assert_eq!(owned.version, "1.2.3");
        assert_eq!(owned.description, "");
        assert_eq!(owned.kind, "tool");
    }

    #[test]
    fn symbol_names_are_nul_terminated() {
        assert_eq!(GET_PLUGIN_INFO_SYMBOL.last(), Some(&0));
        assert_eq!(CREATE_PLUGIN_SYMBOL.last(), Some(&0));
        assert_eq!(DESTROY_PLUGIN_SYMBOL.last(), Some(&0));
    }
}
