// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::{ext::debug_utils, khr::surface, vk, Entry};
use lumen_render::RenderTarget;
use tracing::{debug, error, info, warn};

use crate::adapter::missing_extensions;
use crate::SetupError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"lumen";

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub app_name: String,
    /// Request the validation layer and forward its messages to `tracing`.
    pub validation: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            app_name: String::from("lumen"),
            validation: cfg!(debug_assertions),
        }
    }
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Loader entry, instance and the optional validation subscription.
///
/// Surfaces made through [`ApiContext::make_surface`] belong to the caller
/// and must be destroyed before the context drops.
pub struct ApiContext {
    entry: Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    debug: Option<DebugMessenger>,
}

impl ApiContext {
    pub fn new(target: &dyn RenderTarget, options: &ContextOptions) -> Result<Self, SetupError> {
        // SAFETY: the loaded library stays alive inside `Entry` for as long as
        // any object derived from it.
        let entry = unsafe { Entry::load()? };
        let display = target.display_handle()?.as_raw();

        let window_exts = ash_window::enumerate_required_extensions(display)
            .map_err(SetupError::InstanceCreationFailed)?;
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(SetupError::InstanceCreationFailed)?;
        let available: Vec<String> = available
            .iter()
            .map(|e| crate::adapter::cstr_lossy(e.extension_name_as_c_str()))
            .collect();

        let validation = options.validation && validation_available(&entry, &available);

        // SAFETY: ash-window hands out pointers to static NUL-terminated names.
        let mut required: Vec<&CStr> = window_exts
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        if validation {
            required.push(debug_utils::NAME);
        }
        let missing = missing_extensions(&required, available.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(SetupError::MissingInstanceExtensions(missing));
        }

        let app_name = CString::new(options.app_name.as_str())
            .unwrap_or_else(|_| ENGINE_NAME.to_owned());
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            p_engine_name: ENGINE_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let ext_ptrs: Vec<*const c_char> = required.iter().map(|n| n.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let mut messenger_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if validation {
            // Reports problems raised by vkCreateInstance/vkDestroyInstance too.
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(SetupError::InstanceCreationFailed)?;

        let debug = if validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
                Ok(handle) => Some(DebugMessenger { loader, handle }),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(SetupError::DebugMessengerFailed(e));
                }
            }
        } else {
            None
        };

        let surface_fn = surface::Instance::new(&entry, &instance);
        info!(
            "vulkan instance ready ({} extensions, validation={})",
            required.len(),
            validation
        );
        Ok(Self {
            entry,
            instance,
            surface_fn,
            debug,
        })
    }

    /// Creates a presentable surface for `target`.
    pub fn make_surface(&self, target: &dyn RenderTarget) -> Result<vk::SurfaceKHR, SetupError> {
        let display = target.display_handle()?.as_raw();
        let window = target.window_handle()?.as_raw();
        unsafe { ash_window::create_surface(&self.entry, &self.instance, display, window, None) }
            .map_err(SetupError::SurfaceCreationFailed)
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_fn(&self) -> &surface::Instance {
        &self.surface_fn
    }
}

impl Drop for ApiContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn validation_available(entry: &Entry, extensions: &[String]) -> bool {
    let has_layer = unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
        })
        .unwrap_or(false);
    if !has_layer {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        return false;
    }
    let has_ext = extensions
        .iter()
        .any(|e| e.as_bytes() == debug_utils::NAME.to_bytes());
    if !has_ext {
        warn!("validation requested but {:?} is unavailable", debug_utils::NAME);
    }
    has_ext
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Fixed-width tag printed in front of each validation message.
pub fn severity_tag(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        "ERR "
    } else if severity.contains(S::WARNING) {
        "WARN"
    } else if severity.contains(S::INFO) {
        "INFO"
    } else {
        "VERB"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let raw = unsafe { (*data).p_message };
    if raw.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(raw) }.to_string_lossy();
    let tag = severity_tag(severity);
    match tag {
        "ERR " => error!(target: "vulkan", "[{tag}] {msg}"),
        "WARN" => warn!(target: "vulkan", "[{tag}] {msg}"),
        "INFO" => info!(target: "vulkan", "[{tag}] {msg}"),
        _ => debug!(target: "vulkan", "[{tag}] {msg}"),
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;

    #[test]
    fn tags_follow_highest_severity() {
        assert_eq!(severity_tag(S::ERROR), "ERR ");
        assert_eq!(severity_tag(S::WARNING | S::INFO), "WARN");
        assert_eq!(severity_tag(S::INFO), "INFO");
        assert_eq!(severity_tag(S::VERBOSE), "VERB");
    }

    #[test]
    fn messenger_listens_to_every_severity() {
        let info = messenger_create_info();
        assert!(info
            .message_severity
            .contains(S::VERBOSE | S::INFO | S::WARNING | S::ERROR));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn callback_never_aborts() {
        let text = c"validation says hi";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: text.as_ptr(),
            ..Default::default()
        };
        let ret = unsafe {
            debug_callback(
                S::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
        let ret = unsafe {
            debug_callback(
                S::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }
}
