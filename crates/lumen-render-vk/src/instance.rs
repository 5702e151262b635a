// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};
use std::fmt;
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ResourceKind, VkError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    surface_loader: surface::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.raw.handle())
            .field("validation", &self.debug.is_some())
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Loads libvulkan and creates an instance carrying the window system's
    /// surface extensions. With `validation`, the Khronos validation layer
    /// must be installed; its messages are forwarded to `tracing`.
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        validation: bool,
    ) -> Result<Arc<Self>, VkError> {
        // SAFETY: the loaded library is kept alive by `entry` for as long as
        // any object derived from it.
        let entry = unsafe { Entry::load() }?;

        let app = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: c"lumen".as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_2,
            ..Default::default()
        };

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display)?.to_vec();
        // SAFETY: plain query on a loaded entry
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        for &ext in &extensions {
            // SAFETY: ash_window returns pointers to static NUL-terminated names
            let name = unsafe { CStr::from_ptr(ext) };
            if !available
                .iter()
                .any(|p| p.extension_name_as_c_str().is_ok_and(|n| n == name))
            {
                return Err(VkError::MissingExtension(name.to_string_lossy().into_owned()));
            }
        }

        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            // SAFETY: plain query on a loaded entry
            let installed = unsafe { entry.enumerate_instance_layer_properties() }?;
            let found = installed
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
            if !found {
                return Err(VkError::MissingLayer(
                    VALIDATION_LAYER.to_string_lossy().into_owned(),
                ));
            }
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        // SAFETY: every pointer in create_info outlives this call
        let raw = unsafe { entry.create_instance(&create_info, None) }
            .creating(ResourceKind::Instance)?;

        let debug = if validation {
            let loader = debug_utils::Instance::new(&entry, &raw);
            // SAFETY: loader was created from this instance
            match unsafe { create_debug_messenger(&loader) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    // SAFETY: nothing else was created from `raw` yet
                    unsafe { raw.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &raw);
        let validation = debug.is_some();
        info!("vk: instance created (app={app_name}, validation={validation})");

        Ok(Arc::new(Self {
            entry,
            raw,
            surface_loader,
            debug,
        }))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        debug!("vk: dropping instance {:?}", self.raw.handle());
        if let Some((loader, messenger)) = self.debug.take() {
            // SAFETY: last use of the messenger, created from this instance
            unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
        }
        // SAFETY: every derived object holds an Arc to us and is gone by now
        unsafe { self.raw.destroy_instance(None) };
    }
}

unsafe fn create_debug_messenger(
    loader: &debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, VkError> {
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
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
    };
    // SAFETY: caller guarantees loader belongs to a live instance
    unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .creating(ResourceKind::DebugMessenger)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for this call
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}
