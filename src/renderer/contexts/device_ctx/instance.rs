use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan 1.3 instance, with the validation layer and a log-forwarding messenger in debug builds
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    messenger: Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
}

impl RenderInstance {
    pub fn new(window: &Window) -> Result<Self> {
        let entry = ash::Entry::linked();
        let validation = cfg!(debug_assertions);

        let layers: &[&CStr] = if validation {
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            let available = available
                .iter()
                .map(|props| props.layer_name_as_c_str())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if let Some(missing) = missing_layers(&available, &[VALIDATION_LAYER]).first() {
                return Err(eyre!("Validation layer {missing:?} is not available"));
            }
            &[VALIDATION_LAYER]
        } else {
            &[]
        };

        let surface_exts = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw(),
        )?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect::<Vec<_>>();
        let extensions = instance_extensions(&surface_exts, validation);

        let instance = Self::create_instance(&entry, layers, &extensions, validation)?;
        log::info!(
            "Vulkan instance created (validation: {validation}, {} extensions)",
            extensions.len(),
        );

        let messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&messenger_info(), None)?
            };
            Some((messenger, loader))
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            messenger,
        })
    }

    pub fn create_surface(
        &self,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    fn create_instance(
        entry: &ash::Entry,
        layers: &[&CStr],
        extensions: &[&CStr],
        validation: bool,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"sunspire")
            .engine_name(c"sunspire")
            .api_version(vk::API_VERSION_1_3);
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        // Chained so that instance creation and destruction are validated too
        let mut creation_messenger = messenger_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);
        if validation {
            instance_info = instance_info.push_next(&mut creation_messenger);
        }
        #[cfg(target_os = "macos")]
        let instance_info = instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe { entry.create_instance(&instance_info, None)? })
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((messenger, loader)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Surface extensions plus debug utils when validating, and portability on macOS
fn instance_extensions<'a>(surface_exts: &[&'a CStr], validation: bool) -> Vec<&'a CStr> {
    let mut exts = surface_exts.to_vec();
    if validation {
        exts.push(ash::ext::debug_utils::NAME);
    }
    if cfg!(target_os = "macos") {
        exts.push(ash::khr::portability_enumeration::NAME);
        exts.push(ash::khr::get_physical_device_properties2::NAME);
    }
    exts
}

fn missing_layers<'a>(available: &[&CStr], required: &[&'a CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .filter(|layer| !available.contains(*layer))
        .copied()
        .collect()
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(forward_to_log))
}

fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

unsafe extern "system" fn forward_to_log(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        match callback_data.as_ref() {
            Some(data) if !data.p_message.is_null() => CStr::from_ptr(data.p_message),
            _ => return vk::FALSE,
        }
    };
    log::log!(
        target: "vulkan",
        log_level(severity),
        "[{message_type:?}] {}",
        message.to_string_lossy(),
    );
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_map_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(log_level(S::VERBOSE), log::Level::Trace);
        assert_eq!(log_level(S::INFO), log::Level::Info);
        assert_eq!(log_level(S::WARNING), log::Level::Warn);
        assert_eq!(log_level(S::ERROR | S::WARNING), log::Level::Error);
    }

    #[test]
    fn validation_adds_debug_utils() {
        let surface = [ash::khr::surface::NAME];
        assert!(!instance_extensions(&surface, false).contains(&ash::ext::debug_utils::NAME));

        let exts = instance_extensions(&surface, true);
        assert_eq!(exts[0], ash::khr::surface::NAME);
        assert!(exts.contains(&ash::ext::debug_utils::NAME));
    }

    #[test]
    fn reports_missing_layers() {
        let available = [c"VK_LAYER_LUNARG_monitor"];
        assert_eq!(missing_layers(&available, &[VALIDATION_LAYER]), vec![VALIDATION_LAYER]);
        assert!(missing_layers(&[VALIDATION_LAYER], &[VALIDATION_LAYER]).is_empty());
    }
}
