// Device context
//
// Owns the instance, debug messenger, window surface, physical device choice,
// logical device and its graphics/present queues. Created once and destroyed
// last: every other wrapper holds an Arc to it.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Layers and extensions the device context is created with.
///
/// Built explicitly by the caller instead of living in process-wide lists.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub app_name: String,
    pub validation_layers: Vec<CString>,
    pub instance_extensions: Vec<CString>,
    pub device_extensions: Vec<CString>,
}

impl DeviceConfig {
    /// Configuration for presenting to a window on `display`.
    pub fn for_display(
        app_name: &str,
        enable_validation: bool,
        display: RawDisplayHandle,
    ) -> Result<Self> {
        let required = ash_window::enumerate_required_extensions(display)
            .context("Window system has no Vulkan surface support")?;

        let mut instance_extensions: Vec<CString> = required
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_owned())
            .collect();

        let mut validation_layers = Vec::new();
        if enable_validation {
            instance_extensions.push(ash::extensions::ext::DebugUtils::name().to_owned());
            validation_layers.push(VALIDATION_LAYER.to_owned());
        }

        Ok(Self {
            app_name: app_name.to_string(),
            validation_layers,
            instance_extensions,
            device_extensions: vec![ash::extensions::khr::Swapchain::name().to_owned()],
        })
    }

    fn validation_enabled(&self) -> bool {
        !self.validation_layers.is_empty()
    }
}

/// Queue family indices. Graphics and present may be the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Window surface (owned here so it outlives every swapchain)
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create the device context for rendering into `window`.
    pub fn new(config: &DeviceConfig, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", config.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        // Until the logical device exists, each guard below destroys its
        // object on an early return (in reverse creation order).
        let instance = Self::create_instance(&entry, config)?;
        let instance_guard = {
            let instance = instance.clone();
            OnFailure::new(move || unsafe { instance.destroy_instance(None) })
        };

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if config.validation_enabled() {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };
        let messenger_guard = debug_utils.clone().map(|(loader, messenger)| {
            OnFailure::new(move || unsafe { loader.destroy_debug_utils_messenger(messenger, None) })
        });

        // Step 4: Window surface
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface_guard = {
            let loader = surface_loader.clone();
            OnFailure::new(move || unsafe { loader.destroy_surface(surface, None) })
        };

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface, config)?;

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, queue_families, config)?;
        surface_guard.disarm();
        if let Some(guard) = messenger_guard {
            guard.disarm();
        }
        instance_guard.disarm();

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            graphics_queue,
            present_queue,
            queue_families,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn create_instance(entry: &Entry, config: &DeviceConfig) -> Result<ash::Instance> {
        let app_name = CString::new(config.app_name.as_str())?;
        let engine_name = CString::new("textured-mesh-renderer")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions: Vec<*const c_char> =
            config.instance_extensions.iter().map(|e| e.as_ptr()).collect();
        let layers: Vec<*const c_char> =
            config.validation_layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        config: &DeviceConfig,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            if features.sampler_anisotropy != vk::TRUE {
                continue;
            }
            if !Self::supports_extensions(instance, device, &config.device_extensions)? {
                continue;
            }

            let Some(families) = Self::find_queue_families(instance, surface_loader, surface, device)?
            else {
                continue;
            };

            let score = rate_device_type(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn supports_extensions(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        required: &[CString],
    ) -> Result<bool> {
        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        Ok(has_extensions(&available, required))
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let has_present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }?;

            // A family that does both wins outright
            if has_graphics && has_present {
                return Ok(Some(QueueFamilies { graphics: index, present: index }));
            }
            if has_graphics && graphics.is_none() {
                graphics = Some(index);
            }
            if has_present && present.is_none() {
                present = Some(index);
            }
        }

        Ok(graphics.zip(present).map(|(graphics, present)| QueueFamilies { graphics, present }))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
        config: &DeviceConfig,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> =
            config.device_extensions.iter().map(|e| e.as_ptr()).collect();
        let layers: Vec<*const c_char> =
            config.validation_layers.iter().map(|l| l.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }
}

/// Simple device ranking: discrete beats integrated beats everything else.
pub fn rate_device_type(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Every `required` name appears in `available`
pub fn has_extensions(available: &[vk::ExtensionProperties], required: &[CString]) -> bool {
    required.iter().all(|name| {
        available.iter().any(|ext| {
            let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            ext_name == name.as_c_str()
        })
    })
}

/// Runs `cleanup` when dropped, unless disarmed first
struct OnFailure<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> OnFailure<F> {
    fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for OnFailure<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Routes validation messages into `log`, keyed by severity
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let level = match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        _ => log::Level::Debug,
    };

    if !data.is_null() && !(*data).p_message.is_null() {
        let message = CStr::from_ptr((*data).p_message);
        log::log!(level, "[Vulkan {:?}] {}", kind, message.to_string_lossy());
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_creates_one_queue() {
        let families = QueueFamilies { graphics: 2, present: 2 };
        assert!(families.is_shared());
        assert_eq!(families.unique(), vec![2]);
    }

    #[test]
    fn split_families_create_two_queues() {
        let families = QueueFamilies { graphics: 3, present: 0 };
        assert!(!families.is_shared());
        assert_eq!(families.unique(), vec![0, 3]);
    }

    #[test]
    fn discrete_gpu_outranks_integrated() {
        assert!(
            rate_device_type(vk::PhysicalDeviceType::DISCRETE_GPU)
                > rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > rate_device_type(vk::PhysicalDeviceType::CPU)
        );
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.as_bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn device_must_expose_every_required_extension() {
        let available = [extension("VK_KHR_swapchain"), extension("VK_KHR_maintenance1")];
        let swapchain = vec![ash::extensions::khr::Swapchain::name().to_owned()];
        assert!(has_extensions(&available, &swapchain));
        assert!(has_extensions(&available, &[]));

        let missing = vec![CString::new("VK_KHR_swapchain_mutable_format").unwrap()];
        assert!(!has_extensions(&available, &missing));
        assert!(!has_extensions(&[], &swapchain));
    }

    #[test]
    fn early_return_unwinds_in_reverse_creation_order() {
        use std::cell::RefCell;

        let destroyed = RefCell::new(Vec::new());
        let create = |fail_at_device: bool| -> Result<()> {
            let instance = OnFailure::new(|| destroyed.borrow_mut().push("instance"));
            let surface = OnFailure::new(|| destroyed.borrow_mut().push("surface"));
            if fail_at_device {
                anyhow::bail!("no suitable GPU");
            }
            surface.disarm();
            instance.disarm();
            Ok(())
        };

        assert!(create(true).is_err());
        assert_eq!(*destroyed.borrow(), vec!["surface", "instance"]);

        destroyed.borrow_mut().clear();
        assert!(create(false).is_ok());
        assert!(destroyed.borrow().is_empty());
    }
}
