//! Headless Vulkan bootstrap.
//!
//! [`Context::new`](crate::context::Context::new) adopts a device created
//! elsewhere. This module is the "elsewhere" for programs and tests that
//! have no renderer of their own: [`Instance`] loads Vulkan 1.3 with
//! optional validation forwarded into `tracing`, and
//! [`Instance::create_compute_device`] picks a capable physical device and
//! creates an [`OwnedDevice`] with every required feature enabled.
//!
//! [`VkVersion`] is a thin newtype over the packed Vulkan version word.

use std::ffi::{CStr, CString};
use std::fmt::Debug;
use std::rc::Rc;
use std::str::FromStr;

use ash::vk;
use thiserror::Error;

use crate::context::{ContextConfig, ContextDesc};
use crate::features::DeviceFeatures;
use crate::queue::{QueueFamilies, QueueHandles, resolve_queue_families};

/// Minimum severity level for Vulkan validation layer messages.
///
/// Passed to [`Instance::new`] as `max_log_level`. Messages at or
/// above the chosen level are forwarded to the [`tracing`] subscriber;
/// lower-severity messages are suppressed. Variants are ordered
/// least-to-most severe: `Verbose < Info < Warning < Error`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        match self {
            VulkanLogLevel::Verbose => S::VERBOSE | S::INFO | S::WARNING | S::ERROR,
            VulkanLogLevel::Info => S::INFO | S::WARNING | S::ERROR,
            VulkanLogLevel::Warning => S::WARNING | S::ERROR,
            VulkanLogLevel::Error => S::ERROR,
        }
    }
}

/// A packed Vulkan API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VkVersion(u32);

impl VkVersion {
    pub const V1_3: VkVersion = VkVersion(vk::API_VERSION_1_3);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub fn variant(&self) -> u32 {
        vk::api_version_variant(self.0)
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// Whether `self` is at least `other`, ignoring the patch level.
    pub fn supports(&self, other: VkVersion) -> bool {
        (self.variant(), self.major(), self.minor())
            >= (other.variant(), other.major(), other.minor())
    }

    pub fn to_tuple(&self) -> (u32, u32, u32, u32) {
        (self.variant(), self.major(), self.minor(), self.patch())
    }

    pub fn from_tuple(tuple: (u32, u32, u32, u32)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2, tuple.3)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),
    #[error("Vulkan {}.{} is available; 1.3 is required", .0.major(), .0.minor())]
    UnsupportedVersion(VkVersion),
    #[error("Unknown Vulkan Error {0}")]
    UnknownVulkan(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::UnknownVulkan(value)
    }
}

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error("Error enumerating physical devices: {0}")]
    Enumerate(vk::Result),
    #[error("No physical device supports Vulkan 1.3 with the required features")]
    NoSuitableDevice,
    #[error("Vulkan error creating device: {0}")]
    Vulkan(vk::Result),
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }
        .to_string_lossy();

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(
                target: "rcompute-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(
                target: "rcompute-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(
                target: "rcompute-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(
                target: "rcompute-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        _ => {
            tracing::debug!(
                target: "rcompute-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
    }

    vk::FALSE
}

/// Preference order for physical device types. Higher is better.
fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// The root Vulkan object: loader, instance and optional debug messenger.
///
/// Construct via [`Instance::new`], which is `unsafe` because it
/// loads a Vulkan shared library through `libloading`.
pub struct Instance {
    // Declared first so it is dropped after `handle` is destroyed in Drop.
    _entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger:
        Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    ver: VkVersion,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("version", &self.ver.to_tuple())
            .finish_non_exhaustive()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some((debug_messenger, debug_utils_instance)) =
            self.debug_messenger.take()
        {
            //SAFETY: last use of this debug messenger. We made this debug
            //messenger from this instance. debug_utils_instance is derived from
            //this instance
            unsafe {
                debug_utils_instance
                    .destroy_debug_utils_messenger(debug_messenger, None)
            };
        }
        //SAFETY: We are in drop so this is the last use of instance. Every
        //OwnedDevice holds an Rc to us, so all devices are gone.
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl Instance {
    /// Load Vulkan and create an instance for API 1.3.
    ///
    /// With `max_log_level` set, the Khronos validation layer and
    /// `VK_EXT_debug_utils` are enabled when both are present and messages
    /// are forwarded to `tracing` under the `rcompute-debug-messenger`
    /// target.
    ///
    /// # Safety
    /// This loads vulkan using libloading, meaning that there can be
    /// arbitrary code executed.
    pub unsafe fn new(
        app_name: impl AsRef<str>,
        max_log_level: Option<VulkanLogLevel>,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name_cstring = CString::from_str(app_name.as_ref())
            .map_err(|_| Error::InvalidAppName)?;
        //SAFETY: We pass on the burden of the safety from loading dlls to the
        //caller. Entry outlives the instance (see the field order of
        //Instance).
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;

        // SAFETY: entry is a live Vulkan entry; vkEnumerateInstanceVersion
        // has no preconditions beyond a valid entry point.
        let api_version = unsafe { entry.try_enumerate_instance_version() }
            .unwrap_or(Some(vk::API_VERSION_1_0))
            .unwrap_or(vk::API_VERSION_1_0);
        let ver = VkVersion::from_raw(api_version);
        if !ver.supports(VkVersion::V1_3) {
            return Err(Error::UnsupportedVersion(ver));
        }

        // SAFETY: entry is a live Vulkan entry; passing None queries
        // global extensions and does not dereference any layer name.
        let instance_exts_avail =
            unsafe { entry.enumerate_instance_extension_properties(None) }?;
        // SAFETY: entry is a live Vulkan entry;
        // vkEnumerateInstanceLayerProperties has no additional preconditions.
        let instance_layers_avail =
            unsafe { entry.enumerate_instance_layer_properties() };

        let debug_utils_ext_name = ash::ext::debug_utils::NAME;
        let validation_layer_name = c"VK_LAYER_KHRONOS_validation";

        let debug_utils_available = instance_exts_avail.iter().any(|ext| {
            ext.extension_name_as_c_str() == Ok(debug_utils_ext_name)
        });

        let validation_layer_available = instance_layers_avail
            .as_ref()
            .map(|layers| {
                layers.iter().any(|layer| {
                    layer.layer_name_as_c_str() == Ok(validation_layer_name)
                })
            })
            .unwrap_or(false);

        let mut enabled_ext_ptrs: Vec<*const std::ffi::c_char> = Vec::new();
        let mut enabled_layers: Vec<*const std::ffi::c_char> = Vec::new();

        let mut debug_messenger_create_info = match max_log_level {
            Some(log_level)
                if debug_utils_available && validation_layer_available =>
            {
                enabled_ext_ptrs.push(debug_utils_ext_name.as_ptr());
                enabled_layers.push(validation_layer_name.as_ptr());
                Some(
                    vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(log_level.severity_flags())
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(vulkan_debug_callback)),
                )
            }
            Some(_) => {
                tracing::warn!(
                    "Validation requested but the layer or debug utils \
                     extension is unavailable"
                );
                None
            }
            None => None,
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"rcompute")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_ext_ptrs)
            .enabled_layer_names(&enabled_layers);

        if let Some(ref mut debug_info) = debug_messenger_create_info {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: We made a valid instance_create_info
        let instance =
            unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger = if let Some(mut debug_messenger_create_info) =
            debug_messenger_create_info
        {
            debug_messenger_create_info.p_next = std::ptr::null();
            let debug_utils_instance =
                ash::ext::debug_utils::Instance::new(&entry, &instance);
            //SAFETY: Valid CI
            match unsafe {
                debug_utils_instance.create_debug_utils_messenger(
                    &debug_messenger_create_info,
                    None,
                )
            } {
                Ok(debug_messenger) => {
                    Some((debug_messenger, debug_utils_instance))
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to create debug messenger, continuing \
                         without one: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Instance {
            _entry: entry,
            handle: instance,
            debug_messenger,
            ver,
        })
    }

    /// Pick the best capable physical device and create a logical device
    /// on it with every required feature enabled and one queue per
    /// distinct family.
    ///
    /// Devices need Vulkan 1.3, every feature in
    /// [`DeviceFeatures::REQUIRED`] and a graphics-capable family.
    /// Discrete GPUs are preferred over integrated, virtual and CPU ones.
    pub fn create_compute_device(
        self: &Rc<Self>,
    ) -> Result<OwnedDevice, CreateDeviceError> {
        // SAFETY: the instance is alive for the duration of the call.
        let candidates = unsafe { self.handle.enumerate_physical_devices() }
            .map_err(CreateDeviceError::Enumerate)?;

        let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilies, String)> =
            None;
        for physical_device in candidates {
            // SAFETY: physical_device was enumerated from this instance.
            let props = unsafe {
                self.handle.get_physical_device_properties(physical_device)
            };
            let name = props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let version = VkVersion::from_raw(props.api_version);
            if !version.supports(VkVersion::V1_3) {
                tracing::debug!(
                    "Skipping {name}: Vulkan {}.{}",
                    version.major(),
                    version.minor()
                );
                continue;
            }

            // SAFETY: as above, and the device reports 1.3.
            let missing = unsafe {
                DeviceFeatures::query(&self.handle, physical_device)
            }
            .missing();
            if !missing.is_empty() {
                tracing::debug!("Skipping {name}: missing {missing:?}");
                continue;
            }

            // SAFETY: as above.
            let family_props = unsafe {
                self.handle
                    .get_physical_device_queue_family_properties(physical_device)
            };
            let families = match resolve_queue_families(&family_props) {
                Ok(families) => families,
                Err(e) => {
                    tracing::debug!("Skipping {name}: {e}");
                    continue;
                }
            };

            let score = device_type_score(props.device_type);
            if best.as_ref().is_none_or(|(current, ..)| score > *current) {
                best = Some((score, physical_device, families, name));
            }
        }

        let (_, physical_device, families, name) =
            best.ok_or(CreateDeviceError::NoSuitableDevice)?;
        tracing::info!("Selected physical device {name} ({families:?})");

        let priorities = [1.0f32];
        let unique = families.unique();
        let queue_infos: Vec<_> = unique
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut core = vk::PhysicalDeviceFeatures::default();
        let mut v11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut v12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut v13 = vk::PhysicalDeviceVulkan13Features::default();
        DeviceFeatures::enable(&mut core, &mut v11, &mut v12, &mut v13);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_features(&core)
            .push_next(&mut v11)
            .push_next(&mut v12)
            .push_next(&mut v13);

        // SAFETY: physical_device came from this instance and supports
        // every feature enabled in create_info.
        let device = unsafe {
            self.handle
                .create_device(physical_device, &create_info, None)
        }
        .map_err(CreateDeviceError::Vulkan)?;

        // SAFETY: one queue was created for each distinct family.
        let queue = |family| unsafe { device.get_device_queue(family, 0) };
        let queues = QueueHandles {
            graphics: queue(families.graphics),
            compute: queue(families.compute),
            transfer: queue(families.transfer),
        };

        Ok(OwnedDevice {
            instance: Rc::clone(self),
            device,
            physical_device,
            families,
            queues,
        })
    }

    /// The Vulkan API version reported by the loader.
    pub fn supported_ver(&self) -> VkVersion {
        self.ver
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

// ---------------------------------------------------------------------------
// OwnedDevice
// ---------------------------------------------------------------------------

/// A logical device created by [`Instance::create_compute_device`].
///
/// Destroys the device on drop. Hand it to a context with
/// [`context_desc`](Self::context_desc), which keeps it alive until the
/// context is gone.
pub struct OwnedDevice {
    instance: Rc<Instance>,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
    queues: QueueHandles,
}

impl Debug for OwnedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedDevice")
            .field("handle", &self.device.handle())
            .field("families", &self.families)
            .finish_non_exhaustive()
    }
}

impl Drop for OwnedDevice {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.device.handle());
        // SAFETY: the context that used this device (if any) held it as its
        // owner and has been torn down, so nothing derived from it remains.
        unsafe { self.device.destroy_device(None) };
    }
}

impl OwnedDevice {
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    pub fn queues(&self) -> QueueHandles {
        self.queues
    }

    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    /// Describe this device to [`Context::new`](crate::context::Context::new),
    /// moving `self` in as the context's owner.
    ///
    /// Debug names are switched off unless the instance enabled
    /// `VK_EXT_debug_utils`.
    pub fn context_desc(self, mut config: ContextConfig) -> ContextDesc {
        config.debug_names &= self.instance.debug_enabled();
        ContextDesc {
            instance: self.instance.ash_instance().clone(),
            device: self.device.clone(),
            physical_device: self.physical_device,
            queues: self.queues,
            queue_families: Some(self.families),
            config,
            owner: Some(Rc::new(self)),
        }
    }
}
