// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, device and queue.
//!
//! Built once before the frame loop and torn down once after it. Any failure
//! here is a fatal init error; nothing is retried.

use std::ffi::{c_char, c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{FrameError, FrameResult, VkResultExt};

const APP_NAME: &CStr = c"strobe";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us either null or a valid callback struct
    // whose message is a NUL-terminated string for the duration of the call.
    let msg = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Handles the frame core borrows but never owns.
pub struct VkContext {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
}

fn bootstrap(what: &str) -> impl FnOnce(vk::Result) -> FrameError + '_ {
    move |e| FrameError::Bootstrap(format!("{what}: {e}"))
}

fn raw_handles(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
) -> FrameResult<(RawDisplayHandle, RawWindowHandle)> {
    let dh = display
        .display_handle()
        .map_err(|e| FrameError::Bootstrap(format!("display handle: {e}")))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| FrameError::Bootstrap(format!("window handle: {e}")))?
        .as_raw();
    Ok((dh, wh))
}

fn layer_available(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().map(|n| n == name).unwrap_or(false))
}

fn create_instance(
    entry: &Entry,
    display: &dyn HasDisplayHandle,
    validation: bool,
) -> FrameResult<Instance> {
    let display_raw = display
        .display_handle()
        .map_err(|e| FrameError::Bootstrap(format!("display handle: {e}")))?
        .as_raw();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .map_err(bootstrap("enumerate_required_extensions"))?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        if layer_available(entry, VALIDATION_LAYER) {
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(debug_utils::NAME.as_ptr());
        } else {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };

    unsafe { entry.create_instance(&create_info, None) }.map_err(bootstrap("vkCreateInstance"))
}

fn create_debug(entry: &Entry, instance: &Instance) -> FrameResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&info, None) }
        .op("vkCreateDebugUtilsMessengerEXT")?;
    Ok(DebugMessenger { loader, messenger })
}

/// Graphics + present family on a 1.3 device with `VK_KHR_swapchain`,
/// discrete GPUs first.
fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> FrameResult<(vk::PhysicalDevice, u32)> {
    let physical = unsafe { instance.enumerate_physical_devices() }
        .map_err(bootstrap("vkEnumeratePhysicalDevices"))?;

    let mut best: Option<(vk::PhysicalDevice, u32, bool)> = None;
    for phys in physical {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if props.api_version < vk::API_VERSION_1_3 {
            debug!("skipping {name}: Vulkan < 1.3");
            continue;
        }

        let has_swapchain = unsafe { instance.enumerate_device_extension_properties(phys) }
            .unwrap_or_default()
            .iter()
            .any(|e| e.extension_name_as_c_str().map(|n| n == swapchain::NAME).unwrap_or(false));
        if !has_swapchain {
            debug!("skipping {name}: no VK_KHR_swapchain");
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let family = families.iter().enumerate().find_map(|(i, q)| {
            let i = i as u32;
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(phys, i, surface)
            }
            .unwrap_or(false);
            (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i)
        });
        let Some(family) = family else {
            debug!("skipping {name}: no graphics queue that can present");
            continue;
        };

        let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        debug!("candidate {name} (family {family}, discrete={discrete})");
        if best.map_or(true, |(_, _, was_discrete)| discrete && !was_discrete) {
            best = Some((phys, family, discrete));
        }
    }

    best.map(|(phys, family, _)| (phys, family))
        .ok_or_else(|| FrameError::Bootstrap("no Vulkan 1.3 device can present to this surface".into()))
}

fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> FrameResult<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    // Core 1.3 synchronization2 only; submit2 and barrier2 depend on it.
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        synchronization2: vk::TRUE,
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats13) as *mut _ as *const c_void,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.map_err(bootstrap("vkCreateDevice"))
}

impl VkContext {
    /// STRICT ORDER: instance, debug messenger, surface from this instance,
    /// device chosen against that surface, then its queue.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> FrameResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| FrameError::Bootstrap(format!("loading Vulkan: {e}")))?;
        let instance = create_instance(&entry, display, validation)?;

        // From here on every early return must undo what came before.
        let debug = if validation && layer_available(&entry, VALIDATION_LAYER) {
            match create_debug(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match raw_handles(window, display).and_then(|(dh, wh)| {
            unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
                .map_err(bootstrap("ash_window::create_surface"))
        }) {
            Ok(s) => s,
            Err(e) => {
                unsafe { destroy_instance_side(&instance, debug.as_ref(), None, &surface_loader) };
                return Err(e);
            }
        };

        let picked = pick_device_and_queue(&instance, &surface_loader, surface)
            .and_then(|(phys, family)| Ok((phys, family, create_device(&instance, phys, family)?)));
        let (phys, queue_family, device) = match picked {
            Ok(p) => p,
            Err(e) => {
                unsafe {
                    destroy_instance_side(&instance, debug.as_ref(), Some(surface), &surface_loader)
                };
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let props = unsafe { instance.get_physical_device_properties(phys) };
        info!(
            "Vulkan device: {} (API {}.{}), queue family {}",
            props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            queue_family
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            device,
            queue_family,
            queue,
            swapchain_loader,
        })
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    #[inline]
    pub fn phys(&self) -> vk::PhysicalDevice {
        self.phys
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    #[inline]
    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// Blocks until the queue has finished everything submitted so far.
    pub fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }
}

/// Debug messenger, surface, instance: the reverse of how `new` built them.
unsafe fn destroy_instance_side(
    instance: &Instance,
    debug: Option<&DebugMessenger>,
    surface: Option<vk::SurfaceKHR>,
    surface_loader: &surface::Instance,
) {
    unsafe {
        if let Some(s) = surface {
            surface_loader.destroy_surface(s, None);
        }
        if let Some(d) = debug {
            d.loader.destroy_debug_utils_messenger(d.messenger, None);
        }
        instance.destroy_instance(None);
    }
}

// STRICT TEARDOWN ORDER:
// - Owners of swapchains, slots and views release them first
// - Device after everything created from it
// - Surface and debug messenger before the instance; instance last
impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            destroy_instance_side(
                &self.instance,
                self.debug.as_ref(),
                Some(self.surface),
                &self.surface_loader,
            );
        }
        debug!("Vulkan context destroyed");
    }
}
