// SPDX-License-Identifier: CEPL-1.0
//! Adapter capability checks. Everything here works on plain data pulled
//! from the driver so the selection rules can be exercised without a GPU.

use std::ffi::CStr;

use ash::vk;

use crate::SetupError;

/// Device extensions every adapter must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Queue family roles. Graphics and present may name the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// `(graphics, present)` once both roles are assigned.
    pub fn pair(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.graphics.into_iter().collect();
        if let Some(p) = self.present {
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }
}

/// Walks families in index order. The first graphics-capable family takes the
/// graphics role and the first family `supports_present` accepts takes the
/// present role; families without queues are ignored.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = index as u32;
        if found.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            found.graphics = Some(index);
        }
        if found.present.is_none() && supports_present(index) {
            found.present = Some(index);
        }
        if found.is_complete() {
            break;
        }
    }
    found
}

/// Surface capabilities plus the formats and present modes it accepts.
#[derive(Clone, Debug, Default)]
pub struct SwapChainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapChainSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// What a single adapter reports about itself.
#[derive(Clone, Debug, Default)]
pub struct AdapterCapabilities {
    pub name: String,
    pub extensions: Vec<String>,
    pub queue_families: QueueFamilyIndices,
    pub swap_chain: SwapChainSupport,
    pub sampler_anisotropy: bool,
}

impl AdapterCapabilities {
    pub fn is_suitable(&self, required: &[&CStr]) -> bool {
        missing_extensions(required, self.extensions.iter().map(String::as_str)).is_empty()
            && self.queue_families.is_complete()
            && self.swap_chain.is_adequate()
            && self.sampler_anisotropy
    }
}

/// Index of the first suitable adapter.
pub fn select_adapter(candidates: &[AdapterCapabilities], required: &[&CStr]) -> Option<usize> {
    candidates.iter().position(|c| c.is_suitable(required))
}

/// Names from `required` absent from `available`, in `required` order.
pub fn missing_extensions<'a>(
    required: &[&CStr],
    available: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let available: Vec<&str> = available.into_iter().collect();
    required
        .iter()
        .map(|name| name.to_string_lossy())
        .filter(|name| !available.contains(&name.as_ref()))
        .map(|name| name.into_owned())
        .collect()
}

/// Lowest memory type allowed by `filter` whose flags include `properties`.
pub fn memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, SetupError> {
    (0..memory.memory_type_count)
        .find(|&i| {
            filter & (1 << i) != 0
                && memory.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(SetupError::NoSuitableMemoryType { filter, properties })
}

/// First candidate whose features for `tiling` include `features`.
pub fn select_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, SetupError> {
    let tiling_features: fn(&vk::FormatProperties) -> vk::FormatFeatureFlags = match tiling {
        vk::ImageTiling::LINEAR => |p: &vk::FormatProperties| p.linear_tiling_features,
        vk::ImageTiling::OPTIMAL => |p: &vk::FormatProperties| p.optimal_tiling_features,
        other => return Err(SetupError::UnsupportedTiling(other)),
    };
    candidates
        .iter()
        .copied()
        .find(|&format| tiling_features(&properties_of(format)).contains(features))
        .ok_or(SetupError::UnsupportedFormat { features })
}

pub(crate) fn cstr_lossy(raw: Result<&CStr, std::ffi::FromBytesUntilNulError>) -> String {
    raw.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<invalid name>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn adequate_support() -> SwapChainSupport {
        SwapChainSupport {
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..Default::default()
        }
    }

    fn good_adapter() -> AdapterCapabilities {
        AdapterCapabilities {
            name: "good".into(),
            extensions: vec!["VK_KHR_swapchain".into(), "VK_KHR_maintenance1".into()],
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            swap_chain: adequate_support(),
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn shared_family_takes_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let found = find_queue_families(&families, |_| true);
        assert_eq!(found.pair(), Some((0, 0)));
        assert_eq!(found.unique(), vec![0]);
    }

    #[test]
    fn split_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let found = find_queue_families(&families, |i| i == 2);
        assert_eq!(found.pair(), Some((1, 2)));
        assert_eq!(found.unique(), vec![1, 2]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let found = find_queue_families(&families, |_| true);
        assert_eq!(found.pair(), Some((1, 1)));
    }

    #[test]
    fn search_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut asked = Vec::new();
        find_queue_families(&families, |i| {
            asked.push(i);
            true
        });
        assert_eq!(asked, vec![0]);
    }

    #[test]
    fn no_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let found = find_queue_families(&families, |_| false);
        assert!(!found.is_complete());
        assert_eq!(found.pair(), None);
    }

    #[test]
    fn suitability_requires_every_capability() {
        let required = REQUIRED_DEVICE_EXTENSIONS;
        assert!(good_adapter().is_suitable(&required));

        let mut no_ext = good_adapter();
        no_ext.extensions.retain(|e| e != "VK_KHR_swapchain");
        assert!(!no_ext.is_suitable(&required));

        let mut no_present = good_adapter();
        no_present.queue_families.present = None;
        assert!(!no_present.is_suitable(&required));

        let mut no_modes = good_adapter();
        no_modes.swap_chain.present_modes.clear();
        assert!(!no_modes.is_suitable(&required));

        let mut no_formats = good_adapter();
        no_formats.swap_chain.formats.clear();
        assert!(!no_formats.is_suitable(&required));

        let mut no_aniso = good_adapter();
        no_aniso.sampler_anisotropy = false;
        assert!(!no_aniso.is_suitable(&required));
    }

    #[test]
    fn suitability_over_synthetic_grid() {
        let required = REQUIRED_DEVICE_EXTENSIONS;
        for bits in 0u8..16 {
            let mut caps = good_adapter();
            let ext = bits & 1 != 0;
            let families = bits & 2 != 0;
            let support = bits & 4 != 0;
            let aniso = bits & 8 != 0;
            if !ext {
                caps.extensions.clear();
            }
            if !families {
                caps.queue_families.graphics = None;
            }
            if !support {
                caps.swap_chain = SwapChainSupport::default();
            }
            caps.sampler_anisotropy = aniso;
            assert_eq!(
                caps.is_suitable(&required),
                ext && families && support && aniso,
                "bits {bits:04b}"
            );
        }
    }

    #[test]
    fn first_suitable_adapter_wins() {
        let mut bad = good_adapter();
        bad.sampler_anisotropy = false;
        let list = [bad, good_adapter(), good_adapter()];
        assert_eq!(select_adapter(&list, &REQUIRED_DEVICE_EXTENSIONS), Some(1));
        assert_eq!(select_adapter(&[], &REQUIRED_DEVICE_EXTENSIONS), None);
    }

    #[test]
    fn missing_extensions_keep_required_order() {
        let required = [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];
        let missing = missing_extensions(&required, ["VK_KHR_surface"]);
        assert_eq!(missing, vec!["VK_KHR_xlib_surface", "VK_EXT_debug_utils"]);
    }

    #[test]
    fn memory_type_lowest_match() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(memory_type_index(&props, 0b110, host).unwrap(), 1);
        assert_eq!(memory_type_index(&props, 0b100, host).unwrap(), 2);
        assert_eq!(
            memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::empty()).unwrap(),
            0
        );
    }

    #[test]
    fn memory_type_without_filter_match_fails() {
        let props = memory(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::empty());
        assert!(matches!(
            err,
            Err(SetupError::NoSuitableMemoryType { filter: 0b10, .. })
        ));
        let err = memory_type_index(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(err, Err(SetupError::NoSuitableMemoryType { .. })));
    }

    #[test]
    fn format_selection_respects_tiling() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let props = |f: vk::Format| match f {
            vk::Format::D32_SFLOAT => vk::FormatProperties {
                linear_tiling_features: depth,
                ..Default::default()
            },
            vk::Format::D24_UNORM_S8_UINT => vk::FormatProperties {
                optimal_tiling_features: depth,
                ..Default::default()
            },
            _ => vk::FormatProperties::default(),
        };
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        assert_eq!(
            select_supported_format(&candidates, vk::ImageTiling::OPTIMAL, depth, props).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            select_supported_format(&candidates, vk::ImageTiling::LINEAR, depth, props).unwrap(),
            vk::Format::D32_SFLOAT
        );
        assert!(matches!(
            select_supported_format(&candidates[1..2], vk::ImageTiling::OPTIMAL, depth, props),
            Err(SetupError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            select_supported_format(
                &candidates,
                vk::ImageTiling::DRM_FORMAT_MODIFIER_EXT,
                depth,
                props
            ),
            Err(SetupError::UnsupportedTiling(_))
        ));
    }
}
