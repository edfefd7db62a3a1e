// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::GpuDevice;

/// Insertion-ordered arena released back to front.
#[derive(Debug)]
pub struct ResourceTable<T> {
    items: Vec<T>,
}

impl<T> Default for ResourceTable<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> ResourceTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hands every entry to `release`, newest first, and empties the table.
    pub fn release(&mut self, release: impl FnMut(T)) {
        self.items.drain(..).rev().for_each(release);
    }
}

/// A device object owned by a swap-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnedResource {
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    Image(vk::Image, vk::DeviceMemory),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
}

impl OwnedResource {
    /// # Safety
    /// The object must have been created on `device` and be idle on the GPU.
    pub unsafe fn destroy(self, device: &dyn GpuDevice) {
        let raw = device.raw();
        unsafe {
            match self {
                Self::Swapchain(h) => device.swapchain_fn().destroy_swapchain(h, None),
                Self::ImageView(h) => raw.destroy_image_view(h, None),
                Self::Image(image, memory) => {
                    raw.destroy_image(image, None);
                    raw.free_memory(memory, None);
                }
                Self::RenderPass(h) => raw.destroy_render_pass(h, None),
                Self::Framebuffer(h) => raw.destroy_framebuffer(h, None),
                Self::Semaphore(h) => raw.destroy_semaphore(h, None),
                Self::Fence(h) => raw.destroy_fence(h, None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn releases_in_reverse_insertion_order() {
        let mut table = ResourceTable::new();
        for name in ["swapchain", "view", "render pass", "framebuffer"] {
            table.insert(name);
        }
        let mut order = Vec::new();
        table.release(|n| order.push(n));
        assert_eq!(order, vec!["framebuffer", "render pass", "view", "swapchain"]);
        assert!(table.is_empty());
    }

    #[test]
    fn release_twice_is_a_no_op() {
        let mut table = ResourceTable::new();
        table.insert(OwnedResource::Fence(vk::Fence::null()));
        let mut count = 0;
        table.release(|_| count += 1);
        table.release(|_| count += 1);
        assert_eq!(count, 1);
    }
}
