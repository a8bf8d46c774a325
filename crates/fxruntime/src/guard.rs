//! Capture and restore of the host's device state around effect rendering.

use std::ops::{Deref, DerefMut};

use crate::device::{GraphicsDevice, StateBlockId, SurfaceId, Viewport, MAX_RENDER_TARGETS};

/// Everything the pass executor may change on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    block: StateBlockId,
    viewport: Viewport,
    render_targets: [Option<SurfaceId>; MAX_RENDER_TARGETS],
    render_target_count: usize,
    depth_stencil: Option<SurfaceId>,
    software_vertex_processing: Option<bool>,
}

impl StateSnapshot {
    /// Records the current device state into `block` and the bindings a
    /// state block does not cover. On mixed vertex processing devices
    /// software processing is switched off until [`StateSnapshot::apply`].
    pub fn capture<D: GraphicsDevice + ?Sized>(device: &mut D, block: StateBlockId) -> Self {
        let caps = device.caps();
        device.capture_state_block(block);

        let render_target_count = caps.render_target_count();
        let mut render_targets = [None; MAX_RENDER_TARGETS];
        for (index, slot) in render_targets
            .iter_mut()
            .enumerate()
            .take(render_target_count)
        {
            *slot = device.render_target(index as u32);
        }

        let software_vertex_processing = if caps.mixed_vertex_processing {
            let enabled = device.software_vertex_processing();
            device.set_software_vertex_processing(false);
            Some(enabled)
        } else {
            None
        };

        Self {
            block,
            viewport: device.viewport(),
            render_targets,
            render_target_count,
            depth_stencil: device.depth_stencil(),
            software_vertex_processing,
        }
    }

    /// Restores the captured state. Render targets are rebound before the
    /// viewport since binding slot 0 resets it.
    pub fn apply<D: GraphicsDevice + ?Sized>(&self, device: &mut D) {
        device.apply_state_block(self.block);
        for (index, target) in self
            .render_targets
            .iter()
            .enumerate()
            .take(self.render_target_count)
        {
            device.set_render_target(index as u32, *target);
        }
        device.set_depth_stencil(self.depth_stencil);
        device.set_viewport(&self.viewport);
        if let Some(enabled) = self.software_vertex_processing {
            device.set_software_vertex_processing(enabled);
        }
    }

    pub fn render_target(&self, index: usize) -> Option<SurfaceId> {
        self.render_targets.get(index).copied().flatten()
    }

    pub fn depth_stencil(&self) -> Option<SurfaceId> {
        self.depth_stencil
    }
}

/// Scope object that restores the captured state when dropped, on every
/// exit path including unwinding.
pub struct DeviceStateGuard<'a, D: GraphicsDevice + ?Sized> {
    device: &'a mut D,
    snapshot: StateSnapshot,
}

impl<'a, D: GraphicsDevice + ?Sized> DeviceStateGuard<'a, D> {
    pub fn new(device: &'a mut D, block: StateBlockId) -> Self {
        let snapshot = StateSnapshot::capture(device, block);
        Self { device, snapshot }
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }
}

impl<D: GraphicsDevice + ?Sized> Deref for DeviceStateGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &Self::Target {
        &*self.device
    }
}

impl<D: GraphicsDevice + ?Sized> DerefMut for DeviceStateGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.device
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for DeviceStateGuard<'_, D> {
    fn drop(&mut self) {
        self.snapshot.apply(&mut *self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;
    use crate::device::{DeviceCaps, Format};

    fn device(mixed: bool) -> HeadlessDevice {
        HeadlessDevice::new(DeviceCaps {
            mixed_vertex_processing: mixed,
            ..HeadlessDevice::default_caps()
        })
    }

    #[test]
    fn guard_restores_bindings_on_drop() {
        let mut device = device(false);
        let target = device.create_render_target(128, 64, Format::A8R8G8B8).unwrap();
        let depth = device.create_depth_stencil(128, 64, Format::D24S8).unwrap();
        let other = device.create_render_target(32, 32, Format::A8R8G8B8).unwrap();
        device.set_render_target(0, Some(target));
        device.set_depth_stencil(Some(depth));
        let viewport = Viewport {
            x: 4,
            y: 4,
            width: 100,
            height: 50,
            min_z: 0.0,
            max_z: 1.0,
        };
        device.set_viewport(&viewport);
        device.set_render_state(3, 9);
        let block = device.create_state_block().unwrap();

        {
            let mut guard = DeviceStateGuard::new(&mut device, block);
            guard.set_render_target(0, Some(other));
            guard.set_render_target(1, Some(target));
            guard.set_depth_stencil(None);
            guard.set_render_state(3, 1);
        }

        assert_eq!(device.render_target(0), Some(target));
        assert_eq!(device.render_target(1), None);
        assert_eq!(device.depth_stencil(), Some(depth));
        assert_eq!(device.viewport(), viewport);
        assert_eq!(device.render_state(3), Some(9));
    }

    #[test]
    fn guard_restores_shader_constants() {
        let mut device = device(false);
        device.set_vertex_shader_constants(0, &[9.0; 4]);
        device.set_vertex_shader_constants(255, &[7.0; 4]);
        device.set_pixel_shader_constants(0, &[8.0; 4]);
        let block = device.create_state_block().unwrap();

        {
            let mut guard = DeviceStateGuard::new(&mut device, block);
            guard.set_vertex_shader_constants(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
            guard.set_vertex_shader_constants(255, &[0.0; 4]);
            guard.set_pixel_shader_constants(0, &[0.5; 4]);
        }

        assert_eq!(device.vertex_constant(0), [9.0; 4]);
        assert_eq!(device.vertex_constant(1), [0.0; 4]);
        assert_eq!(device.vertex_constant(255), [7.0; 4]);
        assert_eq!(device.pixel_constant(0), [8.0; 4]);
    }

    #[test]
    fn guard_restores_after_early_return() {
        fn render(device: &mut HeadlessDevice, block: StateBlockId, other: SurfaceId) -> Result<(), ()> {
            let mut guard = DeviceStateGuard::new(device, block);
            guard.set_render_target(0, Some(other));
            Err(())
        }

        let mut device = device(false);
        let target = device.create_render_target(16, 16, Format::A8R8G8B8).unwrap();
        let other = device.create_render_target(8, 8, Format::A8R8G8B8).unwrap();
        device.set_render_target(0, Some(target));
        let block = device.create_state_block().unwrap();
        assert!(render(&mut device, block, other).is_err());
        assert_eq!(device.render_target(0), Some(target));
        assert_eq!(device.viewport(), Viewport::covering(16, 16));
    }

    #[test]
    fn software_vertex_processing_is_forced_off_then_restored() {
        let mut device = device(true);
        device.set_software_vertex_processing(true);
        let block = device.create_state_block().unwrap();
        {
            let guard = DeviceStateGuard::new(&mut device, block);
            assert!(!guard.software_vertex_processing());
        }
        assert!(device.software_vertex_processing());
    }
}
