//! Heuristic selection of the host's main scene depth-stencil surface.
//!
//! Every depth-stencil surface the host binds that roughly matches the back
//! buffer becomes a candidate. Draw calls are attributed to whichever
//! candidate is bound, and every cooldown period the candidate with the best
//! score is selected. For the selected surface a shader-readable replacement
//! is created (or the surface itself is used when it is already readable) and
//! substituted whenever the host binds the original, so effects can sample
//! the scene depth.

use std::collections::BTreeMap;

use fxconfig::DepthConfig;
use thiserror::Error;

use crate::device::{
    DeviceError, Format, GraphicsDevice, PrimitiveKind, SurfaceDesc, SurfaceId, TextureDesc,
    TextureId, TextureUsage,
};

#[derive(Debug, Error)]
pub enum DepthError {
    #[error("depth source {0:?} is no longer alive")]
    Vanished(SurfaceId),
    #[error("failed to create a {width}x{height} depth replacement: {source}")]
    Replacement {
        width: u32,
        height: u32,
        #[source]
        source: DeviceError,
    },
}

/// Telemetry gathered for one candidate since it was last scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthCandidate {
    pub width: u32,
    pub height: u32,
    pub vertices: u64,
    /// Value of the running draw-call total at the last draw against this
    /// candidate; 0 when none happened since the last scoring.
    pub draw_call_index: u64,
}

/// Scores a candidate: many vertices drawn late in the frame win.
///
/// `total_draw_calls` is the running total since startup, not per frame, so
/// the recency term shrinks towards 1.2 as the session ages.
pub fn score(vertices: u64, draw_call_index: u64, total_draw_calls: u64) -> f64 {
    if total_draw_calls == 0 {
        return 0.0;
    }
    vertices as f64 * (1.2 - draw_call_index as f64 / total_draw_calls as f64)
}

#[derive(Debug)]
pub struct DepthSourceTracker {
    settings: DepthConfig,
    candidates: BTreeMap<SurfaceId, DepthCandidate>,
    selected: Option<SurfaceId>,
    replacement: Option<SurfaceId>,
    texture: Option<TextureId>,
    owns_texture: bool,
    backbuffer: Option<SurfaceDesc>,
    total_draw_calls: u64,
    cooldown: u32,
    traffic_frames: u32,
}

impl DepthSourceTracker {
    pub fn new(settings: DepthConfig) -> Self {
        Self {
            settings,
            candidates: BTreeMap::new(),
            selected: None,
            replacement: None,
            texture: None,
            owns_texture: false,
            backbuffer: None,
            total_draw_calls: 0,
            cooldown: 0,
            traffic_frames: 0,
        }
    }

    pub fn set_backbuffer(&mut self, desc: SurfaceDesc) {
        self.backbuffer = Some(desc);
    }

    pub fn selected(&self) -> Option<SurfaceId> {
        self.selected
    }

    pub fn replacement(&self) -> Option<SurfaceId> {
        self.replacement
    }

    /// Texture effects sample the scene depth from.
    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn candidate(&self, surface: SurfaceId) -> Option<&DepthCandidate> {
        self.candidates.get(&surface)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn total_draw_calls(&self) -> u64 {
        self.total_draw_calls
    }

    fn accepts(&self, desc: &SurfaceDesc) -> bool {
        let Some(backbuffer) = self.backbuffer else {
            return false;
        };
        let tolerance = f64::from(self.settings.size_tolerance);
        let within = |size: u32, reference: u32| {
            (f64::from(size) - f64::from(reference)).abs() <= f64::from(reference) * tolerance
        };
        !desc.is_multisampled()
            && within(desc.width, backbuffer.width)
            && within(desc.height, backbuffer.height)
    }

    /// Host is binding `surface` as its depth-stencil. Returns the surface
    /// that should actually be bound.
    pub fn on_set_depth_stencil(
        &mut self,
        device: &mut dyn GraphicsDevice,
        surface: Option<SurfaceId>,
    ) -> Option<SurfaceId> {
        let surface = surface?;
        if self.settings.enabled
            && Some(surface) != self.replacement
            && !self.candidates.contains_key(&surface)
        {
            if let Some(desc) = device.surface_desc(surface) {
                if self.accepts(&desc) {
                    device.add_ref(surface);
                    self.candidates.insert(
                        surface,
                        DepthCandidate {
                            width: desc.width,
                            height: desc.height,
                            vertices: 0,
                            draw_call_index: 0,
                        },
                    );
                    tracing::trace!(?surface, width = desc.width, height = desc.height, "recorded depth candidate");
                }
            }
        }
        if Some(surface) == self.selected {
            self.replacement.or(Some(surface))
        } else {
            Some(surface)
        }
    }

    /// Host queried its depth-stencil binding and received `bound`, holding a
    /// reference to it. The replacement is swapped back for the original so
    /// the host never sees it.
    pub fn on_get_depth_stencil(
        &mut self,
        device: &mut dyn GraphicsDevice,
        bound: Option<SurfaceId>,
    ) -> Option<SurfaceId> {
        match (bound, self.replacement, self.selected) {
            (Some(surface), Some(replacement), Some(original))
                if surface == replacement && replacement != original =>
            {
                device.release(replacement);
                device.add_ref(original);
                Some(original)
            }
            _ => bound,
        }
    }

    /// Attributes a host draw call to the bound candidate.
    pub fn on_draw(&mut self, device: &dyn GraphicsDevice, kind: PrimitiveKind, primitive_count: u32) {
        self.total_draw_calls += 1;
        let Some(mut bound) = device.depth_stencil() else {
            return;
        };
        if Some(bound) == self.replacement {
            if let Some(original) = self.selected {
                bound = original;
            }
        }
        if let Some(candidate) = self.candidates.get_mut(&bound) {
            candidate.vertices += u64::from(kind.vertex_count(primitive_count));
            candidate.draw_call_index = self.total_draw_calls;
        }
    }

    /// Runs once per frame. Returns `Ok(true)` when the selected source (and
    /// with it [`DepthSourceTracker::texture`]) changed.
    pub fn update(
        &mut self,
        device: &mut dyn GraphicsDevice,
        network_traffic: bool,
    ) -> Result<bool, DepthError> {
        if !self.settings.enabled {
            return Ok(false);
        }
        if self.cooldown > 0 {
            self.cooldown -= 1;
            if network_traffic {
                self.traffic_frames += 1;
            }
            return Ok(false);
        }
        self.cooldown = self.settings.cooldown_frames;

        let heavy_traffic = self.traffic_frames > self.settings.traffic_threshold;
        self.traffic_frames = 0;
        if heavy_traffic {
            tracing::trace!("network traffic detected, dropping depth source");
            return if self.selected.is_some() {
                self.select(device, None).map(|_| true)
            } else {
                Ok(false)
            };
        }

        let multisampled = self.backbuffer.map_or(true, |desc| desc.is_multisampled());
        if multisampled || self.candidates.is_empty() {
            return Ok(false);
        }

        let mut changed = self.prune(device)?;

        let mut best: Option<(SurfaceId, f64)> = None;
        for (surface, candidate) in self.candidates.iter_mut() {
            if candidate.draw_call_index == 0 {
                continue;
            }
            let value = score(
                candidate.vertices,
                candidate.draw_call_index,
                self.total_draw_calls,
            );
            tracing::trace!(?surface, vertices = candidate.vertices, score = value, "scored depth candidate");
            candidate.vertices = 0;
            candidate.draw_call_index = 0;

            let better = match best {
                None => value > 0.0,
                Some((_, best_score)) => {
                    value > best_score || (value == best_score && Some(*surface) == self.selected)
                }
            };
            if better {
                best = Some((*surface, value));
            }
        }

        if let Some((surface, _)) = best {
            if Some(surface) != self.selected {
                self.select(device, Some(surface))?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Drops candidates only the tracker still references. Returns whether
    /// the selection was dropped with them.
    fn prune(&mut self, device: &mut dyn GraphicsDevice) -> Result<bool, DepthError> {
        let mut deselected = false;
        let surfaces: Vec<SurfaceId> = self.candidates.keys().copied().collect();
        for surface in surfaces {
            device.add_ref(surface);
            let remaining = device.release(surface);
            let held = if Some(surface) == self.selected { 2 } else { 1 };
            if remaining > held {
                continue;
            }
            if Some(surface) == self.selected {
                self.select(device, None)?;
                deselected = true;
            }
            self.candidates.remove(&surface);
            device.release(surface);
            tracing::trace!(?surface, "pruned released depth candidate");
        }
        Ok(deselected)
    }

    fn release_selection(&mut self, device: &mut dyn GraphicsDevice) {
        if let (Some(replacement), Some(original)) = (self.replacement, self.selected) {
            if replacement != original && device.depth_stencil() == Some(replacement) {
                device.set_depth_stencil(Some(original));
            }
        }
        if let Some(texture) = self.texture.take() {
            if self.owns_texture {
                device.release_texture(texture);
            }
        }
        if let Some(original) = self.selected.take() {
            device.release(original);
        }
        self.replacement = None;
        self.owns_texture = false;
    }

    /// Makes `surface` the depth source, creating its replacement.
    ///
    /// On failure the tracker is left without a source until the next
    /// scoring pass.
    pub fn select(
        &mut self,
        device: &mut dyn GraphicsDevice,
        surface: Option<SurfaceId>,
    ) -> Result<(), DepthError> {
        self.release_selection(device);
        let Some(surface) = surface else {
            tracing::debug!("depth source cleared");
            return Ok(());
        };
        let desc = device
            .surface_desc(surface)
            .ok_or(DepthError::Vanished(surface))?;

        let container = if desc.format.is_shader_readable_depth() {
            device.surface_container(surface)
        } else {
            None
        };
        if let Some(texture) = container {
            device.add_ref(surface);
            self.selected = Some(surface);
            self.replacement = Some(surface);
            self.texture = Some(texture);
            tracing::info!(?surface, width = desc.width, height = desc.height, "selected readable depth source");
            return Ok(());
        }

        let texture = device
            .create_texture(&TextureDesc {
                width: desc.width,
                height: desc.height,
                levels: 1,
                format: Format::Intz,
                usage: TextureUsage::DepthStencil,
            })
            .map_err(|source| DepthError::Replacement {
                width: desc.width,
                height: desc.height,
                source,
            })?;
        let Some(replacement) = device.texture_surface(texture, 0) else {
            device.release_texture(texture);
            return Err(DepthError::Replacement {
                width: desc.width,
                height: desc.height,
                source: DeviceError::UnknownResource,
            });
        };

        device.add_ref(surface);
        self.selected = Some(surface);
        self.replacement = Some(replacement);
        self.texture = Some(texture);
        self.owns_texture = true;
        if device.depth_stencil() == Some(surface) {
            device.set_depth_stencil(Some(replacement));
        }
        tracing::info!(?surface, width = desc.width, height = desc.height, "selected depth source");
        Ok(())
    }

    /// Releases every reference the tracker holds.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        self.release_selection(device);
        for surface in std::mem::take(&mut self.candidates).into_keys() {
            device.release(surface);
        }
        self.cooldown = 0;
        self.traffic_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    fn settings() -> DepthConfig {
        DepthConfig {
            enabled: true,
            cooldown_frames: 0,
            traffic_threshold: 10,
            size_tolerance: 0.05,
        }
    }

    fn setup() -> (HeadlessDevice, DepthSourceTracker) {
        let device = HeadlessDevice::new(HeadlessDevice::default_caps());
        let mut tracker = DepthSourceTracker::new(settings());
        tracker.set_backbuffer(SurfaceDesc {
            width: 800,
            height: 600,
            format: Format::X8R8G8B8,
            samples: 0,
        });
        (device, tracker)
    }

    fn host_depth(device: &mut HeadlessDevice, width: u32, height: u32) -> SurfaceId {
        device.create_host_surface(SurfaceDesc {
            width,
            height,
            format: Format::D24S8,
            samples: 0,
        })
    }

    fn draw_with(
        device: &mut HeadlessDevice,
        tracker: &mut DepthSourceTracker,
        surface: SurfaceId,
        primitives: u32,
    ) {
        let bound = tracker.on_set_depth_stencil(device, Some(surface));
        device.set_depth_stencil(bound);
        tracker.on_draw(device, PrimitiveKind::TriangleList, primitives);
    }

    #[test]
    fn score_grows_with_vertices() {
        assert!(score(300, 5, 10) > score(30, 5, 10));
        assert!(score(300, 2, 10) > score(300, 9, 10));
        assert_eq!(score(10, 0, 0), 0.0);
    }

    #[test]
    fn size_filter_rejects_mismatched_and_multisampled() {
        let (mut device, mut tracker) = setup();
        let near = host_depth(&mut device, 810, 590);
        let far = host_depth(&mut device, 400, 300);
        let msaa = device.create_host_surface(SurfaceDesc {
            width: 800,
            height: 600,
            format: Format::D24S8,
            samples: 4,
        });
        for surface in [near, far, msaa] {
            tracker.on_set_depth_stencil(&mut device, Some(surface));
        }
        assert!(tracker.candidate(near).is_some());
        assert!(tracker.candidate(far).is_none());
        assert!(tracker.candidate(msaa).is_none());
        assert_eq!(device.ref_count(near), Some(2));
    }

    #[test]
    fn busiest_candidate_is_selected_and_substituted() {
        let (mut device, mut tracker) = setup();
        let shadow = host_depth(&mut device, 800, 600);
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, shadow, 10);
        draw_with(&mut device, &mut tracker, scene, 500);

        assert!(tracker.update(&mut device, false).unwrap());
        assert_eq!(tracker.selected(), Some(scene));
        let replacement = tracker.replacement().unwrap();
        assert_ne!(replacement, scene);
        assert_eq!(device.depth_stencil(), Some(replacement));
        assert_eq!(
            tracker.on_set_depth_stencil(&mut device, Some(scene)),
            Some(replacement)
        );
        assert_eq!(tracker.on_set_depth_stencil(&mut device, Some(shadow)), Some(shadow));
    }

    #[test]
    fn replacement_draws_count_for_original() {
        let (mut device, mut tracker) = setup();
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 100);
        tracker.update(&mut device, false).unwrap();
        draw_with(&mut device, &mut tracker, scene, 7);
        assert_eq!(tracker.candidate(scene).unwrap().vertices, 21);
    }

    #[test]
    fn get_depth_stencil_hides_replacement() {
        let (mut device, mut tracker) = setup();
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 100);
        tracker.update(&mut device, false).unwrap();
        let replacement = tracker.replacement().unwrap();
        let before = device.ref_count(scene).unwrap();
        assert_eq!(
            tracker.on_get_depth_stencil(&mut device, Some(replacement)),
            Some(scene)
        );
        assert_eq!(device.ref_count(scene), Some(before + 1));
    }

    #[test]
    fn released_candidates_are_pruned_and_never_selected() {
        let (mut device, mut tracker) = setup();
        let scene = host_depth(&mut device, 800, 600);
        let other = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 500);
        draw_with(&mut device, &mut tracker, other, 5);
        device.set_depth_stencil(None);
        device.release(scene);

        tracker.update(&mut device, false).unwrap();
        assert!(tracker.candidate(scene).is_none());
        assert!(!device.is_alive(scene));
        assert_eq!(tracker.selected(), Some(other));
    }

    #[test]
    fn pruning_selected_source_clears_it() {
        let (mut device, mut tracker) = setup();
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 50);
        tracker.update(&mut device, false).unwrap();
        assert_eq!(tracker.selected(), Some(scene));

        device.set_depth_stencil(None);
        device.release(scene);
        assert!(tracker.update(&mut device, false).unwrap());
        assert_eq!(tracker.selected(), None);
        assert_eq!(tracker.texture(), None);
        assert!(!device.is_alive(scene));
    }

    #[test]
    fn ties_keep_the_current_selection() {
        let (mut device, mut tracker) = setup();
        let a = host_depth(&mut device, 800, 600);
        let b = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, a, 10);
        tracker.update(&mut device, false).unwrap();
        assert_eq!(tracker.selected(), Some(a));

        // Two surfaces never share a draw index, so set equal inputs directly.
        tracker.on_set_depth_stencil(&mut device, Some(b));
        tracker.total_draw_calls = 10;
        for surface in [a, b] {
            let candidate = tracker.candidates.get_mut(&surface).unwrap();
            candidate.vertices = 30;
            candidate.draw_call_index = 5;
        }
        assert!(!tracker.update(&mut device, false).unwrap());
        assert_eq!(tracker.selected(), Some(a));
    }

    #[test]
    fn heavy_network_traffic_drops_selection() {
        let (mut device, mut tracker) = setup();
        tracker.settings.cooldown_frames = 30;
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 50);
        tracker.update(&mut device, false).unwrap();
        assert_eq!(tracker.selected(), Some(scene));

        for _ in 0..30 {
            assert!(!tracker.update(&mut device, true).unwrap());
        }
        assert!(tracker.update(&mut device, false).unwrap());
        assert_eq!(tracker.selected(), None);
        assert_eq!(device.depth_stencil(), Some(scene));
    }

    #[test]
    fn replacement_failure_leaves_no_source() {
        let (mut device, mut tracker) = setup();
        device.set_format_supported(Format::Intz, false);
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 50);
        let err = tracker.update(&mut device, false).unwrap_err();
        assert!(matches!(err, DepthError::Replacement { .. }));
        assert_eq!(tracker.selected(), None);
        assert_eq!(device.ref_count(scene), Some(2));
    }

    #[test]
    fn readable_depth_is_used_without_copy() {
        let (mut device, mut tracker) = setup();
        let texture = device
            .create_texture(&TextureDesc {
                width: 800,
                height: 600,
                levels: 1,
                format: Format::Intz,
                usage: TextureUsage::DepthStencil,
            })
            .unwrap();
        let surface = device.texture_surface(texture, 0).unwrap();
        draw_with(&mut device, &mut tracker, surface, 50);
        tracker.update(&mut device, false).unwrap();
        assert_eq!(tracker.replacement(), Some(surface));
        assert_eq!(tracker.texture(), Some(texture));
        let textures = device.live_textures();
        tracker.reset(&mut device);
        assert_eq!(device.live_textures(), textures);
    }

    #[test]
    fn reset_releases_every_reference() {
        let (mut device, mut tracker) = setup();
        let scene = host_depth(&mut device, 800, 600);
        draw_with(&mut device, &mut tracker, scene, 50);
        tracker.update(&mut device, false).unwrap();
        tracker.reset(&mut device);
        assert_eq!(device.ref_count(scene), Some(1));
        assert_eq!(device.depth_stencil(), Some(scene));
        assert_eq!(tracker.candidate_count(), 0);
    }
}
