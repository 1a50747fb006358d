//! Scene lights and their per-slot shadow resources.
//!
//! Light parameters sit in a [`DeferredDescriptorCache`]; each slot's light
//! uniform buffer is rewritten only when the slot is bound after a change.
//! Every light additionally owns, per frame slot, one depth target and one
//! command buffer per shadow pass (one for a directional light, six for a
//! point light). Those are lent to the shadow jobs each frame and handed
//! back through [`LightManager::restore`].

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use renderer_core::Settings;
use renderer_rhi::{
    Buffer, BufferDesc, CommandBuffer, DepthTarget, DepthTargetDesc, Device, QueueKind,
};
use renderer_scene::{CubeFace, DirectionalLight, LightUniforms, PointLight, SceneBounds};
use tracing::{debug, info, warn};

use crate::descriptor_cache::DeferredDescriptorCache;
use crate::error::{FrameError, FrameResult};
use crate::shadow::{LightKind, ShadowJob, ShadowOutcome, pass_name};

/// Light parameters as uploaded to the GPU.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightSet {
    pub directional: Vec<DirectionalLight>,
    pub point: Vec<PointLight>,
    pub bounds: SceneBounds,
}

impl LightSet {
    /// Shadow passes per frame: one per directional light, six per point
    /// light.
    pub fn shadow_pass_count(&self) -> usize {
        self.directional.len() + self.point.len() * CubeFace::ALL.len()
    }
}

/// One light's shadow passes, indexed `[slot][face]`.
struct ShadowResources {
    id: usize,
    targets: Vec<Vec<Arc<dyn DepthTarget>>>,
    command_buffers: Vec<Vec<Option<Box<dyn CommandBuffer>>>>,
    initialized: Vec<Vec<bool>>,
    pass_times: Vec<Vec<Duration>>,
    /// Pass names, e.g. `shadow point0 +X`.
    names: Vec<String>,
}

impl ShadowResources {
    fn new(
        device: &dyn Device,
        id: usize,
        names: Vec<String>,
        slots: usize,
        size: u32,
    ) -> FrameResult<Self> {
        let mut targets = Vec::with_capacity(slots);
        let mut command_buffers = Vec::with_capacity(slots);
        for slot in 0..slots {
            let mut slot_targets = Vec::with_capacity(names.len());
            let mut slot_buffers = Vec::with_capacity(names.len());
            for name in &names {
                slot_targets.push(device.create_depth_target(&DepthTargetDesc {
                    label: format!("{name} depth[{slot}]"),
                    width: size,
                    height: size,
                })?);
                slot_buffers.push(Some(
                    device.create_command_buffer(QueueKind::Graphics, &format!("{name}[{slot}]"))?,
                ));
            }
            targets.push(slot_targets);
            command_buffers.push(slot_buffers);
        }
        Ok(Self {
            id,
            targets,
            command_buffers,
            initialized: vec![vec![false; names.len()]; slots],
            pass_times: vec![vec![Duration::ZERO; names.len()]; slots],
            names,
        })
    }

    /// Lends pass `face` of `slot` to a job. A buffer that never came back
    /// belongs to a frame that failed, which leaves the loop unusable.
    fn take_command_buffer(
        &mut self,
        slot: usize,
        face: usize,
    ) -> FrameResult<Box<dyn CommandBuffer>> {
        self.command_buffers[slot][face]
            .take()
            .ok_or_else(|| FrameError::BufferLent(format!("{}[{slot}]", self.names[face])))
    }
}

pub struct LightManager {
    device: Arc<dyn Device>,
    lights: DeferredDescriptorCache<LightSet>,
    directional_shadows: Vec<ShadowResources>,
    point_shadows: Vec<ShadowResources>,
    buffers: Vec<Box<dyn Buffer>>,
    slots: usize,
    shadow_map_size: u32,
    /// Ids are never reused, so a pass keeps its name across removals.
    next_directional_id: usize,
    next_point_id: usize,
}

impl LightManager {
    pub fn new(device: Arc<dyn Device>, settings: &Settings) -> FrameResult<Self> {
        let slots = settings.frames_in_flight;
        if slots == 0 {
            return Err(FrameError::Config(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        let buffers = (0..slots)
            .map(|slot| {
                device.create_buffer(&BufferDesc {
                    label: format!("lights[{slot}]"),
                    size: std::mem::size_of::<LightUniforms>() as u64,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Light manager created: {} slot(s), {}px shadow maps",
            slots, settings.shadow_map_size
        );
        Ok(Self {
            device,
            lights: DeferredDescriptorCache::new(LightSet::default(), slots),
            directional_shadows: Vec::new(),
            point_shadows: Vec::new(),
            buffers,
            slots,
            shadow_map_size: settings.shadow_map_size,
            next_directional_id: 0,
            next_point_id: 0,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots
    }

    /// Per-slot dirty state of the light buffers.
    pub fn cache(&self) -> &DeferredDescriptorCache<LightSet> {
        &self.lights
    }

    /// Snapshot of the current light parameters.
    pub fn lights(&self) -> LightSet {
        self.lights.get()
    }

    pub fn directional_count(&self) -> usize {
        self.directional_shadows.len()
    }

    pub fn point_count(&self) -> usize {
        self.point_shadows.len()
    }

    pub fn shadow_pass_count(&self) -> usize {
        self.directional_count() + self.point_count() * CubeFace::ALL.len()
    }

    // =========================================================================
    // Adding and removing
    // =========================================================================

    /// Registers a directional light and creates its shadow resources.
    /// Returns its index.
    pub fn add_directional(&mut self, light: DirectionalLight) -> FrameResult<usize> {
        let id = self.next_directional_id;
        let names = vec![pass_name(LightKind::Directional, id, None)];
        let resources =
            ShadowResources::new(self.device.as_ref(), id, names, self.slots, self.shadow_map_size)?;

        self.next_directional_id += 1;
        self.directional_shadows.push(resources);
        self.lights.update(|set| set.directional.push(light));
        info!("Added directional light {}", self.directional_shadows.len() - 1);
        Ok(self.directional_shadows.len() - 1)
    }

    /// Registers a point light with its six cube faces. Returns its index.
    pub fn add_point(&mut self, light: PointLight) -> FrameResult<usize> {
        let id = self.next_point_id;
        let names = CubeFace::ALL
            .iter()
            .map(|face| pass_name(LightKind::Point, id, Some(*face)))
            .collect();
        let resources =
            ShadowResources::new(self.device.as_ref(), id, names, self.slots, self.shadow_map_size)?;

        self.next_point_id += 1;
        self.point_shadows.push(resources);
        self.lights.update(|set| set.point.push(light));
        info!("Added point light {}", self.point_shadows.len() - 1);
        Ok(self.point_shadows.len() - 1)
    }

    /// Removes a directional light. Waits for the device to go idle first,
    /// since in-flight frames may still sample its shadow maps.
    pub fn remove_directional(&mut self, index: usize) -> FrameResult<Option<DirectionalLight>> {
        if index >= self.directional_shadows.len() {
            return Ok(None);
        }
        self.device.wait_idle()?;
        self.directional_shadows.remove(index);
        let mut removed = None;
        self.lights.update(|set| removed = Some(set.directional.remove(index)));
        info!("Removed directional light {}", index);
        Ok(removed)
    }

    /// Removes a point light, waiting for the device to go idle first.
    pub fn remove_point(&mut self, index: usize) -> FrameResult<Option<PointLight>> {
        if index >= self.point_shadows.len() {
            return Ok(None);
        }
        self.device.wait_idle()?;
        self.point_shadows.remove(index);
        let mut removed = None;
        self.lights.update(|set| removed = Some(set.point.remove(index)));
        info!("Removed point light {}", index);
        Ok(removed)
    }

    // =========================================================================
    // Setters
    //
    // Each returns whether anything changed. Unknown indices change nothing.
    // =========================================================================

    pub fn set_directional_direction(&self, index: usize, direction: Vec3) -> bool {
        self.edit_directional(index, |light| {
            light.direction = direction.normalize_or(Vec3::NEG_Y);
        })
    }

    pub fn set_directional_color(&self, index: usize, color: Vec3) -> bool {
        self.edit_directional(index, |light| light.color = color)
    }

    pub fn set_point_position(&self, index: usize, position: Vec3) -> bool {
        self.edit_point(index, |light| light.position = position)
    }

    pub fn set_point_color(&self, index: usize, color: Vec3) -> bool {
        self.edit_point(index, |light| light.color = color)
    }

    /// Bounds the directional shadow cameras are fitted to.
    pub fn set_scene_bounds(&self, bounds: SceneBounds) -> bool {
        self.lights.update(|set| set.bounds = bounds)
    }

    fn edit_directional(&self, index: usize, edit: impl FnOnce(&mut DirectionalLight)) -> bool {
        if index >= self.directional_shadows.len() {
            warn!("No directional light at index {}", index);
            return false;
        }
        self.lights.update(|set| {
            if let Some(light) = set.directional.get_mut(index) {
                edit(light);
            }
        })
    }

    fn edit_point(&self, index: usize, edit: impl FnOnce(&mut PointLight)) -> bool {
        if index >= self.point_shadows.len() {
            warn!("No point light at index {}", index);
            return false;
        }
        self.lights.update(|set| {
            if let Some(light) = set.point.get_mut(index) {
                edit(light);
            }
        })
    }

    // =========================================================================
    // Per-frame use
    // =========================================================================

    /// Brings `slot`'s light buffer up to date. Returns whether it was
    /// rewritten.
    pub fn bind(&self, slot: usize) -> FrameResult<bool> {
        let buffer = self
            .buffers
            .get(slot)
            .ok_or_else(|| FrameError::Config(format!("no light buffer for slot {slot}")))?;
        self.lights.bind(slot, |set| {
            let uniforms = LightUniforms::pack(&set.directional, &set.point, &set.bounds);
            buffer.write(0, bytemuck::bytes_of(&uniforms))?;
            Ok(())
        })
    }

    /// Builds this frame's shadow jobs for `slot` from one snapshot of the
    /// lights, lending each job its command buffer and depth target.
    pub fn shadow_jobs(&mut self, slot: usize) -> FrameResult<Vec<ShadowJob>> {
        let set = self.lights.get();
        let mut jobs = Vec::with_capacity(set.shadow_pass_count());

        for (index, (light, resources)) in set
            .directional
            .iter()
            .zip(self.directional_shadows.iter_mut())
            .enumerate()
        {
            jobs.push(ShadowJob {
                light: LightKind::Directional,
                light_index: index,
                light_id: resources.id,
                face: None,
                view_projection: light.view_projection(&set.bounds),
                target: Arc::clone(&resources.targets[slot][0]),
                initialized: resources.initialized[slot][0],
                command_buffer: resources.take_command_buffer(slot, 0)?,
            });
        }

        for (index, (light, resources)) in
            set.point.iter().zip(self.point_shadows.iter_mut()).enumerate()
        {
            for face in CubeFace::ALL {
                let f = face.index();
                jobs.push(ShadowJob {
                    light: LightKind::Point,
                    light_index: index,
                    light_id: resources.id,
                    face: Some(face),
                    view_projection: light.face_view_projection(face),
                    target: Arc::clone(&resources.targets[slot][f]),
                    initialized: resources.initialized[slot][f],
                    command_buffer: resources.take_command_buffer(slot, f)?,
                });
            }
        }
        Ok(jobs)
    }

    /// Takes back a command buffer lent by [`shadow_jobs`](Self::shadow_jobs).
    pub fn restore(&mut self, slot: usize, outcome: ShadowOutcome) {
        let (resources, face) = match outcome.light {
            LightKind::Directional => (self.directional_shadows.get_mut(outcome.light_index), 0),
            LightKind::Point => (
                self.point_shadows.get_mut(outcome.light_index),
                outcome.face.map(CubeFace::index).unwrap_or(0),
            ),
        };
        match resources {
            Some(resources) => {
                resources.command_buffers[slot][face] = Some(outcome.command_buffer);
                resources.initialized[slot][face] = true;
                resources.pass_times[slot][face] = outcome.recorded_in;
            }
            None => warn!(
                "Dropping shadow command buffer of missing {} light {}",
                outcome.light, outcome.light_index
            ),
        }
    }

    /// Every shadow map `slot` samples, in job order.
    pub fn depth_targets(&self, slot: usize) -> Vec<Arc<dyn DepthTarget>> {
        self.directional_shadows
            .iter()
            .chain(self.point_shadows.iter())
            .flat_map(|resources| resources.targets[slot].iter().cloned())
            .collect()
    }

    /// Recording time of every shadow pass of `slot` in the last frame that
    /// used it, keyed by pass name.
    pub fn pass_times(&self, slot: usize) -> Vec<(String, Duration)> {
        self.directional_shadows
            .iter()
            .chain(self.point_shadows.iter())
            .flat_map(|resources| {
                resources
                    .names
                    .iter()
                    .cloned()
                    .zip(resources.pass_times[slot].iter().copied())
            })
            .collect()
    }

    pub fn light_buffer(&self, slot: usize) -> Option<&dyn Buffer> {
        self.buffers.get(slot).map(|b| b.as_ref())
    }
}

impl std::fmt::Debug for LightManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightManager")
            .field("directional", &self.directional_shadows.len())
            .field("point", &self.point_shadows.len())
            .field("slots", &self.slots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::headless::{HeadlessBuffer, HeadlessDevice};

    fn manager(device: &HeadlessDevice, slots: usize) -> LightManager {
        let settings = Settings {
            frames_in_flight: slots,
            shadow_map_size: 256,
            ..Settings::default()
        };
        LightManager::new(Arc::new(device.clone()), &settings).unwrap()
    }

    fn uploaded(manager: &LightManager, slot: usize) -> LightUniforms {
        let buffer = manager
            .light_buffer(slot)
            .unwrap()
            .as_any()
            .downcast_ref::<HeadlessBuffer>()
            .unwrap();
        bytemuck::pod_read_unaligned(&buffer.contents().unwrap())
    }

    #[test]
    fn test_job_count_for_two_directional_one_point() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 2);
        lights.add_directional(DirectionalLight::default()).unwrap();
        lights
            .add_directional(DirectionalLight::new(Vec3::X, Vec3::ONE, 0.5))
            .unwrap();
        lights.add_point(PointLight::default()).unwrap();

        assert_eq!(lights.shadow_pass_count(), 8);
        assert_eq!(lights.lights().shadow_pass_count(), 8);
        assert_eq!(lights.depth_targets(1).len(), 8);

        let jobs = lights.shadow_jobs(1).unwrap();
        assert_eq!(jobs.len(), 8);
        assert_eq!(jobs[1].light_index, 1);
        assert_eq!(jobs[2].face, Some(CubeFace::PositiveX));
        assert_eq!(jobs[7].face, Some(CubeFace::NegativeZ));
        assert!(jobs.iter().all(|job| !job.initialized));
        assert_eq!(jobs[1].name(), "shadow dir1");
        assert_eq!(jobs[7].name(), "shadow point0 -Z");
        assert_eq!(jobs[7].command_buffer.label(), "shadow point0 -Z[1]");
    }

    #[test]
    fn test_restore_returns_buffers_and_marks_initialized() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 2);
        lights.add_point(PointLight::default()).unwrap();

        let jobs = lights.shadow_jobs(0).unwrap();
        for job in jobs {
            lights.restore(
                0,
                ShadowOutcome {
                    light: job.light,
                    light_index: job.light_index,
                    face: job.face,
                    command_buffer: job.command_buffer,
                    recorded_in: Duration::from_micros(5),
                },
            );
        }

        let again = lights.shadow_jobs(0).unwrap();
        assert!(again.iter().all(|job| job.initialized));
        // Slot 1 has never been rendered
        assert!(lights.shadow_jobs(1).unwrap().iter().all(|job| !job.initialized));
        assert_eq!(lights.pass_times(0).len(), 6);
        assert_eq!(lights.pass_times(0)[0].1, Duration::from_micros(5));
    }

    #[test]
    fn test_unreturned_command_buffer_is_an_error() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 1);
        lights.add_directional(DirectionalLight::default()).unwrap();
        drop(lights.shadow_jobs(0).unwrap());
        match lights.shadow_jobs(0) {
            Err(FrameError::BufferLent(label)) => assert_eq!(label, "shadow dir0[0]"),
            other => panic!("expected BufferLent, got {:?}", other.map(|jobs| jobs.len())),
        }
    }

    #[test]
    fn test_names_survive_removal() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 1);
        lights.add_directional(DirectionalLight::default()).unwrap();
        lights.add_directional(DirectionalLight::default()).unwrap();
        lights.add_point(PointLight::default()).unwrap();
        lights.remove_directional(0).unwrap();

        let jobs = lights.shadow_jobs(0).unwrap();
        assert_eq!(jobs[0].light_index, 0);
        assert_eq!(jobs[0].name(), "shadow dir1");
        assert_eq!(jobs[0].command_buffer.label(), "shadow dir1[0]");
        assert_eq!(jobs[1].name(), "shadow point0 +X");

        let names: Vec<String> = jobs.iter().map(ShadowJob::name).collect();
        let timed: Vec<String> = lights.pass_times(0).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, timed);
    }

    #[test]
    fn test_bind_uploads_lights_lazily() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 2);
        lights.add_point(PointLight::default()).unwrap();

        assert!(lights.bind(0).unwrap());
        assert!(!lights.bind(0).unwrap());
        assert_eq!(uploaded(&lights, 0).point_count, 1);

        assert!(lights.set_point_position(0, Vec3::new(1.0, 2.0, 3.0)));
        assert!(!lights.set_point_position(0, Vec3::new(1.0, 2.0, 3.0)));
        assert!(lights.bind(0).unwrap());
        assert_eq!(uploaded(&lights, 0).point[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(lights.cache().rewrite_count(0), 2);
    }

    #[test]
    fn test_change_during_other_slot_flight() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 2);
        lights.add_directional(DirectionalLight::default()).unwrap();
        lights.bind(0).unwrap();
        lights.bind(1).unwrap();

        // Slot 0 in flight, slot 1 recording
        assert!(lights.set_directional_color(0, Vec3::new(1.0, 0.0, 0.0)));
        assert!(lights.bind(1).unwrap());
        assert!(lights.cache().is_dirty(0));
        assert_eq!(uploaded(&lights, 0).directional[0].color, Vec3::ONE);
        assert_eq!(uploaded(&lights, 1).directional[0].color, Vec3::X);

        // Slot 0 picks the change up at its own next bind
        assert!(lights.bind(0).unwrap());
        assert_eq!(uploaded(&lights, 0).directional[0].color, Vec3::X);
    }

    #[test]
    fn test_unknown_index_changes_nothing() {
        let device = HeadlessDevice::immediate();
        let lights = manager(&device, 2);
        lights.bind(0).unwrap();
        assert!(!lights.set_point_color(3, Vec3::ONE));
        assert!(!lights.cache().is_dirty(0));
    }

    #[test]
    fn test_remove_light() {
        let device = HeadlessDevice::immediate();
        let mut lights = manager(&device, 2);
        lights.add_directional(DirectionalLight::default()).unwrap();
        let point = PointLight::new(Vec3::Y, Vec3::ONE, 2.0, 5.0);
        lights.add_point(point).unwrap();

        assert_eq!(lights.remove_point(0).unwrap(), Some(point));
        assert_eq!(lights.remove_point(0).unwrap(), None);
        assert_eq!(lights.shadow_pass_count(), 1);
        assert!(lights.lights().point.is_empty());
        assert!(lights.cache().is_dirty(1));
    }
}
