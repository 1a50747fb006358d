//! Everything a frame draws, passed to the orchestrator by `&mut`.

use std::sync::Arc;

use crate::drawable::{Animated, Drawable, ParticleSystem, Skybox};
use crate::light_manager::LightManager;

pub struct Scene {
    drawables: Vec<Arc<dyn Drawable>>,
    particle_systems: Vec<Arc<dyn ParticleSystem>>,
    animations: Vec<Arc<dyn Animated>>,
    skybox: Option<Arc<dyn Skybox>>,
    lights: LightManager,
}

impl Scene {
    pub fn new(lights: LightManager) -> Self {
        Self {
            drawables: Vec::new(),
            particle_systems: Vec::new(),
            animations: Vec::new(),
            skybox: None,
            lights,
        }
    }

    pub fn add_drawable(&mut self, drawable: Arc<dyn Drawable>) {
        self.drawables.push(drawable);
    }

    /// Removes every drawable called `name`. Returns how many were removed.
    pub fn remove_drawable(&mut self, name: &str) -> usize {
        let before = self.drawables.len();
        self.drawables.retain(|d| d.name() != name);
        before - self.drawables.len()
    }

    pub fn add_particle_system(&mut self, system: Arc<dyn ParticleSystem>) {
        self.particle_systems.push(system);
    }

    pub fn add_animation(&mut self, animated: Arc<dyn Animated>) {
        self.animations.push(animated);
    }

    pub fn set_skybox(&mut self, skybox: Option<Arc<dyn Skybox>>) {
        self.skybox = skybox;
    }

    pub fn drawables(&self) -> &[Arc<dyn Drawable>] {
        &self.drawables
    }

    pub fn particle_systems(&self) -> &[Arc<dyn ParticleSystem>] {
        &self.particle_systems
    }

    pub fn animations(&self) -> &[Arc<dyn Animated>] {
        &self.animations
    }

    pub fn skybox(&self) -> Option<&Arc<dyn Skybox>> {
        self.skybox.as_ref()
    }

    pub fn lights(&self) -> &LightManager {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut LightManager {
        &mut self.lights
    }

    /// Drawables the shadow jobs draw, shared with the workers.
    pub(crate) fn shadow_casters(&self) -> Arc<[Arc<dyn Drawable>]> {
        self.drawables
            .iter()
            .filter(|d| d.casts_shadow())
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("drawables", &self.drawables.len())
            .field("particle_systems", &self.particle_systems.len())
            .field("animations", &self.animations.len())
            .field("skybox", &self.skybox.is_some())
            .field("lights", &self.lights)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawable::DrawContext;
    use renderer_core::Settings;
    use renderer_rhi::headless::HeadlessDevice;

    struct Quad {
        name: &'static str,
        shadow: bool,
    }

    impl Drawable for Quad {
        fn name(&self) -> &str {
            self.name
        }

        fn draw(&self, ctx: &mut DrawContext<'_>) {
            ctx.command_buffer.draw(6, 1);
        }

        fn casts_shadow(&self) -> bool {
            self.shadow
        }
    }

    fn scene() -> Scene {
        let device = Arc::new(HeadlessDevice::immediate());
        Scene::new(LightManager::new(device, &Settings::default()).unwrap())
    }

    #[test]
    fn test_shadow_casters_filter() {
        let mut scene = scene();
        scene.add_drawable(Arc::new(Quad {
            name: "floor",
            shadow: false,
        }));
        scene.add_drawable(Arc::new(Quad {
            name: "crate",
            shadow: true,
        }));
        let casters = scene.shadow_casters();
        assert_eq!(casters.len(), 1);
        assert_eq!(casters[0].name(), "crate");
    }

    #[test]
    fn test_remove_drawable_by_name() {
        let mut scene = scene();
        for name in ["a", "b", "a"] {
            scene.add_drawable(Arc::new(Quad { name, shadow: true }));
        }
        assert_eq!(scene.remove_drawable("a"), 2);
        assert_eq!(scene.remove_drawable("missing"), 0);
        assert_eq!(scene.drawables().len(), 1);
    }
}
