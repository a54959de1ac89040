//! Per-frame scene input
//!
//! The scene graph and visibility culling live outside this crate. Each frame
//! the caller hands over the camera, the lights and the visible instances per
//! pass; [`FrameSnapshot::update`] turns camera and lights into the GPU
//! per-frame objects every pass reads.

use std::f32::consts::PI;

use crate::foundation::math::{to_gpu_mat4, Mat4, Vec3};
use crate::render::common::{
    AxisStorageBufferObject, MeshDirectionalLightShadowPerframeStorageBufferObject,
    MeshInefficientPickPerframeStorageBufferObject, MeshPerframeStorageBufferObject,
    MeshPointLightShadowPerframeStorageBufferObject, SceneDirectionalLight, ScenePointLight,
    MAX_POINT_LIGHT_COUNT,
};
use crate::render::resources::{MaterialKey, MeshKey};

/// One visible object
#[derive(Debug, Clone)]
pub struct VisibleInstance {
    /// Cached mesh
    pub mesh: MeshKey,
    /// Cached material
    pub material: MaterialKey,
    /// Object-to-world transform
    pub model_matrix: Mat4,
    /// Skinning palette; `None` for rigid objects
    pub joint_matrices: Option<Vec<Mat4>>,
    /// Pick id; 0 means "no object"
    pub node_id: u32,
}

impl VisibleInstance {
    /// Rigid instance
    pub fn new(mesh: MeshKey, material: MaterialKey, model_matrix: Mat4, node_id: u32) -> Self {
        Self {
            mesh,
            material,
            model_matrix,
            joint_matrices: None,
            node_id,
        }
    }

    /// Attach a skinning palette
    #[must_use]
    pub fn with_joints(mut self, joint_matrices: Vec<Mat4>) -> Self {
        self.joint_matrices = Some(joint_matrices);
        self
    }

    /// Whether this instance reads joint matrices
    pub const fn is_skinned(&self) -> bool {
        self.joint_matrices.is_some()
    }
}

/// Visible instances per pass category
#[derive(Debug, Clone, Default)]
pub struct VisibleNodes {
    /// Seen by the main camera; also the pick pass input
    pub main_camera: Vec<VisibleInstance>,
    /// Inside the directional light frustum
    pub directional_light: Vec<VisibleInstance>,
    /// Inside any point light's range
    pub point_lights: Vec<VisibleInstance>,
    /// Axis gizmo mesh, drawn when the axis is visible
    pub axis: Option<MeshKey>,
}

/// Camera matrices and render-target size
#[derive(Debug, Clone, Copy)]
pub struct CameraState {
    /// World-to-view
    pub view: Mat4,
    /// View-to-clip
    pub projection: Mat4,
    /// World-space eye position
    pub position: Vec3,
    /// Render target width in pixels
    pub width: u32,
    /// Render target height in pixels
    pub height: u32,
}

impl CameraState {
    /// Combined `projection * view`
    pub fn proj_view(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            view: Mat4::identity(),
            projection: Mat4::identity(),
            position: Vec3::zeros(),
            width: 1,
            height: 1,
        }
    }
}

/// Point light given by radiant flux
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// World-space position
    pub position: Vec3,
    /// Radiant flux per channel
    pub flux: Vec3,
}

impl PointLight {
    /// Radiant intensity, `flux / 4π`
    pub fn intensity(&self) -> Vec3 {
        self.flux / (4.0 * PI)
    }

    /// Distance past which the light's contribution falls below the cutoff
    pub fn radius(&self) -> f32 {
        const INTENSITY_CUTOFF: f32 = 1.0;
        const ATTENUATION_CUTOFF: f32 = 0.05;

        let max_intensity = self.intensity().max();
        if max_intensity <= 0.0 {
            return 0.0;
        }
        let attenuation = INTENSITY_CUTOFF.max(ATTENUATION_CUTOFF * max_intensity) / max_intensity;
        1.0 / attenuation.sqrt()
    }
}

/// Directional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels; normalized on upload
    pub direction: Vec3,
    /// Linear colour
    pub color: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, 0.0, -1.0),
            color: Vec3::zeros(),
        }
    }
}

/// Lights for one frame
#[derive(Debug, Clone, Default)]
pub struct SceneLighting {
    /// Ambient term
    pub ambient: Vec3,
    /// Sun
    pub directional: DirectionalLight,
    /// Light-space `projection * view` for the directional shadow map
    pub directional_proj_view: Mat4,
    /// Point lights; only the first 15 are used
    pub point_lights: Vec<PointLight>,
}

/// GPU per-frame objects for every pass
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSnapshot {
    /// Main camera per-frame data
    pub mesh_perframe: MeshPerframeStorageBufferObject,
    /// Point-light shadow per-frame data
    pub point_light_shadow_perframe: MeshPointLightShadowPerframeStorageBufferObject,
    /// Directional shadow per-frame data
    pub directional_light_shadow_perframe: MeshDirectionalLightShadowPerframeStorageBufferObject,
    /// Pick per-frame data
    pub pick_perframe: MeshInefficientPickPerframeStorageBufferObject,
    /// Axis gizmo data
    pub axis: AxisStorageBufferObject,
}

impl FrameSnapshot {
    /// Rebuild every per-frame object from the camera and lights
    pub fn update(&mut self, camera: &CameraState, lighting: &SceneLighting) {
        let proj_view = to_gpu_mat4(&camera.proj_view());
        let directional_proj_view = to_gpu_mat4(&lighting.directional_proj_view);

        if lighting.point_lights.len() > MAX_POINT_LIGHT_COUNT {
            log::warn!(
                "{} point lights supplied, only the first {MAX_POINT_LIGHT_COUNT} are rendered",
                lighting.point_lights.len()
            );
        }
        let point_lights = &lighting.point_lights[..lighting.point_lights.len().min(MAX_POINT_LIGHT_COUNT)];

        let perframe = &mut self.mesh_perframe;
        perframe.proj_view_matrix = proj_view;
        perframe.camera_position = camera.position.into();
        perframe.ambient_light = lighting.ambient.into();
        perframe.point_light_num = point_lights.len() as u32;
        perframe.scene_point_lights = [ScenePointLight::default(); MAX_POINT_LIGHT_COUNT];

        let shadow = &mut self.point_light_shadow_perframe;
        shadow.point_light_num = point_lights.len() as u32;
        shadow.point_lights_position_and_radius = [[0.0; 4]; MAX_POINT_LIGHT_COUNT];

        for (i, light) in point_lights.iter().enumerate() {
            let radius = light.radius();
            perframe.scene_point_lights[i] = ScenePointLight {
                position: light.position.into(),
                radius,
                intensity: light.intensity().into(),
                _padding_intensity: 0.0,
            };
            shadow.point_lights_position_and_radius[i] =
                [light.position.x, light.position.y, light.position.z, radius];
        }

        let direction = lighting
            .directional
            .direction
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::zeros);
        perframe.scene_directional_light = SceneDirectionalLight {
            direction: direction.into(),
            _padding_direction: 0.0,
            color: lighting.directional.color.into(),
            _padding_color: 0.0,
        };
        perframe.directional_light_proj_view = directional_proj_view;

        self.directional_light_shadow_perframe.light_proj_view = directional_proj_view;

        self.pick_perframe.proj_view_matrix = proj_view;
        self.pick_perframe.rt_width = camera.width;
        self.pick_perframe.rt_height = camera.height;
    }

    /// Place the axis gizmo
    pub fn set_axis_transform(&mut self, model_matrix: &Mat4) {
        self.axis.model_matrix = to_gpu_mat4(model_matrix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn light(flux: f32) -> PointLight {
        PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            flux: Vec3::new(flux, flux * 0.5, 0.0),
        }
    }

    #[test]
    fn test_intensity_is_flux_over_four_pi() {
        let l = light(4.0 * PI);
        assert_relative_eq!(l.intensity().x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(l.intensity().y, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_radius_cutoff() {
        // max intensity 100: attenuation = max(1, 5) / 100 = 0.05
        let l = light(400.0 * PI);
        assert_relative_eq!(l.radius(), 1.0 / 0.05_f32.sqrt(), epsilon = 1e-4);

        // max intensity 2: attenuation = 1 / 2
        let dim = light(8.0 * PI);
        assert_relative_eq!(dim.radius(), 2.0_f32.sqrt(), epsilon = 1e-5);

        assert_eq!(light(0.0).radius(), 0.0);
    }

    #[test]
    fn test_update_fills_every_pass() {
        let camera = CameraState {
            view: Mat4::new_translation(&Vec3::new(0.0, 0.0, -5.0)),
            position: Vec3::new(0.0, 0.0, 5.0),
            width: 800,
            height: 600,
            ..CameraState::default()
        };
        let lighting = SceneLighting {
            ambient: Vec3::new(0.1, 0.1, 0.1),
            directional: DirectionalLight {
                direction: Vec3::new(0.0, -2.0, 0.0),
                color: Vec3::new(1.0, 1.0, 1.0),
            },
            point_lights: vec![light(40.0), light(80.0)],
            ..SceneLighting::default()
        };

        let mut snapshot = FrameSnapshot::default();
        snapshot.update(&camera, &lighting);

        assert_eq!(snapshot.mesh_perframe.point_light_num, 2);
        assert_eq!(snapshot.point_light_shadow_perframe.point_light_num, 2);
        assert_eq!(snapshot.mesh_perframe.scene_directional_light.direction, [0.0, -1.0, 0.0]);
        assert_eq!(snapshot.mesh_perframe.camera_position, [0.0, 0.0, 5.0]);
        assert_eq!(snapshot.pick_perframe.rt_width, 800);
        assert_eq!(snapshot.pick_perframe.proj_view_matrix, snapshot.mesh_perframe.proj_view_matrix);
        assert_relative_eq!(
            snapshot.point_light_shadow_perframe.point_lights_position_and_radius[1][3],
            light(80.0).radius()
        );
    }

    #[test]
    fn test_point_lights_truncated() {
        let lighting = SceneLighting {
            point_lights: vec![light(10.0); MAX_POINT_LIGHT_COUNT + 4],
            ..SceneLighting::default()
        };
        let mut snapshot = FrameSnapshot::default();
        snapshot.update(&CameraState::default(), &lighting);
        assert_eq!(snapshot.mesh_perframe.point_light_num, MAX_POINT_LIGHT_COUNT as u32);
    }
}
