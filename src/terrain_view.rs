use crate::lod::LodView;
use bevy::prelude::*;

/// Marks the camera the level of detail of all terrains is computed for.
///
/// Only the first active camera carrying this component drives the tessellation.
#[derive(Clone, Copy, Debug, Default, Component)]
pub struct TerrainView;

/// Builds the view in the local space of a terrain with the transform `terrain`.
///
/// Returns `None` while the viewport size of the camera is unknown.
pub fn terrain_lod_view(
    camera: &Camera,
    camera_transform: &GlobalTransform,
    terrain: &GlobalTransform,
) -> Option<LodView> {
    let viewport = camera.physical_viewport_size()?;

    let world_from_local = terrain.compute_matrix();
    let clip_from_view = camera.clip_from_view();
    let view_from_world = camera_transform.compute_matrix().inverse();
    let clip_from_local = clip_from_view * view_from_world * world_from_local;

    Some(LodView::new(
        local_position(terrain, camera_transform),
        &clip_from_local,
        &clip_from_view,
        viewport.y as f32,
    ))
}

/// The position of the camera in the local space of the terrain.
pub fn local_position(terrain: &GlobalTransform, camera_transform: &GlobalTransform) -> Vec3 {
    terrain
        .affine()
        .inverse()
        .transform_point3(camera_transform.translation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_position_is_local_to_the_terrain() {
        let terrain = GlobalTransform::from(Transform::from_xyz(100.0, 0.0, 0.0));
        let camera = GlobalTransform::from(Transform::from_xyz(110.0, 50.0, 0.0));

        let position = local_position(&terrain, &camera);
        assert!(position.abs_diff_eq(Vec3::new(10.0, 50.0, 0.0), 1e-5));
    }

    #[test]
    fn cameras_without_viewport_have_no_view() {
        let transform = GlobalTransform::IDENTITY;
        assert!(terrain_lod_view(&Camera::default(), &transform, &transform).is_none());
    }
}
