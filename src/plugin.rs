use crate::{
    debug::DebugTerrain,
    terrain::Terrain,
    terrain_view::{terrain_lod_view, TerrainView},
    tessellation::FrameOutcome,
    vertex::TerrainVertex,
};
use bevy::{
    prelude::*,
    render::{
        camera::CameraUpdateSystem, mesh::PrimitiveTopology, render_asset::RenderAssetUsages,
        view::NoFrustumCulling,
    },
    transform::TransformSystem,
};
use itertools::Itertools;

/// The system set tessellating all terrains, in [`PostUpdate`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, SystemSet)]
pub struct TerrainTessellationSet;

/// The plugin for the concurrent binary tree terrain tessellation.
///
/// Every frame after the transforms are propagated, each [`Terrain`] is adapted to the
/// active camera marked with the [`TerrainView`] component and its triangles are copied
/// into the mesh of the terrain entity.
///
/// The plugin only inserts the [`Mesh3d`]. The terrain is not drawn until a material is
/// added to the entity as well, e.g. a [`MeshMaterial3d`] with a [`StandardMaterial`].
pub struct CbtTerrainPlugin;

impl Plugin for CbtTerrainPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            PostUpdate,
            TerrainTessellationSet
                .after(TransformSystem::TransformPropagate)
                .after(CameraUpdateSystem),
        )
        .add_systems(
            PostUpdate,
            (initialize_terrain_mesh, tessellate_terrain)
                .chain()
                .in_set(TerrainTessellationSet),
        );
    }
}

fn empty_terrain_mesh() -> Mesh {
    let mut mesh = Mesh::new(
        PrimitiveTopology::TriangleList,
        RenderAssetUsages::default(),
    );
    write_terrain_mesh(&mut mesh, &[]);
    mesh
}

/// Replaces the vertex attributes of the mesh with the triangle list.
pub fn write_terrain_mesh(mesh: &mut Mesh, vertices: &[TerrainVertex]) {
    let (positions, normals, uvs): (Vec<[f32; 3]>, Vec<[f32; 3]>, Vec<[f32; 2]>) = vertices
        .iter()
        .map(|vertex| (vertex.position, vertex.normal, vertex.uv))
        .multiunzip();

    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
}

/// Gives every new terrain a mesh to write its triangles into.
///
/// The bounds of the mesh change every frame, so it is excluded from frustum culling.
pub(crate) fn initialize_terrain_mesh(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    terrains: Query<Entity, (With<Terrain>, Without<Mesh3d>)>,
) {
    for entity in &terrains {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(empty_terrain_mesh())),
            NoFrustumCulling,
        ));
    }
}

pub(crate) fn tessellate_terrain(
    debug: Option<Res<DebugTerrain>>,
    views: Query<(&Camera, &GlobalTransform), With<TerrainView>>,
    mut terrains: Query<(&mut Terrain, &Mesh3d, &GlobalTransform)>,
    mut meshes: ResMut<Assets<Mesh>>,
) {
    if debug.is_some_and(|debug| debug.freeze) {
        return;
    }

    let Some((camera, camera_transform)) = views.iter().find(|(camera, _)| camera.is_active)
    else {
        return;
    };

    for (mut terrain, mesh, terrain_transform) in &mut terrains {
        let Some(view) = terrain_lod_view(camera, camera_transform, terrain_transform) else {
            continue;
        };

        if terrain.update(&view) == FrameOutcome::Skipped {
            continue;
        }

        let Some(mesh) = meshes.get_mut(&mesh.0) else {
            continue;
        };

        write_terrain_mesh(mesh, terrain.generate_vertices());
    }
}
