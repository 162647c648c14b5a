//! Contains a debug resource and systems controlling it to inspect the tessellation of the
//! terrains at runtime.
use crate::{plugin::TerrainTessellationSet, terrain::Terrain};
use bevy::{
    pbr::wireframe::{Wireframe, WireframePlugin},
    prelude::*,
};

/// Adds a terrain debug config and the debug control systems.
///
/// | Key | Action |
/// |---|---|
/// | `W` | toggle the wireframe |
/// | `F` | freeze the tessellation |
/// | `P` | toggle printing the tessellation statistics |
/// | `R` | reset the trees to their initial depth |
/// | `-` / `=` | decrease / increase the target edge length |
pub struct TerrainDebugPlugin;

impl Plugin for TerrainDebugPlugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<WireframePlugin>() {
            app.add_plugins(WireframePlugin);
        }

        app.init_resource::<DebugTerrain>()
            .add_systems(Update, (toggle_debug, change_config, apply_wireframe).chain())
            .add_systems(PostUpdate, print_statistics.after(TerrainTessellationSet));
    }
}

#[derive(Clone, Debug, Default, Resource)]
pub struct DebugTerrain {
    pub wireframe: bool,
    /// Stops adapting the terrains to the view.
    pub freeze: bool,
    pub statistics: bool,
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn toggle_debug(
    input: Res<ButtonInput<KeyCode>>,
    mut debug_terrain: ResMut<DebugTerrain>,
    mut terrains: Query<&mut Terrain>,
) {
    if input.just_pressed(KeyCode::KeyW) {
        debug_terrain.wireframe = !debug_terrain.wireframe;
        info!("Toggled the wireframe view {}.", on_off(debug_terrain.wireframe));
    }
    if input.just_pressed(KeyCode::KeyF) {
        debug_terrain.freeze = !debug_terrain.freeze;
        info!(
            "{} the terrain tessellation.",
            if debug_terrain.freeze { "Froze" } else { "Unfroze" }
        );
    }
    if input.just_pressed(KeyCode::KeyP) {
        debug_terrain.statistics = !debug_terrain.statistics;
        info!("Toggled the terrain statistics {}.", on_off(debug_terrain.statistics));
    }
    if input.just_pressed(KeyCode::KeyR) {
        for mut terrain in &mut terrains {
            terrain.tessellator_mut().reset();
        }
        info!("Reset the terrain tessellation.");
    }
}

pub fn change_config(input: Res<ButtonInput<KeyCode>>, mut terrains: Query<&mut Terrain>) {
    let factor = if input.just_pressed(KeyCode::Minus) {
        0.8
    } else if input.just_pressed(KeyCode::Equal) {
        1.25
    } else {
        return;
    };

    for mut terrain in &mut terrains {
        let lod = terrain
            .config()
            .lod
            .clone()
            .with_target_edge_pixels(terrain.config().lod.target_edge_pixels * factor);
        let target = lod.target_edge_pixels;

        match terrain.set_lod(lod) {
            Ok(()) => info!("Changed the target edge length to {target} pixels."),
            Err(error) => warn!("Failed to change the target edge length: {error:#}"),
        }
    }
}

pub(crate) fn apply_wireframe(
    mut commands: Commands,
    debug_terrain: Res<DebugTerrain>,
    terrains: Query<(Entity, Has<Wireframe>), With<Terrain>>,
) {
    for (entity, has_wireframe) in &terrains {
        if debug_terrain.wireframe && !has_wireframe {
            commands.entity(entity).insert(Wireframe);
        } else if !debug_terrain.wireframe && has_wireframe {
            commands.entity(entity).remove::<Wireframe>();
        }
    }
}

pub(crate) fn print_statistics(
    debug_terrain: Res<DebugTerrain>,
    terrains: Query<(Entity, &Terrain)>,
) {
    if !debug_terrain.statistics {
        return;
    }

    for (entity, terrain) in &terrains {
        let tessellator = terrain.tessellator();

        info!(
            "Terrain {entity}: {} leaves, {} vertices, phase {:?}, pass {}.",
            tessellator.leaf_count(),
            tessellator.indirect_buffer().draw_args().vertex_count,
            tessellator.phase(),
            tessellator.frame()
        );
    }
}
