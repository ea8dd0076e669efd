use approx::assert_relative_eq;
use foot_viewer::{
    LoadState, ViewerConfig,
    data_structures::scene_graph::{ColorEncoding, LightKind, NodeKind},
    pipelines::light::SceneLights,
    shadows::{SHADOW_MAP_SIZE, apply_shadow_policy},
    viewer::{FrameContent, HEMISPHERE_LIGHT_NAME, SCENE_NAME},
};

use crate::common::test_utils::{load_fixture, manual_viewer, refresh};

mod common;

#[test]
fn fixture_loads_nodes_materials_and_clips() {
    let asset = load_fixture();
    assert_eq!(asset.scene.name, "FootScene");
    let names: Vec<&str> = asset.scene.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Body", "sun_shadow", "fill"]);

    let foot = asset.scene.find_by_name("Foot").unwrap();
    let material = foot.material().unwrap();
    assert_eq!(material.name, "skin");
    let slot = material.base_color_texture.unwrap();
    assert_eq!(slot.image, 0);
    assert_eq!(slot.encoding, ColorEncoding::Linear);

    let sole = asset.scene.find_by_name("Sole").unwrap();
    assert!(sole.flag("noShadow"));
    assert!(sole.material().unwrap().double_sided);

    assert_eq!(asset.meshes.len(), 2);
    assert_eq!(asset.meshes[0].triangle_count(), 1);
    // texture coordinates are taken as stored, without flipping v
    assert_eq!(asset.meshes[0].vertices[0].tex_coords, [0.0, 1.0]);
    assert_eq!(asset.meshes[0].vertices[2].tex_coords, [0.0, 0.0]);

    let skin = asset.images[0].decoded().unwrap();
    assert_eq!(skin.dimensions(), (2, 2));
    assert_eq!(skin.get_pixel(0, 0).0, [200, 150, 120, 255]);

    let clips: Vec<&str> = asset.clips.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(clips, ["Walk", "Sway"]);
    assert_eq!(asset.extensions_used, ["KHR_lights_punctual"]);
}

#[test]
fn shadow_policy_on_the_fixture() {
    let mut asset = load_fixture();
    let report = apply_shadow_policy(&mut asset.scene, true);

    assert_eq!(report.receivers, ["Foot", "Sole"]);
    assert_eq!(report.casters, ["Foot"]);
    assert_eq!(report.exempt, ["Sole"]);
    assert_eq!(report.shadow_lights, ["sun_shadow"]);
    assert_eq!(report.srgb_textures, 1);

    let sole = asset.scene.find_by_name("Sole").unwrap();
    assert!(sole.receive_shadow);
    assert!(!sole.cast_shadow);

    let sun = asset.scene.find_by_name("sun_shadow").unwrap();
    assert!(sun.cast_shadow);
    assert_eq!(sun.light().unwrap().shadow.map_size, SHADOW_MAP_SIZE);
    let fill = asset.scene.find_by_name("fill").unwrap();
    assert!(!fill.cast_shadow);
    assert!(matches!(fill.light().unwrap().kind, LightKind::Point { .. }));

    let foot = asset.scene.find_by_name("Foot").unwrap();
    assert_eq!(
        foot.material().unwrap().base_color_texture.unwrap().encoding,
        ColorEncoding::Srgb
    );
}

#[test]
fn shadows_off_leaves_every_flag_clear() {
    let mut asset = load_fixture();
    let report = apply_shadow_policy(&mut asset.scene, false);
    assert!(report.receivers.is_empty());
    assert!(report.shadow_lights.is_empty());
    // textures are still display encoded
    assert_eq!(report.srgb_textures, 1);
    asset.scene.traverse(&mut |node| {
        assert!(!node.cast_shadow, "{} casts", node.name);
        assert!(!node.receive_shadow, "{} receives", node.name);
    });
}

#[test]
fn the_sun_is_the_shadow_caster_once_inserted() {
    let mut viewer = manual_viewer(ViewerConfig::default());
    let upload = viewer.on_model_loaded(load_fixture()).unwrap();
    assert_eq!(upload.meshes.len(), 2);
    assert_eq!(upload.images.len(), 1);

    let lights = SceneLights::gather(viewer.scene());
    assert!(lights.hemisphere.is_some());
    let names: Vec<&str> = lights.punctual.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["sun_shadow", "fill"]);
    let params = lights.shadow_params().unwrap();
    assert_eq!(params.light_index, 0);
    assert_eq!(params.map_size, SHADOW_MAP_SIZE);

    // the sun hangs 5 units up and looks straight down
    let sun = &lights.punctual[0].world;
    assert_relative_eq!(sun.position.y, 5.0, epsilon = 1e-5);
    let forward = sun.forward();
    assert_relative_eq!(forward.y, -1.0, epsilon = 1e-5);
}

#[test]
fn the_model_hangs_below_the_scene_root() {
    let mut viewer = manual_viewer(ViewerConfig::default());
    viewer.on_model_loaded(load_fixture()).unwrap();
    assert_eq!(*viewer.load_state(), LoadState::Ready);

    let scene = viewer.scene();
    assert_eq!(scene.name, SCENE_NAME);
    assert_eq!(scene.children[0].name, HEMISPHERE_LIGHT_NAME);
    assert_eq!(viewer.model().unwrap().name, "FootScene");
    assert!(matches!(scene.children[1].kind, NodeKind::Group));
    assert_eq!(viewer.shadow_report().unwrap().casters, ["Foot"]);
}

#[test]
fn every_clip_plays_and_moves_its_node() {
    let mut viewer = manual_viewer(ViewerConfig::default());
    viewer.on_model_loaded(load_fixture()).unwrap();

    let actions = viewer.mixer().unwrap().actions();
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|action| action.is_running()));

    // half a second of 60 Hz refreshes
    let plans: Vec<_> = (0..30)
        .filter_map(|_| refresh(&mut viewer, 1.0 / 60.0, (800, 600)))
        .collect();
    assert!(plans.len() >= 14);
    assert!(plans.iter().all(|plan| matches!(plan.content, FrameContent::Scene { .. })));

    let body = viewer.model().unwrap().find_by_name("Body").unwrap();
    assert!(body.local.position.z > 0.0);
    assert!(body.local.position.z <= 0.5);
    let foot = viewer.model().unwrap().find_by_name("Foot").unwrap();
    assert!(foot.local.rotation.v.y > 0.0);
}

#[test]
fn clips_with_the_same_name_all_play() {
    let mut asset = load_fixture();
    let name = asset.clips[0].name.clone();
    asset.clips[1].name = name;

    let mut viewer = manual_viewer(ViewerConfig::default());
    viewer.on_model_loaded(asset).unwrap();
    let actions = viewer.mixer().unwrap().actions();
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|action| action.is_running()));

    for _ in 0..30 {
        refresh(&mut viewer, 1.0 / 60.0, (800, 600));
    }
    // the second clip still turns the foot
    let foot = viewer.model().unwrap().find_by_name("Foot").unwrap();
    assert!(foot.local.rotation.v.y > 0.0);
}
