//! Shadow and colour-space post-processing of a freshly loaded subtree.
//!
//! Runs once per asset, before anything is uploaded to the GPU, so the texture
//! encoding chosen here decides the texture format used later on.

use log::{debug, info};

use crate::data_structures::scene_graph::{ColorEncoding, NodeKind, SceneNode};

/// Shadow map resolution of lights that are picked as shadow casters.
pub const SHADOW_MAP_SIZE: [u32; 2] = [1024, 1024];
/// User-data key that opts a mesh out of casting shadows.
pub const NO_SHADOW_KEY: &str = "noShadow";
/// Lights whose name contains this marker cast shadows.
pub const SHADOW_LIGHT_MARKER: &str = "shadow";

/// What [`apply_shadow_policy`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowReport {
    /// Textures switched to sRGB.
    pub srgb_textures: usize,
    pub receivers: Vec<String>,
    pub casters: Vec<String>,
    /// Meshes that receive but were excluded from casting via `noShadow`.
    pub exempt: Vec<String>,
    pub shadow_lights: Vec<String>,
}

/// Walks `root` depth-first and configures shadows and texture encodings.
///
/// Per node, in order:
/// 1. a mesh whose material has a base colour texture gets that texture
///    marked as sRGB,
/// 2. with shadows on, every mesh receives shadows and casts them unless its
///    user data has a truthy `noShadow`,
/// 3. with shadows on, a shadow-capable light whose name contains `shadow`
///    casts shadows into a 1024x1024 map.
pub fn apply_shadow_policy(root: &mut SceneNode, use_shadows: bool) -> ShadowReport {
    let mut report = ShadowReport::default();
    root.traverse_mut(&mut |node| {
        let no_shadow = node.flag(NO_SHADOW_KEY);
        let name = node.name.clone();
        match &mut node.kind {
            NodeKind::Mesh(mesh) => {
                if let Some(slot) = mesh.material.base_color_texture.as_mut() {
                    slot.encoding = ColorEncoding::Srgb;
                    report.srgb_textures += 1;
                }
                if use_shadows {
                    node.receive_shadow = true;
                    report.receivers.push(name.clone());
                    if no_shadow {
                        report.exempt.push(name);
                    } else {
                        node.cast_shadow = true;
                        report.casters.push(name);
                    }
                }
            }
            NodeKind::Light(light) if use_shadows && name.contains(SHADOW_LIGHT_MARKER) => {
                if light.supports_shadow() {
                    node.cast_shadow = true;
                    light.shadow.map_size = SHADOW_MAP_SIZE;
                    report.shadow_lights.push(name);
                } else {
                    debug!("light {name} is named as a shadow light but its kind cannot cast shadows");
                }
            }
            NodeKind::Light(_) | NodeKind::Group => (),
        }
    });
    info!(
        "shadows: {} receivers, {} casters ({} exempt), {} shadow lights, {} sRGB textures",
        report.receivers.len(),
        report.casters.len(),
        report.exempt.len(),
        report.shadow_lights.len(),
        report.srgb_textures
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::scene_graph::{
        LightKind, LightNode, Material, MeshNode, TextureSlot,
    };
    use serde_json::json;

    fn mesh(name: &str, textured: bool) -> SceneNode {
        let material = Material {
            base_color_texture: textured.then_some(TextureSlot {
                image: 0,
                encoding: ColorEncoding::Linear,
            }),
            ..Default::default()
        };
        SceneNode::new(name, NodeKind::Mesh(MeshNode { mesh: 0, material }))
    }

    fn light(name: &str, kind: LightKind) -> SceneNode {
        SceneNode::new(name, NodeKind::Light(LightNode::new(kind, [1.0; 3], 1.0)))
    }

    fn scene() -> SceneNode {
        let mut root = SceneNode::group("Scene");
        let mut body = SceneNode::group("body");
        body.add_child(mesh("foot", true));
        body.add_child(mesh("sole", false).with_extras(json!({ "noShadow": true })));
        root.add_child(body);
        root.add_child(light("sun_shadow", LightKind::Directional));
        root.add_child(light("fill", LightKind::Point { range: None }));
        root.add_child(light(
            "hemi_shadow",
            LightKind::Hemisphere { ground: [0.0; 3] },
        ));
        root
    }

    #[test]
    fn meshes_receive_and_cast_unless_exempt() {
        let mut root = scene();
        let report = apply_shadow_policy(&mut root, true);

        let foot = root.find_by_name("foot").unwrap();
        assert!(foot.receive_shadow);
        assert!(foot.cast_shadow);

        let sole = root.find_by_name("sole").unwrap();
        assert!(sole.receive_shadow);
        assert!(!sole.cast_shadow);

        assert_eq!(report.receivers, ["foot", "sole"]);
        assert_eq!(report.casters, ["foot"]);
        assert_eq!(report.exempt, ["sole"]);
    }

    #[test]
    fn named_lights_get_a_large_shadow_map() {
        let mut root = scene();
        let report = apply_shadow_policy(&mut root, true);

        let sun = root.find_by_name("sun_shadow").unwrap();
        assert!(sun.cast_shadow);
        assert_eq!(sun.light().unwrap().shadow.map_size, [1024, 1024]);

        let fill = root.find_by_name("fill").unwrap();
        assert!(!fill.cast_shadow);
        assert_eq!(fill.light().unwrap().shadow.map_size, [512, 512]);

        // hemisphere lights have no shadow map even when named like one
        let hemi = root.find_by_name("hemi_shadow").unwrap();
        assert!(!hemi.cast_shadow);
        assert_eq!(report.shadow_lights, ["sun_shadow"]);
    }

    #[test]
    fn textures_become_srgb_even_without_shadows() {
        let mut root = scene();
        let report = apply_shadow_policy(&mut root, false);

        let foot = root.find_by_name("foot").unwrap();
        assert_eq!(
            foot.material().unwrap().base_color_texture.unwrap().encoding,
            ColorEncoding::Srgb
        );
        assert!(!foot.receive_shadow);
        assert!(!foot.cast_shadow);
        assert!(!root.find_by_name("sun_shadow").unwrap().cast_shadow);
        assert_eq!(report.srgb_textures, 1);
        assert!(report.receivers.is_empty());
    }

    #[test]
    fn untextured_meshes_are_left_linear() {
        let mut root = scene();
        apply_shadow_policy(&mut root, true);
        let sole = root.find_by_name("sole").unwrap();
        assert!(sole.material().unwrap().base_color_texture.is_none());
    }
}
