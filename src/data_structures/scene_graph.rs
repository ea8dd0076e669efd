//! Scene graph and hierarchical scene organization.
//!
//! The scene is a tree of [`SceneNode`]s owned by a root node. What a node is
//! (plain group, mesh with a material, light) is a closed [`NodeKind`], so the
//! passes that walk the tree match on the kind instead of probing types.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
};

use log::warn;

use crate::data_structures::instance::Instance;

pub type NodeId = u32;

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);

fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Colour space a texture's texels are stored in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorEncoding {
    #[default]
    Linear,
    /// Display-referred, decoded to linear by the sampler.
    Srgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    /// Index into the asset's image list.
    pub image: usize,
    pub encoding: ColorEncoding,
}

/// Metallic-roughness surface description of a mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub base_color_texture: Option<TextureSlot>,
    pub double_sided: bool,
}

impl Default for Material {
    /// The glTF default material.
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color_factor: [1.0; 4],
            metallic: 1.0,
            roughness: 1.0,
            base_color_texture: None,
            double_sided: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshNode {
    /// Index into the asset's mesh list (one entry per glTF primitive).
    pub mesh: usize,
    pub material: Material,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    /// Sky colour is the light colour, the ground colour blends in from below.
    Hemisphere { ground: [f32; 3] },
    Directional,
    Point {
        range: Option<f32>,
    },
    Spot {
        range: Option<f32>,
        inner_cone: f32,
        outer_cone: f32,
    },
}

/// Shadow map parameters of a shadow-capable light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightShadow {
    pub map_size: [u32; 2],
    pub bias: f32,
    /// Half size of the orthographic shadow frustum of directional lights.
    pub extent: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for LightShadow {
    fn default() -> Self {
        Self {
            map_size: [512, 512],
            bias: 0.002,
            extent: 10.0,
            near: 0.5,
            far: 500.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightNode {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    pub shadow: LightShadow,
}

impl LightNode {
    pub fn new(kind: LightKind, color: [f32; 3], intensity: f32) -> Self {
        Self {
            kind,
            color,
            intensity,
            shadow: LightShadow::default(),
        }
    }

    /// Hemisphere lights only contribute ambient light and never render a shadow map.
    pub fn supports_shadow(&self) -> bool {
        !matches!(self.kind, LightKind::Hemisphere { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(MeshNode),
    Light(LightNode),
}

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    /// Index of the glTF node this node was created from. Animation channels bind to it.
    pub source_index: Option<usize>,
    pub kind: NodeKind,
    pub local: Instance,
    pub world: Instance,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    /// Free-form user data, `Null` or a JSON object (glTF `extras`).
    pub extras: serde_json::Value,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: next_node_id(),
            name: name.into(),
            source_index: None,
            kind,
            local: Instance::default(),
            world: Instance::default(),
            cast_shadow: false,
            receive_shadow: false,
            extras: serde_json::Value::Null,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn with_local(mut self, local: Instance) -> Self {
        self.local = local;
        self
    }

    pub fn with_extras(mut self, extras: serde_json::Value) -> Self {
        self.extras = extras;
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub fn material(&self) -> Option<&Material> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(&mesh.material),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&LightNode> {
        match &self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    /// Reads a user-data flag with loose truthiness: `true`, non-zero numbers,
    /// non-empty strings and any array or object count as set.
    pub fn flag(&self, key: &str) -> bool {
        match self.extras.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Array(_)) | Some(serde_json::Value::Object(_)) => true,
        }
    }

    /// Depth-first, pre-order walk over this node and all its descendants.
    pub fn traverse(&self, f: &mut dyn FnMut(&SceneNode)) {
        f(self);
        for child in &self.children {
            child.traverse(f);
        }
    }

    pub fn traverse_mut(&mut self, f: &mut dyn FnMut(&mut SceneNode)) {
        f(self);
        for child in self.children.iter_mut() {
            child.traverse_mut(f);
        }
    }

    pub fn count(&self) -> usize {
        let mut count = 0;
        self.traverse(&mut |_| count += 1);
        count
    }

    pub fn find(&self, id: NodeId) -> Option<&SceneNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SceneNode> {
        if self.name == name {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_name(name))
    }

    pub fn node_at_path(&self, path: &[usize]) -> Option<&SceneNode> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get(*first)?.node_at_path(rest),
        }
    }

    pub fn node_at_path_mut(&mut self, path: &[usize]) -> Option<&mut SceneNode> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get_mut(*first)?.node_at_path_mut(rest),
        }
    }

    /// Maps each glTF node index found in this subtree to its child-index path.
    ///
    /// The first occurrence wins if an index appears more than once.
    pub fn paths_by_source_index(&self) -> HashMap<usize, Vec<usize>> {
        let mut paths = HashMap::new();
        let mut path = Vec::new();
        collect_paths(self, &mut path, &mut paths);
        paths
    }

    /**
     * Recomputes the world transform of this node and all descendants.
     * `parent` is the world transform of the node this one hangs off.
     */
    pub fn update_world_transforms(&mut self, parent: &Instance) {
        self.world = parent * &self.local;
        let world = self.world;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&world);
        }
    }

    pub fn update_world_transform_all(&mut self) {
        self.update_world_transforms(&Instance::default());
    }
}

fn collect_paths(node: &SceneNode, path: &mut Vec<usize>, paths: &mut HashMap<usize, Vec<usize>>) {
    if let Some(index) = node.source_index {
        if paths.contains_key(&index) {
            warn!(
                "glTF node {} appears twice in the scene graph, animations bind to the first one",
                index
            );
        } else {
            paths.insert(index, path.clone());
        }
    }
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        collect_paths(child, path, paths);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn mesh(name: &str) -> SceneNode {
        SceneNode::new(
            name,
            NodeKind::Mesh(MeshNode {
                mesh: 0,
                material: Material::default(),
            }),
        )
    }

    #[test]
    fn node_ids_are_unique() {
        let a = SceneNode::group("a");
        let b = SceneNode::group("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn traversal_is_depth_first_pre_order() {
        let mut root = SceneNode::group("root");
        let mut left = SceneNode::group("left");
        left.add_child(mesh("left.mesh"));
        root.add_child(left);
        root.add_child(mesh("right"));

        let mut order = Vec::new();
        root.traverse(&mut |node| order.push(node.name.clone()));
        assert_eq!(order, ["root", "left", "left.mesh", "right"]);
        assert_eq!(root.count(), 4);
    }

    #[test]
    fn flags_follow_loose_truthiness() {
        let node = SceneNode::group("n").with_extras(json!({
            "yes": true,
            "no": false,
            "one": 1,
            "zero": 0,
            "text": "x",
            "empty": "",
            "obj": {},
        }));
        assert!(node.flag("yes"));
        assert!(!node.flag("no"));
        assert!(node.flag("one"));
        assert!(!node.flag("zero"));
        assert!(node.flag("text"));
        assert!(!node.flag("empty"));
        assert!(node.flag("obj"));
        assert!(!node.flag("missing"));
        assert!(!SceneNode::group("plain").flag("noShadow"));
    }

    #[test]
    fn paths_resolve_back_to_nodes() {
        let mut root = SceneNode::group("root");
        let mut foot = SceneNode::group("foot");
        foot.source_index = Some(3);
        let mut toe = mesh("toe");
        toe.source_index = Some(7);
        foot.add_child(toe);
        root.add_child(SceneNode::group("light rig"));
        root.add_child(foot);

        let paths = root.paths_by_source_index();
        assert_eq!(paths[&3], vec![1]);
        assert_eq!(paths[&7], vec![1, 0]);
        assert_eq!(root.node_at_path(&paths[&7]).map(|n| n.name.as_str()), Some("toe"));
        assert!(root.node_at_path(&[5]).is_none());
    }

    #[test]
    fn world_transforms_accumulate_down_the_tree() {
        let mut root = SceneNode::group("root").with_local(Instance::from(cgmath::Vector3::new(1.0, 0.0, 0.0)));
        let mut child = SceneNode::group("child").with_local(Instance::from(cgmath::Vector3::new(0.0, 2.0, 0.0)));
        child.add_child(SceneNode::group("grandchild").with_local(Instance::from(cgmath::Vector3::new(0.0, 0.0, 3.0))));
        root.add_child(child);
        root.update_world_transform_all();

        let grandchild = root.find_by_name("grandchild").unwrap();
        assert_relative_eq!(grandchild.world.position.x, 1.0);
        assert_relative_eq!(grandchild.world.position.y, 2.0);
        assert_relative_eq!(grandchild.world.position.z, 3.0);
    }

    #[test]
    fn kind_accessors_match_the_tag() {
        let light = SceneNode::new(
            "sun",
            NodeKind::Light(LightNode::new(LightKind::Directional, [1.0; 3], 3.0)),
        );
        assert!(light.light().is_some());
        assert!(light.material().is_none());
        assert!(light.light().unwrap().supports_shadow());

        let hemi = LightNode::new(LightKind::Hemisphere { ground: [0.0; 3] }, [1.0; 3], 1.0);
        assert!(!hemi.supports_shadow());
        assert!(mesh("m").material().is_some());
    }
}
