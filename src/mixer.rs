//! Plays animation clips on a scene graph.
//!
//! The mixer resolves each glTF node index to a path of child indices once, at
//! construction. Every [`AnimationMixer::update`] then samples all running
//! actions, blends outputs that target the same property by weight and writes
//! the result into the nodes' local transforms.

use std::collections::HashMap;

use cgmath::{InnerSpace, VectorSpace};
use log::{debug, warn};

use crate::data_structures::{
    animation::{AnimationClip, Property, Sample},
    instance::Instance,
    scene_graph::SceneNode,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    /// Stop on the last frame and hold it.
    Once,
    #[default]
    Repeat,
}

/// Playback state of one clip.
#[derive(Clone, Debug)]
pub struct AnimationAction {
    clip: AnimationClip,
    pub time: f32,
    pub weight: f32,
    pub time_scale: f32,
    pub loop_mode: LoopMode,
    running: bool,
}

impl AnimationAction {
    fn new(clip: AnimationClip) -> Self {
        Self {
            clip,
            time: 0.0,
            weight: 1.0,
            time_scale: 1.0,
            loop_mode: LoopMode::Repeat,
            running: false,
        }
    }

    pub fn play(&mut self) -> &mut Self {
        self.running = true;
        self
    }

    pub fn stop(&mut self) -> &mut Self {
        self.running = false;
        self.time = 0.0;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    fn advance(&mut self, dt: f32) {
        self.time += dt * self.time_scale;
        let duration = self.clip.duration;
        match self.loop_mode {
            LoopMode::Repeat if duration > 0.0 => self.time = self.time.rem_euclid(duration),
            LoopMode::Repeat => self.time = 0.0,
            LoopMode::Once => self.time = self.time.clamp(0.0, duration),
        }
    }
}

#[derive(Clone, Debug)]
struct Binding {
    path: Vec<usize>,
    /// Local transform at bind time. Properties with a total weight below one
    /// blend towards it.
    rest: Instance,
}

#[derive(Clone, Copy, Debug)]
enum Accumulated {
    Vector(cgmath::Vector3<f32>),
    Rotation(cgmath::Quaternion<f32>),
}

#[derive(Debug, Default)]
pub struct AnimationMixer {
    bindings: HashMap<usize, Binding>,
    actions: Vec<AnimationAction>,
}

impl AnimationMixer {
    /// Binds the mixer to the glTF nodes found below `root`.
    pub fn new(root: &SceneNode) -> Self {
        let bindings = root
            .paths_by_source_index()
            .into_iter()
            .filter_map(|(index, path)| {
                let rest = root.node_at_path(&path)?.local;
                Some((index, Binding { path, rest }))
            })
            .collect();
        Self {
            bindings,
            actions: Vec::new(),
        }
    }

    /// Returns the action of `clip`, creating it on first use. Clips are told
    /// apart by [`AnimationClip::id`], so equally named clips get one action each.
    pub fn clip_action(&mut self, clip: &AnimationClip) -> &mut AnimationAction {
        let position = self
            .actions
            .iter()
            .position(|action| action.clip.id() == clip.id());
        let index = match position {
            Some(index) => index,
            None => {
                let unbound = clip
                    .channels
                    .iter()
                    .filter(|channel| !self.bindings.contains_key(&channel.target))
                    .count();
                if unbound > 0 {
                    warn!(
                        "{} of {} channels of clip {} target nodes that are not in the scene",
                        unbound,
                        clip.channels.len(),
                        clip.name
                    );
                }
                self.actions.push(AnimationAction::new(clip.clone()));
                self.actions.len() - 1
            }
        };
        &mut self.actions[index]
    }

    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    pub fn stop_all(&mut self) {
        self.actions.iter_mut().for_each(|action| {
            action.stop();
        });
    }

    /// Advances all running actions by `dt` seconds and poses `root`.
    ///
    /// `root` must be the node the mixer was created from.
    pub fn update(&mut self, dt: f32, root: &mut SceneNode) {
        let mut accumulated: HashMap<(usize, Property), (Accumulated, f32)> = HashMap::new();

        for action in self.actions.iter_mut().filter(|action| action.running) {
            action.advance(dt);
            if action.weight <= 0.0 {
                continue;
            }
            for channel in &action.clip.channels {
                if !self.bindings.contains_key(&channel.target) {
                    continue;
                }
                let Some(sample) = channel.sample(action.time) else {
                    continue;
                };
                let key = (channel.target, sample.property());
                let weight = action.weight;
                accumulated
                    .entry(key)
                    .and_modify(|(value, total)| {
                        *value = accumulate(*value, sample, weight);
                        *total += weight;
                    })
                    .or_insert_with(|| (first(sample, weight), weight));
            }
        }

        if accumulated.is_empty() {
            return;
        }

        for ((target, property), (value, total)) in accumulated {
            let Some(binding) = self.bindings.get(&target) else {
                continue;
            };
            let Some(node) = root.node_at_path_mut(&binding.path) else {
                debug!("animated node {target} is gone from the scene");
                continue;
            };
            let rest = &binding.rest;
            match (property, value) {
                (Property::Translation, Accumulated::Vector(v)) => {
                    node.local.position = blend_vector(rest.position, v, total);
                }
                (Property::Scale, Accumulated::Vector(v)) => {
                    node.local.scale = blend_vector(rest.scale, v, total);
                }
                (Property::Rotation, Accumulated::Rotation(q)) => {
                    let q = q.normalize();
                    node.local.rotation = if total < 1.0 {
                        rest.rotation.nlerp(q, total)
                    } else {
                        q
                    };
                }
                _ => (),
            }
        }

        root.update_world_transform_all();
    }
}

fn first(sample: Sample, weight: f32) -> Accumulated {
    match sample {
        Sample::Translation(v) | Sample::Scale(v) => Accumulated::Vector(v * weight),
        Sample::Rotation(q) => Accumulated::Rotation(q * weight),
    }
}

fn accumulate(value: Accumulated, sample: Sample, weight: f32) -> Accumulated {
    match (value, sample) {
        (Accumulated::Vector(sum), Sample::Translation(v) | Sample::Scale(v)) => {
            Accumulated::Vector(sum + v * weight)
        }
        (Accumulated::Rotation(sum), Sample::Rotation(q)) => {
            // keep every addend in the hemisphere of the running sum
            let q = if sum.dot(q) < 0.0 { -q } else { q };
            Accumulated::Rotation(sum + q * weight)
        }
        (value, _) => value,
    }
}

/// Weighted average, faded towards the rest value when the weights sum below one.
fn blend_vector(
    rest: cgmath::Vector3<f32>,
    sum: cgmath::Vector3<f32>,
    total: f32,
) -> cgmath::Vector3<f32> {
    let average = sum / total;
    if total < 1.0 {
        rest.lerp(average, total)
    } else {
        average
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::animation::{Channel, Interpolation, Keyframes};
    use approx::assert_relative_eq;

    fn translation_clip(name: &str, target: usize, to: f32) -> AnimationClip {
        AnimationClip::new(
            name,
            vec![Channel {
                target,
                timestamps: vec![0.0, 2.0],
                keyframes: Keyframes::Translation(vec![
                    [0.0, 0.0, 0.0].into(),
                    [to, 0.0, 0.0].into(),
                ]),
                interpolation: Interpolation::Linear,
            }],
        )
    }

    fn scene() -> SceneNode {
        let mut root = SceneNode::group("Scene");
        let mut asset = SceneNode::group("asset");
        let mut foot = SceneNode::group("foot");
        foot.source_index = Some(0);
        let mut toe = SceneNode::group("toe");
        toe.source_index = Some(1);
        foot.add_child(toe);
        asset.add_child(foot);
        root.add_child(SceneNode::group("hemisphere"));
        root.add_child(asset);
        root
    }

    #[test]
    fn every_clip_plays_after_start() {
        let root = scene();
        let mut mixer = AnimationMixer::new(&root);
        let clips = [translation_clip("walk", 0, 4.0), translation_clip("wiggle", 1, 1.0)];
        for clip in &clips {
            mixer.clip_action(clip).play();
        }
        assert_eq!(mixer.actions().len(), 2);
        assert!(mixer.actions().iter().all(AnimationAction::is_running));
        assert!(mixer.actions().iter().all(|a| a.loop_mode == LoopMode::Repeat));
        assert!(mixer.actions().iter().all(|a| a.weight == 1.0));
    }

    #[test]
    fn same_clip_yields_same_action() {
        let root = scene();
        let mut mixer = AnimationMixer::new(&root);
        let clip = translation_clip("walk", 0, 4.0);
        mixer.clip_action(&clip).play();
        mixer.clip_action(&clip).time_scale = 2.0;
        assert_eq!(mixer.actions().len(), 1);
        assert_eq!(mixer.actions()[0].time_scale, 2.0);
    }

    #[test]
    fn clips_sharing_a_name_get_their_own_actions() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        let clips = [translation_clip("Take 001", 0, 4.0), translation_clip("Take 001", 1, 2.0)];
        for clip in &clips {
            mixer.clip_action(clip).play();
        }
        assert_eq!(mixer.actions().len(), 2);
        assert!(mixer.actions().iter().all(AnimationAction::is_running));

        mixer.update(1.0, &mut root);
        assert_relative_eq!(root.find_by_name("foot").unwrap().local.position.x, 2.0);
        assert_relative_eq!(root.find_by_name("toe").unwrap().local.position.x, 1.0);
    }

    #[test]
    fn update_poses_nodes_and_world_transforms() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        mixer.clip_action(&translation_clip("walk", 0, 4.0)).play();
        mixer.update(1.0, &mut root);

        let foot = root.find_by_name("foot").unwrap();
        assert_relative_eq!(foot.local.position.x, 2.0);
        let toe = root.find_by_name("toe").unwrap();
        assert_relative_eq!(toe.world.position.x, 2.0);
    }

    #[test]
    fn repeat_wraps_around_the_duration() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        mixer.clip_action(&translation_clip("walk", 0, 4.0)).play();
        mixer.update(2.5, &mut root);

        assert_relative_eq!(mixer.actions()[0].time, 0.5);
        let foot = root.find_by_name("foot").unwrap();
        assert_relative_eq!(foot.local.position.x, 1.0);
    }

    #[test]
    fn once_holds_the_last_frame() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        let clip = translation_clip("walk", 0, 4.0);
        mixer.clip_action(&clip).loop_mode = LoopMode::Once;
        mixer.clip_action(&clip).play();
        mixer.update(5.0, &mut root);
        assert_relative_eq!(root.find_by_name("foot").unwrap().local.position.x, 4.0);
    }

    #[test]
    fn clips_on_one_property_average_by_weight() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        mixer.clip_action(&translation_clip("a", 0, 4.0)).play();
        mixer.clip_action(&translation_clip("b", 0, 8.0)).play();
        mixer.update(2.0 - f32::EPSILON * 4.0, &mut root);

        // both near their end: (4 + 8) / 2
        let x = root.find_by_name("foot").unwrap().local.position.x;
        assert_relative_eq!(x, 6.0, epsilon = 1e-3);
    }

    #[test]
    fn stopped_actions_leave_the_scene_alone() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        mixer.clip_action(&translation_clip("walk", 0, 4.0)).play();
        mixer.stop_all();
        mixer.update(1.0, &mut root);
        assert_relative_eq!(root.find_by_name("foot").unwrap().local.position.x, 0.0);
    }

    #[test]
    fn channels_for_unknown_nodes_are_ignored() {
        let mut root = scene();
        let mut mixer = AnimationMixer::new(&root);
        mixer.clip_action(&translation_clip("ghost", 42, 4.0)).play();
        mixer.update(1.0, &mut root);
        assert_relative_eq!(root.find_by_name("foot").unwrap().local.position.x, 0.0);
    }
}
