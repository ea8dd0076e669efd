//! Animation clips as read from glTF and keyframe sampling.

use std::sync::atomic::{AtomicU64, Ordering};

use cgmath::{InnerSpace, VectorSpace};

static NEXT_CLIP_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug, PartialEq)]
pub enum Keyframes {
    Translation(Vec<cgmath::Vector3<f32>>),
    Rotation(Vec<cgmath::Quaternion<f32>>),
    Scale(Vec<cgmath::Vector3<f32>>),
    // TODO: implement morph target weights
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
    /// Every keyframe stores (in-tangent, value, out-tangent).
    CubicSpline,
}

impl From<gltf::animation::Interpolation> for Interpolation {
    fn from(interpolation: gltf::animation::Interpolation) -> Self {
        match interpolation {
            gltf::animation::Interpolation::Step => Interpolation::Step,
            gltf::animation::Interpolation::Linear => Interpolation::Linear,
            gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
        }
    }
}

/// The node property a channel drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Translation,
    Rotation,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Translation(cgmath::Vector3<f32>),
    Rotation(cgmath::Quaternion<f32>),
    Scale(cgmath::Vector3<f32>),
}

impl Sample {
    pub fn property(&self) -> Property {
        match self {
            Sample::Translation(_) => Property::Translation,
            Sample::Rotation(_) => Property::Rotation,
            Sample::Scale(_) => Property::Scale,
        }
    }
}

/// One animated property of one glTF node.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    /// glTF node index the channel targets.
    pub target: usize,
    pub timestamps: Vec<f32>,
    pub keyframes: Keyframes,
    pub interpolation: Interpolation,
}

impl Channel {
    pub fn property(&self) -> Option<Property> {
        match self.keyframes {
            Keyframes::Translation(_) => Some(Property::Translation),
            Keyframes::Rotation(_) => Some(Property::Rotation),
            Keyframes::Scale(_) => Some(Property::Scale),
            Keyframes::Other => None,
        }
    }

    pub fn duration(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }

    /// Samples the channel at `time` seconds, clamping outside the keyframe range.
    pub fn sample(&self, time: f32) -> Option<Sample> {
        let len = self.timestamps.len();
        if len == 0 {
            return None;
        }
        let next = self.timestamps.partition_point(|&ts| ts <= time);
        let (from, to, amount) = if next == 0 {
            (0, 0, 0.0)
        } else if next >= len {
            (len - 1, len - 1, 0.0)
        } else {
            let from = next - 1;
            let span = self.timestamps[next] - self.timestamps[from];
            let amount = if span > 0.0 {
                (time - self.timestamps[from]) / span
            } else {
                0.0
            };
            (from, next, amount)
        };
        let span = self.timestamps[to] - self.timestamps[from];

        match &self.keyframes {
            Keyframes::Translation(values) => self
                .sample_vec3(values, from, to, amount, span)
                .map(Sample::Translation),
            Keyframes::Scale(values) => self
                .sample_vec3(values, from, to, amount, span)
                .map(Sample::Scale),
            Keyframes::Rotation(values) => self
                .sample_quat(values, from, to, amount, span)
                .map(Sample::Rotation),
            Keyframes::Other => None,
        }
    }

    fn sample_vec3(
        &self,
        values: &[cgmath::Vector3<f32>],
        from: usize,
        to: usize,
        amount: f32,
        span: f32,
    ) -> Option<cgmath::Vector3<f32>> {
        match self.interpolation {
            Interpolation::Step => values.get(from).copied(),
            Interpolation::Linear => {
                let a = *values.get(from)?;
                let b = *values.get(to)?;
                Some(a.lerp(b, amount))
            }
            Interpolation::CubicSpline => {
                let v0 = *values.get(from * 3 + 1)?;
                let b0 = *values.get(from * 3 + 2)?;
                let a1 = *values.get(to * 3)?;
                let v1 = *values.get(to * 3 + 1)?;
                let [h00, h10, h01, h11] = hermite(amount);
                Some(v0 * h00 + b0 * (h10 * span) + v1 * h01 + a1 * (h11 * span))
            }
        }
    }

    fn sample_quat(
        &self,
        values: &[cgmath::Quaternion<f32>],
        from: usize,
        to: usize,
        amount: f32,
        span: f32,
    ) -> Option<cgmath::Quaternion<f32>> {
        match self.interpolation {
            Interpolation::Step => values.get(from).copied(),
            Interpolation::Linear => {
                let a = *values.get(from)?;
                let b = *values.get(to)?;
                Some(slerp_shortest(a, b, amount))
            }
            Interpolation::CubicSpline => {
                let v0 = *values.get(from * 3 + 1)?;
                let b0 = *values.get(from * 3 + 2)?;
                let a1 = *values.get(to * 3)?;
                let v1 = *values.get(to * 3 + 1)?;
                let [h00, h10, h01, h11] = hermite(amount);
                let q = v0 * h00 + b0 * (h10 * span) + v1 * h01 + a1 * (h11 * span);
                Some(q.normalize())
            }
        }
    }
}

fn hermite(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        2.0 * t3 - 3.0 * t2 + 1.0,
        t3 - 2.0 * t2 + t,
        -2.0 * t3 + 3.0 * t2,
        t3 - t2,
    ]
}

/// Spherical interpolation along the shorter arc.
pub fn slerp_shortest(
    a: cgmath::Quaternion<f32>,
    b: cgmath::Quaternion<f32>,
    amount: f32,
) -> cgmath::Quaternion<f32> {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    if a.dot(b) > 0.9995 {
        // nearly parallel, slerp would divide by ~0
        return a.nlerp(b, amount);
    }
    a.slerp(b, amount)
}

/// A named set of channels that play together.
///
/// Names need not be unique within a file. Every clip gets an id on
/// construction that its clones share, and that is what identifies it.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationClip {
    id: u64,
    pub name: String,
    pub duration: f32,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let duration = channels
            .iter()
            .map(Channel::duration)
            .fold(0.0_f32, f32::max);
        Self {
            id: NEXT_CLIP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            duration,
            channels,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
