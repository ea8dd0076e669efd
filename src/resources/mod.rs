//! Loading of scene files and environment images.
//!
//! [`load_gltf_asset`] fetches a glTF/GLB file plus everything it references
//! and hands the bytes to [`read_document`], which turns the document into a
//! CPU-side [`LoadedAsset`]: a [`SceneNode`] subtree, one [`MeshData`] per
//! primitive, decoded images and animation clips. GPU upload happens later on
//! the event-loop thread.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use gltf::khr_lights_punctual::Kind;
use log::{debug, info, warn};

use crate::{
    config::{AssetSource, DecoderPaths},
    data_structures::{
        animation::{AnimationClip, Channel, Keyframes},
        instance::Instance,
        scene_graph::{
            ColorEncoding, LightKind, LightNode, Material, MeshNode, NodeKind, SceneNode,
            TextureSlot,
        },
    },
    resources::{
        mesh::{MeshData, read_primitive},
        texture::{ImageData, decode_image},
    },
};

#[cfg(feature = "draco")]
pub mod draco;
pub mod environment;
pub mod ktx;
pub mod mesh;
pub mod texture;

pub const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";
pub const BASISU_EXTENSION: &str = "KHR_texture_basisu";

/// What the loader may decode for a given [`AssetSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderCapabilities {
    pub draco: bool,
    pub decoder_paths: Option<DecoderPaths>,
}

impl LoaderCapabilities {
    pub fn for_source(source: &AssetSource) -> Self {
        if let Some(paths) = &source.decoder_paths {
            info!(
                "decoder paths for {}: draco {}, ktx2 {}",
                source.url, paths.draco, paths.ktx2
            );
        }
        Self {
            draco: source.use_compressed_assets && cfg!(feature = "draco"),
            decoder_paths: source.decoder_paths.clone(),
        }
    }
}

/// Everything parsed out of one scene file.
#[derive(Debug)]
pub struct LoadedAsset {
    /// Root group of the file's scene. Not yet attached to the viewer scene.
    pub scene: SceneNode,
    /// One entry per glTF primitive, indexed by [`MeshNode::mesh`].
    pub meshes: Vec<MeshData>,
    /// glTF images in document order, indexed by [`TextureSlot::image`].
    pub images: Vec<ImageData>,
    pub clips: Vec<AnimationClip>,
    pub extensions_used: Vec<String>,
}

/// External files of a document keyed by the URI they are referenced with.
pub type ExternalFiles = HashMap<String, Vec<u8>>;

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    let window = web_sys::window().context("no window")?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow::anyhow!("page origin is not available"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin))?;
    Ok(base.join(file_name)?)
}

/// Reads an asset from `./assets/` natively or from `<origin>/assets/` on the web.
pub async fn load_binary(file_name: &str) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        let url = format_url(file_name)?;
        reqwest::get(url)
            .await?
            .error_for_status()
            .with_context(|| format!("fetching {file_name}"))?
            .bytes()
            .await?
            .to_vec()
    };
    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        let path = std::path::Path::new("./").join("assets").join(file_name);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
    };

    Ok(data)
}

/// Resolves `uri` against the directory of `base`.
fn resolve_relative(base: &str, uri: &str) -> String {
    match base.rfind('/') {
        Some(slash) => format!("{}{}", &base[..=slash], uri),
        None => uri.to_string(),
    }
}

/// Loads the model of `source` with every external buffer and image it references.
pub async fn load_gltf_asset(source: &AssetSource) -> anyhow::Result<LoadedAsset> {
    let capabilities = LoaderCapabilities::for_source(source);
    let bytes = load_binary(&source.url).await?;
    let gltf = open_document(&bytes).with_context(|| format!("parsing {}", source.url))?;

    let fetches = external_uris(&gltf).into_iter().map(|uri| async move {
        let path = resolve_relative(&source.url, &uri);
        let data = load_binary(&path)
            .await
            .with_context(|| format!("{} references {}", source.url, uri))?;
        anyhow::Ok((uri, data))
    });
    let files: ExternalFiles = futures::future::try_join_all(fetches)
        .await?
        .into_iter()
        .collect();

    let asset = read_document(gltf, &files, &capabilities)
        .with_context(|| format!("loading {}", source.url))?;
    info!(
        "loaded {}: {} nodes, {} meshes, {} images, {} clips",
        source.url,
        asset.scene.count(),
        asset.meshes.len(),
        asset.images.len(),
        asset.clips.len()
    );
    Ok(asset)
}

/// Parses glTF JSON or GLB bytes whose external files are already in memory.
pub fn parse_gltf(
    bytes: &[u8],
    files: &ExternalFiles,
    capabilities: &LoaderCapabilities,
) -> anyhow::Result<LoadedAsset> {
    read_document(open_document(bytes)?, files, capabilities)
}

/**
 * Opens a glTF document.
 *
 * Files that require an extension the `gltf` crate does not know (Draco) fail
 * its validation even though everything else in them is well formed, so those
 * are reopened without validation and checked by [`read_document`] instead.
 */
pub fn open_document(bytes: &[u8]) -> anyhow::Result<gltf::Gltf> {
    match gltf::Gltf::from_slice(bytes) {
        Ok(gltf) => Ok(gltf),
        Err(gltf::Error::Validation(errors)) => {
            debug!("glTF validation reported {} issues, retrying unvalidated", errors.len());
            let gltf = gltf::Gltf::from_slice_without_validation(bytes)?;
            let known = [DRACO_EXTENSION, BASISU_EXTENSION];
            if let Some(unknown) = gltf
                .extensions_required()
                .find(|ext| !known.contains(ext))
            {
                bail!("required extension {unknown} is not supported");
            }
            if gltf.extensions_required().next().is_none() {
                let (path, error) = &errors[0];
                bail!("invalid glTF at {}: {:?}", path, error);
            }
            Ok(gltf)
        }
        Err(e) => Err(e.into()),
    }
}

/// URIs of buffers and images that are neither embedded nor `data:` URIs.
pub fn external_uris(gltf: &gltf::Gltf) -> Vec<String> {
    let buffers = gltf.buffers().filter_map(|buffer| match buffer.source() {
        gltf::buffer::Source::Uri(uri) => Some(uri),
        gltf::buffer::Source::Bin => None,
    });
    let images = gltf.images().filter_map(|image| match image.source() {
        gltf::image::Source::Uri { uri, .. } => Some(uri),
        gltf::image::Source::View { .. } => None,
    });
    let mut seen = HashSet::new();
    buffers
        .chain(images)
        .filter(|uri| !uri.starts_with("data:"))
        .filter(|uri| seen.insert(*uri))
        .map(str::to_string)
        .collect()
}

/// A decoded `data:[<mime>][;base64],<payload>` URI.
struct DataUri {
    mime_type: Option<String>,
    data: Vec<u8>,
}

fn parse_data_uri(uri: &str) -> Option<anyhow::Result<DataUri>> {
    uri.strip_prefix("data:").map(decode_data_uri)
}

fn decode_data_uri(rest: &str) -> anyhow::Result<DataUri> {
    let (header, payload) = rest.split_once(',').context("data URI without payload")?;
    let Some(mime) = header.strip_suffix(";base64") else {
        bail!("only base64 data URIs are supported");
    };
    let data = BASE64.decode(payload).context("invalid base64 in data URI")?;
    Ok(DataUri {
        mime_type: (!mime.is_empty()).then(|| mime.to_string()),
        data,
    })
}

fn uri_bytes(uri: &str, files: &ExternalFiles) -> anyhow::Result<(Vec<u8>, Option<String>)> {
    match parse_data_uri(uri) {
        Some(data_uri) => {
            let data_uri = data_uri?;
            Ok((data_uri.data, data_uri.mime_type))
        }
        None => files
            .get(uri)
            .map(|data| (data.clone(), None))
            .with_context(|| format!("external file {uri} was not loaded")),
    }
}

fn read_buffers(gltf: &gltf::Gltf, files: &ExternalFiles) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        let mut data = match buffer.source() {
            gltf::buffer::Source::Bin => gltf
                .blob
                .clone()
                .context("GLB binary chunk missing")?,
            gltf::buffer::Source::Uri(uri) => uri_bytes(uri, files)?.0,
        };
        if data.len() < buffer.length() {
            bail!(
                "buffer {} holds {} bytes, {} declared",
                buffer.index(),
                data.len(),
                buffer.length()
            );
        }
        // the reader addresses whole 4-byte words
        while data.len() % 4 != 0 {
            data.push(0);
        }
        buffers.push(data);
    }
    Ok(buffers)
}

fn read_images(gltf: &gltf::Gltf, buffers: &[Vec<u8>], files: &ExternalFiles) -> anyhow::Result<Vec<ImageData>> {
    let mut images = Vec::new();
    for image in gltf.images() {
        let name = image
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{}", image.index()));
        let decoded = match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let data = buffers
                    .get(view.buffer().index())
                    .and_then(|buffer| buffer.get(view.offset()..view.offset() + view.length()))
                    .with_context(|| format!("bufferView of {name} is out of range"))?;
                decode_image(&name, data, Some(mime_type))
            }
            gltf::image::Source::Uri { uri, mime_type } => {
                let (data, data_mime) = uri_bytes(uri, files)?;
                let ktx2 = uri.to_ascii_lowercase().ends_with(".ktx2");
                let mime_type = mime_type
                    .map(str::to_string)
                    .or(data_mime)
                    .or_else(|| ktx2.then(|| "image/ktx2".to_string()));
                decode_image(&name, &data, mime_type.as_deref())
            }
        };
        images.push(decoded);
    }
    Ok(images)
}

fn read_material(material: &gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();
    Material {
        name: material
            .name()
            .map(str::to_string)
            .or_else(|| material.index().map(|i| format!("material_{i}")))
            .unwrap_or_else(|| "default".to_string()),
        base_color_factor: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        base_color_texture: pbr
            .base_color_texture()
            .and_then(|info| texture_image(&info.texture()))
            .map(|image| TextureSlot {
                image,
                encoding: ColorEncoding::Linear,
            }),
        double_sided: material.double_sided(),
    }
}

/// The image a texture samples. With UASTC transcoding built in, the KTX2
/// image of `KHR_texture_basisu` wins over the core `source`; without it the
/// core image does, and the other one is the fallback either way.
fn texture_image(texture: &gltf::Texture) -> Option<usize> {
    let basisu = texture
        .extension_value(BASISU_EXTENSION)
        .and_then(|ext| ext.get("source"))
        .and_then(serde_json::Value::as_u64)
        .map(|source| source as usize);
    let core = texture.source().map(|image| image.index());
    if cfg!(feature = "basisu") {
        basisu.or(core)
    } else {
        core.or(basisu)
    }
}

fn read_light(light: &gltf::khr_lights_punctual::Light) -> LightNode {
    let kind = match light.kind() {
        Kind::Directional => LightKind::Directional,
        Kind::Point => LightKind::Point {
            range: light.range(),
        },
        Kind::Spot {
            inner_cone_angle,
            outer_cone_angle,
        } => LightKind::Spot {
            range: light.range(),
            inner_cone: inner_cone_angle,
            outer_cone: outer_cone_angle,
        },
    };
    LightNode::new(kind, light.color(), light.intensity())
}

fn read_extras(extras: &gltf::json::Extras) -> serde_json::Value {
    extras
        .as_ref()
        .and_then(|raw| match serde_json::from_str(raw.get()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("ignoring unreadable extras: {e}");
                None
            }
        })
        .unwrap_or(serde_json::Value::Null)
}

/// Copies the keys of `over` into `base`. A non-object `over` replaces
/// `base` unless it is null.
fn merge_extras(base: &mut serde_json::Value, over: serde_json::Value) {
    match (base.as_object_mut(), over) {
        (_, serde_json::Value::Null) => (),
        (Some(base), serde_json::Value::Object(over)) => base.extend(over),
        (_, over) => *base = over,
    }
}

fn read_clip(animation: &gltf::Animation, buffers: &[Vec<u8>]) -> AnimationClip {
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("animation_{}", animation.index()));
    let mut channels = Vec::new();
    for channel in animation.channels() {
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
        let Some(inputs) = reader.read_inputs() else {
            warn!("{name}: channel {} has no keyframe times", channel.index());
            continue;
        };
        let timestamps: Vec<f32> = inputs.collect();
        let keyframes = match reader.read_outputs() {
            Some(gltf::animation::util::ReadOutputs::Translations(translations)) => {
                Keyframes::Translation(translations.map(Into::into).collect())
            }
            Some(gltf::animation::util::ReadOutputs::Rotations(rotations)) => Keyframes::Rotation(
                rotations
                    .into_f32()
                    .map(|[x, y, z, w]| cgmath::Quaternion::new(w, x, y, z))
                    .collect(),
            ),
            Some(gltf::animation::util::ReadOutputs::Scales(scales)) => {
                Keyframes::Scale(scales.map(Into::into).collect())
            }
            Some(gltf::animation::util::ReadOutputs::MorphTargetWeights(_)) => {
                warn!("{name}: morph target animation is not supported");
                Keyframes::Other
            }
            None => {
                warn!("{name}: channel {} has no keyframe values", channel.index());
                continue;
            }
        };
        channels.push(Channel {
            target: channel.target().node().index(),
            timestamps,
            keyframes,
            interpolation: channel.sampler().interpolation().into(),
        });
    }
    AnimationClip::new(name, channels)
}

/// Scene nodes are built from these once every mesh has been read.
struct NodeBuilder<'a> {
    /// Per glTF mesh: (index into `LoadedAsset::meshes`, material) per primitive.
    primitives: &'a [Vec<(usize, Material)>],
    visited: HashSet<usize>,
}

impl NodeBuilder<'_> {
    /**
     * A glTF node owns up to two objects, its mesh and its light. With exactly
     * one the scene node is that object. Otherwise it is a group holding them.
     * Its glTF children are attached to whichever node results.
     */
    fn build(&mut self, node: gltf::Node) -> Option<SceneNode> {
        if !self.visited.insert(node.index()) {
            warn!("glTF node {} is referenced twice, ignoring the repeat", node.index());
            return None;
        }
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index()));

        let mut objects = Vec::new();
        if let Some(mesh) = node.mesh() {
            objects.push(self.mesh_object(&mesh));
        }
        if let Some(light) = node.light() {
            let light_name = light.name().unwrap_or(&name).to_string();
            objects.push(SceneNode::new(light_name, NodeKind::Light(read_light(&light))));
        }

        let mut scene_node = if objects.len() == 1 {
            let mut object = objects.remove(0);
            object.name = name;
            object
        } else {
            let mut group = SceneNode::group(name);
            group.children = objects;
            group
        };
        scene_node.source_index = Some(node.index());
        scene_node.local = Instance::from(node.transform().decomposed());
        merge_extras(&mut scene_node.extras, read_extras(node.extras()));

        for child in node.children() {
            if let Some(child) = self.build(child) {
                scene_node.add_child(child);
            }
        }
        Some(scene_node)
    }

    fn mesh_object(&self, mesh: &gltf::Mesh) -> SceneNode {
        let name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
        let primitives = self
            .primitives
            .get(mesh.index())
            .map(Vec::as_slice)
            .unwrap_or_default();
        // every primitive carries the mesh's own metadata
        let extras = read_extras(mesh.extras());
        let mesh_node = |(mesh, material): &(usize, Material), name: String| {
            let mut node = SceneNode::new(
                name,
                NodeKind::Mesh(MeshNode {
                    mesh: *mesh,
                    material: material.clone(),
                }),
            );
            node.extras = extras.clone();
            node
        };
        match primitives {
            [single] => mesh_node(single, name),
            _ => {
                let mut group = SceneNode::group(name.clone());
                for (i, primitive) in primitives.iter().enumerate() {
                    group.add_child(mesh_node(primitive, format!("{name}_{i}")));
                }
                group
            }
        }
    }
}

fn read_meshes(
    gltf: &gltf::Gltf,
    buffers: &[Vec<u8>],
    capabilities: &LoaderCapabilities,
) -> anyhow::Result<(Vec<MeshData>, Vec<Vec<(usize, Material)>>)> {
    let materials: Vec<Material> = gltf.materials().map(|m| read_material(&m)).collect();
    let mut meshes = Vec::new();
    let mut primitives = Vec::new();
    for mesh in gltf.meshes() {
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
        let mut entries = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                warn!("{mesh_name}: skipping {:?} primitive", primitive.mode());
                continue;
            }
            let name = format!("{mesh_name}.{}", primitive.index());
            let data = if primitive.extension_value(DRACO_EXTENSION).is_some() {
                read_draco_primitive(&name, gltf, buffers, &primitive, capabilities)?
            } else {
                read_primitive(&name, &primitive, buffers)?
            };
            let material = primitive
                .material()
                .index()
                .and_then(|i| materials.get(i).cloned())
                .unwrap_or_default();
            entries.push((meshes.len(), material));
            meshes.push(data);
        }
        primitives.push(entries);
    }
    Ok((meshes, primitives))
}

#[cfg(feature = "draco")]
fn read_draco_primitive(
    name: &str,
    gltf: &gltf::Gltf,
    buffers: &[Vec<u8>],
    primitive: &gltf::Primitive,
    capabilities: &LoaderCapabilities,
) -> anyhow::Result<MeshData> {
    if !capabilities.draco {
        bail!("{name} is Draco compressed but the asset source is not configured for compressed assets");
    }
    draco::decode_primitive(name, &gltf.document, buffers, primitive)
}

#[cfg(not(feature = "draco"))]
fn read_draco_primitive(
    name: &str,
    _gltf: &gltf::Gltf,
    _buffers: &[Vec<u8>],
    _primitive: &gltf::Primitive,
    _capabilities: &LoaderCapabilities,
) -> anyhow::Result<MeshData> {
    bail!("{name} uses {DRACO_EXTENSION}; build with the `draco` feature to decode it")
}

/// Turns an opened document into a [`LoadedAsset`].
pub fn read_document(
    gltf: gltf::Gltf,
    files: &ExternalFiles,
    capabilities: &LoaderCapabilities,
) -> anyhow::Result<LoadedAsset> {
    let extensions_used: Vec<String> = gltf.extensions_used().map(str::to_string).collect();
    if extensions_used.iter().any(|ext| ext == BASISU_EXTENSION) && !cfg!(feature = "basisu") {
        warn!("{BASISU_EXTENSION} UASTC textures need the `basisu` feature, core images are used where present");
    }

    let buffers = read_buffers(&gltf, files)?;
    let images = read_images(&gltf, &buffers, files)?;
    let (meshes, primitives) = read_meshes(&gltf, &buffers, capabilities)?;
    let clips = gltf.animations().map(|a| read_clip(&a, &buffers)).collect();

    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .context("document has no scene")?;
    let mut root = SceneNode::group(
        scene
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("scene_{}", scene.index())),
    );
    let mut builder = NodeBuilder {
        primitives: &primitives,
        visited: HashSet::new(),
    };
    for node in scene.nodes() {
        if let Some(node) = builder.build(node) {
            root.add_child(node);
        }
    }
    root.update_world_transform_all();

    Ok(LoadedAsset {
        scene: root,
        meshes,
        images,
        clips,
        extensions_used,
    })
}
