//! Viewer configuration.
//!
//! The viewer loads either a plain model or a compressed one that needs
//! decoders. Both are expressed as an [`AssetSource`] inside a single
//! [`ViewerConfig`].

use anyhow::bail;
use clap::Parser;

/// Default target frame rate of the render loop.
pub const FRAMERATE: u32 = 30;
/// Shadow mapping is on unless explicitly disabled.
pub const USE_SHADOWS: bool = true;

pub const DEFAULT_MODEL: &str = "foot/foot.glb";
pub const DEFAULT_COMPRESSED_MODEL: &str = "foot/foot-draco-uastc.glb";
pub const DEFAULT_ENVIRONMENT: &str = "hdr/forest.exr";

/// Where the mesh and texture decoders of the compressed variant live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderPaths {
    pub draco: String,
    pub ktx2: String,
}

impl Default for DecoderPaths {
    fn default() -> Self {
        Self {
            draco: "lib/draco/".to_string(),
            ktx2: "lib/basis/".to_string(),
        }
    }
}

/// The scene file to load and how to decode it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSource {
    pub url: String,
    pub use_compressed_assets: bool,
    pub decoder_paths: Option<DecoderPaths>,
}

impl AssetSource {
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            use_compressed_assets: false,
            decoder_paths: None,
        }
    }

    pub fn compressed(url: impl Into<String>, decoder_paths: DecoderPaths) -> Self {
        Self {
            url: url.into(),
            use_compressed_assets: true,
            decoder_paths: Some(decoder_paths),
        }
    }
}

/// Initial camera rig. Angles in degrees, distances in scene units.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub auto_rotate: bool,
    pub enable_pan: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fovy: 40.0,
            znear: 0.1,
            zfar: 1000.0,
            position: [0.0, 5.0, 12.0],
            target: [0.0, 2.0, 0.0],
            auto_rotate: true,
            enable_pan: false,
        }
    }
}

/// Hemisphere light added to every scene before the asset arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct HemisphereSettings {
    pub sky: u32,
    pub ground: u32,
    pub intensity: f32,
}

impl Default for HemisphereSettings {
    fn default() -> Self {
        Self {
            sky: 0xf0d0d0,
            ground: 0x101030,
            intensity: 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewerConfig {
    pub model: AssetSource,
    pub environment_url: Option<String>,
    pub use_shadows: bool,
    pub framerate: u32,
    pub camera: CameraSettings,
    pub hemisphere: HemisphereSettings,
    pub clear_colour: wgpu::Color,
    /// Shown instead of the scene when the model could not be loaded.
    pub error_colour: wgpu::Color,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model: AssetSource::plain(DEFAULT_MODEL),
            environment_url: Some(DEFAULT_ENVIRONMENT.to_string()),
            use_shadows: USE_SHADOWS,
            framerate: FRAMERATE,
            camera: CameraSettings::default(),
            hemisphere: HemisphereSettings::default(),
            clear_colour: wgpu::Color::BLACK,
            error_colour: wgpu::Color {
                r: 0.35,
                g: 0.02,
                b: 0.02,
                a: 1.0,
            },
        }
    }
}

impl ViewerConfig {
    /// The compressed variant: Draco geometry and KTX2 textures.
    pub fn compressed() -> Self {
        Self {
            model: AssetSource::compressed(DEFAULT_COMPRESSED_MODEL, DecoderPaths::default()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.framerate == 0 {
            bail!("framerate must be positive");
        }
        if self.model.url.is_empty() {
            bail!("no model configured");
        }
        if self.model.use_compressed_assets && self.model.decoder_paths.is_none() {
            bail!(
                "{} is configured as compressed but no decoder paths were given",
                self.model.url
            );
        }
        Ok(())
    }
}

/// Command line of the native viewer.
#[derive(Debug, Parser)]
#[command(name = "foot-viewer", about = "Shows an animated glTF model lit by an HDR environment")]
pub struct CliArgs {
    /// Model below ./assets/, glTF or GLB
    pub model: Option<String>,
    /// Equirectangular HDR or EXR panorama below ./assets/
    pub environment: Option<String>,
    /// The model is Draco/KTX2 compressed
    #[arg(long)]
    pub compressed: bool,
    #[arg(long, value_name = "DIR")]
    pub draco_decoder: Option<String>,
    #[arg(long, value_name = "DIR")]
    pub ktx2_transcoder: Option<String>,
    #[arg(long)]
    pub no_shadows: bool,
    /// Frames rendered per second at most
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub fps: Option<u32>,
}

impl CliArgs {
    /// Applies the arguments on top of `config` and validates the result.
    pub fn apply(self, mut config: ViewerConfig) -> anyhow::Result<ViewerConfig> {
        if let Some(model) = self.model {
            config.model.url = model;
        }
        if let Some(environment) = self.environment {
            config.environment_url = Some(environment);
        }
        if self.compressed {
            config.model.use_compressed_assets = true;
            config.model.decoder_paths.get_or_insert_with(DecoderPaths::default);
        }
        if let Some(dir) = self.draco_decoder {
            config.model.decoder_paths.get_or_insert_with(DecoderPaths::default).draco = dir;
        }
        if let Some(dir) = self.ktx2_transcoder {
            config.model.decoder_paths.get_or_insert_with(DecoderPaths::default).ktx2 = dir;
        }
        if self.no_shadows {
            config.use_shadows = false;
        }
        if let Some(fps) = self.fps {
            config.framerate = fps;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Splits a `0xRRGGBB` colour into linear-ish `[r, g, b]` floats.
pub fn hex_to_rgb(hex: u32) -> [f32; 3] {
    [
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    ]
}
