use crate::bvh::DEFAULT_THRESHOLD;
use crate::error::{Error, Result};
use crate::objects::PrimitiveKind;
use na::{Matrix4, Rotation3, Vector3, Vector4};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Scene description read from TOML. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneConfig {
    pub bvh: BvhConfig,
    pub environment: EnvironmentConfig,
    pub output: OutputConfig,
    pub primitives: Vec<PrimitiveConfig>,
    pub meshes: Vec<MeshConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BvhConfig {
    pub enabled: bool,
    // Signed so a negative value is reported instead of failing to parse
    pub threshold: i64,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_THRESHOLD as i64,
        }
    }
}

impl BvhConfig {
    pub fn threshold(&self) -> Result<usize> {
        usize::try_from(self.threshold)
            .map_err(|_| Error::config(format!("bvh threshold must be >= 0, got {}", self.threshold)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub debug_transforms: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            debug_transforms: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrimitiveConfig {
    pub kind: PrimitiveKind,
    #[serde(default)]
    pub material: u32,
    #[serde(default)]
    pub params: [f32; 4],
    #[serde(default)]
    pub transform: TransformConfig,
}

impl PrimitiveConfig {
    pub fn params(&self) -> Vector4<f32> {
        Vector4::from(self.params)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub material: u32,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub transform: TransformConfig,
}

fn enabled() -> bool {
    true
}

/// `translate * rotate * scale`, rotation as XYZ euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub translate: [f32; 3],
    pub rotate: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            translate: [0.0; 3],
            rotate: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl TransformConfig {
    pub fn matrix(&self) -> Matrix4<f32> {
        let [rx, ry, rz] = self.rotate.map(f32::to_radians);
        Matrix4::new_translation(&Vector3::from(self.translate))
            * Rotation3::from_euler_angles(rx, ry, rz).to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&Vector3::from(self.scale))
    }
}

impl SceneConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::parse(format!("scene config: {}", e)))
    }

    /// Loads a scene file. Relative paths inside it are resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading scene config: {}...", path.display());

        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        self.meshes.iter_mut().for_each(|m| resolve(&mut m.path));
        if let Some(p) = self.environment.path.as_mut() {
            resolve(p);
        }
        resolve(&mut self.output.dir);
    }
}
