use crate::bounds::Aabb;
use crate::bvh::{compute_world_bounds, BvhBuilder, Bvh, DEFAULT_LEAF_SLOTS};
use crate::config::SceneConfig;
use crate::error::Result;
use crate::objects::tri_mesh::TriMesh;
use crate::objects::Primitive;
use crate::textures::{self, distribution::EnvMapDistribution};
use na::{Point2, Point3, Vector3};

/// Everything the GPU stage needs for one static scene.
#[derive(Debug, Clone, Default)]
pub struct PreparedScene {
    pub vertices: Vec<Point3<f32>>,
    pub uvs: Vec<Point2<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub primitives: Vec<Primitive>,
    pub world_bounds: Aabb,
    pub bvh: Bvh<DEFAULT_LEAF_SLOTS>,
    pub environment: EnvMapDistribution,
}

impl PreparedScene {
    /// Appends a mesh, re-basing its indices onto the shared attribute arrays.
    pub fn add_mesh(&mut self, mesh: TriMesh) {
        let mesh = mesh.offset_by(
            self.vertices.len() as u32,
            self.uvs.len() as u32,
            self.normals.len() as u32,
        );

        self.vertices.extend(mesh.vertices);
        self.uvs.extend(mesh.uvs);
        self.normals.extend(mesh.normals);
        self.primitives.extend(mesh.primitives);
    }
}

/// Gathers primitives from the config, then builds the BVH and the
/// environment distribution. Disabled stages produce empty output.
pub fn prepare(config: &SceneConfig) -> Result<PreparedScene> {
    let mut scene = PreparedScene::default();

    for (i, p) in config.primitives.iter().enumerate() {
        let primitive = Primitive::new(p.kind, p.material, p.params(), &p.transform.matrix())
            .map_err(|e| {
                log::error!("Primitive {} ({:?}) rejected", i, p.kind);
                e
            })?;
        scene.primitives.push(primitive);
    }

    for m in &config.meshes {
        if !m.enabled {
            log::info!("Skipping disabled mesh {}", m.path.display());
            continue;
        }
        let mesh = TriMesh::load(&m.path, &m.transform.matrix(), m.material)?;
        log::info!(
            "Loaded {}: {} triangles",
            m.path.display(),
            mesh.primitives.len()
        );
        scene.add_mesh(mesh);
    }

    scene.world_bounds = compute_world_bounds(&scene.primitives);
    log::info!(
        "Scene has {} primitives, world bounds {:?} .. {:?}",
        scene.primitives.len(),
        scene.world_bounds.min,
        scene.world_bounds.max
    );

    // Both builds own their state, so they can run side by side
    let (bvh, environment) = rayon::join(
        || build_scene_bvh(config, &scene.primitives, scene.world_bounds),
        || build_environment(config),
    );
    scene.bvh = bvh?;
    scene.environment = environment?;

    Ok(scene)
}

fn build_scene_bvh(
    config: &SceneConfig,
    primitives: &[Primitive],
    world_bounds: Aabb,
) -> Result<Bvh<DEFAULT_LEAF_SLOTS>> {
    // Validate even when disabled so a bad file fails early
    let threshold = config.bvh.threshold()?;
    if !config.bvh.enabled {
        log::warn!("BVH build disabled");
        return Ok(Bvh::empty());
    }

    Ok(BvhBuilder::<DEFAULT_LEAF_SLOTS>::new(primitives, world_bounds, threshold)?.build())
}

fn build_environment(config: &SceneConfig) -> Result<EnvMapDistribution> {
    let env = &config.environment;
    match (&env.path, env.enabled) {
        (Some(path), true) => {
            let image = textures::load_hdr(path)?;
            Ok(EnvMapDistribution::build(&image))
        }
        (None, true) => {
            log::warn!("Environment enabled without a path, skipping");
            Ok(EnvMapDistribution::empty())
        }
        (_, false) => Ok(EnvMapDistribution::empty()),
    }
}
