//! Raw buffer files for the upload stage.

use crate::error::Result;
use crate::objects::GpuPrimitive;
use crate::scenes::PreparedScene;
use std::fs;
use std::path::Path;

pub const NODES_FILE: &str = "nodes.bin";
pub const PRIMITIVES_FILE: &str = "primitives.bin";
pub const VERTICES_FILE: &str = "vertices.bin";
pub const UVS_FILE: &str = "uvs.bin";
pub const NORMALS_FILE: &str = "normals.bin";
pub const MARGINAL_FILE: &str = "marginal.bin";
pub const CONDITIONAL_FILE: &str = "conditional.bin";
pub const NODE_TRANSFORMS_FILE: &str = "node_transforms.bin";

/// Bytes written per file, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferSummary {
    pub files: Vec<(&'static str, usize)>,
}

impl BufferSummary {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|(_, n)| n).sum()
    }

    pub fn bytes(&self, name: &str) -> Option<usize> {
        self.files.iter().find(|(f, _)| *f == name).map(|(_, n)| *n)
    }
}

fn write(dir: &Path, name: &'static str, bytes: &[u8], summary: &mut BufferSummary) -> Result<()> {
    fs::write(dir.join(name), bytes)?;
    log::debug!("Wrote {} ({} bytes)", name, bytes.len());
    summary.files.push((name, bytes.len()));
    Ok(())
}

/// Writes every scene buffer into `dir` (created if missing). Empty stages
/// still produce (empty) files so the loader sees a consistent set.
pub fn write_buffers(scene: &PreparedScene, dir: &Path, debug_transforms: bool) -> Result<BufferSummary> {
    fs::create_dir_all(dir)?;
    let mut summary = BufferSummary::default();

    let primitives: Vec<GpuPrimitive> = scene.primitives.iter().map(|p| p.to_gpu()).collect();
    let vertices: Vec<[f32; 3]> = scene.vertices.iter().map(|v| v.coords.into()).collect();
    let uvs: Vec<[f32; 2]> = scene.uvs.iter().map(|v| v.coords.into()).collect();
    let normals: Vec<[f32; 3]> = scene.normals.iter().map(|&n| n.into()).collect();

    write(dir, NODES_FILE, bytemuck::cast_slice(&scene.bvh.nodes), &mut summary)?;
    write(dir, PRIMITIVES_FILE, bytemuck::cast_slice(&primitives), &mut summary)?;
    write(dir, VERTICES_FILE, bytemuck::cast_slice(&vertices), &mut summary)?;
    write(dir, UVS_FILE, bytemuck::cast_slice(&uvs), &mut summary)?;
    write(dir, NORMALS_FILE, bytemuck::cast_slice(&normals), &mut summary)?;
    write(dir, MARGINAL_FILE, bytemuck::cast_slice(&scene.environment.marginal), &mut summary)?;
    write(
        dir,
        CONDITIONAL_FILE,
        bytemuck::cast_slice(&scene.environment.conditional),
        &mut summary,
    )?;

    if debug_transforms {
        let transforms: Vec<[f32; 16]> = scene
            .bvh
            .node_transforms()
            .iter()
            .map(|m| {
                let mut out = [0.0; 16];
                out.copy_from_slice(m.as_slice());
                out
            })
            .collect();
        write(dir, NODE_TRANSFORMS_FILE, bytemuck::cast_slice(&transforms), &mut summary)?;
    }

    log::info!(
        "Wrote {} buffers ({} bytes) to {}",
        summary.files.len(),
        summary.total_bytes(),
        dir.display()
    );

    Ok(summary)
}
