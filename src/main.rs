use scene_prep::config::SceneConfig;
use scene_prep::{export, scenes};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

fn elapsed(since: SystemTime) -> Duration {
    match since.elapsed() {
        Ok(elapsed) => elapsed,
        Err(e) => {
            log::error!("Failed to get elapsed time: {}", e);
            Duration::from_secs(0)
        }
    }
}

fn run(scene_path: PathBuf, out_dir: Option<PathBuf>) -> scene_prep::Result<()> {
    let config = SceneConfig::load(&scene_path)?;
    let out_dir = out_dir.unwrap_or_else(|| config.output.dir.clone());

    log::info!("Preparing scene {}...", scene_path.display());
    let now = SystemTime::now();
    let scene = scenes::prepare(&config)?;
    let build_elapsed = elapsed(now);

    log::info!("Writing buffers...");
    let now = SystemTime::now();
    let summary = export::write_buffers(&scene, &out_dir, config.output.debug_transforms)?;
    let write_elapsed = elapsed(now);

    log::info!(
        "Done. {} nodes, {} primitives, {} bytes. Build time: {:?}. Write time: {:?}",
        scene.bvh.nodes.len(),
        scene.primitives.len(),
        summary.total_bytes(),
        build_elapsed,
        write_elapsed
    );

    Ok(())
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = std::env::args_os().skip(1);
    let (scene_path, out_dir) = match (args.next(), args.next(), args.next()) {
        (Some(scene), out, None) => (PathBuf::from(scene), out.map(PathBuf::from)),
        _ => {
            eprintln!("usage: scene-prep <scene.toml> [output-dir]");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(scene_path, out_dir) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
