//! Headless viewer: loads models, applies selection and coloring, reports
//! picks and writes the composed frame to a PNG.

use cherubim::app::Viewer;
use cherubim::assets::ModelOpenInfo;
use cherubim::options::{load_options, ViewerOptions};
use cherubim::render::ClientRect;
use cherubim::services::ColoringInfo;
use cherubim::ViewerError;
use clap::Parser;
use glam::Vec2;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(about = "Loads models, applies selection and coloring, and renders one frame", version)]
struct Args {
    /// Model file to open (glTF/GLB). Repeat for several models.
    #[arg(long = "model", required = true)]
    models: Vec<PathBuf>,

    /// Viewer options JSON; missing fields keep their defaults
    #[arg(long)]
    options: Option<PathBuf>,

    /// Mesh id (`<model guid>|<mesh name>`) to select. Repeatable.
    #[arg(long = "select")]
    select: Vec<String>,

    /// Mesh id to isolate. Repeatable.
    #[arg(long = "isolate")]
    isolate: Vec<String>,

    /// Coloring as `RRGGBB:OPACITY:ID[,ID...]`. Repeatable.
    #[arg(long = "color", value_parser = parse_coloring)]
    colors: Vec<ColoringInfo>,

    /// Reports the mesh under a client point `X,Y`
    #[arg(long, value_parser = parse_point)]
    pick: Option<Vec2>,

    /// Reports the snapped vertex under a client point `X,Y`
    #[arg(long, value_parser = parse_point)]
    snap: Option<Vec2>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f32,

    /// Where to write the rendered frame
    #[arg(long, default_value = "frame.png")]
    out: PathBuf,
}

fn parse_point(value: &str) -> Result<Vec2, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {value:?}"))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("bad x in {value:?}: {e}"))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("bad y in {value:?}: {e}"))?;
    Ok(Vec2::new(x, y))
}

fn parse_coloring(value: &str) -> Result<ColoringInfo, String> {
    let mut parts = value.splitn(3, ':');
    let (Some(color), Some(opacity), Some(ids)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected RRGGBB:OPACITY:IDS, got {value:?}"));
    };
    let color = u32::from_str_radix(color.trim_start_matches("0x").trim_start_matches('#'), 16)
        .map_err(|e| format!("bad color in {value:?}: {e}"))?;
    let opacity: f32 = opacity
        .parse()
        .map_err(|e| format!("bad opacity in {value:?}: {e}"))?;
    let ids = ids.split(',').map(str::to_string).collect();
    Ok(ColoringInfo::new(color, opacity.clamp(0.0, 1.0), ids))
}

fn open_info(path: &Path) -> ModelOpenInfo {
    let guid = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    ModelOpenInfo::new(path.display().to_string(), guid, name)
}

fn run(args: Args) -> Result<bool, ViewerError> {
    let options = match &args.options {
        Some(path) => load_options(path)?,
        None => ViewerOptions::default(),
    };
    let rect = ClientRect::sized(args.width as f32, args.height as f32);
    let mut viewer = Viewer::new(options, rect, args.pixel_ratio)?;

    let infos: Vec<ModelOpenInfo> = args.models.iter().map(|path| open_info(path)).collect();
    let pending = viewer.open_models(&infos);
    viewer.settle();

    let mut all_loaded = true;
    for result in pending.into_iter().filter_map(|p| p.take()) {
        match result.error {
            Some(error) => {
                log::error!("{} ({}): {}", result.guid, result.url, error);
                all_loaded = false;
            }
            None => log::info!("Opened {}", result.guid),
        }
    }

    if !args.colors.is_empty() {
        viewer.color_items(args.colors.clone());
    }
    if !args.select.is_empty() {
        viewer.select_items(&args.select);
    }
    if !args.isolate.is_empty() {
        viewer.isolate_items(&args.isolate);
    }
    viewer.settle();

    for model in viewer.get_opened_models() {
        log::info!(
            "Model {} \"{}\": {} meshes, {} vertices",
            model.guid,
            model.name,
            model.mesh_count,
            model.vertex_count
        );
    }
    if !viewer.get_selected_items().is_empty() {
        log::info!("Selected: {:?}", viewer.get_selected_items());
    }
    if let Some(point) = args.pick {
        match viewer.pick_mesh_at(point) {
            Some(id) => log::info!("Pick at ({}, {}): {}", point.x, point.y, id),
            None => log::info!("Pick at ({}, {}): nothing", point.x, point.y),
        }
    }
    if let Some(point) = args.snap {
        match viewer.snap_point_at(point) {
            Some(snap) => log::info!(
                "Snap at ({}, {}): {} vertex {:?}",
                point.x,
                point.y,
                snap.mesh_id,
                snap.position
            ),
            None => log::info!("Snap at ({}, {}): nothing", point.x, point.y),
        }
    }

    viewer.render_now();
    viewer.capture_png(&args.out)?;
    log::info!("Wrote {}", args.out.display());
    Ok(all_loaded)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coloring_argument_is_parsed() {
        let info = parse_coloring("#00ff00:0.5:m1|a,m1|b").unwrap();
        assert_eq!(info.color, 0x00FF00);
        assert_eq!(info.opacity, 0.5);
        assert_eq!(info.ids, vec!["m1|a".to_string(), "m1|b".to_string()]);
        assert!(parse_coloring("ff0000:1").is_err());
    }

    #[test]
    fn point_argument_is_parsed() {
        assert_eq!(parse_point("10, 20.5").unwrap(), Vec2::new(10.0, 20.5));
        assert!(parse_point("10").is_err());
    }

    #[test]
    fn model_guid_comes_from_the_file_stem() {
        let info = open_info(Path::new("models/duck.glb"));
        assert_eq!(info.guid, "duck");
        assert_eq!(info.name, "duck.glb");
    }
}
