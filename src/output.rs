use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::pipeline::{BuildResult, LayerPreflight, PreflightResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Summary,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_build(result: &BuildResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_preflight(result: &PreflightResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

pub fn print_build_summary(result: &BuildResult) {
    println!("{CYAN}scenery {} ({}){RESET}", result.name, result.utm);
    if let Some(imagery) = &result.imagery {
        if imagery.reused {
            println!("{YELLOW}  imagery: reused {}{RESET}", imagery.raster);
        } else {
            println!(
                "{GREEN}  imagery: {} found, {} selected, {} downloaded -> {}{RESET}",
                imagery.found, imagery.selected, imagery.downloaded, imagery.raster
            );
        }
    }
    if let Some(height) = &result.height {
        println!(
            "{GREEN}  height: {} tiles, {} downloaded, range {}..{} m -> {}{RESET}",
            height.found, height.downloaded, height.height_min, height.height_max, height.raster
        );
    }
    for layer in &result.layers {
        println!(
            "{GREEN}  layer {}: {} levels, {} tiles{RESET}",
            layer.layer, layer.levels, layer.tiles
        );
    }
    for preview in &result.previews {
        println!("{GREEN}  preview: {preview}{RESET}");
    }
    println!(
        "{CYAN}  manifest: {} ({:.1}s){RESET}",
        result.manifest, result.elapsed_secs
    );
}

pub fn print_preflight_summary(result: &PreflightResult) {
    println!("{CYAN}preflight {} ({}){RESET}", result.name, result.utm);
    let print_layer = |label: &str, layer: &LayerPreflight| {
        let color = if layer.coverage.percent >= 99.9 {
            GREEN
        } else {
            YELLOW
        };
        println!(
            "{color}  {label}: {} via {}: {} found, {} selected, {:.1}% covered{RESET}",
            layer.collection, layer.endpoint, layer.found, layer.selected, layer.coverage.percent
        );
    };
    if let Some(layer) = &result.imagery {
        print_layer("imagery", layer);
    }
    if let Some(layer) = &result.height {
        print_layer("height", layer);
    }
}

/// Forwards pipeline progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => info!("{}", event.message),
        }
    }
}
