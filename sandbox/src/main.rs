// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Renders an animated scene for a fixed number of frames, off-screen, and logs what
//! the frame manager did each frame.
//!
//! ```text
//! sandbox [CONFIG.ron] [--frames N] [--mock]
//! ```

mod scene;

use anyhow::{Context, Result};
use scene::{DemoScene, WATER_ID};
use std::sync::Arc;
use std::time::Instant;
use strata_core::math::{Ray, Vec3};
use strata_core::renderer::GraphicsBackend;
use strata_core::testing::MockBackend;
use strata_frame::frame::DebugView;
use strata_frame::{FrameConfig, FrameOrchestrator};
use strata_infra::telemetry::{init_logging, DEFAULT_FILTER};
use strata_infra::{WgpuBackend, WgpuBackendOptions};

const DEFAULT_CONFIG: &str = "sandbox/frame.ron";

struct Args {
    config: Option<String>,
    frames: u64,
    mock: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        frames: 120,
        mock: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mock" => args.mock = true,
            "--frames" => {
                let value = iter.next().context("--frames needs a value")?;
                args.frames = value.parse().with_context(|| format!("invalid frame count '{value}'"))?;
            }
            path => args.config = Some(path.to_owned()),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&str>) -> Result<FrameConfig> {
    match path {
        Some(path) => Ok(FrameConfig::load(path)?),
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => Ok(FrameConfig::load(DEFAULT_CONFIG)?),
        None => {
            log::info!("No configuration file, using defaults");
            Ok(FrameConfig::default())
        }
    }
}

fn create_backend(mock: bool) -> Arc<dyn GraphicsBackend> {
    if !mock {
        match WgpuBackend::new(WgpuBackendOptions::default()) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => log::warn!("wgpu backend unavailable ({e:#}); falling back to the mock backend"),
        }
    }
    Arc::new(MockBackend::new())
}

fn main() -> Result<()> {
    init_logging(DEFAULT_FILTER);
    let args = parse_args()?;
    let config = load_config(args.config.as_deref())?;
    log::debug!("Frame configuration:\n{}", config.to_ron_string()?);

    let backend = create_backend(args.mock);
    let info = backend.adapter_info();
    log::info!("Rendering on '{}' ({:?})", info.name, info.backend_type);

    let mut frames = FrameOrchestrator::new(backend, config).context("creating the frame orchestrator")?;
    let mut scene = DemoScene::new(&mut frames, 6)?;
    log::info!(
        "{} meshes registered, ray tracing {}",
        frames.mesh_count(),
        if frames.ray_tracing_enabled() { "on" } else { "off" }
    );

    let start = Instant::now();
    let mut selected = None;
    for frame in 0..args.frames {
        let t = frame as f32 / 60.0;
        scene.animate_water(&mut frames, t)?;

        let debug_view = match (frame / 40) % 3 {
            1 => DebugView::Depth,
            _ => DebugView::None,
        };
        let description = scene.describe(t, selected, debug_view);
        let output = frames.render_frame(&description)?;

        let stats = output.stats;
        log::debug!(
            "Frame {}: {} draws, {} culled, BLAS {}/{} (build/refit), TLAS {:?}, {} upload bytes{}",
            output.frame_index,
            stats.draw_calls,
            stats.culled,
            stats.blas_builds,
            stats.blas_refits,
            stats.tlas,
            stats.upload_bytes,
            if stats.waited_for_slot { ", waited" } else { "" }
        );

        if frame % 30 == 29 {
            let eye = description.camera.position;
            let ray = Ray::new(eye, (Vec3::ZERO - eye).normalize());
            selected = frames.pick(&ray).map(|hit| hit.instance_id).filter(|&id| id != WATER_ID);
            let timings = frames.gpu_timings();
            log::info!(
                "Frame {}: picked {selected:?}, GPU frame {:.3} ms (main pass {:.3} ms), {} pending releases",
                output.frame_index,
                timings.frame_ms,
                timings.main_pass_ms,
                frames.pending_releases()
            );
        }
    }

    let elapsed = start.elapsed();
    let accel = frames.accel_stats();
    log::info!(
        "{} frames in {:.2?} ({:.1} fps); BLAS builds {}, refits {}; TLAS rebuilds {}, refits {}, skips {}",
        args.frames,
        elapsed,
        args.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        accel.blas_builds,
        accel.blas_refits,
        accel.tlas_rebuilds,
        accel.tlas_refits,
        accel.tlas_skips
    );

    frames.shutdown();
    Ok(())
}
