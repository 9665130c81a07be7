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

use anyhow::{anyhow, Result};
use std::sync::Arc;
use wgpu::{Features, Instance};

/// Features the backend enables whenever the adapter offers them.
fn optional_features() -> Features {
    Features::TIMESTAMP_QUERY | Features::TIMESTAMP_QUERY_INSIDE_ENCODERS
}

/// Holds the core wgpu state objects. The frame manager renders off-screen, so no
/// surface is created.
#[derive(Debug)]
pub struct WgpuContext {
    #[allow(dead_code)]
    pub instance: Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,

    // Store info for easy access
    pub adapter_info: wgpu::AdapterInfo,
    pub active_device_features: Features,
}

impl WgpuContext {
    /// Asynchronously selects an adapter and opens a device on it.
    ///
    /// ## Arguments
    /// * `power_preference` - Which adapter to favor when several are present.
    /// * `force_fallback_adapter` - Only accept a software adapter.
    ///
    /// ## Returns
    /// * `Result<Self>` - The initialized context, or an error when no adapter or
    ///   device is available.
    pub async fn new_headless(
        power_preference: wgpu::PowerPreference,
        force_fallback_adapter: bool,
    ) -> Result<Self> {
        log::info!("Initializing headless wgpu context...");
        let instance = Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .map_err(|e| anyhow!("No suitable graphics adapter: {e}"))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Using graphics adapter: \"{}\" (Backend: {:?}, Type: {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        let features_to_enable = adapter.features() & optional_features();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Strata Frame Device"),
                required_features: features_to_enable,
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|e| anyhow!("Failed to create logical device: {e}"))?;
        log::info!("Logical device and command queue created.");

        device.on_uncaptured_error(Arc::new(|e| {
            log::error!("wgpu uncaptured error: {e:?}");
        }));

        let active_device_features = device.features();
        log::info!("Active device features: {active_device_features:?}");

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            adapter_info,
            active_device_features,
        })
    }

    /// Whether timestamps may be written between commands of an encoder.
    pub fn timestamps_supported(&self) -> bool {
        self.active_device_features.contains(optional_features())
    }
}
