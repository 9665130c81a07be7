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

//! Procedural meshes and the animated scene the sandbox renders.

use bytemuck::{Pod, Zeroable};
use strata_core::math::{Mat4, Vec3};
use strata_core::renderer::IndexFormat;
use strata_frame::frame::{
    CameraView, DebugView, EditorOverlay, Light, LightKind, MeshDescriptor, MeshHandle,
    MeshSubset, SubsetMask, VisibleInstance,
};
use strata_frame::{FrameDescription, FrameError, FrameOrchestrator};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
}

const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// CPU-side geometry ready for registration.
struct MeshData {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    subsets: Vec<MeshSubset>,
}

impl MeshData {
    fn register(&self, frames: &mut FrameOrchestrator, label: &str, deformable: bool) -> Result<MeshHandle, FrameError> {
        frames.register_mesh(&MeshDescriptor {
            label,
            vertices: bytemuck::cast_slice(&self.vertices),
            vertex_stride: STRIDE,
            indices: bytemuck::cast_slice(&self.indices),
            index_format: IndexFormat::Uint32,
            subsets: &self.subsets,
            deformable,
        })
    }
}

/// Unit cube centered on the origin; the top face is its own subset.
fn cube() -> MeshData {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::new(0.0, -1.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
        (Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(0.0, 0.0, -1.0), Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0)),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            vertices.push(Vertex {
                position: (normal * 0.5 + u * su + v * sv).to_array(),
                normal: normal.to_array(),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData {
        vertices,
        indices,
        subsets: vec![
            MeshSubset {
                indices: 0..30,
                opaque: true,
            },
            MeshSubset {
                indices: 30..36,
                opaque: false,
            },
        ],
    }
}

/// Flat `n` x `n` grid in the XZ plane, `size` wide.
fn grid(n: u32, size: f32) -> MeshData {
    let step = size / n as f32;
    let half = size * 0.5;
    let mut vertices = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
    for z in 0..=n {
        for x in 0..=n {
            vertices.push(Vertex {
                position: [x as f32 * step - half, 0.0, z as f32 * step - half],
                normal: [0.0, 1.0, 0.0],
            });
        }
    }
    let mut indices = Vec::with_capacity((n * n * 6) as usize);
    for z in 0..n {
        for x in 0..n {
            let i = z * (n + 1) + x;
            indices.extend_from_slice(&[i, i + n + 1, i + 1, i + 1, i + n + 1, i + n + 2]);
        }
    }
    let count = indices.len() as u32;
    MeshData {
        vertices,
        indices,
        subsets: vec![MeshSubset {
            indices: 0..count,
            opaque: true,
        }],
    }
}

/// Id of the deformable water surface.
pub const WATER_ID: u32 = 1000;

/// An orbiting camera over a field of cubes and a wave-deformed water grid.
pub struct DemoScene {
    cube: MeshHandle,
    water: MeshHandle,
    water_mesh: MeshData,
    columns: u32,
    aspect: f32,
}

impl DemoScene {
    /// Registers the scene's meshes.
    pub fn new(frames: &mut FrameOrchestrator, columns: u32) -> Result<Self, FrameError> {
        let cube_mesh = cube();
        let water_mesh = grid(32, 16.0);
        let config = frames.config();
        let aspect = config.width as f32 / config.height as f32;
        Ok(Self {
            cube: cube_mesh.register(frames, "Cube", false)?,
            water: water_mesh.register(frames, "Water", true)?,
            water_mesh,
            columns,
            aspect,
        })
    }

    /// Moves the water vertices for time `t` and uploads them.
    pub fn animate_water(&mut self, frames: &mut FrameOrchestrator, t: f32) -> Result<(), FrameError> {
        for v in &mut self.water_mesh.vertices {
            let [x, _, z] = v.position;
            v.position[1] = 0.15 * (x * 0.8 + t).sin() * (z * 0.6 + t * 0.7).cos();
        }
        frames.update_mesh_vertices(self.water, bytemuck::cast_slice(&self.water_mesh.vertices))
    }

    /// The frame at time `t`; instance `selected` gets an outline.
    pub fn describe(&self, t: f32, selected: Option<u32>, debug_view: DebugView) -> FrameDescription {
        let mut instances = Vec::new();
        let half = self.columns as f32 * 0.5;
        for row in 0..self.columns {
            for col in 0..self.columns {
                let id = row * self.columns + col;
                let at = Vec3::new(col as f32 * 1.5 - half, 0.5, row as f32 * 1.5 - half);
                instances.push(VisibleInstance {
                    id,
                    mesh: self.cube,
                    subsets: SubsetMask::ALL,
                    transform: Mat4::from_translation(at) * Mat4::from_rotation_y(t + id as f32 * 0.1),
                    material_index: id % 4,
                    // Every fifth cube is glass.
                    translucent: id % 5 == 0,
                });
            }
        }
        instances.push(VisibleInstance {
            id: WATER_ID,
            mesh: self.water,
            subsets: SubsetMask::ALL,
            transform: Mat4::from_translation(Vec3::new(0.0, -0.2, 0.0)),
            material_index: 4,
            translucent: false,
        });

        let eye = Vec3::new((t * 0.3).cos() * 12.0, 6.0, (t * 0.3).sin() * 12.0);
        FrameDescription {
            instances,
            camera: CameraView {
                view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0)).unwrap_or_default(),
                projection: Mat4::perspective_rh_zo(50f32.to_radians(), self.aspect, 0.1, 200.0),
                position: eye,
                jitter: [0.0; 2],
            },
            lights: vec![
                Light {
                    kind: LightKind::Directional {
                        direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
                    },
                    color: Vec3::new(1.0, 0.95, 0.9),
                    intensity: 3.0,
                },
                Light {
                    kind: LightKind::Point {
                        position: Vec3::new(0.0, 3.0, 0.0),
                        range: 10.0,
                    },
                    color: Vec3::new(0.3, 0.5, 1.0),
                    intensity: 8.0,
                },
            ],
            overlay: EditorOverlay {
                selected: selected.into_iter().collect(),
                debug_view,
            },
        }
    }
}
