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

use super::backend::{align_to_copy, BackendState, FinishedList, HostWork, RegisteredPipeline, Shared};
use super::conversions::IntoWgpu;
use std::ops::Range;
use std::sync::Arc;
use std::vec;
use strata_core::renderer::*;

/// A command as recorded, before it is encoded.
#[derive(Debug)]
enum Recorded {
    Copy {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    BeginRenderPass {
        label: String,
        colors: Vec<ColorAttachment>,
        depth: Option<DepthAttachment>,
    },
    SetPipeline(PipelineKey),
    DrawIndexed(DrawIndexed),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    EndRenderPass,
    Dispatch([u32; 3]),
    BuildBlas(BlasBuildRecord),
    BuildTlas(TlasBuildRecord),
    WriteTimestamp(u32),
    ResolveTimestamps { first: u32, count: u32 },
    PushDebugGroup(String),
    PopDebugGroup,
}

/// Records commands and encodes them into a `wgpu::CommandBuffer` on
/// [`finish`](CommandList::finish), once every referenced object can be resolved.
pub(crate) struct WgpuCommandList {
    shared: Arc<Shared>,
    queue: QueueKind,
    label: Option<String>,
    commands: Vec<Recorded>,
}

impl WgpuCommandList {
    pub(crate) fn new(shared: Arc<Shared>, queue: QueueKind, label: Option<String>) -> Self {
        Self {
            shared,
            queue,
            label,
            commands: Vec::new(),
        }
    }
}

/// Skipped work, reported once per list.
#[derive(Debug, Default)]
struct Skipped {
    draws: u32,
    dispatches: u32,
}

struct Encoder<'a> {
    shared: &'a Shared,
    state: &'a BackendState,
    encoder: wgpu::CommandEncoder,
    host: Vec<HostWork>,
    compute_pipeline: Option<PipelineKey>,
    skipped: Skipped,
}

impl Encoder<'_> {
    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, ResourceError> {
        self.state
            .buffers
            .get(&id)
            .map(|b| &b.buffer)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(id)))
    }

    fn view(&self, id: TextureId) -> Result<wgpu::TextureView, ResourceError> {
        self.state
            .textures
            .get(&id)
            .map(|t| t.view.clone())
            .ok_or(ResourceError::NotFound(ResourceHandle::Texture(id)))
    }

    fn encode(&mut self, commands: Vec<Recorded>) -> Result<(), ResourceError> {
        let mut commands = commands.into_iter();
        while let Some(command) = commands.next() {
            match command {
                Recorded::Copy {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => self.copy(src, src_offset, dst, dst_offset, size)?,
                Recorded::BeginRenderPass { label, colors, depth } => {
                    self.render_pass(&label, &colors, depth, &mut commands)?;
                }
                Recorded::SetPipeline(key) => self.compute_pipeline = Some(key),
                Recorded::Dispatch(groups) => self.dispatch(groups),
                Recorded::BuildBlas(build) => self.host.push(HostWork::Blas(build)),
                Recorded::BuildTlas(build) => self.host.push(HostWork::Tlas(build)),
                Recorded::WriteTimestamp(slot) => {
                    if let Some(timestamps) = &self.shared.timestamps {
                        if slot < timestamps.capacity {
                            self.encoder.write_timestamp(&timestamps.query_set, slot);
                        }
                    }
                }
                Recorded::ResolveTimestamps { first, count } => {
                    if let Some(timestamps) = &self.shared.timestamps {
                        if count > 0 && first + count <= timestamps.capacity {
                            self.encoder.resolve_query_set(
                                &timestamps.query_set,
                                first..first + count,
                                &timestamps.resolve,
                                0,
                            );
                            self.encoder.copy_buffer_to_buffer(
                                &timestamps.resolve,
                                0,
                                &timestamps.readback,
                                first as u64 * 8,
                                count as u64 * 8,
                            );
                        }
                    }
                }
                Recorded::PushDebugGroup(label) => self.encoder.push_debug_group(&label),
                Recorded::PopDebugGroup => self.encoder.pop_debug_group(),
                Recorded::DrawIndexed(_) | Recorded::Draw { .. } | Recorded::EndRenderPass => {
                    log::warn!("Draw command recorded outside a render pass; ignored");
                }
            }
        }
        Ok(())
    }

    fn copy(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let source = self
            .state
            .buffers
            .get(&src)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(src)))?;
        let target = self
            .state
            .buffers
            .get(&dst)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(dst)))?;
        if src_offset + size > source.size || dst_offset + size > target.size {
            return Err(ResourceError::OutOfBounds {
                offset: dst_offset,
                len: size,
                capacity: target.size,
            });
        }
        if size > 0 {
            // Native buffers are padded, so the rounded-up copy stays in bounds.
            self.encoder.copy_buffer_to_buffer(
                &source.buffer,
                src_offset,
                &target.buffer,
                dst_offset,
                align_to_copy(size),
            );
        }
        if target.mirror.is_some() {
            self.host.push(HostWork::Copy {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        let state = self.state;
        let pipeline = self.compute_pipeline.and_then(|key| state.pipelines.get(&key));
        let Some(RegisteredPipeline::Compute { pipeline, bind_groups }) = pipeline else {
            self.skipped.dispatches += 1;
            return;
        };
        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        for (index, group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        let [x, y, z] = groups;
        pass.dispatch_workgroups(x, y, z);
    }

    /// Encodes one render pass, consuming commands up to its `EndRenderPass`.
    fn render_pass(
        &mut self,
        label: &str,
        colors: &[ColorAttachment],
        depth: Option<DepthAttachment>,
        commands: &mut vec::IntoIter<Recorded>,
    ) -> Result<(), ResourceError> {
        let color_views = colors
            .iter()
            .map(|c| self.view(c.texture))
            .collect::<Result<Vec<_>, _>>()?;
        let depth_view = depth.map(|d| self.view(d.texture)).transpose()?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .zip(&color_views)
            .map(|(attachment, view)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: attachment.load.into_wgpu(),
                        store: attachment.store.into_wgpu(),
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment = depth.zip(depth_view.as_ref()).map(|(attachment, view)| {
            wgpu::RenderPassDepthStencilAttachment {
                view,
                // No depth operations makes the attachment read-only.
                depth_ops: (!attachment.read_only).then(|| wgpu::Operations {
                    load: attachment.load.into_wgpu(),
                    store: attachment.store.into_wgpu(),
                }),
                stencil_ops: None,
            }
        });

        let state = self.state;
        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        let mut bound = false;
        for command in commands.by_ref() {
            match command {
                Recorded::EndRenderPass => return Ok(()),
                Recorded::SetPipeline(key) => match state.pipelines.get(&key) {
                    Some(RegisteredPipeline::Render { pipeline, bind_groups }) => {
                        pass.set_pipeline(pipeline);
                        for (index, group) in bind_groups.iter().enumerate() {
                            pass.set_bind_group(index as u32, group, &[]);
                        }
                        bound = true;
                    }
                    _ => bound = false,
                },
                Recorded::DrawIndexed(draw) if bound => {
                    let vertices = state
                        .buffers
                        .get(&draw.vertex_buffer)
                        .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(draw.vertex_buffer)))?;
                    let indices = state
                        .buffers
                        .get(&draw.index_buffer)
                        .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(draw.index_buffer)))?;
                    pass.set_vertex_buffer(0, vertices.buffer.slice(..));
                    pass.set_index_buffer(indices.buffer.slice(..), draw.index_format.into_wgpu());
                    pass.draw_indexed(
                        draw.indices.clone(),
                        draw.base_vertex,
                        draw.first_instance..draw.first_instance + 1,
                    );
                }
                Recorded::Draw { vertices, instances } if bound => pass.draw(vertices, instances),
                Recorded::DrawIndexed(_) | Recorded::Draw { .. } => self.skipped.draws += 1,
                Recorded::PushDebugGroup(label) => pass.push_debug_group(&label),
                Recorded::PopDebugGroup => pass.pop_debug_group(),
                other => log::warn!("{other:?} is not valid inside render pass '{label}'; ignored"),
            }
        }
        Err(ResourceError::InvalidOperation(format!(
            "render pass '{label}' was never ended"
        )))
    }
}

impl CommandList for WgpuCommandList {
    fn queue(&self) -> QueueKind {
        self.queue
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        // wgpu derives its own barriers from resource usage.
        log::trace!("Dropping {} explicit barrier(s)", barriers.len());
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.push(Recorded::Copy {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn begin_render_pass(&mut self, descriptor: &PassDescriptor<'_>) {
        self.commands.push(Recorded::BeginRenderPass {
            label: descriptor.label.to_owned(),
            colors: descriptor.colors.to_vec(),
            depth: descriptor.depth,
        });
    }

    fn set_pipeline(&mut self, pipeline: PipelineKey) {
        self.commands.push(Recorded::SetPipeline(pipeline));
    }

    fn draw_indexed(&mut self, draw: &DrawIndexed) {
        self.commands.push(Recorded::DrawIndexed(draw.clone()));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands.push(Recorded::Draw { vertices, instances });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(Recorded::EndRenderPass);
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        self.commands.push(Recorded::Dispatch(groups));
    }

    fn build_blas(&mut self, build: &BlasBuild<'_>) {
        self.commands.push(Recorded::BuildBlas(build.into()));
    }

    fn build_tlas(&mut self, build: &TlasBuild<'_>) {
        self.commands.push(Recorded::BuildTlas(build.into()));
    }

    fn write_timestamp(&mut self, slot: u32) {
        self.commands.push(Recorded::WriteTimestamp(slot));
    }

    fn resolve_timestamps(&mut self, first: u32, count: u32) {
        self.commands.push(Recorded::ResolveTimestamps { first, count });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.commands.push(Recorded::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.commands.push(Recorded::PopDebugGroup);
    }

    fn finish(self: Box<Self>) -> Result<CommandListId, ResourceError> {
        let WgpuCommandList {
            shared,
            queue,
            label,
            commands,
        } = *self;

        let mut state = shared.lock();
        let (buffer, host, skipped) = {
            let mut encoder = Encoder {
                shared: &*shared,
                state: &*state,
                encoder: shared
                    .context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: label.as_deref(),
                    }),
                host: Vec::new(),
                compute_pipeline: None,
                skipped: Skipped::default(),
            };
            encoder.encode(commands)?;
            (encoder.encoder.finish(), encoder.host, encoder.skipped)
        };
        if skipped.draws > 0 || skipped.dispatches > 0 {
            log::trace!(
                "'{}': {} draw(s) and {} dispatch(es) had no registered pipeline",
                label.as_deref().unwrap_or_default(),
                skipped.draws,
                skipped.dispatches
            );
        }

        let id = CommandListId(state.next_id());
        state.finished.insert(
            id,
            FinishedList {
                queue,
                label,
                commands: buffer,
                host,
            },
        );
        Ok(id)
    }
}
