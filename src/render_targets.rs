//! Off-screen render targets, keyed by [`TargetId`].
//!
//! All targets share the surface size and are rebuilt together on resize. The new set is
//! allocated from [`describe`] first; only once it exists is the old set swapped out and
//! torn down in reverse creation order, so a failed allocation leaves the old set usable.

use std::collections::BTreeMap;

use crate::error::{Result, allocation_scope};
use crate::gpu::GpuContext;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const LINEAR_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const POST_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetId {
    /// Depth written by the pre-pass and tested by every later geometry stage.
    DepthPrepass,
    /// HDR radiance (attachment 0) and view-space normals (attachment 1).
    Hdr,
    LinearDepth,
    PostA,
    PostB,
}

impl TargetId {
    /// Creation order; dependents come after what they are derived from.
    pub const ALL: [TargetId; 5] = [
        TargetId::DepthPrepass,
        TargetId::Hdr,
        TargetId::LinearDepth,
        TargetId::PostA,
        TargetId::PostB,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TargetId::DepthPrepass => "Depth Prepass Target",
            TargetId::Hdr => "HDR Target",
            TargetId::LinearDepth => "Linear Depth Target",
            TargetId::PostA => "Post Target A",
            TargetId::PostB => "Post Target B",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub id: TargetId,
    pub width: u32,
    pub height: u32,
    pub attachments: Vec<AttachmentDesc>,
}

/// Descriptors of every size-dependent target for a `width`×`height` surface,
/// in creation order.
pub fn describe(width: u32, height: u32) -> Vec<TargetDesc> {
    let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
    let chained = sampled | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    let attach = |format, usage| AttachmentDesc { format, usage };

    TargetId::ALL
        .iter()
        .map(|&id| {
            let attachments = match id {
                TargetId::DepthPrepass => vec![attach(DEPTH_FORMAT, sampled)],
                TargetId::Hdr => vec![attach(HDR_FORMAT, sampled), attach(NORMAL_FORMAT, sampled)],
                TargetId::LinearDepth => vec![attach(LINEAR_DEPTH_FORMAT, sampled)],
                TargetId::PostA | TargetId::PostB => vec![attach(POST_FORMAT, chained)],
            };
            TargetDesc {
                id,
                width: width.max(1),
                height: height.max(1),
                attachments,
            }
        })
        .collect()
}

/// Order in which a set built from [`describe`] is destroyed.
pub fn teardown_order() -> impl Iterator<Item = TargetId> {
    TargetId::ALL.into_iter().rev()
}

pub struct Attachment {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

pub struct RenderTarget {
    pub desc: TargetDesc,
    pub attachments: Vec<Attachment>,
}

impl RenderTarget {
    fn new(gpu: &GpuContext, desc: TargetDesc) -> Result<Self> {
        let attachments = desc
            .attachments
            .iter()
            .enumerate()
            .map(|(i, attachment)| {
                let label = format!("{} #{i}", desc.id.label());
                let texture = allocation_scope(&gpu.device, &label, || {
                    gpu.device.create_texture(&wgpu::TextureDescriptor {
                        label: Some(&label),
                        size: wgpu::Extent3d {
                            width: desc.width,
                            height: desc.height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: attachment.format,
                        usage: attachment.usage,
                        view_formats: &[],
                    })
                })?;
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(Attachment { texture, view })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { desc, attachments })
    }
}

pub struct RenderTargetSet {
    targets: BTreeMap<TargetId, RenderTarget>,
    width: u32,
    height: u32,
}

impl RenderTargetSet {
    /// Allocates every target in `descs`, normally the output of [`describe`].
    pub fn new(gpu: &GpuContext, descs: Vec<TargetDesc>) -> Result<Self> {
        let (width, height) = descs.first().map_or((1, 1), |d| (d.width, d.height));
        let mut targets = BTreeMap::new();
        for desc in descs {
            targets.insert(desc.id, RenderTarget::new(gpu, desc)?);
        }
        log::debug!("allocated {} render targets at {width}x{height}", targets.len());
        Ok(Self {
            targets,
            width,
            height,
        })
    }

    /// Destroys every target, dependents first.
    pub fn teardown(&mut self) {
        for id in teardown_order() {
            if let Some(target) = self.targets.remove(&id) {
                for attachment in target.attachments {
                    attachment.texture.destroy();
                }
            }
        }
    }

    /// Swaps in an already allocated set, then destroys the old one.
    pub fn replace(&mut self, next: RenderTargetSet) {
        let mut old = std::mem::replace(self, next);
        old.teardown();
        log::debug!("render targets now {}x{}", self.width, self.height);
    }

    /// `None` once the set has been torn down.
    pub fn get(&self, id: TargetId) -> Option<&RenderTarget> {
        self.targets.get(&id)
    }

    pub fn attachment(&self, id: TargetId, index: usize) -> Option<&Attachment> {
        self.get(id)?.attachments.get(index)
    }

    pub fn view(&self, id: TargetId) -> Option<&wgpu::TextureView> {
        self.attachment(id, 0).map(|a| &a.view)
    }

    pub fn texture(&self, id: TargetId) -> Option<&wgpu::Texture> {
        self.attachment(id, 0).map(|a| &a.texture)
    }

    pub fn hdr_normal(&self) -> Option<&wgpu::TextureView> {
        self.attachment(TargetId::Hdr, 1).map(|a| &a.view)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_resize_reproduces_descriptors() {
        let original = describe(1280, 720);
        let bigger = describe(1920, 1080);
        let back = describe(1280, 720);
        assert_ne!(original, bigger);
        assert_eq!(original, back);
    }

    #[test]
    fn hdr_target_has_color_and_normal() {
        let descs = describe(64, 64);
        let hdr = descs.iter().find(|d| d.id == TargetId::Hdr).unwrap();
        assert_eq!(hdr.attachments.len(), 2);
        assert_eq!(hdr.attachments[0].format, HDR_FORMAT);
    }

    #[test]
    fn post_targets_can_be_copied() {
        for desc in describe(64, 64) {
            let usage = desc.attachments[0].usage;
            let chained = matches!(desc.id, TargetId::PostA | TargetId::PostB);
            assert_eq!(usage.contains(wgpu::TextureUsages::COPY_SRC), chained);
            assert!(usage.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        }
    }

    #[test]
    fn teardown_reverses_creation() {
        let created: Vec<TargetId> = describe(8, 8).iter().map(|d| d.id).collect();
        let mut destroyed: Vec<TargetId> = teardown_order().collect();
        destroyed.reverse();
        assert_eq!(created, destroyed);
    }

    #[test]
    fn torn_down_set_reports_missing_targets() {
        let mut set = RenderTargetSet {
            targets: BTreeMap::new(),
            width: 64,
            height: 64,
        };
        set.teardown();
        assert!(set.get(TargetId::Hdr).is_none());
        assert!(set.view(TargetId::DepthPrepass).is_none());
        assert!(set.hdr_normal().is_none());
        assert!(set.texture(TargetId::PostA).is_none());
    }

    #[test]
    fn replace_keeps_the_new_set() {
        let mut current = RenderTargetSet {
            targets: BTreeMap::new(),
            width: 1280,
            height: 720,
        };
        let next = RenderTargetSet {
            targets: BTreeMap::new(),
            width: 1920,
            height: 1080,
        };
        current.replace(next);
        assert_eq!(current.size(), (1920, 1080));
    }

    #[test]
    fn zero_size_is_clamped() {
        assert!(describe(0, 0).iter().all(|d| d.width == 1 && d.height == 1));
    }
}
