//! Stage declarations, plan compilation and the executable frame graph.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::render_graph::{ChainOutput, FrameContext, RenderStage, StageIo};
use crate::render_targets::TargetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    Upload,
    DepthPrePass,
    LightCulling,
    OpaqueLighting,
    Skybox,
    Translucent,
    Particles,
    LinearizeDepth,
    Tonemap,
    Ssao,
    DebugOverlay,
    UiText,
    Gamma,
}

/// A named GPU resource a stage reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceId {
    FrameUniforms,
    ObjectUniforms,
    LightBuffer,
    VisibleLightIndices,
    /// Per-tile lights culled from the camera near plane, for blended geometry.
    TranslucentLightIndices,
    DepthPrepass,
    HdrColor,
    HdrNormal,
    LinearDepth,
    EnvironmentCube,
    IrradianceCube,
    PrefilteredCube,
    BrdfLut,
    DebugLines,
    /// The current post-process target; reads get the previous chain output,
    /// writes go to the other ping-pong target.
    Chain,
    /// The swapchain image.
    Surface,
}

impl ResourceId {
    /// Resources that exist before the frame starts and are never written by a stage.
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            ResourceId::EnvironmentCube
                | ResourceId::IrradianceCube
                | ResourceId::PrefilteredCube
                | ResourceId::BrdfLut
                | ResourceId::DebugLines
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageDecl {
    pub id: StageId,
    pub reads: Vec<ResourceId>,
    pub writes: Vec<ResourceId>,
}

/// The reads and writes of each stage.
pub fn declare(id: StageId) -> StageDecl {
    use ResourceId::*;

    let (reads, writes): (&[ResourceId], &[ResourceId]) = match id {
        StageId::Upload => (&[], &[FrameUniforms, ObjectUniforms, LightBuffer]),
        StageId::DepthPrePass => (&[FrameUniforms, ObjectUniforms], &[DepthPrepass]),
        StageId::LightCulling => (
            &[FrameUniforms, LightBuffer, DepthPrepass],
            &[VisibleLightIndices, TranslucentLightIndices],
        ),
        StageId::OpaqueLighting => (
            &[
                FrameUniforms,
                ObjectUniforms,
                LightBuffer,
                VisibleLightIndices,
                DepthPrepass,
                IrradianceCube,
                PrefilteredCube,
                BrdfLut,
            ],
            &[HdrColor, HdrNormal],
        ),
        StageId::Skybox => (
            &[FrameUniforms, EnvironmentCube, DepthPrepass, HdrColor],
            &[HdrColor],
        ),
        StageId::Translucent => (
            &[
                FrameUniforms,
                ObjectUniforms,
                LightBuffer,
                TranslucentLightIndices,
                DepthPrepass,
                IrradianceCube,
                PrefilteredCube,
                BrdfLut,
                HdrColor,
            ],
            &[HdrColor],
        ),
        StageId::Particles => (
            &[
                FrameUniforms,
                LightBuffer,
                TranslucentLightIndices,
                DepthPrepass,
                IrradianceCube,
                HdrColor,
            ],
            &[HdrColor],
        ),
        StageId::LinearizeDepth => (&[FrameUniforms, DepthPrepass], &[LinearDepth]),
        StageId::Tonemap => (&[FrameUniforms, HdrColor], &[Chain]),
        StageId::Ssao => (&[FrameUniforms, Chain, LinearDepth, HdrNormal], &[Chain]),
        StageId::DebugOverlay => (&[FrameUniforms, Chain, DebugLines], &[Chain]),
        StageId::UiText => (&[FrameUniforms, ObjectUniforms, Chain], &[Chain]),
        StageId::Gamma => (&[Chain], &[Surface]),
    };

    StageDecl {
        id,
        reads: reads.to_vec(),
        writes: writes.to_vec(),
    }
}

/// The fixed stage order, with the optional stages switched in or out.
///
/// `translucency` covers both blended geometry and particle billboards.
pub fn standard_stages(translucency: bool, ssao: bool) -> Vec<StageId> {
    let mut stages = vec![
        StageId::Upload,
        StageId::DepthPrePass,
        StageId::LightCulling,
        StageId::OpaqueLighting,
        StageId::Skybox,
    ];
    if translucency {
        stages.extend([StageId::Translucent, StageId::Particles]);
    }
    stages.extend([StageId::LinearizeDepth, StageId::Tonemap]);
    if ssao {
        stages.push(StageId::Ssao);
    }
    stages.extend([StageId::DebugOverlay, StageId::UiText, StageId::Gamma]);
    stages
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("frame graph has no stages")]
    Empty,
    #[error("stage {0:?} appears more than once")]
    DuplicateStage(StageId),
    #[error("stage {stage:?} reads {resource:?} before any stage writes it")]
    ReadBeforeWrite { stage: StageId, resource: ResourceId },
    #[error("no stage writes the surface")]
    MissingPresent,
    #[error("stage {0:?} writes the surface but is not the last stage")]
    PresentNotLast(StageId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedStage {
    pub decl: StageDecl,
    pub io: StageIo,
    /// Earlier stages whose writes this stage reads.
    pub depends_on: Vec<StageId>,
}

/// A validated stage order with chain routing resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    stages: Vec<PlannedStage>,
}

impl FramePlan {
    pub fn compile(decls: Vec<StageDecl>) -> Result<Self, GraphError> {
        if decls.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen = BTreeSet::new();
        let mut last_writer: BTreeMap<ResourceId, StageId> = BTreeMap::new();
        let mut chain: Option<(TargetId, StageId)> = None;
        let mut presented = false;
        let last = decls.len() - 1;
        let mut stages = Vec::with_capacity(decls.len());

        for (index, decl) in decls.into_iter().enumerate() {
            if !seen.insert(decl.id) {
                return Err(GraphError::DuplicateStage(decl.id));
            }

            let mut io = StageIo::default();
            let mut depends_on = BTreeSet::new();
            let missing = |resource| GraphError::ReadBeforeWrite {
                stage: decl.id,
                resource,
            };

            for &resource in &decl.reads {
                match resource {
                    ResourceId::Chain => {
                        let (target, writer) = chain.ok_or_else(|| missing(resource))?;
                        io.chain_input = Some(target);
                        depends_on.insert(writer);
                    }
                    r if r.is_persistent() => {}
                    r => {
                        let writer = last_writer.get(&r).ok_or_else(|| missing(r))?;
                        depends_on.insert(*writer);
                    }
                }
            }

            for &resource in &decl.writes {
                match resource {
                    ResourceId::Chain => {
                        let target = match chain {
                            Some((TargetId::PostA, _)) => TargetId::PostB,
                            _ => TargetId::PostA,
                        };
                        io.chain_output = Some(ChainOutput::Target(target));
                        chain = Some((target, decl.id));
                    }
                    ResourceId::Surface => {
                        if index != last {
                            return Err(GraphError::PresentNotLast(decl.id));
                        }
                        io.chain_output = Some(ChainOutput::Surface);
                        presented = true;
                    }
                    r => {
                        last_writer.insert(r, decl.id);
                    }
                }
            }

            depends_on.remove(&decl.id);
            stages.push(PlannedStage {
                decl,
                io,
                depends_on: depends_on.into_iter().collect(),
            });
        }

        if !presented {
            return Err(GraphError::MissingPresent);
        }
        Ok(Self { stages })
    }

    /// Compiles the declarations of `ids` in the given order.
    pub fn for_stages(ids: &[StageId]) -> Result<Self, GraphError> {
        Self::compile(ids.iter().copied().map(declare).collect())
    }

    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }

    pub fn stage(&self, id: StageId) -> Option<&PlannedStage> {
        self.stages.iter().find(|s| s.decl.id == id)
    }
}

pub struct FrameGraphBuilder {
    stages: Vec<Box<dyn RenderStage>>,
}

impl FrameGraphBuilder {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage; stages execute in the order they are added.
    pub fn stage<S: RenderStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn boxed(mut self, stage: Box<dyn RenderStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<FrameGraph, GraphError> {
        let decls = self.stages.iter().map(|s| declare(s.id())).collect();
        let plan = FramePlan::compile(decls)?;
        Ok(FrameGraph {
            stages: self.stages,
            plan,
        })
    }
}

impl Default for FrameGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated stages ready to record a frame.
pub struct FrameGraph {
    stages: Vec<Box<dyn RenderStage>>,
    plan: FramePlan,
}

impl FrameGraph {
    pub fn builder() -> FrameGraphBuilder {
        FrameGraphBuilder::new()
    }

    pub fn plan(&self) -> &FramePlan {
        &self.plan
    }

    /// Records every stage into `ctx.encoder` in plan order.
    pub fn execute(&self, ctx: &mut FrameContext<'_>) {
        for (stage, planned) in self.stages.iter().zip(self.plan.stages()) {
            stage.execute(ctx, &planned.io);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(id: StageId, reads: &[ResourceId], writes: &[ResourceId]) -> StageDecl {
        StageDecl {
            id,
            reads: reads.to_vec(),
            writes: writes.to_vec(),
        }
    }

    #[test]
    fn standard_orders_compile() {
        for translucency in [false, true] {
            for ssao in [false, true] {
                let ids = standard_stages(translucency, ssao);
                let plan = FramePlan::for_stages(&ids).unwrap();
                assert_eq!(plan.stages().len(), ids.len());
                assert_eq!(
                    plan.stages().last().unwrap().io.chain_output,
                    Some(ChainOutput::Surface)
                );
            }
        }
    }

    #[test]
    fn culling_waits_for_depth_and_lighting_waits_for_culling() {
        let plan = FramePlan::for_stages(&standard_stages(true, true)).unwrap();
        let culling = plan.stage(StageId::LightCulling).unwrap();
        assert_eq!(
            culling.depends_on,
            vec![StageId::Upload, StageId::DepthPrePass]
        );
        let lighting = plan.stage(StageId::OpaqueLighting).unwrap();
        assert!(lighting.depends_on.contains(&StageId::LightCulling));
        let ssao = plan.stage(StageId::Ssao).unwrap();
        assert!(ssao.depends_on.contains(&StageId::LinearizeDepth));
        assert!(ssao.depends_on.contains(&StageId::Tonemap));
    }

    #[test]
    fn blended_stages_use_the_translucent_light_list() {
        let plan = FramePlan::for_stages(&standard_stages(true, false)).unwrap();
        for id in [StageId::Translucent, StageId::Particles] {
            let stage = plan.stage(id).unwrap();
            assert!(stage.decl.reads.contains(&ResourceId::TranslucentLightIndices));
            assert!(!stage.decl.reads.contains(&ResourceId::VisibleLightIndices));
            assert!(stage.depends_on.contains(&StageId::LightCulling));
        }
        let opaque = declare(StageId::OpaqueLighting);
        assert!(opaque.reads.contains(&ResourceId::VisibleLightIndices));
        assert!(!opaque.reads.contains(&ResourceId::TranslucentLightIndices));

        let particles = plan.stage(StageId::Particles).unwrap();
        assert!(particles.depends_on.contains(&StageId::Translucent));
    }

    #[test]
    fn particles_follow_translucency() {
        let off = standard_stages(false, false);
        assert!(!off.contains(&StageId::Particles));
        let on = standard_stages(true, false);
        let at = |id| on.iter().position(|s| *s == id).unwrap();
        assert_eq!(at(StageId::Particles), at(StageId::Translucent) + 1);
        assert!(at(StageId::Particles) < at(StageId::LinearizeDepth));
    }

    #[test]
    fn chain_alternates_between_post_targets() {
        let plan = FramePlan::for_stages(&standard_stages(false, true)).unwrap();
        let route = |id| plan.stage(id).unwrap().io;

        assert_eq!(route(StageId::Tonemap).chain_input, None);
        assert_eq!(
            route(StageId::Tonemap).chain_output,
            Some(ChainOutput::Target(TargetId::PostA))
        );
        assert_eq!(route(StageId::Ssao).chain_input, Some(TargetId::PostA));
        assert_eq!(
            route(StageId::Ssao).chain_output,
            Some(ChainOutput::Target(TargetId::PostB))
        );
        assert_eq!(route(StageId::DebugOverlay).chain_input, Some(TargetId::PostB));
        assert_eq!(route(StageId::UiText).chain_input, Some(TargetId::PostA));
        assert_eq!(route(StageId::Gamma).chain_input, Some(TargetId::PostB));
        assert_eq!(route(StageId::Skybox), StageIo::default());
    }

    #[test]
    fn skipping_ssao_shifts_the_chain() {
        let plan = FramePlan::for_stages(&standard_stages(false, false)).unwrap();
        let io = plan.stage(StageId::DebugOverlay).unwrap().io;
        assert_eq!(io.chain_input, Some(TargetId::PostA));
    }

    #[test]
    fn culling_before_depth_is_rejected() {
        let ids = [
            StageId::Upload,
            StageId::LightCulling,
            StageId::DepthPrePass,
            StageId::Tonemap,
            StageId::Gamma,
        ];
        assert_eq!(
            FramePlan::for_stages(&ids),
            Err(GraphError::ReadBeforeWrite {
                stage: StageId::LightCulling,
                resource: ResourceId::DepthPrepass,
            })
        );
    }

    #[test]
    fn ssao_without_linear_depth_is_rejected() {
        let mut ids = standard_stages(false, true);
        ids.retain(|id| *id != StageId::LinearizeDepth);
        assert!(matches!(
            FramePlan::for_stages(&ids),
            Err(GraphError::ReadBeforeWrite {
                stage: StageId::Ssao,
                resource: ResourceId::LinearDepth,
            })
        ));
    }

    #[test]
    fn chain_read_needs_a_chain_writer() {
        let decls = vec![decl(StageId::Gamma, &[ResourceId::Chain], &[ResourceId::Surface])];
        assert!(matches!(
            FramePlan::compile(decls),
            Err(GraphError::ReadBeforeWrite {
                resource: ResourceId::Chain,
                ..
            })
        ));
    }

    #[test]
    fn structural_errors() {
        assert_eq!(FramePlan::compile(vec![]), Err(GraphError::Empty));
        assert_eq!(
            FramePlan::for_stages(&[StageId::Upload, StageId::Upload]),
            Err(GraphError::DuplicateStage(StageId::Upload))
        );
        assert_eq!(
            FramePlan::for_stages(&[StageId::Upload, StageId::DepthPrePass]),
            Err(GraphError::MissingPresent)
        );
        let decls = vec![
            decl(StageId::Upload, &[], &[ResourceId::Surface]),
            decl(StageId::DepthPrePass, &[], &[ResourceId::DepthPrepass]),
        ];
        assert_eq!(
            FramePlan::compile(decls),
            Err(GraphError::PresentNotLast(StageId::Upload))
        );
    }

    #[test]
    fn persistent_resources_need_no_writer() {
        assert!(ResourceId::IrradianceCube.is_persistent());
        assert!(!ResourceId::HdrColor.is_persistent());
        let decls = vec![decl(
            StageId::Gamma,
            &[ResourceId::BrdfLut, ResourceId::DebugLines],
            &[ResourceId::Surface],
        )];
        assert!(FramePlan::compile(decls).is_ok());
    }
}
