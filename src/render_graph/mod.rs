//! The frame graph: stages with declared resource reads and writes.
//!
//! Every stage names the resources it reads and writes ([`declare`]). Compiling the
//! stage list into a [`FramePlan`] checks that each read is preceded by a write (or refers
//! to a persistent resource such as the IBL maps), routes the post-process chain through
//! the two ping-pong targets, and requires the last stage to present.
//!
//! ```text
//! Upload ─▶ DepthPrePass ─▶ LightCulling ─▶ OpaqueLighting ─▶ Skybox ─▶ (Translucent)
//!                                                                          │
//!   Gamma ◀─ UiText ◀─ DebugOverlay ◀─ (Ssao) ◀─ Tonemap ◀─ LinearizeDepth ◀┘
//!     │          └───────── PostA / PostB ping-pong ─────────┘
//!     ▼
//!  Surface
//! ```
//!
//! Stages run in declaration order on a single command encoder; the plan only proves that
//! order is consistent with the data flow.

mod frame_context;
mod graph;
mod render_node;

pub use frame_context::FrameContext;
pub use graph::{
    FrameGraph, FrameGraphBuilder, FramePlan, GraphError, PlannedStage, ResourceId, StageDecl,
    StageId, declare, standard_stages,
};
pub use render_node::{ChainOutput, RenderStage, StageIo};
