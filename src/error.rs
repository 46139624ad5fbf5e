//! Error types for renderer setup and frame submission.
//!
//! Setup failures (missing environment map, failed allocations, an invalid frame graph)
//! surface as [`RendererError`] from [`TiledForwardRenderer::init`] and
//! [`TiledForwardRenderer::resize`]. Per-object problems never reach this type: missing
//! texture maps fall back to the [`DefaultTextureSet`] and unknown meshes are skipped.
//!
//! [`TiledForwardRenderer::init`]: crate::TiledForwardRenderer::init
//! [`TiledForwardRenderer::resize`]: crate::TiledForwardRenderer::resize
//! [`DefaultTextureSet`]: crate::DefaultTextureSet

use std::path::PathBuf;

use thiserror::Error;

use crate::render_graph::GraphError;

/// Every failure the renderer reports to its caller.
#[derive(Error, Debug)]
pub enum RendererError {
    /// No GPU adapter is compatible with the window surface.
    #[error("no compatible GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("failed to create window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    /// The surface has no texture format the renderer can present to.
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    /// The configured equirectangular HDR environment does not exist.
    #[error("environment map not found: {}", .0.display())]
    EnvironmentMissing(PathBuf),

    #[error("failed to decode environment map {}: {source}", path.display())]
    EnvironmentDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The device ran out of memory while creating a named resource.
    #[error("failed to allocate {label}: {message}")]
    Allocation { label: String, message: String },

    #[error("invalid frame graph: {0}")]
    Graph(#[from] GraphError),

    /// The swapchain texture could not be acquired this frame.
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("invalid renderer configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load font: {0}")]
    Font(String),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RendererError>;

/// Runs `create` inside an out-of-memory error scope and converts a captured
/// allocation failure into [`RendererError::Allocation`].
pub(crate) fn allocation_scope<T>(
    device: &wgpu::Device,
    label: &str,
    create: impl FnOnce() -> T,
) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let value = create();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RendererError::Allocation {
            label: label.to_string(),
            message: err.to_string(),
        }),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_resource() {
        let err = RendererError::EnvironmentMissing(PathBuf::from("assets/sky.hdr"));
        assert_eq!(err.to_string(), "environment map not found: assets/sky.hdr");

        let err = RendererError::Allocation {
            label: "Visible Light Indices".into(),
            message: "out of memory".into(),
        };
        assert!(err.to_string().contains("Visible Light Indices"));
    }

    #[test]
    fn graph_errors_convert() {
        let err: RendererError = GraphError::MissingPresent.into();
        assert!(matches!(err, RendererError::Graph(GraphError::MissingPresent)));
    }
}
