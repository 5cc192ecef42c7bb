//! wgpu implementation of [`crate::backend::RenderBackend`].
//!
//! - `context` owns the instance, device and presentation target (surface or
//!   offscreen texture) and knows how to reconfigure it on resize or loss.
//! - `pipeline` builds one render pipeline per filter over a shared bind
//!   group layout (params, source texture, sampler).
//! - `readback` copies the offscreen target back to host memory.
//! - `backend` ties these together behind the backend trait.

mod backend;
mod context;
mod pipeline;
mod readback;

pub use backend::{GpuBackend, GpuFrame, GpuTexture};
pub use pipeline::GpuPipeline;
