//! `ddi-resource` keeps the several copies of a DDraw/D3D DDI resource coherent.
//!
//! A resource may exist at once as caller-visible system memory, a native video-memory
//! resource, a multisampled render target and a single-sample resolved surface, optionally at a
//! scaled resolution. This crate provides:
//! - Per-sub-resource validity tracking (see [`tracker`]).
//! - Lazy materialization of whichever representation an operation needs.
//! - Blit routing across native, CPU and shader paths, including a downscale chain and
//!   palettized texture conversion.
//! - Construction fixups and a bounded pool of auxiliary surfaces (see [`repository`]).
//! - The presentation compositor for the desktop-mirroring primary.
//!
//! [`Engine`] is the entry point. The driver is abstracted behind [`Device`];
//! [`SoftDevice`] implements it in software.

mod blit;
mod materialize;
mod present;
mod resource;

pub mod config;
pub mod cpu_blit;
pub mod desktop;
pub mod device;
pub mod engine;
pub mod error;
pub mod fixup;
pub mod format;
pub mod rect;
pub mod repository;
pub mod soft;
pub mod stats;
pub mod sync;
pub mod tracker;

pub use config::Config;
pub use desktop::{Desktop, FixedDesktop, LayeredWindow, WindowId};
pub use device::{
    AdapterInfo, BltArgs, BltFlags, ColorFillArgs, CreateResourceArgs, Device, LockArgs, LockFlags, LockedRect,
    MultisampleConfig, Pool, ResourceFlags, ResourceHandle, ShaderBlitter, SurfaceInfo, SysMemPtr, UnlockArgs,
};
pub use engine::Engine;
pub use error::{HResult, ResourceError, Result};
pub use format::D3dFormat;
pub use present::PresentationState;
pub use rect::{Point, Rect, Size};
pub use repository::{RepositoryOpts, SurfaceRepository};
pub use resource::{AuxSurfaces, Resource};
pub use soft::{Primitive, SoftCalls, SoftDevice};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use sync::CriticalSection;
pub use tracker::{Representation, ValidFlags};
