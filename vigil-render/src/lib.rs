//! vigil-render — template execution and the stage/compare/install pipeline.

pub mod error;
pub mod stage;
pub mod template;

pub use error::RenderError;
pub use stage::{Renderer, SyncOutcome};
pub use template::render_source;
