pub mod annotations;
pub mod clock;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod metadata;
pub mod muxer;
pub mod ring_buffer;
pub mod sources;
pub mod testing;
pub mod writer;

pub use annotations::{AnnotationStore, MaskStyle, MaskZone, Stroke, ToolMode};
pub use config::RecorderConfig;
pub use engine::{RecorderEngine, RecorderState, SessionReport};
pub use error::{RecorderError, Result};
pub use events::{EventBus, RecorderEvent};
pub use frame::Frame;
pub use ring_buffer::RingBuffer;
