//! The conversion core: wire types, the intermediate representation, and the
//! adapters, sessions and pipelines that move data between them.
//!
//! Nothing in this module performs I/O; streams are consumed as they are
//! handed in.

pub mod adapter;
pub mod anthropic;
pub mod anthropic_types;
pub mod buffer;
pub mod ir;
pub mod openai;
pub mod openai_types;
pub mod pipeline;
pub mod registry;
pub mod session;

pub use adapter::{ProviderAdapter, StreamContext, StreamFraming, WireAdapter};
pub use anthropic::AnthropicAdapter;
pub use buffer::ChunkBuffer;
pub use ir::{
    ChoiceContent, IrChoice, IrDelta, IrError, IrMessage, IrRequest, IrResponse, IrRole,
    IrStreamEvent, IrUsage,
};
pub use openai::OpenAiAdapter;
pub use pipeline::{ConversionPipeline, StreamEncoder};
pub use registry::{ProviderRegistry, RegistryBuilder};
pub use session::{SessionState, StreamSession};
