//! Everything between a reference timeline and an AI engine: request
//! building, transport, response repair, and the stage runner.

pub mod api;
pub mod batch;
pub mod engine;
pub mod repair;
pub mod request;
pub mod runner;

pub use batch::{AiOptions, RequestBuilder};
pub use engine::{AiEngine, AiResponse, CooldownTracker};
pub use repair::{ParsedItem, parse_items, repair_response};
pub use request::{AiRequest, Content, ContentPart, Message, Role};
pub use runner::AiStage;
