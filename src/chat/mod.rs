//! Chat transcript rendering
//!
//! Maps structured role/content turns onto the flat text form the model is
//! trained on, and parses assistant responses back out of generated text.

mod template;

pub use template::{ChatTemplate, Message, ResponseExtract, Role};
