//! AI request model: the message list sent over the wire and the flattened
//! prompt text used for manual engines and debugging side files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Typed content parts, matching the OpenAI-style wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InputAudio { input_audio: AudioPayload },
    ImageUrl { image_url: ImagePayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded audio.
    pub data: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub url: String,
}

/// Message content: plain text or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn text(role: Role, text: &str) -> Self {
        Self {
            role,
            content: Content::Text(text.to_string()),
        }
    }
}

/// One bounded request. Immutable once constructed; applying the parsed
/// response through the runner is the only mutation path back into domain
/// state.
#[derive(Debug, Clone)]
pub struct AiRequest {
    /// Stage that issued the request (the collection's full id).
    pub task_id: String,
    /// 1-based sequence number within the stage's current run.
    pub number: u32,
    pub messages: Vec<Message>,
    /// How many not-yet-done items this request asks for.
    pub items_to_do: usize,
    /// Human-readable rendering of the whole prompt.
    pub full_prompt: String,
}

impl AiRequest {
    pub fn new(task_id: &str, number: u32, messages: Vec<Message>, items_to_do: usize) -> Self {
        let full_prompt = render_full_prompt(&messages);
        Self {
            task_id: task_id.to_string(),
            number,
            messages,
            items_to_do,
            full_prompt,
        }
    }

    /// Side-file name for manual engines and failed responses. A slash in a
    /// translation task id would split the filename, so it is flattened.
    pub fn side_file_name(&self) -> String {
        format!(
            "TODO_{}_{:04}.txt",
            self.task_id.replace('/', "_"),
            self.number
        )
    }

    /// `<base>.TODO_<task>_<number>.txt` next to the project file.
    pub fn side_file_path(&self, base: &Path) -> PathBuf {
        let mut name = base.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(self.side_file_name());
        base.with_file_name(name)
    }
}

fn render_full_prompt(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let header = match message.role {
            Role::System => "******* System ********************************",
            Role::User => "******* User **********************************",
            Role::Assistant => "******* Assistant *****************************",
        };
        out.push_str(header);
        out.push('\n');
        match &message.content {
            Content::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Content::Parts(parts) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => {
                            out.push_str(text);
                            out.push('\n');
                        }
                        ContentPart::InputAudio { input_audio } => {
                            out.push_str(&format!("[audio: {} bytes base64, {}]\n",
                                input_audio.data.len(),
                                input_audio.format));
                        }
                        ContentPart::ImageUrl { .. } => {
                            out.push_str("[image]\n");
                        }
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}
