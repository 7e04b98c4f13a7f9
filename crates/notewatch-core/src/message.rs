//! Channel-neutral structured messages. Delivery adapters render these into
//! their own markup.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub label: String,
    pub value: String,
    pub detail: Option<String>,
}

impl Field {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header { text: String },
    Context { items: Vec<Field> },
    Divider,
    Section { text: Option<String>, fields: Vec<Field> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredMessage {
    /// Plain-text fallback for clients that cannot show blocks.
    pub fallback: String,
    pub blocks: Vec<Block>,
}

impl StructuredMessage {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            blocks: Vec::new(),
        }
    }

    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }
}
