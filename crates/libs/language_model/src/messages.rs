use common_types::EncodedImage;
use serde::{Deserialize, Serialize};

/// A piece of message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(EncodedImage),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// One entry of a conversation, independent of the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationMessage {
    System(String),
    Human(Vec<ContentPart>),
    Assistant(Vec<ContentPart>),
}

impl ConversationMessage {
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant(vec![ContentPart::Text(text.into())])
    }

    #[must_use]
    pub const fn role(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Human(_) => "user",
            Self::Assistant(_) => "assistant",
        }
    }

    /// Number of image parts carried by this message.
    #[must_use]
    pub fn image_count(&self) -> usize {
        match self {
            Self::System(_) => 0,
            Self::Human(parts) | Self::Assistant(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Image(_)))
                .count(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
}

impl From<&ContentPart> for MessagePart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => Self::Text { text: text.clone() },
            ContentPart::Image(image) => Self::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_url(),
                },
            },
        }
    }
}

impl From<&ConversationMessage> for Message {
    fn from(message: &ConversationMessage) -> Self {
        let content = match message {
            ConversationMessage::System(text) => MessageContent::Text(text.clone()),
            // Plain text turns go out as a string, which every compatible endpoint accepts.
            ConversationMessage::Human(parts) | ConversationMessage::Assistant(parts) => {
                match parts.as_slice() {
                    [ContentPart::Text(text)] => MessageContent::Text(text.clone()),
                    parts => MessageContent::Parts(parts.iter().map(MessagePart::from).collect()),
                }
            }
        };
        Self {
            role: message.role().to_string(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn human_message_with_image_serializes_as_parts() -> serde_json::Result<()> {
        let msg = ConversationMessage::Human(vec![
            ContentPart::text("describe"),
            ContentPart::Image(EncodedImage::new("image/jpeg", "AAAA")),
        ]);
        let wire = serde_json::to_value(Message::from(&msg))?;
        assert_eq!(
            wire,
            json!({"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAAA"}}
            ]})
        );
        assert_eq!(msg.image_count(), 1);
        Ok(())
    }

    #[test]
    fn text_only_messages_serialize_as_strings() -> serde_json::Result<()> {
        let system = serde_json::to_value(Message::from(&ConversationMessage::System(
            "be strict".into(),
        )))?;
        let reply =
            serde_json::to_value(Message::from(&ConversationMessage::assistant_text("{}")))?;
        assert_eq!(system, json!({"role": "system", "content": "be strict"}));
        assert_eq!(reply, json!({"role": "assistant", "content": "{}"}));
        Ok(())
    }
}
