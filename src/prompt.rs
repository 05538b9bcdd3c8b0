//! Prompt construction from system instructions, retrieved context,
//! conversation history, and the current user message.

use ragchat_core::assemble::AssembledContext;

use crate::completion::{Message, Role};

/// Stated to the model when retrieval was requested but found nothing.
pub const NO_CONTEXT_NOTICE: &str =
    "No relevant document context was found for this question. Say so if the answer depends on the documents.";

/// One completed user/assistant exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Build the message list for one generation.
///
/// `context` is `None` when retrieval was not requested. An empty context
/// yields [`NO_CONTEXT_NOTICE`] instead of a context section.
pub fn build_prompt(
    system_prompt: &str,
    history: &[Turn],
    context: Option<&AssembledContext>,
    message: &str,
) -> Vec<Message> {
    let mut system = system_prompt.trim().to_string();
    match context {
        Some(ctx) if !ctx.is_empty() => {
            system.push_str("\n\nDocument context:\n\n");
            system.push_str(ctx.text.trim_end());
        }
        Some(_) => {
            system.push_str("\n\n");
            system.push_str(NO_CONTEXT_NOTICE);
        }
        None => {}
    }

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(Message::new(Role::System, system));
    for turn in history {
        messages.push(Message::new(Role::User, turn.user.clone()));
        messages.push(Message::new(Role::Assistant, turn.assistant.clone()));
    }
    messages.push(Message::new(Role::User, message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat_core::assemble::ContextReference;

    fn context(text: &str) -> AssembledContext {
        AssembledContext {
            text: text.to_string(),
            references: vec![ContextReference {
                ref_id: "d.0".to_string(),
                document_id: "d".to_string(),
                document_name: "d.txt".to_string(),
                chunk_index: 0,
                score: 1.0,
            }],
            tokens_used: 5,
            skipped: 0,
        }
    }

    #[test]
    fn test_plain_chat_has_no_context_section() {
        let messages = build_prompt("Be brief.", &[], None, "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[1], Message::new(Role::User, "hello"));
    }

    #[test]
    fn test_context_in_system_message() {
        let ctx = context("[d.0] d.txt\nThe sky is blue.\n\n");
        let messages = build_prompt("Be brief.", &[], Some(&ctx), "sky?");
        assert!(messages[0].content.contains("Document context:"));
        assert!(messages[0].content.ends_with("The sky is blue."));
    }

    #[test]
    fn test_empty_context_states_notice() {
        let messages = build_prompt("Be brief.", &[], Some(&AssembledContext::default()), "q");
        assert!(messages[0].content.contains(NO_CONTEXT_NOTICE));
    }

    #[test]
    fn test_history_in_order() {
        let history = vec![
            Turn {
                user: "one".to_string(),
                assistant: "uno".to_string(),
            },
            Turn {
                user: "two".to_string(),
                assistant: "dos".to_string(),
            },
        ];
        let messages = build_prompt("sys", &history, None, "three");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User
            ]
        );
        assert_eq!(messages[3].content, "two");
        assert_eq!(messages[5].content, "three");
    }
}
