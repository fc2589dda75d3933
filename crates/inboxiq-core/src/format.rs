use crate::context::{ContextKind, SelectedContext};

// The backend parses these blocks by label; the text must not change.
const USER_ID: &str = "user_id";
const EMAIL_ADDRESS: &str = "Email address";
const TAG_ID: &str = "Tag id";
const TAG_NAME: &str = "Tag name";
const TASK: &str = "task";

/// Builds the outbound text for a user message.
///
/// Without a context the trimmed input goes out as-is. With a context the
/// message becomes a `label: value` block the backend reads line by line.
pub fn format_outbound(raw_input: &str, context: Option<&SelectedContext>, user_id: &str) -> String {
    let task = raw_input.trim();
    let Some(context) = context else {
        return task.to_string();
    };

    let mut lines = vec![line(USER_ID, user_id)];
    match context.kind {
        ContextKind::EmailAccount => {
            lines.push(line(EMAIL_ADDRESS, &context.display_value));
        }
        ContextKind::Tag => {
            lines.push(line(TAG_ID, numeric_id(&context.identifier)));
            lines.push(line(TAG_NAME, &context.display_value));
            if let Some(address) = &context.resolved_account_address {
                lines.push(line(EMAIL_ADDRESS, address));
            }
        }
    }
    lines.push(line(TASK, task));
    lines.join("\n")
}

fn line(label: &str, value: &str) -> String {
    format!("{}: {}", label, value)
}

/// Trailing digits of an identifier such as `tag-7`; the whole identifier
/// when it has none.
fn numeric_id(identifier: &str) -> &str {
    let digits_start = identifier
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_start {
        Some(i) => &identifier[i..],
        None => identifier,
    }
}
