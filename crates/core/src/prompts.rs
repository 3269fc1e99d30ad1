use crate::models::{Message, QueryHit, Role};

/// Renders the last `max_turns` user/assistant pairs of `history`.
///
/// A pair is a `user` message directly followed by an `assistant` message;
/// anything unpaired, such as a pending question, is left out.
pub fn build_transcript(history: &[Message], max_turns: usize) -> String {
    let mut pairs = Vec::new();
    let mut index = 0;

    while index + 1 < history.len() {
        let (first, second) = (&history[index], &history[index + 1]);
        if first.role == Role::User && second.role == Role::Assistant {
            pairs.push(format!(
                "User: {}\nAssistant: {}",
                first.content, second.content
            ));
            index += 2;
        } else {
            index += 1;
        }
    }

    let skip = pairs.len().saturating_sub(max_turns);
    pairs[skip..].join("\n\n")
}

pub fn build_reference_block(hits: &[QueryHit]) -> String {
    hits.iter()
        .map(|hit| format!("From {}:\n{}", hit.source_path, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn answer_prompt(language: &str, transcript: &str, references: &str, question: &str) -> String {
    format!(
        "You are a helpful and informative bot that answers questions using the reference passages and conversation history included below.\n\
Be sure to respond in a complete sentence, being comprehensive, including all relevant background information.\n\
If the passages are irrelevant to the answer, you may ignore them. Answer in the specified language: {language}\n\
\n\
Previous Conversation:\n\
{transcript}\n\
\n\
Reference Passages:\n\
{references}\n\
\n\
Current Question: {question}\n"
    )
}

pub fn summary_prompt(language: &str, transcript: &str) -> String {
    format!(
        "Based on the conversation history below, provide a brief 1-2 sentence summary.\n\
Answer in the specified language: {language}\n\
\n\
Conversation:\n\
{transcript}\n"
    )
}
