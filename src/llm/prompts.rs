//! Prompt templates.

/// Collection of prompts used for question generation and answering.
pub struct Prompts;

impl Prompts {
    /// Prompt asking for evaluation questions about a document.
    ///
    /// Placeholder: `{text}`.
    pub fn question_generation() -> &'static str {
        r#"You are an expert at writing evaluation questions for retrieval systems.

Read the following text and write questions that can be answered using only the information in it. Each question should be specific, self-contained and answerable from a single passage of the text.

Text:
{text}

Return the following JSON format:
{
    "questions": ["<question 1>", "<question 2>", ...]
}

Directly return the final JSON structure. Do not output anything else."#
    }

    /// Prompt asking for an answer grounded in retrieved chunks.
    ///
    /// Placeholders: `{question}`, `{context}`.
    pub fn rag_answer() -> &'static str {
        r#"Answer the question using only the relevant chunks below. If the chunks do not contain the answer, say that you don't know.

Question: {question}

Relevant chunks:
{context}

Answer:"#
    }

    /// Fill `{key}` placeholders in a template.
    pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{}}}", key), value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_question_prompt() {
        let prompt = Prompts::render(Prompts::question_generation(), &[("text", "Rust is fast.")]);
        assert!(prompt.contains("Rust is fast."));
        assert!(!prompt.contains("{text}"));
        assert!(prompt.contains("\"questions\""));
    }

    #[test]
    fn test_render_answer_prompt() {
        let prompt = Prompts::render(
            Prompts::rag_answer(),
            &[("question", "Why?"), ("context", "Because.")],
        );
        assert!(prompt.contains("Question: Why?"));
        assert!(prompt.contains("Because."));
    }
}
