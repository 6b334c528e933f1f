//! Prompt templates and the answering prompt assembler.
//!
//! Templates use `{name}` slots; `{{` and `}}` produce literal braces.
//! Rendering is single-pass: substituted values are never re-scanned, so
//! braces inside retrieved chunks or user questions survive verbatim.

use pagewise_core::document::RetrievedChunk;
use pagewise_core::error::PromptError;
use pagewise_core::message::{ChatHistory, Message};

/// The default system instruction of the answering prompt.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are a Q&A chatbot that helps to answer the user's questions about a given document. Always follow these rules to answer the question:

Use the following pieces of context to answer the questions. The user may reference previous questions, and you can also use the chat history as context.
If the question is not related to the context, just say that it is not related.
If you don't know the answer to any of the questions, just say that you don't know, don't try to make up an answer.
Always mention in which pages the information you give are found.

<context>
{context}
</context>
";

/// How one retrieved chunk appears in the context block.
pub const DEFAULT_CONTEXT_TEMPLATE: &str = "Page {page}:\n{content}";

pub const HUMAN_TEMPLATE: &str = "{question}";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Slot(String),
}

/// A parsed `{name}` template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let source = template.into();
        let segments = parse(&source);
        Self { source, segments }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Slot names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Slot(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every slot. Fails on the first slot without a value.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(name) => {
                    let value = vars
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| PromptError::MissingVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            text.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                if is_ident(name) {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(name.to_string()));
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        // A lone brace that is not part of a slot is literal text.
        text.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}

/// Join retrieved chunks as `Page {n}:\n{content}` blocks separated by a
/// blank line. Pages are shown 1-based.
pub fn format_context(
    chunks: &[RetrievedChunk],
    template: &PromptTemplate,
) -> Result<String, PromptError> {
    let blocks = chunks
        .iter()
        .map(|chunk| {
            let page = chunk.display_page().to_string();
            template.render(&[("page", &page), ("content", &chunk.content)])
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blocks.join("\n\n"))
}

/// Builds the answering prompt: system instruction with the context, the
/// human question, then the whole chat history as role-tagged messages.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system: PromptTemplate,
    human: PromptTemplate,
    context: PromptTemplate,
}

impl PromptAssembler {
    /// Fails when the system template has no `{context}` slot or uses a slot
    /// other than `{context}`.
    pub fn new(system_template: &str, context_template: &str) -> Result<Self, PromptError> {
        let system = PromptTemplate::new(system_template);
        let variables = system.variables();
        if !variables.contains(&"context") {
            return Err(PromptError::MissingVariable("context".into()));
        }
        if let Some(other) = variables.iter().find(|v| **v != "context") {
            return Err(PromptError::MissingVariable((*other).to_string()));
        }

        Ok(Self {
            system,
            human: PromptTemplate::new(HUMAN_TEMPLATE),
            context: PromptTemplate::new(context_template),
        })
    }

    pub fn format_context(&self, chunks: &[RetrievedChunk]) -> Result<String, PromptError> {
        format_context(chunks, &self.context)
    }

    pub fn assemble(
        &self,
        context: &str,
        question: &str,
        history: &ChatHistory,
    ) -> Result<Vec<Message>, PromptError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system.render(&[("context", context)])?));
        messages.push(Message::user(self.human.render(&[("question", question)])?));
        messages.extend(history.to_messages());
        Ok(messages)
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            system: PromptTemplate::new(DEFAULT_SYSTEM_TEMPLATE),
            human: PromptTemplate::new(HUMAN_TEMPLATE),
            context: PromptTemplate::new(DEFAULT_CONTEXT_TEMPLATE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::chunk;
    use pagewise_core::message::Role;

    fn retrieved(page: u32, content: &str, rank: usize) -> RetrievedChunk {
        RetrievedChunk::from_chunk(&chunk(page, content), rank, 0.5)
    }

    #[test]
    fn render_substitutes_slots() {
        let t = PromptTemplate::new("Hello {name}, page {page}.");
        assert_eq!(t.variables(), vec!["name", "page"]);
        assert_eq!(
            t.render(&[("name", "reader"), ("page", "3")]).unwrap(),
            "Hello reader, page 3."
        );
    }

    #[test]
    fn render_is_single_pass() {
        let t = PromptTemplate::new("<context>{context}</context> {question}");
        let out = t
            .render(&[("context", "json: {question}"), ("question", "Q")])
            .unwrap();
        assert_eq!(out, "<context>json: {question}</context> Q");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let t = PromptTemplate::new("{context} and {question}");
        assert_eq!(
            t.render(&[("context", "c")]),
            Err(PromptError::MissingVariable("question".into()))
        );
    }

    #[test]
    fn escaped_and_lone_braces_are_literal() {
        let t = PromptTemplate::new(r#"{{"query": {q}}} {not a slot} }"#);
        assert_eq!(t.variables(), vec!["q"]);
        assert_eq!(t.render(&[("q", "x")]).unwrap(), r#"{"query": x} {not a slot} }"#);
    }

    #[test]
    fn context_pages_are_one_based_and_blank_line_separated() {
        let template = PromptTemplate::new(DEFAULT_CONTEXT_TEMPLATE);
        let context = format_context(
            &[retrieved(0, "Article 1", 0), retrieved(41, "Annex II", 1)],
            &template,
        )
        .unwrap();
        assert_eq!(context, "Page 1:\nArticle 1\n\nPage 42:\nAnnex II");
    }

    #[test]
    fn empty_retrieval_gives_empty_context() {
        let template = PromptTemplate::new(DEFAULT_CONTEXT_TEMPLATE);
        assert_eq!(format_context(&[], &template).unwrap(), "");
    }

    #[test]
    fn assemble_orders_system_question_history() {
        let mut history = ChatHistory::new();
        history.add_user_message("What is the MDR?");
        history.add_ai_message("A regulation (page 1).");
        history.add_user_message("Repeat that");

        let assembler = PromptAssembler::default();
        let messages = assembler.assemble("Page 1:\nMDR", "Repeat that", &history).unwrap();

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("<context>\nPage 1:\nMDR\n</context>"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "Repeat that");
        assert_eq!(messages[2].content, "What is the MDR?");
        assert_eq!(messages[3].role, Role::Assistant);
        assert_eq!(messages[4].content, "Repeat that");
    }

    #[test]
    fn system_template_needs_context_slot() {
        assert!(PromptAssembler::new("No slot here", DEFAULT_CONTEXT_TEMPLATE).is_err());
        assert!(PromptAssembler::new("{context} {extra}", DEFAULT_CONTEXT_TEMPLATE).is_err());
        assert!(PromptAssembler::new("Docs: {context}", DEFAULT_CONTEXT_TEMPLATE).is_ok());
    }

    #[test]
    fn default_system_template_has_only_context_slot() {
        assert_eq!(
            PromptTemplate::new(DEFAULT_SYSTEM_TEMPLATE).variables(),
            vec!["context"]
        );
    }
}
