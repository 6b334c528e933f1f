//! Conversational query rewriting.
//!
//! Turns a follow-up question ("can you repeat that?") into a standalone
//! query that a similarity search can match against document text.

use crate::llm::LlmClient;
use crate::prompt::PromptTemplate;
use pagewise_core::error::PromptError;
use pagewise_core::message::{ChatHistory, Message, TurnRole};
use tracing::debug;

pub const REWRITE_TEMPLATE: &str = "\
You are an AI assistant that helps a user query a document.
The user makes some questions and you create the queries to find the parts of document that are most relevant to the questions.
The search will be performed by similarity so you need to provide a query similar to the contents that are in the document.
You do not have the context of the document. You will be making the queries based on the questions and history to get the context from the document.
This is the chat history of the conversation until now:
<history>
{chat_history}
</history>

Take into account the context of the chat history when preparing the query for the following question:
Prepare a query for this question. Output only the query as a natural language question.
Question: {question}";

/// Render the history as a numbered transcript.
///
/// Human turns are numbered from 1; AI turns are not numbered.
pub fn format_history(history: &ChatHistory) -> String {
    let mut out = String::new();
    let mut question_id = 1;
    for turn in history.turns() {
        match turn.role {
            TurnRole::Human => {
                out.push_str(&format!("{question_id}. Human: {}\n", turn.content));
                question_id += 1;
            }
            TurnRole::Ai => out.push_str(&format!("AI: {}\n", turn.content)),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct QueryRewriter {
    template: PromptTemplate,
}

impl QueryRewriter {
    pub fn new() -> Self {
        Self {
            template: PromptTemplate::new(REWRITE_TEMPLATE),
        }
    }

    pub fn prompt(&self, question: &str, history: &ChatHistory) -> Result<String, PromptError> {
        let transcript = format_history(history);
        self.template
            .render(&[("chat_history", &transcript), ("question", question)])
    }

    /// Ask the LLM for a standalone search query. No retries: LLM errors
    /// propagate to the caller.
    pub async fn rewrite(
        &self,
        llm: &LlmClient,
        question: &str,
        history: &ChatHistory,
    ) -> pagewise_core::Result<String> {
        let prompt = self.prompt(question, history)?;
        let query = llm.generate(vec![Message::user(prompt)]).await?;
        let query = query.trim().to_string();
        debug!(question = %question, query = %query, "Rewrote query");
        Ok(query)
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}
