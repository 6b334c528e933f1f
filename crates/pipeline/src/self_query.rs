//! Self-query: let the LLM turn a natural-language query into a search
//! query plus a structured metadata filter.

use crate::llm::LlmClient;
use pagewise_core::error::ProviderError;
use pagewise_core::filter::{AttributeInfo, MetadataFilter};
use pagewise_core::message::Message;
use serde::Deserialize;
use tracing::{debug, warn};

/// What the LLM is told about the indexed document.
#[derive(Debug, Clone)]
pub struct SelfQuerySchema {
    pub content_description: String,
    pub attributes: Vec<AttributeInfo>,
}

impl SelfQuerySchema {
    /// The default schema: one integer `page` attribute.
    pub fn pages(content_description: impl Into<String>) -> Self {
        Self {
            content_description: content_description.into(),
            attributes: vec![AttributeInfo::new(
                "page",
                "int",
                "The page number of the document",
            )],
        }
    }

    fn declares(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a.name == attribute)
    }

    pub fn prompt(&self, query: &str) -> String {
        let attributes =
            serde_json::to_string_pretty(&self.attributes).unwrap_or_else(|_| "[]".into());
        format!(
            r#"Your goal is to structure the user's query to match the request schema provided below.

Respond with a JSON object, optionally inside a ```json code block, of this shape:
{{
    "query": string,
    "filter": object or null
}}

"query" is the text to compare to document contents. Leave out any part of the
user's query that only states a filter condition.
"filter" restricts which parts of the document are searched. It is either null
or one of:
    {{"comparator": "eq" | "ne" | "lt" | "lte" | "gt" | "gte", "attribute": string, "value": integer}}
    {{"operator": "and" | "or", "arguments": [filter, ...]}}

Only use the attributes listed below. Page numbers are written as readers see
them, starting at 1. Use null when the query states no condition on an attribute.

<< Data Source >>
Content description: {description}
Attributes:
{attributes}

<< User Query >>
{query}

<< Structured Request >>
"#,
            description = self.content_description,
        )
    }
}

/// A parsed self-query response.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuery {
    pub query: String,
    /// Filter over stored (zero-based) pages
    pub filter: Option<MetadataFilter>,
}

#[derive(Deserialize)]
struct RawStructuredQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    filter: Option<serde_json::Value>,
}

/// Parse the LLM output, falling back to an unfiltered search with the
/// input query whenever the output is unusable.
pub fn parse_structured_query(
    raw: &str,
    input_query: &str,
    schema: &SelfQuerySchema,
) -> StructuredQuery {
    let fallback = StructuredQuery {
        query: input_query.to_string(),
        filter: None,
    };

    let Some(parsed) = parse_json_object(raw) else {
        warn!(output = %raw, "Self-query output is not a JSON object, searching unfiltered");
        return fallback;
    };

    let query = parsed
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| input_query.to_string());

    let filter = match parsed.filter {
        None | Some(serde_json::Value::Null) => None,
        // Some models answer "NO_FILTER" instead of null.
        Some(serde_json::Value::String(_)) => None,
        Some(value) => match serde_json::from_value::<MetadataFilter>(value) {
            Ok(filter) => {
                let undeclared = filter
                    .attributes()
                    .into_iter()
                    .find(|a| !schema.declares(a))
                    .map(str::to_string);
                match undeclared {
                    Some(attribute) => {
                        warn!(attribute = %attribute, "Self-query filter uses an undeclared attribute, ignoring it");
                        None
                    }
                    None => {
                        let shifted = filter.try_map_values("page", &|page| page.checked_sub(1));
                        if shifted.is_none() {
                            warn!("Self-query page value out of range, searching unfiltered");
                        }
                        shifted
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Invalid self-query filter, ignoring it");
                None
            }
        },
    };

    StructuredQuery { query, filter }
}

fn parse_json_object(raw: &str) -> Option<RawStructuredQuery> {
    let text = strip_code_fence(raw.trim());
    if let Ok(parsed) = serde_json::from_str(text) {
        return Some(parsed);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Ask the LLM for a structured query. LLM errors propagate.
pub async fn structure_query(
    llm: &LlmClient,
    query: &str,
    schema: &SelfQuerySchema,
) -> Result<StructuredQuery, ProviderError> {
    let raw = llm.generate(vec![Message::user(schema.prompt(query))]).await?;
    let structured = parse_structured_query(&raw, query, schema);
    debug!(
        query = %structured.query,
        filter = ?structured.filter,
        "Structured self-query"
    );
    Ok(structured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewise_core::filter::Comparator;

    fn schema() -> SelfQuerySchema {
        SelfQuerySchema::pages("Medical devices regulation")
    }

    #[test]
    fn prompt_describes_schema() {
        let prompt = schema().prompt("What is on page 3?");
        assert!(prompt.contains("Content description: Medical devices regulation"));
        assert!(prompt.contains(r#""name": "page""#));
        assert!(prompt.contains(r#""type": "int""#));
        assert!(prompt.contains("<< User Query >>\nWhat is on page 3?"));
    }

    #[test]
    fn page_filter_is_converted_to_zero_based() {
        let raw = r#"```json
{"query": "contents", "filter": {"comparator": "eq", "attribute": "page", "value": 3}}
```"#;
        let sq = parse_structured_query(raw, "What is on page 3?", &schema());
        assert_eq!(sq.query, "contents");
        assert_eq!(
            sq.filter,
            Some(MetadataFilter::comparison(Comparator::Eq, "page", 2))
        );
    }

    #[test]
    fn out_of_range_page_value_searches_unfiltered() {
        let raw = r#"{"query": "x", "filter": {"comparator": "lt", "attribute": "page", "value": -9223372036854775808}}"#;
        let sq = parse_structured_query(raw, "x", &schema());
        assert_eq!(sq.query, "x");
        assert_eq!(sq.filter, None);
    }

    #[test]
    fn compound_filters_convert_every_page_value() {
        let raw = r#"{"query": "annexes", "filter": {"operator": "and", "arguments": [
            {"comparator": "gte", "attribute": "page", "value": 40},
            {"comparator": "lte", "attribute": "page", "value": 42}]}}"#;
        let sq = parse_structured_query(raw, "annexes", &schema());
        assert_eq!(
            sq.filter,
            Some(MetadataFilter::and(vec![
                MetadataFilter::comparison(Comparator::Gte, "page", 39),
                MetadataFilter::comparison(Comparator::Lte, "page", 41),
            ]))
        );
    }

    #[test]
    fn null_filter_means_unfiltered() {
        let sq = parse_structured_query(
            r#"{"query": "medical devices regulation", "filter": null}"#,
            "What is the MDR?",
            &schema(),
        );
        assert_eq!(sq.query, "medical devices regulation");
        assert!(sq.filter.is_none());
    }

    #[test]
    fn no_filter_string_means_unfiltered() {
        let sq = parse_structured_query(r#"{"query": "x", "filter": "NO_FILTER"}"#, "x", &schema());
        assert!(sq.filter.is_none());
    }

    #[test]
    fn undeclared_attribute_drops_filter() {
        let raw = r#"{"query": "authors", "filter": {"comparator": "eq", "attribute": "author", "value": 1}}"#;
        let sq = parse_structured_query(raw, "who wrote it", &schema());
        assert_eq!(sq.query, "authors");
        assert!(sq.filter.is_none());
    }

    #[test]
    fn empty_query_falls_back_to_input() {
        let sq = parse_structured_query(r#"{"query": "  ", "filter": null}"#, "original", &schema());
        assert_eq!(sq.query, "original");
    }

    #[test]
    fn garbage_output_falls_back_to_input() {
        let sq = parse_structured_query("I cannot help with that.", "original", &schema());
        assert_eq!(
            sq,
            StructuredQuery {
                query: "original".into(),
                filter: None
            }
        );
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let sq = parse_structured_query(
            r#"Here you go: {"query": "vigilance", "filter": null} Hope this helps."#,
            "q",
            &schema(),
        );
        assert_eq!(sq.query, "vigilance");
    }
}
