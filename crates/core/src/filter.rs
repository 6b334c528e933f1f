//! Structured metadata filters for self-query retrieval.
//!
//! A filter is a small expression tree over declared chunk attributes. The
//! wire shape is the JSON the self-query prompt asks the LLM to emit:
//!
//! ```json
//! {"comparator": "gte", "attribute": "page", "value": 3}
//! {"operator": "and", "arguments": [ ... ]}
//! ```

use serde::{Deserialize, Serialize};

use crate::document::Chunk;

/// A filterable attribute, as declared to the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl AttributeInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparator {
    fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Comparator::Eq => left == right,
            Comparator::Ne => left != right,
            Comparator::Lt => left < right,
            Comparator::Lte => left <= right,
            Comparator::Gt => left > right,
            Comparator::Gte => left >= right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    And,
    Or,
}

/// A metadata filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataFilter {
    Comparison {
        comparator: Comparator,
        attribute: String,
        value: i64,
    },
    Operation {
        operator: Operator,
        arguments: Vec<MetadataFilter>,
    },
}

impl MetadataFilter {
    pub fn comparison(comparator: Comparator, attribute: impl Into<String>, value: i64) -> Self {
        MetadataFilter::Comparison {
            comparator,
            attribute: attribute.into(),
            value,
        }
    }

    pub fn and(arguments: Vec<MetadataFilter>) -> Self {
        MetadataFilter::Operation {
            operator: Operator::And,
            arguments,
        }
    }

    pub fn or(arguments: Vec<MetadataFilter>) -> Self {
        MetadataFilter::Operation {
            operator: Operator::Or,
            arguments,
        }
    }

    /// Evaluate the filter against a stored chunk.
    ///
    /// Comparisons on attributes the chunk does not carry never match.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            MetadataFilter::Comparison {
                comparator,
                attribute,
                value,
            } => attribute_value(chunk, attribute).is_some_and(|v| comparator.holds(v, *value)),
            MetadataFilter::Operation {
                operator: Operator::And,
                arguments,
            } => arguments.iter().all(|f| f.matches(chunk)),
            MetadataFilter::Operation {
                operator: Operator::Or,
                arguments,
            } => arguments.iter().any(|f| f.matches(chunk)),
        }
    }

    /// Every attribute name referenced anywhere in the expression.
    pub fn attributes(&self) -> Vec<&str> {
        match self {
            MetadataFilter::Comparison { attribute, .. } => vec![attribute.as_str()],
            MetadataFilter::Operation { arguments, .. } => {
                arguments.iter().flat_map(|f| f.attributes()).collect()
            }
        }
    }

    /// Rewrite every comparison value on `attribute`; `None` if `f` rejects any of them.
    pub fn try_map_values(self, attribute: &str, f: &impl Fn(i64) -> Option<i64>) -> Option<Self> {
        match self {
            MetadataFilter::Comparison {
                comparator,
                attribute: name,
                value,
            } => {
                let value = if name == attribute { f(value)? } else { value };
                Some(MetadataFilter::Comparison {
                    comparator,
                    attribute: name,
                    value,
                })
            }
            MetadataFilter::Operation {
                operator,
                arguments,
            } => Some(MetadataFilter::Operation {
                operator,
                arguments: arguments
                    .into_iter()
                    .map(|a| a.try_map_values(attribute, f))
                    .collect::<Option<Vec<_>>>()?,
            }),
        }
    }
}

fn attribute_value(chunk: &Chunk, attribute: &str) -> Option<i64> {
    match attribute {
        "page" => Some(chunk.page as i64),
        "start_index" => Some(chunk.start_index as i64),
        _ => None,
    }
}
