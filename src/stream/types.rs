//! Request and response types exchanged with the search stream endpoint.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// One search/chat turn sent to the backend.
///
/// Serialized as query parameters on the stream URL. Booleans are sent as
/// the literal strings `"true"` / `"false"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// Agent the turn is addressed to.
    pub agent_id: String,
    /// Conversation thread to continue, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Natural-language query.
    pub query: String,
    /// Whether this turn carries human feedback on a plan.
    #[serde(default)]
    pub human_feedback: bool,
    /// Feedback text, by convention present when `human_feedback` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_feedback_content: Option<String>,
    /// Whether the previous plan was rejected.
    #[serde(default)]
    pub rejected_plan: bool,
    /// Only run the NL2SQL stage.
    #[serde(default)]
    pub nl2sql_only: bool,
}

impl StreamRequest {
    /// Create a request with all flags off.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            thread_id: None,
            query: query.into(),
            human_feedback: false,
            human_feedback_content: None,
            rejected_plan: false,
            nl2sql_only: false,
        }
    }

    /// Continue an existing thread.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Attach human feedback to the turn.
    #[must_use]
    pub fn with_human_feedback(mut self, content: Option<String>, rejected_plan: bool) -> Self {
        self.human_feedback = true;
        self.human_feedback_content = content;
        self.rejected_plan = rejected_plan;
        self
    }

    /// Restrict the turn to NL2SQL.
    #[must_use]
    pub fn nl2sql_only(mut self, nl2sql_only: bool) -> Self {
        self.nl2sql_only = nl2sql_only;
        self
    }

    /// Check the fields the backend cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(Error::Validation("agentId must not be empty".into()));
        }
        if self.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        Ok(())
    }

    /// Append this request's query parameters to `url`.
    pub fn apply_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("agentId", &self.agent_id);
        if let Some(thread_id) = self.thread_id.as_deref().filter(|s| !s.is_empty()) {
            pairs.append_pair("threadId", thread_id);
        }
        pairs.append_pair("query", &self.query);
        pairs.append_pair("humanFeedback", bool_param(self.human_feedback));
        pairs.append_pair("rejectedPlan", bool_param(self.rejected_plan));
        pairs.append_pair("nl2sqlOnly", bool_param(self.nl2sql_only));
        if let Some(content) = self
            .human_feedback_content
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            pairs.append_pair("humanFeedbackContent", content);
        }
    }
}

fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Content type of a node's `text`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextType {
    /// JSON document.
    Json,
    /// Python source.
    Python,
    /// SQL statement.
    Sql,
    /// HTML fragment, part of the rendered report.
    Html,
    /// Markdown text, part of the alternate report rendering.
    #[serde(rename = "MARK_DOWN", alias = "MARKDOWN")]
    Markdown,
    /// Tabular query result.
    ResultSet,
    /// Plain text.
    #[default]
    Text,
}

impl std::fmt::Display for TextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Json => "JSON",
            Self::Python => "PYTHON",
            Self::Sql => "SQL",
            Self::Html => "HTML",
            Self::Markdown => "MARK_DOWN",
            Self::ResultSet => "RESULT_SET",
            Self::Text => "TEXT",
        };
        f.write_str(s)
    }
}

/// One incremental unit of output from the backend pipeline.
///
/// Missing and `null` fields decode to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub agent_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thread_id: String,
    /// Pipeline node that produced this output.
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text_type: TextType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    /// The node failed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: bool,
    /// The node finished.
    #[serde(default, deserialize_with = "null_as_default")]
    pub complete: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl NodeResponse {
    /// Decode a frame payload.
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Whether this node ends its turn's block.
    #[must_use]
    pub fn ends_turn(&self) -> bool {
        self.complete || self.error
    }

    /// Decode the tabular payload of a `RESULT_SET` node.
    ///
    /// Returns `Ok(None)` for every other text type.
    pub fn result_set(&self) -> Result<Option<ResultData>> {
        if self.text_type != TextType::ResultSet {
            return Ok(None);
        }
        let data = serde_json::from_str(&self.text)
            .map_err(|e| Error::StreamDecode(format!("{}: {e}", self.node_name)))?;
        Ok(Some(data))
    }
}

/// Payload of a `RESULT_SET` node: the rows plus how to chart them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_style: Option<DisplayStyle>,
    pub result_set: ResultSet,
}

/// Chart hint attached to a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStyle {
    /// Chart kind, such as `table`, `bar` or `line`.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Column on the x axis.
    #[serde(default, deserialize_with = "null_as_default")]
    pub x: String,
    /// Columns on the y axis.
    #[serde(default, deserialize_with = "null_as_default")]
    pub y: Vec<String>,
}

/// Query result rows keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    #[serde(default, deserialize_with = "null_as_default")]
    pub column: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<HashMap<String, String>>,
    /// Set when the query failed on the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl ResultSet {
    /// Row `index` as cells in column order. Missing cells are empty.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<Vec<&str>> {
        let row = self.data.get(index)?;
        Some(
            self.column
                .iter()
                .map(|c| row.get(c).map_or("", String::as_str))
                .collect(),
        )
    }

    /// Rows on `page` (1-based) when split into pages of `page_size`.
    #[must_use]
    pub fn page(&self, page: usize, page_size: usize) -> &[HashMap<String, String>] {
        if page == 0 || page_size == 0 {
            return &[];
        }
        let start = (page - 1).saturating_mul(page_size).min(self.data.len());
        let end = start.saturating_add(page_size).min(self.data.len());
        &self.data[start..end]
    }

    /// Number of pages of `page_size` rows.
    #[must_use]
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            0
        } else {
            self.data.len().div_ceil(page_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_follow_backend_contract() {
        let request = StreamRequest::new("42", "top 10 customers")
            .with_thread_id("t-1")
            .nl2sql_only(true);
        let mut url = Url::parse("http://localhost/api/stream/search").unwrap();
        request.apply_to(&mut url);

        assert_eq!(
            url.query(),
            Some(
                "agentId=42&threadId=t-1&query=top+10+customers&humanFeedback=false&rejectedPlan=false&nl2sqlOnly=true"
            )
        );
    }

    #[test]
    fn feedback_content_is_sent_last_and_only_when_present() {
        let request = StreamRequest::new("7", "q")
            .with_human_feedback(Some("use Q3 only".into()), true);
        let mut url = Url::parse("http://localhost/s").unwrap();
        request.apply_to(&mut url);

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.last().unwrap().0, "humanFeedbackContent");
        assert_eq!(pairs.last().unwrap().1, "use Q3 only");
        assert!(pairs.iter().any(|(k, v)| k == "rejectedPlan" && v == "true"));
        assert!(!pairs.iter().any(|(k, _)| k == "threadId"));
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(StreamRequest::new("", "q").validate().is_err());
        assert!(StreamRequest::new("1", "   ").validate().is_err());
        assert!(StreamRequest::new("1", "q").validate().is_ok());
    }

    #[test]
    fn decodes_backend_node() {
        let node = NodeResponse::from_json(
            r#"{"agentId":"42","threadId":"t","nodeName":"SqlGenerateNode","textType":"SQL","text":"SELECT 1","error":false,"complete":false}"#,
        )
        .unwrap();
        assert_eq!(node.text_type, TextType::Sql);
        assert_eq!(node.node_name, "SqlGenerateNode");
        assert!(!node.ends_turn());
    }

    #[test]
    fn decodes_markdown_spellings_and_missing_fields() {
        let node = NodeResponse::from_json(r##"{"textType":"MARK_DOWN","text":"# hi"}"##).unwrap();
        assert_eq!(node.text_type, TextType::Markdown);
        assert!(node.agent_id.is_empty());

        let node = NodeResponse::from_json(r#"{"textType":"MARKDOWN","complete":true}"#).unwrap();
        assert_eq!(node.text_type, TextType::Markdown);
        assert!(node.ends_turn());
    }

    #[test]
    fn rejects_unknown_text_type() {
        assert!(NodeResponse::from_json(r#"{"textType":"BINARY"}"#).is_err());
    }

    #[test]
    fn null_fields_decode_to_defaults() {
        let node = NodeResponse::from_json(
            r#"{"agentId":"42","threadId":null,"nodeName":"PlannerNode","textType":null,"text":null,"error":null,"complete":false}"#,
        )
        .unwrap();
        assert_eq!(node.agent_id, "42");
        assert!(node.thread_id.is_empty());
        assert!(node.text.is_empty());
        assert_eq!(node.text_type, TextType::Text);
        assert!(!node.error);
    }

    #[test]
    fn result_set_payload_decodes() {
        let node = NodeResponse {
            agent_id: "42".into(),
            thread_id: "t".into(),
            node_name: "SqlExecuteNode".into(),
            text_type: TextType::ResultSet,
            text: r#"{
                "displayStyle": {"type": "bar", "title": "Top customers", "x": "name", "y": ["total"]},
                "resultSet": {
                    "column": ["name", "total"],
                    "data": [{"name": "Acme", "total": "120"}, {"name": "Globex"}, {"name": "Initech", "total": "80"}],
                    "errorMsg": null
                }
            }"#
            .into(),
            error: false,
            complete: true,
        };

        let data = node.result_set().unwrap().unwrap();
        let style = data.display_style.unwrap();
        assert_eq!(style.kind, "bar");
        assert_eq!(style.y, vec!["total"]);

        let rows = data.result_set;
        assert!(rows.error_msg.is_none());
        assert_eq!(rows.row(0), Some(vec!["Acme", "120"]));
        assert_eq!(rows.row(1), Some(vec!["Globex", ""]));
        assert_eq!(rows.row(3), None);
        assert_eq!(rows.page_count(2), 2);
        assert_eq!(rows.page(2, 2).len(), 1);
        assert_eq!(rows.page(2, 2)[0]["name"], "Initech");
        assert!(rows.page(3, 2).is_empty());
        assert!(rows.page(0, 2).is_empty());
    }

    #[test]
    fn result_set_only_applies_to_result_nodes() {
        let mut node = NodeResponse::from_json(r#"{"textType":"SQL","text":"SELECT 1"}"#).unwrap();
        assert_eq!(node.result_set().unwrap(), None);

        node.text_type = TextType::ResultSet;
        node.text = "[]".into();
        assert!(matches!(node.result_set(), Err(Error::StreamDecode(_))));

        node.text = r#"{"resultSet":{"column":[],"data":[],"errorMsg":"table not found"}}"#.into();
        let data = node.result_set().unwrap().unwrap();
        assert!(data.display_style.is_none());
        assert_eq!(data.result_set.error_msg.as_deref(), Some("table not found"));
    }
}
