//! Relevance filtering, source attribution, and prompt assembly.
//!
//! After a similarity search returns the top-k nodes, [`RelevanceFilter`]
//! drops nodes below the similarity cutoff and applies keyword gating.
//! Only surviving nodes reach the prompt, and [`collect_sources`] reports
//! exactly those nodes' files.

use std::collections::HashSet;

use crate::models::ScoredNode;

/// Post-retrieval node filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelevanceFilter {
    /// Nodes scoring strictly below this are dropped.
    pub similarity_cutoff: Option<f32>,
    /// A node must mention at least one of these (case-insensitive). Empty disables the gate.
    pub required_keywords: Vec<String>,
    /// A node mentioning any of these is dropped.
    pub exclude_keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn apply(&self, nodes: Vec<ScoredNode>) -> Vec<ScoredNode> {
        let required: Vec<String> = self.required_keywords.iter().map(|k| k.to_lowercase()).collect();
        let excluded: Vec<String> = self.exclude_keywords.iter().map(|k| k.to_lowercase()).collect();

        nodes
            .into_iter()
            .filter(|node| self.similarity_cutoff.map_or(true, |cutoff| node.score >= cutoff))
            .filter(|node| {
                if required.is_empty() && excluded.is_empty() {
                    return true;
                }
                let text = node.text.to_lowercase();
                let has_required = required.is_empty() || required.iter().any(|k| text.contains(k));
                let has_excluded = excluded.iter().any(|k| text.contains(k));
                has_required && !has_excluded
            })
            .collect()
    }
}

/// De-duplicated, order-preserving list of file paths behind `nodes`.
pub fn collect_sources(nodes: &[ScoredNode]) -> Vec<String> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|n| seen.insert(n.file_path.as_str()))
        .map(|n| n.file_path.clone())
        .collect()
}

/// Join node texts into the context block handed to the language model.
pub fn build_context(nodes: &[ScoredNode]) -> String {
    nodes
        .iter()
        .map(|n| format!("file_path: {}\n\n{}", n.file_path, n.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

const CONTEXT_PLACEHOLDER: &str = "{context_str}";
const QUERY_PLACEHOLDER: &str = "{query_str}";

/// Fill `{context_str}` and `{query_str}` in a prompt template.
///
/// Placeholders are substituted in one left-to-right pass over the
/// template, so placeholder text inside the context or the query is left
/// as written.
pub fn render_template(template: &str, context: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
            out.push_str(query);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str, text: &str, score: f32) -> ScoredNode {
        ScoredNode {
            node_id: format!("{}#{}", path, score),
            identity: path.to_string(),
            file_path: path.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn cutoff_drops_low_scores() {
        let filter = RelevanceFilter {
            similarity_cutoff: Some(0.5),
            ..Default::default()
        };
        let kept = filter.apply(vec![node("/a", "x", 0.9), node("/b", "y", 0.2)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].file_path, "/a");
    }

    #[test]
    fn keyword_gates_are_case_insensitive() {
        let filter = RelevanceFilter {
            similarity_cutoff: None,
            required_keywords: vec!["France".to_string()],
            exclude_keywords: vec!["draft".to_string()],
        };
        let kept = filter.apply(vec![
            node("/a", "the capital of france", 0.9),
            node("/b", "France DRAFT notes", 0.8),
            node("/c", "unrelated", 0.7),
        ]);
        assert_eq!(collect_sources(&kept), vec!["/a"]);
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let nodes = vec![
            node("/b", "1", 0.9),
            node("/a", "2", 0.8),
            node("/b", "3", 0.7),
        ];
        assert_eq!(collect_sources(&nodes), vec!["/b", "/a"]);
    }

    #[test]
    fn template_placeholders_are_filled() {
        let out = render_template("Context: {context_str}\nQuestion: {query_str}", "ctx", "q?");
        assert_eq!(out, "Context: ctx\nQuestion: q?");
    }

    #[test]
    fn placeholder_text_in_documents_is_kept_verbatim() {
        let out = render_template(
            "{context_str} | {query_str} | {other}",
            "docs mention {query_str} and {context_str}",
            "what is {x}?",
        );
        assert_eq!(
            out,
            "docs mention {query_str} and {context_str} | what is {x}? | {other}"
        );
    }
}
