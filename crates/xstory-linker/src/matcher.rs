//! Keyword matching of commit messages against active stories.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use xstory_core::{jaccard, KeywordExtractor, StoryId, StoryNode};
use xstory_storage::LinkStrength;

/// Precomputed keyword set of one active story.
#[derive(Debug, Clone)]
struct StoryKeywords {
    id: StoryId,
    depth: i64,
    keywords: BTreeSet<String>,
}

/// The best-scoring story for a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: StoryId,
    pub depth: i64,
    pub similarity: f64,
}

/// Scores keyword sets against every active story.
#[derive(Debug, Clone)]
pub struct StoryMatcher {
    stories: Vec<StoryKeywords>,
}

impl StoryMatcher {
    /// Build from the active nodes; disposed nodes are ignored.
    pub fn new<'a, I>(nodes: I, extractor: &KeywordExtractor) -> Self
    where
        I: IntoIterator<Item = &'a StoryNode>,
    {
        let stories = nodes
            .into_iter()
            .filter(|node| node.is_active())
            .map(|node| {
                let mut keywords = extractor.extract(&node.title);
                keywords.extend(extractor.extract(&node.description));
                StoryKeywords {
                    id: node.id.clone(),
                    depth: node.id.depth(),
                    keywords,
                }
            })
            .filter(|story| !story.keywords.is_empty())
            .collect();
        Self { stories }
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Highest similarity wins; ties go to the shallower node, then the smaller id.
    pub fn best_match(&self, keywords: &BTreeSet<String>) -> Option<Match> {
        self.stories
            .iter()
            .map(|story| Match {
                id: story.id.clone(),
                depth: story.depth,
                similarity: jaccard(keywords, &story.keywords),
            })
            .filter(|m| m.similarity > 0.0)
            .min_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.depth.cmp(&b.depth))
                    .then_with(|| a.id.cmp(&b.id))
            })
    }
}

/// Map a similarity onto a link strength; `None` means no match.
pub fn classify(similarity: f64, strong_threshold: f64, potential_threshold: f64) -> Option<LinkStrength> {
    if similarity >= strong_threshold {
        Some(LinkStrength::Strong)
    } else if similarity >= potential_threshold {
        Some(LinkStrength::Potential)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use xstory_core::{extract_keywords, Disposition, Stage};

    fn node(id: &str, title: &str) -> StoryNode {
        let now = Utc::now();
        StoryNode {
            id: StoryId::parse(id).unwrap(),
            title: title.to_string(),
            description: String::new(),
            capacity: 3,
            stage: Stage::Executing,
            hold_reason: None,
            disposition: None,
            human_review: false,
            project_path: None,
            last_implemented: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.75, 0.7, 0.4), Some(LinkStrength::Strong));
        assert_eq!(classify(0.7, 0.7, 0.4), Some(LinkStrength::Strong));
        assert_eq!(classify(0.4, 0.7, 0.4), Some(LinkStrength::Potential));
        assert_eq!(classify(0.39, 0.7, 0.4), None);
    }

    #[test]
    fn test_best_match_prefers_similarity_then_depth_then_id() {
        let nodes = vec![
            node("1.1", "login auth story"),
            node("2", "login auth story"),
            node("1", "login auth story"),
            node("3", "search index"),
        ];
        let matcher = StoryMatcher::new(&nodes, &KeywordExtractor::default());
        let keywords = extract_keywords("fix login story 1.2 auth bug");

        let best = matcher.best_match(&keywords).unwrap();
        assert_eq!(best.id.as_str(), "1");
        assert_eq!(best.similarity, 0.75);
    }

    #[test]
    fn test_disposed_nodes_are_not_matched() {
        let mut rejected = node("1", "login auth story");
        rejected.disposition = Some(Disposition::Rejected);
        let nodes = vec![rejected, node("2", "search index")];
        let matcher = StoryMatcher::new(&nodes, &KeywordExtractor::default());

        assert_eq!(matcher.len(), 1);
        assert!(matcher
            .best_match(&extract_keywords("login auth story"))
            .is_none());
    }
}
