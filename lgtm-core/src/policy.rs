use serde::Deserialize;

pub const DEFAULT_LABEL: &str = "lgtm";

/// Per-repository review settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    /// Name of the label that gates merging.
    pub label: String,
    /// Require an authorized approval for every changed directory instead of
    /// a single approval from any collaborator.
    pub strict_review: bool,
    /// Simple mode only: record the tree hash when the label is added so that
    /// content-preserving pushes keep the label.
    pub store_tree_hash: bool,
    /// Simple mode only: members of this team keep the label across pushes.
    pub sticky_lgtm_team: Option<String>,
    /// Simple mode only: authorize through OWNERS instead of collaborator status.
    pub skip_collaborators: bool,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            strict_review: false,
            store_tree_hash: false,
            sticky_lgtm_team: None,
            skip_collaborators: false,
        }
    }
}

impl ReviewPolicy {
    pub fn strict() -> Self {
        Self {
            strict_review: true,
            ..Self::default()
        }
    }

    /// Whether `labels` contains the review label. Label names are case-insensitive.
    pub fn has_label<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels
            .iter()
            .any(|label| label.as_ref().eq_ignore_ascii_case(&self.label))
    }
}
