//! Text encoding of review state into bot-owned comments.
//!
//! The status comment is the only store of consensus. [`encode`] and [`decode`]
//! are a total/partial function pair: any state that [`encode`] renders is
//! recovered by [`decode`] up to list order. Anything that fails to match the
//! template decodes to `None`, which callers treat as "no state found".

use std::collections::BTreeSet;

use crate::forge::IssueComment;
use crate::identity::Login;
use crate::state::{ReviewState, Stance, TreeHash, Verdict, Vote};

const HEADER: &str = "LGTM NOTIFIER: This PR is ";
const CONSENTORS_INTRO: &str = ".\n\nReviewers added `/lgtm` are: ";
const OPPONENTS_INTRO: &str = ".\n\nReviewers added `/lgtm cancel` are: ";
const DIRS_INTRO: &str = ".\n\nIt still needs review for the codes in each of these directories:";
const HASH_OPEN: &str = "\n<details>Git tree hash: ";
const HASH_CLOSE: &str = "</details>";

const LGTM_DESC: &str = "**LGTM**";
const NOT_LGTM_DESC: &str = "**NOT LGTM**";
const LIST_SEPARATOR: &str = ", ";
const DIR_SEPARATOR: &str = "\n- ";

const MARKER_PREFIX: &str = "LGTM label has been added.  <details>Git tree hash: ";

/// Posted when new commits invalidate the label in simple mode.
pub const INVALIDATION_NOTICE: &str = "New changes are detected. LGTM label has been removed.";

/// A status comment parsed back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStatus {
    pub verdict: Verdict,
    pub state: ReviewState,
}

/// Render `state` as the body of the status comment.
pub fn encode(state: &ReviewState, verdict: Verdict) -> String {
    let dirs = if state.pending_dirs().is_empty() {
        String::new()
    } else {
        let dirs: Vec<&str> = state.pending_dirs().iter().map(String::as_str).collect();
        format!("{}{}", DIR_SEPARATOR, dirs.join(DIR_SEPARATOR))
    };

    format!(
        "{HEADER}{}{CONSENTORS_INTRO}{}{OPPONENTS_INTRO}{}{DIRS_INTRO}{}{HASH_OPEN}{}{HASH_CLOSE}",
        match verdict {
            Verdict::Lgtm => LGTM_DESC,
            Verdict::NotLgtm => NOT_LGTM_DESC,
        },
        render_list(state.consentors()),
        render_list(state.opponents()),
        dirs,
        state.fingerprint().map(|f| f.0.as_str()).unwrap_or(""),
    )
}

fn render_list<'a>(entries: impl Iterator<Item = (&'a Login, bool)>) -> String {
    entries
        .map(|(login, authorized)| {
            if authorized {
                format!("**{}**", login)
            } else {
                login.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Parse a status comment body. Returns `None` unless the whole body matches
/// the template.
pub fn decode(body: &str) -> Option<DecodedStatus> {
    let rest = body.trim_end().strip_prefix(HEADER)?;
    let (verdict, rest) = rest.split_once(CONSENTORS_INTRO)?;
    let (consentors, rest) = rest.split_once(OPPONENTS_INTRO)?;
    let (opponents, rest) = rest.split_once(DIRS_INTRO)?;
    let (dirs, rest) = rest.rsplit_once(HASH_OPEN)?;
    let hash = rest.strip_suffix(HASH_CLOSE)?;

    let verdict = match verdict {
        LGTM_DESC => Verdict::Lgtm,
        NOT_LGTM_DESC => Verdict::NotLgtm,
        _ => return None,
    };

    if [consentors, opponents, hash]
        .iter()
        .any(|segment| segment.contains('\n'))
    {
        return None;
    }

    let votes = with_stance(parse_list(consentors), Stance::Consenting)
        .chain(with_stance(parse_list(opponents), Stance::Opposing));

    let pending_dirs: BTreeSet<String> = if dirs.is_empty() {
        BTreeSet::new()
    } else {
        dirs.strip_prefix(DIR_SEPARATOR)?
            .split(DIR_SEPARATOR)
            .map(str::to_string)
            .collect()
    };

    let fingerprint = (!hash.is_empty()).then(|| TreeHash::from(hash));

    Some(DecodedStatus {
        verdict,
        state: ReviewState::from_parts(votes, pending_dirs, fingerprint),
    })
}

fn with_stance(
    entries: Vec<(Login, bool)>,
    stance: Stance,
) -> impl Iterator<Item = (Login, Vote)> {
    entries
        .into_iter()
        .map(move |(login, authorized)| (login, Vote { stance, authorized }))
}

fn parse_list(segment: &str) -> Vec<(Login, bool)> {
    if segment.is_empty() {
        return Vec::new();
    }

    segment
        .split(LIST_SEPARATOR)
        .map(|item| {
            match item
                .strip_prefix("**")
                .and_then(|inner| inner.strip_suffix("**"))
            {
                Some(inner) => (Login::from(inner), true),
                None => (Login::from(item), false),
            }
        })
        .collect()
}

/// How much a bot comment must prove before its content is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TamperCheck {
    /// Authored by the bot and never edited since creation.
    Unedited,
    /// Authored by the bot. Used for comments the bot itself rewrites in place.
    AuthorOnly,
}

impl TamperCheck {
    fn admits(&self, comment: &IssueComment) -> bool {
        match self {
            TamperCheck::Unedited => comment.is_unedited(),
            TamperCheck::AuthorOnly => true,
        }
    }
}

/// Outcome of searching a pull request's comments for the status comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// The status comment describes the requested tree.
    Current(ReviewState),
    /// The status comment describes another tree. Its id is kept for reuse.
    Stale(ReviewState),
    /// No status comment exists.
    Missing,
}

/// Find the most recent trusted status comment and compare its fingerprint
/// with `fingerprint`.
///
/// `comments` must be in creation order. A `None` fingerprint (on either side)
/// never matches, so an unknown tree always counts as changed.
pub fn locate(
    comments: &[IssueComment],
    bot: &Login,
    fingerprint: Option<&TreeHash>,
    check: TamperCheck,
) -> Located {
    let found = comments.iter().rev().find_map(|comment| {
        if !comment.author.same_account(bot) || !check.admits(comment) {
            return None;
        }
        decode(&comment.body).map(|decoded| decoded.state.with_comment_id(Some(comment.id)))
    });

    match found {
        None => Located::Missing,
        Some(state) => match (state.fingerprint(), fingerprint) {
            (Some(recorded), Some(requested)) if recorded == requested => Located::Current(state),
            _ => Located::Stale(state),
        },
    }
}

/// Marker comment recording the tree hash at which the label was added.
pub fn encode_marker(fingerprint: Option<&TreeHash>) -> String {
    format!(
        "{MARKER_PREFIX}{}{HASH_CLOSE}",
        fingerprint.map(|f| f.0.as_str()).unwrap_or("")
    )
}

pub fn decode_marker(body: &str) -> Option<Option<TreeHash>> {
    let hash = body
        .trim()
        .strip_prefix(MARKER_PREFIX)?
        .strip_suffix(HASH_CLOSE)?;
    if hash.contains('\n') {
        return None;
    }
    Some((!hash.is_empty()).then(|| TreeHash::from(hash)))
}

pub fn is_marker(body: &str) -> bool {
    decode_marker(body).is_some()
}

pub fn is_invalidation_notice(body: &str) -> bool {
    body.contains(INVALIDATION_NOTICE)
}

/// Tree hash recorded by the latest unedited marker comment from the bot.
pub fn latest_marker_hash(comments: &[IssueComment], bot: &Login) -> Option<TreeHash> {
    comments
        .iter()
        .rev()
        .filter(|comment| comment.author.same_account(bot) && comment.is_unedited())
        .find_map(|comment| decode_marker(&comment.body))
        .flatten()
}

/// Reply addressed to `actor`, quoting the comment that triggered it.
pub fn render_reply(actor: &Login, message: &str, comment_body: &str, url: Option<&str>) -> String {
    let quoted: Vec<String> = comment_body
        .trim()
        .lines()
        .map(|line| format!("> {}", line))
        .collect();
    let reference = match url {
        Some(url) => format!("In response to [this]({}):", url),
        None => "In response to:".to_string(),
    };
    format!(
        "@{}: {}\n\n<details>\n\n{}\n\n{}\n</details>",
        actor,
        message,
        reference,
        quoted.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CommentId;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn sample_state() -> ReviewState {
        let mut state = ReviewState::fresh(Some(TreeHash::from("abc123")), &["b/y.go", "main.go"]);
        state.add_consentor(Login::from("alice"), true);
        state.add_consentor(Login::from("carol"), false);
        state.add_opponent(Login::from("bob"), true);
        state
    }

    fn comment(id: u64, author: &str, body: String, edited: bool) -> IssueComment {
        let created_at = Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap();
        let updated_at = if edited {
            created_at + chrono::Duration::seconds(30)
        } else {
            created_at
        };
        IssueComment {
            id: CommentId(id),
            author: Login::from(author),
            body,
            created_at,
            updated_at,
        }
    }

    #[test]
    fn test_encode_renders_template() {
        insta::assert_snapshot!(encode(&sample_state(), Verdict::NotLgtm), @r#"
        LGTM NOTIFIER: This PR is **NOT LGTM**.

        Reviewers added `/lgtm` are: **alice**, carol.

        Reviewers added `/lgtm cancel` are: **bob**.

        It still needs review for the codes in each of these directories:
        - b
        - root directory
        <details>Git tree hash: abc123</details>
        "#);
    }

    #[test]
    fn test_encode_empty_state() {
        let state = ReviewState::fresh(Some(TreeHash::from("t1")), &[] as &[&str]);
        let body = encode(&state, Verdict::Lgtm);
        assert!(body.starts_with("LGTM NOTIFIER: This PR is **LGTM**."));
        assert!(body.contains("directories:\n<details>Git tree hash: t1</details>"));
    }

    #[test]
    fn test_decode_round_trip() {
        let state = sample_state();
        let decoded = decode(&encode(&state, Verdict::NotLgtm)).unwrap();
        assert_eq!(decoded.verdict, Verdict::NotLgtm);
        assert_eq!(decoded.state, state);
    }

    #[test]
    fn test_decode_ignores_list_order() {
        let body = encode(&sample_state(), Verdict::NotLgtm)
            .replace("**alice**, carol", "carol, **alice**");
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.state, sample_state());
    }

    #[test]
    fn test_decode_rejects_lookalikes() {
        assert!(decode("LGTM NOTIFIER: This PR is great.").is_none());
        assert!(decode("just a comment").is_none());

        let body = encode(&sample_state(), Verdict::Lgtm).replace("**LGTM**", "**MAYBE**");
        assert!(decode(&body).is_none());

        let body = encode(&sample_state(), Verdict::Lgtm).replace("</details>", "");
        assert!(decode(&body).is_none());
    }

    #[test]
    fn test_decode_without_fingerprint() {
        let state = ReviewState::fresh(None, &["a/x.go"]);
        let decoded = decode(&encode(&state, Verdict::NotLgtm)).unwrap();
        assert_eq!(decoded.state.fingerprint(), None);
    }

    #[test]
    fn test_locate_current() {
        let body = encode(&sample_state(), Verdict::NotLgtm);
        let comments = vec![
            comment(1, "alice", "/lgtm".to_string(), false),
            comment(2, "lgtm-bot[bot]", body, true),
        ];

        let located = locate(
            &comments,
            &Login::from("lgtm-bot[bot]"),
            Some(&TreeHash::from("abc123")),
            TamperCheck::AuthorOnly,
        );
        match located {
            Located::Current(state) => {
                assert_eq!(state.comment_id(), Some(CommentId(2)));
                assert!(state.is_consentor(&Login::from("alice")));
            }
            other => panic!("expected current state, got {:?}", other),
        }
    }

    #[test]
    fn test_locate_stale_keeps_comment_id() {
        let body = encode(&sample_state(), Verdict::NotLgtm);
        let comments = vec![comment(7, "lgtm-bot[bot]", body, false)];

        let located = locate(
            &comments,
            &Login::from("lgtm-bot[bot]"),
            Some(&TreeHash::from("other")),
            TamperCheck::Unedited,
        );
        match located {
            Located::Stale(state) => assert_eq!(state.comment_id(), Some(CommentId(7))),
            other => panic!("expected stale state, got {:?}", other),
        }
    }

    #[test]
    fn test_locate_unknown_fingerprint_is_stale() {
        let body = encode(&sample_state(), Verdict::NotLgtm);
        let comments = vec![comment(7, "lgtm-bot[bot]", body, false)];
        let located = locate(
            &comments,
            &Login::from("lgtm-bot[bot]"),
            None,
            TamperCheck::Unedited,
        );
        assert!(matches!(located, Located::Stale(_)));
    }

    #[test]
    fn test_locate_skips_other_authors_and_edits() {
        let body = encode(&sample_state(), Verdict::Lgtm);
        let comments = vec![
            comment(1, "mallory", body.clone(), false),
            comment(2, "lgtm-bot[bot]", body, true),
        ];
        let bot = Login::from("lgtm-bot[bot]");
        let hash = TreeHash::from("abc123");

        assert_eq!(
            locate(&comments, &bot, Some(&hash), TamperCheck::Unedited),
            Located::Missing
        );
        assert!(matches!(
            locate(&comments, &bot, Some(&hash), TamperCheck::AuthorOnly),
            Located::Current(_)
        ));
    }

    #[test]
    fn test_locate_prefers_most_recent() {
        let mut newer = sample_state();
        newer.add_consentor(Login::from("dave"), true);
        let comments = vec![
            comment(1, "lgtm-bot[bot]", encode(&sample_state(), Verdict::NotLgtm), false),
            comment(2, "lgtm-bot[bot]", encode(&newer, Verdict::NotLgtm), false),
        ];
        match locate(
            &comments,
            &Login::from("lgtm-bot[bot]"),
            Some(&TreeHash::from("abc123")),
            TamperCheck::Unedited,
        ) {
            Located::Current(state) => {
                assert_eq!(state.comment_id(), Some(CommentId(2)));
                assert!(state.is_consentor(&Login::from("dave")));
            }
            other => panic!("expected current state, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_round_trip() {
        let body = encode_marker(Some(&TreeHash::from("deadbeef")));
        assert_eq!(
            body,
            "LGTM label has been added.  <details>Git tree hash: deadbeef</details>"
        );
        assert_eq!(decode_marker(&body), Some(Some(TreeHash::from("deadbeef"))));
        assert!(is_marker(&body));
        assert!(!is_marker(INVALIDATION_NOTICE));
    }

    #[test]
    fn test_latest_marker_hash_requires_unedited_bot_comment() {
        let bot = Login::from("lgtm-bot[bot]");
        let comments = vec![
            comment(1, "lgtm-bot[bot]", encode_marker(Some(&TreeHash::from("t1"))), false),
            comment(2, "lgtm-bot[bot]", encode_marker(Some(&TreeHash::from("t2"))), true),
            comment(3, "mallory", encode_marker(Some(&TreeHash::from("t3"))), false),
        ];
        assert_eq!(latest_marker_hash(&comments, &bot), Some(TreeHash::from("t1")));
    }

    #[test]
    fn test_render_reply_quotes_comment() {
        let reply = render_reply(
            &Login::from("alice"),
            "you cannot LGTM your own PR.",
            "/lgtm\n",
            Some("https://example.com/c/1"),
        );
        assert!(reply.starts_with("@alice: you cannot LGTM your own PR."));
        assert!(reply.contains("In response to [this](https://example.com/c/1):"));
        assert!(reply.contains("> /lgtm"));
    }

    fn arb_state() -> impl Strategy<Value = ReviewState> {
        let votes = proptest::collection::btree_map(
            "[a-z][a-z0-9-]{0,10}",
            (any::<bool>(), any::<bool>()),
            0..8,
        );
        let dirs = proptest::collection::btree_set(
            prop_oneof![
                "[a-z]{1,5}(/[a-z_]{1,5}){0,2}",
                Just(crate::owners::ROOT_DIR_SENTINEL.to_string()),
            ],
            0..6,
        );
        let fingerprint = proptest::option::of("[0-9a-f]{40}");

        (votes, dirs, fingerprint).prop_map(|(votes, dirs, fingerprint)| {
            let mut state = ReviewState::fresh(fingerprint.map(TreeHash::from), &[] as &[&str]);
            for (login, (consenting, authorized)) in votes {
                if consenting {
                    state.add_consentor(Login::from(login), authorized);
                } else {
                    state.add_opponent(Login::from(login), authorized);
                }
            }
            state.set_pending_dirs(dirs);
            state
        })
    }

    proptest! {
        /// Property: decoding an encoded state yields the same state.
        #[test]
        fn encode_decode_round_trip(state in arb_state(), lgtm in any::<bool>()) {
            let verdict = Verdict::from(lgtm);
            let decoded = decode(&encode(&state, verdict)).expect("encoded state must decode");
            prop_assert_eq!(decoded.verdict, verdict);
            prop_assert_eq!(decoded.state, state);
        }
    }
}
