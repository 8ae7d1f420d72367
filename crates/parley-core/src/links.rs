//! Link-tracking rewrite.
//!
//! `[[url]]` and `<url>` become `m+<token>` short links backed by a
//! `tracking_links` row; `[label](url)` markdown and bare URLs are left
//! alone. One token per live `(url, conversation)` pair.

use crate::config::LinkSettings;
use parley_db::DbPool;
use parley_models::link::{short_form, IssuedLink};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use thiserror::Error;

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]+)\]\((<https?://[^\s>]+>|https?://[^\s)]+)\)")
        .expect("valid markdown link regex")
});
static FORCED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[(https?://[^\s\]]+)\]\]").expect("valid forced link regex")
});
static ANGLE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^\s>]+)>").expect("valid angle link regex"));

const SHORT_LINK_PREFIX: &str = "m+";

/// Link syntaxes that get tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSyntax {
    /// `[[url]]`
    Forced,
    /// `<url>`
    Angle,
}

impl LinkSyntax {
    fn pattern(self) -> &'static Regex {
        match self {
            Self::Forced => &FORCED_LINK,
            Self::Angle => &ANGLE_LINK,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Database(#[from] parley_db::DbError),
    #[error("no free token after {0} attempts")]
    TokensExhausted(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub content: String,
    /// Links referenced by this pass, in first-use order.
    pub links: Vec<IssuedLink>,
}

/// A run of message text. Protected runs are markdown links and are never
/// rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub protected: bool,
}

/// Split `content` at markdown link boundaries. Joining the segments' text
/// gives back `content` exactly.
pub fn split_markdown(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for found in MARKDOWN_LINK.find_iter(content) {
        if found.start() > cursor {
            segments.push(Segment {
                text: content[cursor..found.start()].to_string(),
                protected: false,
            });
        }
        segments.push(Segment {
            text: found.as_str().to_string(),
            protected: true,
        });
        cursor = found.end();
    }
    if cursor < content.len() || segments.is_empty() {
        segments.push(Segment {
            text: content[cursor..].to_string(),
            protected: false,
        });
    }
    segments
}

pub fn join_segments(segments: &[Segment]) -> String {
    segments.iter().map(|segment| segment.text.as_str()).collect()
}

/// URLs matched by `syntax`, deduplicated in first-occurrence order.
pub fn collect_urls(text: &str, syntax: LinkSyntax) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for caps in syntax.pattern().captures_iter(text) {
        let url = &caps[1];
        if !urls.iter().any(|seen| seen == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// Replace every `syntax` match using `resolved` (url -> token). URLs with no
/// token fall back to the plain URL.
pub fn apply_tokens(text: &str, syntax: LinkSyntax, resolved: &HashMap<String, String>) -> String {
    syntax
        .pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let url = &caps[1];
            match resolved.get(url) {
                Some(token) => short_form(token),
                None => url.to_string(),
            }
        })
        .into_owned()
}

/// Tokens of every `m+<token>` short link in `content`, deduplicated. A token
/// is exactly `token_length` ASCII alphanumerics; surrounding characters do
/// not matter, so `_m+abc123_` and `m+abc123s` both yield `abc123`.
pub fn short_link_tokens(content: &str, token_length: usize) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    if token_length == 0 {
        return tokens;
    }
    for (start, prefix) in content.match_indices(SHORT_LINK_PREFIX) {
        let rest = &content[start + prefix.len()..];
        let Some(token) = rest.get(..token_length) else {
            continue;
        };
        if !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            continue;
        }
        if !tokens.iter().any(|seen| seen == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

fn generate_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub struct LinkRewriter {
    pool: DbPool,
    worker_id: u16,
    settings: LinkSettings,
}

impl LinkRewriter {
    pub fn new(pool: DbPool, worker_id: u16, settings: LinkSettings) -> Self {
        Self {
            pool,
            worker_id,
            settings,
        }
    }

    /// Rewrite `content` for `conversation_id`. Never fails: a link that
    /// cannot be issued is left as its plain URL.
    pub async fn rewrite(
        &self,
        content: &str,
        conversation_id: i64,
        actor_id: Option<i64>,
    ) -> RewriteOutcome {
        let mut segments = split_markdown(content);
        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut links: Vec<IssuedLink> = Vec::new();
        let mut unavailable: HashSet<String> = HashSet::new();

        for syntax in [LinkSyntax::Forced, LinkSyntax::Angle] {
            let urls: Vec<String> = segments
                .iter()
                .filter(|segment| !segment.protected)
                .flat_map(|segment| collect_urls(&segment.text, syntax))
                .collect();
            for url in urls {
                if resolved.contains_key(&url) || unavailable.contains(&url) {
                    continue;
                }
                match self.find_or_create(&url, conversation_id, actor_id).await {
                    Ok(issued) => {
                        resolved.insert(url, issued.token.clone());
                        links.push(issued);
                    }
                    Err(e) => {
                        tracing::warn!(
                            conversation_id,
                            url = %url,
                            error = %e,
                            "tracking link unavailable, keeping plain url"
                        );
                        unavailable.insert(url);
                    }
                }
            }
            for segment in segments.iter_mut().filter(|segment| !segment.protected) {
                segment.text = apply_tokens(&segment.text, syntax, &resolved);
            }
        }

        RewriteOutcome {
            content: join_segments(&segments),
            links,
        }
    }

    /// Reuse the live link for `(url, conversation)` or create one. Safe
    /// against concurrent writers: the store's uniqueness decides the winner.
    pub async fn find_or_create(
        &self,
        url: &str,
        conversation_id: i64,
        actor_id: Option<i64>,
    ) -> Result<IssuedLink, LinkError> {
        if let Some(existing) =
            parley_db::tracking_links::find_live_link(&self.pool, url, conversation_id).await?
        {
            return Ok(IssuedLink {
                original_url: existing.original_url,
                token: existing.token,
                newly_created: false,
            });
        }

        let attempts = self.settings.max_token_attempts.max(1);
        for attempt in 1..=attempts {
            let token = generate_token(self.settings.token_length);
            let id = parley_util::snowflake::generate(self.worker_id);
            match parley_db::tracking_links::insert_link(
                &self.pool,
                id,
                &token,
                url,
                conversation_id,
                actor_id,
            )
            .await
            {
                Ok(row) => {
                    tracing::debug!(conversation_id, token = %row.token, "tracking link created");
                    return Ok(IssuedLink {
                        original_url: row.original_url,
                        token: row.token,
                        newly_created: true,
                    });
                }
                Err(err) if err.is_unique_violation() => {
                    if let Some(winner) =
                        parley_db::tracking_links::find_live_link(&self.pool, url, conversation_id)
                            .await?
                    {
                        return Ok(IssuedLink {
                            original_url: winner.original_url,
                            token: winner.token,
                            newly_created: false,
                        });
                    }
                    tracing::debug!(attempt, "tracking token collision, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LinkError::TokensExhausted(attempts))
    }

    /// Point every short link in the final content at `message_id`.
    pub async fn backfill(
        &self,
        content: &str,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<u64, LinkError> {
        let tokens = short_link_tokens(content, self.settings.token_length);
        if tokens.is_empty() {
            return Ok(0);
        }
        let claimed = parley_db::tracking_links::backfill_message_id(
            &self.pool,
            conversation_id,
            message_id,
            &tokens,
        )
        .await?;
        Ok(claimed)
    }
}
