use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use url::Url;
use url::form_urlencoded::Serializer;

const CANONICAL_HOST: &str = "www.facebook.com";
const SHORT_HOST: &str = "fb.watch";

const FACEBOOK_HOSTS: &[&str] = &[
    "facebook.com",
    "www.facebook.com",
    "m.facebook.com",
    "web.facebook.com",
    "mbasic.facebook.com",
];

const SHORT_HOSTS: &[&str] = &["fb.watch", "www.fb.watch"];

/// Query keys that only carry tracking or session state.
const NOISY_QUERY_KEYS: &[&str] = &[
    "s", "mibextid", "rdid", "share_url", "fbclid", "ref", "sfnsn", "extid", "fs", "paipv", "eav",
    "_rdr", "_rdc", "notif_id", "notif_t", "sk", "app", "locale",
];

/// First path segments that can never be a user name in `/<user>/videos/<id>/`.
const RESERVED_SEGMENTS: &[&str] = &["reel", "reels", "watch", "share", "story.php", "groups"];

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"', '>'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Reel,
    Watch,
    UserVideo,
    ShortLink,
}

/// One accepted video link, normalized to its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    raw: String,
    canonical: String,
    kind: LinkKind,
    id: String,
}

impl LinkCandidate {
    /// Parses a single URL-shaped token. Returns `None` unless the token matches
    /// one of the accepted host/path shapes exactly.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches(TRAILING_PUNCTUATION);
        if trimmed.is_empty() {
            return None;
        }

        let lower = trimmed.to_ascii_lowercase();
        let with_scheme = if lower.starts_with("https://") || lower.starts_with("http://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&with_scheme).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let segments: Vec<&str> = url
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .collect();

        let (kind, id, base, skip_key) = if FACEBOOK_HOSTS.contains(&host.as_str()) {
            match segments.as_slice() {
                ["reel", id] if is_numeric_id(id) => (
                    LinkKind::Reel,
                    id.to_string(),
                    format!("https://{CANONICAL_HOST}/reel/{id}/"),
                    None,
                ),
                ["watch"] => {
                    let id = url
                        .query_pairs()
                        .find(|(key, _)| key == "v")
                        .map(|(_, value)| value.into_owned())
                        .filter(|value| is_numeric_id(value))?;
                    let base = format!("https://{CANONICAL_HOST}/watch/?v={id}");
                    (LinkKind::Watch, id, base, Some("v"))
                }
                [user, "videos", id] if is_user_name(user) && is_numeric_id(id) => (
                    LinkKind::UserVideo,
                    id.to_string(),
                    format!("https://{CANONICAL_HOST}/{user}/videos/{id}/"),
                    None,
                ),
                _ => return None,
            }
        } else if SHORT_HOSTS.contains(&host.as_str()) {
            match segments.as_slice() {
                [code] if is_short_code(code) => (
                    LinkKind::ShortLink,
                    code.to_string(),
                    format!("https://{SHORT_HOST}/{code}/"),
                    None,
                ),
                _ => return None,
            }
        } else {
            return None;
        };

        let mut kept = Serializer::new(String::new());
        let mut kept_any = false;
        for (key, value) in url.query_pairs() {
            if skip_key == Some(&*key) || is_noisy_key(&key) {
                continue;
            }
            kept.append_pair(&key, &value);
            kept_any = true;
        }

        let canonical = if kept_any {
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{base}{separator}{}", kept.finish())
        } else {
            base
        };

        Some(Self {
            raw: trimmed.to_string(),
            canonical,
            kind,
            id,
        })
    }

    /// Text span the candidate was extracted from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Numeric video id, or the short code for `fb.watch` links.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for LinkCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_short_code(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_user_name(value: &str) -> bool {
    !value.is_empty()
        && !RESERVED_SEGMENTS.contains(&value)
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

fn is_noisy_key(key: &str) -> bool {
    NOISY_QUERY_KEYS.contains(&key) || key.starts_with("utm_") || key.starts_with("__")
}

fn link_token_regex() -> &'static Regex {
    static LINK_RE: OnceCell<Regex> = OnceCell::new();
    LINK_RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(?:https?://)?(?:[a-z0-9-]+\.)*(?:facebook\.com|fb\.watch)(?:/[^\s<>"'`,|]*)?"#,
        )
        .expect("link regex is a valid constant")
    })
}

/// Scans free-form text for accepted video links, in document order.
///
/// Every line is scanned left to right and each match is kept, so a line may
/// contribute several candidates. Tokens that reference the right host but not
/// an accepted path shape are dropped.
pub fn extract_links(raw_text: &str) -> Vec<LinkCandidate> {
    let re = link_token_regex();
    let mut out = Vec::new();
    for line in raw_text.lines() {
        let mut start = 0;
        while let Some(m) = re.find_at(line, start) {
            // A glued second link ("…/reel/1/https://…") ends this token.
            let end = m.start() + embedded_scheme_at(m.as_str()).unwrap_or(m.len());
            if let Some(candidate) = LinkCandidate::parse(&line[m.start()..end]) {
                out.push(candidate);
            }
            start = end;
        }
    }
    out
}

/// Byte offset of the first `http://` or `https://` after the token's start.
fn embedded_scheme_at(token: &str) -> Option<usize> {
    let lower = token.to_ascii_lowercase();
    lower
        .match_indices("http")
        .map(|(idx, _)| idx)
        .filter(|&idx| idx > 0)
        .find(|&idx| lower[idx..].starts_with("http://") || lower[idx..].starts_with("https://"))
}

/// Drops candidates whose canonical URL was already seen. First occurrence
/// wins and relative order is preserved.
pub fn dedup(candidates: Vec<LinkCandidate>) -> Vec<LinkCandidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.canonical.clone()))
        .collect()
}
