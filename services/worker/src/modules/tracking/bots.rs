use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::RegexSet;

/// engagement hits younger than this many seconds after the link was
/// minted are prefetchers warming the mail, not the reader
pub static MIN_CLICK_AGE_SECONDS: i64 = 7;

lazy_static! {
    /// user agents of crawlers and the link rewriting email scanners that
    /// follow every url of a message before the reader ever sees it
    static ref BOT_USER_AGENTS: RegexSet = RegexSet::new([
        r"(?i)googlebot",
        r"(?i)headlesschrome",
        r"(?i)safelinks",
        r"(?i)proofpoint",
        r"(?i)urldefense",
        r"(?i)mimecast",
        r"(?i)bingpreview",
        r"(?i)yahoocachesystem",
        r"(?i)bot\b",
        r"(?i)crawler",
        r"(?i)spider",
    ])
    .expect("invalid bot user agent patterns");
}

pub fn is_bot_user_agent(user_agent: &str) -> bool {
    BOT_USER_AGENTS.is_match(user_agent)
}

/// The engagement gate: a hit only counts when it comes from a plausible
/// human client carrying a link timestamp old enough to not be a prefetch
///
/// links without a parsable `ts` are never recorded
pub fn should_record(
    user_agent: Option<&str>,
    link_ts: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    let Some(user_agent) = user_agent.filter(|ua| !ua.is_empty()) else {
        return false;
    };

    if is_bot_user_agent(user_agent) {
        return false;
    }

    let Some(link_ts) = link_ts else {
        return false;
    };

    now.timestamp() - link_ts >= MIN_CLICK_AGE_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;

    static HUMAN_UA: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 Safari/537.36";

    fn now() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn known_scanners_are_gated() {
        for ua in [
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
            "Mozilla/5.0 HeadlessChrome/124.0.0.0",
            "Outlook-SafeLinks/1.0",
            "ProofPoint URLDefense v3",
            "Mimecast-Scanner",
        ] {
            assert!(is_bot_user_agent(ua), "{} should gate", ua);
        }
    }

    #[test]
    fn human_browsers_pass() {
        assert!(!is_bot_user_agent(HUMAN_UA));
    }

    #[test]
    fn empty_or_missing_user_agents_never_record() {
        let ts = Some(now().timestamp() - 60);

        assert!(!should_record(None, ts, now()));
        assert!(!should_record(Some(""), ts, now()));
    }

    #[test]
    fn fresh_links_are_prefetch_guarded() {
        // minted 3 seconds ago, a scanner warming the mail
        let ts = Some(now().timestamp() - 3);
        assert!(!should_record(Some(HUMAN_UA), ts, now()));

        // the reader gets there a minute later
        let ts = Some(now().timestamp() - 60);
        assert!(should_record(Some(HUMAN_UA), ts, now()));
    }

    #[test]
    fn links_without_a_timestamp_never_record() {
        assert!(!should_record(Some(HUMAN_UA), None, now()));
    }
}
