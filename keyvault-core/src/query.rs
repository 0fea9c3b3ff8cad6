//! Metadata-only views over the entry map: filtering, search, ordering.
//!
//! Nothing in this module touches ciphertext.

use crate::model::{Entry, EntryView, Environment};
use serde::{Deserialize, Serialize};

const DAY_MS: i64 = 86_400_000;

/// Filter for `list`. Empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryFilter {
    /// Keep entries whose `domains` contains this hostname.
    pub domain: Option<String>,

    /// Exact environment match.
    pub environment: Option<Environment>,

    /// Keep entries carrying this tag.
    pub tag: Option<String>,

    /// `true` keeps only favorites.
    pub favorite: Option<bool>,

    /// Keep entries whose `expires_at` falls within this many days.
    pub expired_within_days: Option<u64>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &Entry, now_ms: i64) -> bool {
        if let Some(domain) = &self.domain {
            let needle = normalize_host(domain);
            if !entry.domains.iter().any(|d| normalize_host(d) == needle) {
                return false;
            }
        }

        if let Some(environment) = self.environment {
            if entry.environment != environment {
                return false;
            }
        }

        if let Some(tag) = &self.tag {
            if !entry
                .tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case(tag.as_str()))
            {
                return false;
            }
        }

        if self.favorite == Some(true) && !entry.favorite {
            return false;
        }

        if let Some(days) = self.expired_within_days {
            let horizon = now_ms.saturating_add(days as i64 * DAY_MS);
            match entry.expires_at {
                Some(expires_at) if expires_at <= horizon => {}
                _ => return false,
            }
        }

        true
    }
}

/// Case-insensitive substring search over `service_name`, `tags`,
/// `environment`, and `notes`.
pub fn search_matches(entry: &Entry, query: &str) -> bool {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return true;
    }

    entry.service_name.to_lowercase().contains(&needle)
        || entry.notes.to_lowercase().contains(&needle)
        || entry.environment.as_str().contains(&needle)
        || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle))
}

/// Default listing order: favorites first (stable), then `last_used_at`
/// descending with nulls last, then `created_at` descending, id ascending
/// as the final tiebreak.
pub fn sort_views(views: &mut [EntryView]) {
    views.sort_by(|a, b| {
        b.favorite
            .cmp(&a.favorite)
            .then_with(|| b.last_used_at.cmp(&a.last_used_at))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Lowercased, scheme/port-stripped hostname for domain comparisons.
pub fn normalize_host(value: &str) -> String {
    let mut host = value.trim().to_ascii_lowercase();

    if let Some(pos) = host.find("://") {
        host = host[pos + 3..].to_string();
    }
    if let Some(pos) = host.find(['/', '?', '#']) {
        host.truncate(pos);
    }
    // Strip a port, but leave bare IPv6 alone.
    if let Some(pos) = host.rfind(':') {
        if !host[..pos].contains(':') {
            host.truncate(pos);
        }
    }

    host.trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entry(service_name: &str) -> Entry {
        Entry {
            id: service_name.to_lowercase().replace(' ', "-"),
            service_name: service_name.to_string(),
            ciphertext: vec![0u8; 47],
            environment: Environment::Production,
            tags: BTreeSet::new(),
            domains: BTreeSet::new(),
            notes: String::new(),
            color: "#0091ff".to_string(),
            favorite: false,
            created_at: 0,
            last_used_at: None,
            expires_at: None,
            usage_count: 0,
            rate_limit: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EntryFilter::default();
        assert!(filter.matches(&entry("OpenAI"), 0));
    }

    #[test]
    fn domain_filter_normalizes() {
        let mut e = entry("Stripe");
        e.domains.insert("API.Stripe.com".to_string());

        let filter = EntryFilter {
            domain: Some("https://api.stripe.com:443/v1".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&e, 0));

        let miss = EntryFilter {
            domain: Some("api.square.com".to_string()),
            ..Default::default()
        };
        assert!(!miss.matches(&e, 0));
    }

    #[test]
    fn environment_and_tag_filters() {
        let mut e = entry("OpenAI");
        e.environment = Environment::Development;
        e.tags.insert("ai".to_string());

        let by_env = EntryFilter {
            environment: Some(Environment::Development),
            ..Default::default()
        };
        assert!(by_env.matches(&e, 0));

        let by_tag = EntryFilter {
            tag: Some("AI".to_string()),
            ..Default::default()
        };
        assert!(by_tag.matches(&e, 0));

        let wrong_env = EntryFilter {
            environment: Some(Environment::Production),
            ..Default::default()
        };
        assert!(!wrong_env.matches(&e, 0));
    }

    #[test]
    fn favorite_filter_only_narrows_on_true() {
        let plain = entry("A");
        let filter = EntryFilter {
            favorite: Some(true),
            ..Default::default()
        };
        assert!(!filter.matches(&plain, 0));

        let relaxed = EntryFilter {
            favorite: Some(false),
            ..Default::default()
        };
        assert!(relaxed.matches(&plain, 0));
    }

    #[test]
    fn expiry_window() {
        let mut e = entry("Expiring");
        e.expires_at = Some(5 * DAY_MS);

        let within = EntryFilter {
            expired_within_days: Some(7),
            ..Default::default()
        };
        assert!(within.matches(&e, 0));

        let outside = EntryFilter {
            expired_within_days: Some(3),
            ..Default::default()
        };
        assert!(!outside.matches(&e, 0));

        let never = entry("NoExpiry");
        assert!(!within.matches(&never, 0));
    }

    #[test]
    fn search_covers_name_tags_env_notes() {
        let mut e = entry("Stripe Live");
        e.tags.insert("payments".to_string());
        e.notes = "primary account".to_string();
        e.environment = Environment::Staging;

        assert!(search_matches(&e, "stripe"));
        assert!(search_matches(&e, "PAYMENTS"));
        assert!(search_matches(&e, "staging"));
        assert!(search_matches(&e, "primary"));
        assert!(!search_matches(&e, "twilio"));
    }

    #[test]
    fn default_ordering() {
        let mut views: Vec<EntryView> = Vec::new();

        let mut favorite = entry("fav");
        favorite.favorite = true;
        favorite.created_at = 1;
        views.push(EntryView::from(&favorite));

        let mut recently_used = entry("recent");
        recently_used.last_used_at = Some(100);
        recently_used.created_at = 2;
        views.push(EntryView::from(&recently_used));

        let mut older_used = entry("older");
        older_used.last_used_at = Some(50);
        older_used.created_at = 9;
        views.push(EntryView::from(&older_used));

        let mut never_used = entry("never");
        never_used.created_at = 10;
        views.push(EntryView::from(&never_used));

        sort_views(&mut views);
        let order: Vec<&str> = views.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(order, vec!["fav", "recent", "older", "never"]);
    }

    #[test]
    fn ties_break_on_id() {
        let mut a = entry("b-second");
        a.created_at = 5;
        let mut b = entry("a-first");
        b.created_at = 5;

        let mut views = vec![EntryView::from(&a), EntryView::from(&b)];
        sort_views(&mut views);
        assert_eq!(views[0].id, "a-first");
        assert_eq!(views[1].id, "b-second");
    }
}
