/// URL utilities
pub mod url {
    use url::Url;

    /// Query keys that only carry attribution and never change the content.
    pub const TRACKING_PARAMS: &[&str] = &["ref", "fbclid", "gclid"];

    /// Any key with this prefix is treated as tracking (`utm_source`, `utm_medium`, ...).
    pub const TRACKING_PREFIX: &str = "utm_";

    pub fn is_tracking_param(key: &str) -> bool {
        key.starts_with(TRACKING_PREFIX) || TRACKING_PARAMS.contains(&key)
    }

    /// Map a raw URL to the identity string used to merge Items.
    ///
    /// Tracking parameters and the fragment are dropped, the order of the
    /// remaining parameters is kept, and a missing scheme becomes `https`.
    /// Never fails: input the URL parser rejects is normalized as a plain
    /// string. Applying it twice gives the same result as applying it once.
    pub fn canonicalize(raw_url: &str) -> String {
        let trimmed = raw_url.trim();

        match Url::parse(trimmed) {
            Ok(parsed) => serialize_without_tracking(parsed),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let with_scheme = if trimmed.starts_with("//") {
                    format!("https:{}", trimmed)
                } else {
                    format!("https://{}", trimmed)
                };
                match Url::parse(&with_scheme) {
                    Ok(parsed) => serialize_without_tracking(parsed),
                    Err(_) => normalize_unparsed(trimmed),
                }
            }
            Err(_) => normalize_unparsed(trimmed),
        }
    }

    fn serialize_without_tracking(mut parsed: Url) -> String {
        parsed.set_fragment(None);
        let query = parsed.query().map(filter_query);
        match query {
            Some(query) if !query.is_empty() => parsed.set_query(Some(&query)),
            _ => parsed.set_query(None),
        }
        parsed.to_string()
    }

    /// Keeps the raw `key=value` segments whose decoded key is not tracking.
    fn filter_query(query: &str) -> String {
        query
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| {
                let key = url::form_urlencoded::parse(segment.as_bytes())
                    .next()
                    .map(|(key, _)| key.into_owned())
                    .unwrap_or_default();
                !is_tracking_param(&key)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn normalize_unparsed(raw: &str) -> String {
        let without_fragment = raw.split('#').next().unwrap_or_default();
        match without_fragment.split_once('?') {
            Some((base, query)) => {
                let query = filter_query(query);
                if query.is_empty() {
                    base.to_string()
                } else {
                    format!("{}?{}", base, query)
                }
            }
            None => without_fragment.to_string(),
        }
    }

    /// Accepts absolute http(s) URLs with a host.
    pub fn is_valid_http_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
            Err(_) => false,
        }
    }

}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Utc};

    /// Minutes from `earlier` to `later`; negative when `earlier` is in the future.
    pub fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
        later.signed_duration_since(earlier).num_milliseconds() as f64 / 60_000.0
    }
}
