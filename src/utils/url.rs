use url::Url;

/// Removes query string and fragment from a browser url. Values that don't parse as urls are
/// cut at the first `?` or `#` instead.
pub fn sanitize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_url;

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(
            sanitize_url("https://example.com/path/page?token=secret&a=1#section"),
            "https://example.com/path/page"
        );
    }

    #[test]
    fn keeps_plain_url() {
        assert_eq!(
            sanitize_url("https://docs.rs/tokio/latest/tokio/"),
            "https://docs.rs/tokio/latest/tokio/"
        );
    }

    #[test]
    fn handles_unparsable_values() {
        assert_eq!(sanitize_url("example.com/a?b=c"), "example.com/a");
        assert_eq!(sanitize_url(""), "");
    }
}
