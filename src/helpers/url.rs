//! URL encoding helpers

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left as is when quoting a URL component
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Characters left as is in a query string value (`/` is encoded too)
const QUERY_VALUE: &AsciiSet = &COMPONENT.add(b'/');

/// Percent-encode a path or URL component, keeping `/` intact
///
/// # Examples
/// ```
/// assert_eq!(miya::helpers::urlencode("a b/c"), "a%20b/c");
/// ```
pub fn urlencode(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

/// Build a query string from key/value pairs
pub fn urlencode_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_VALUE),
                utf8_percent_encode(&v, QUERY_VALUE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("/search/ä ö"), "/search/%C3%A4%20%C3%B6");
        assert_eq!(urlencode("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn test_urlencode_pairs() {
        let pairs = vec![("q", "rust lang".to_string()), ("p", "a/b".to_string())];
        assert_eq!(urlencode_pairs(pairs), "q=rust%20lang&p=a%2Fb");
    }
}
