//! Query-string codec built on `url::form_urlencoded`.
//!
//! Form encoding writes a space as `+`. Some consumers of the wire treat
//! `+` literally, so every `+` in the serialized output is rewritten to
//! `%20`. A literal plus in a value is already `%2B` at that point, so the
//! rewrite is unambiguous.

use url::form_urlencoded;

/// Query-string codec.
pub struct QueryCodec;

impl QueryCodec {
    /// Serialize key/value pairs into a query string.
    ///
    /// Pair order is preserved.
    pub fn serialize<'a, I>(pairs: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish().replace('+', "%20")
    }

    /// Parse a query string into decoded key/value pairs.
    ///
    /// Both `+` and `%20` decode to a space.
    pub fn parse(query: &str) -> Vec<(String, String)> {
        form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }
}
