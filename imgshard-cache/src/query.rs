use percent_encoding::percent_decode_str;
use thiserror::Error;

static URL_PARAM: &str = "url";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Missing `url` query parameter.")]
    Missing,

    #[error("The `url` query parameter is not correctly percent encoded.")]
    InvalidEncoding,

    #[error("The `url` query parameter is not valid UTF-8 once decoded.")]
    InvalidUtf8,
}

/// Extracts and decodes the `url` parameter from a raw query string.
pub fn url_param(raw_query: Option<&str>) -> Result<String, QueryError> {
    let value = raw_query
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == URL_PARAM).then_some(value)
        })
        .ok_or(QueryError::Missing)?;

    if value.is_empty() {
        return Err(QueryError::Missing);
    }

    percent_decode(value)
}

/// Decodes a query component.
///
/// Unlike a lenient decoder, a `%` which is not followed by two hex digits
/// is an error rather than being passed through, and `+` becomes a space.
pub fn percent_decode(value: &str) -> Result<String, QueryError> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(QueryError::InvalidEncoding);
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let value = value.replace('+', " ");
    percent_decode_str(&value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| QueryError::InvalidUtf8)
}
