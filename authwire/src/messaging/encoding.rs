//! Wire encodings for field maps.
//!
//! Fields travel as URL query strings, `application/x-www-form-urlencoded` bodies, an
//! `Authorization: OAuth k="v",...` header, or (OpenID direct responses) key-value form.
//! Escaping follows RFC 3986: only unreserved characters (`A-Z a-z 0-9 - . _ ~`) pass
//! through unencoded.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::{Url, form_urlencoded};

use super::Fields;
use crate::error::{ProtocolError, Result};

/// Characters escaped by [`escape_rfc3986`]: everything but the unreserved set.
const RFC3986_RESERVED: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Authorization scheme for protocol fields carried in a header.
pub const AUTHORIZATION_SCHEME: &str = "OAuth";

/// Percent-encodes `value` per RFC 3986.
///
/// ```
/// use authwire::messaging::encoding::escape_rfc3986;
///
/// assert_eq!(escape_rfc3986("a b&c=d~"), "a%20b%26c%3Dd~");
/// assert_eq!(escape_rfc3986("ü"), "%C3%BC");
/// ```
#[must_use]
pub fn escape_rfc3986(value: &str) -> String {
    utf8_percent_encode(value, RFC3986_RESERVED).to_string()
}

/// Decodes a percent-encoded value.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if the decoded bytes are not UTF-8.
pub fn unescape(value: &str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid percent-encoding: {e}")))
}

/// Builds `k=v&k=v` with RFC 3986 escaping, preserving field order.
#[must_use]
pub fn create_query_string(fields: &Fields) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_rfc3986(key), escape_rfc3986(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses a query string or form body. The first occurrence of a repeated key wins.
#[must_use]
pub fn parse_query_string(query: &str) -> Fields {
    let mut fields = Fields::new();
    for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    fields
}

/// Query parameters of `url`.
#[must_use]
pub fn query_fields(url: &Url) -> Fields {
    url.query().map(parse_query_string).unwrap_or_default()
}

/// Appends `fields` to the query string of `url`.
pub fn append_query_args(url: &mut Url, fields: &Fields) {
    if fields.is_empty() {
        return;
    }
    let mut query = url.query().unwrap_or_default().to_owned();
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&create_query_string(fields));
    url.set_query(Some(&query));
}

/// Builds an `Authorization` header value carrying `fields`.
///
/// ```
/// use authwire::messaging::{Fields, encoding::build_authorization_header};
///
/// let mut fields = Fields::new();
/// fields.insert("oauth_consumer_key".to_owned(), "ck 1".to_owned());
/// assert_eq!(
///     build_authorization_header(Some("photos"), &fields),
///     "OAuth realm=\"photos\",oauth_consumer_key=\"ck%201\""
/// );
/// ```
#[must_use]
pub fn build_authorization_header(realm: Option<&str>, fields: &Fields) -> String {
    let mut pairs = Vec::with_capacity(fields.len() + 1);
    if let Some(realm) = realm {
        pairs.push(format!("realm=\"{}\"", escape_rfc3986(realm)));
    }
    pairs.extend(
        fields
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", escape_rfc3986(key), escape_rfc3986(value))),
    );
    format!("{AUTHORIZATION_SCHEME} {}", pairs.join(","))
}

/// Parses an `Authorization` header value.
///
/// Returns `Ok(None)` for any other scheme. The `realm` parameter is dropped: it is not
/// a message field.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if a parameter is not `key="value"`.
pub fn parse_authorization_header(value: &str) -> Result<Option<Fields>> {
    let value = value.trim();
    let Some((scheme, params)) = value.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_SCHEME) {
        return Ok(None);
    }

    let mut fields = Fields::new();
    for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, quoted) = pair.split_once('=').ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("authorization parameter without value: {pair}"))
        })?;
        let key = unescape(key.trim())?;
        let raw = quoted.trim().trim_matches('"');
        if key == "realm" {
            continue;
        }
        fields.insert(key, unescape(raw)?);
    }
    Ok(Some(fields))
}

/// Encodes `fields` as key-value form: one `key:value\n` line per field.
///
/// ```
/// use authwire::messaging::{Fields, encoding::encode_key_value_form};
///
/// let mut fields = Fields::new();
/// fields.insert("mode".to_owned(), "error".to_owned());
/// fields.insert("error".to_owned(), "bad: request".to_owned());
/// assert_eq!(encode_key_value_form(&fields)?, "mode:error\nerror:bad: request\n");
/// # Ok::<(), authwire::ProtocolError>(())
/// ```
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidInput`] if a key contains `:` or a newline, or a value
/// contains a newline.
pub fn encode_key_value_form(fields: &Fields) -> Result<String> {
    let mut body = String::new();
    for (key, value) in fields {
        if key.contains([':', '\n']) {
            return Err(ProtocolError::InvalidInput(format!(
                "key-value form keys cannot contain ':' or newlines: {key:?}"
            )));
        }
        if value.contains('\n') {
            return Err(ProtocolError::InvalidInput(format!(
                "key-value form value for {key} contains a newline"
            )));
        }
        body.push_str(key);
        body.push(':');
        body.push_str(value);
        body.push('\n');
    }
    Ok(body)
}

/// Decodes a key-value form body.
///
/// Strict mode requires every line (including the last) to end in a newline and keeps
/// whitespace as-is. Loose mode trims keys and values, skips blank lines and accepts a
/// missing final newline. A repeated key is always rejected.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] for a line without `:`, a missing final
/// newline in strict mode, or a repeated key.
pub fn decode_key_value_form(body: &str, strict: bool) -> Result<Fields> {
    if strict && !body.is_empty() && !body.ends_with('\n') {
        return Err(ProtocolError::MalformedMessage(
            "key-value form must end with a newline".to_owned(),
        ));
    }
    let mut fields = Fields::new();
    for (number, line) in body.lines().enumerate() {
        if !strict && line.trim().is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("key-value form line {} has no ':'", number + 1))
        })?;
        let (key, value) = if strict { (key, value) } else { (key.trim(), value.trim()) };
        if fields.insert(key.to_owned(), value.to_owned()).is_some() {
            return Err(ProtocolError::MalformedMessage(format!(
                "key-value form repeats key {key:?}"
            )));
        }
    }
    Ok(fields)
}
