//! Request validation for uploads.
//!
//! Everything here is pure: it looks at the submitted filename and request
//! headers and decides whether an upload may proceed. Nothing is written
//! until validation has passed.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use super::upload_service::UploadError;

/// Multipart field name carrying the file.
pub const FILE_FIELD: &str = "file";

/// Extensions accepted for upload, compared lower-cased.
pub const ALLOWED_EXTENSIONS: [&str; 11] = [
    ".jpg", ".jpeg", ".png", ".gif", ".pdf", ".zip", ".doc", ".docx", ".odt", ".ods", ".odp",
];

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Upper bound, in bytes, for the filename part of an object key. Well under
/// the 255-byte file name limit of common filesystems and S3's 1024-byte key.
pub const MAX_KEY_COMPONENT_LEN: usize = 200;

/// An upload that passed validation and may be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Final path component of the submitted filename, as sent.
    pub original_name: String,
    /// Base name with the extension removed; the record's unique key.
    pub filename: String,
    /// Lower-cased extension including the dot.
    pub extension: String,
    /// Resolved uploader address.
    pub client_ip: IpAddr,
}

/// Validate a submitted filename for an upload coming from `client_ip`.
pub fn validate_upload(submitted: &str, client_ip: IpAddr) -> Result<ValidatedUpload, UploadError> {
    let original_name = final_component(submitted);
    let (base, extension) = split_extension(original_name);
    if base.is_empty() {
        return Err(UploadError::InvalidFilename);
    }

    let extension = extension.to_ascii_lowercase();
    if !is_allowed_extension(&extension) {
        return Err(UploadError::DisallowedExtension(extension));
    }

    Ok(ValidatedUpload {
        original_name: original_name.to_string(),
        filename: base.to_string(),
        extension,
        client_ip,
    })
}

/// Case-insensitive membership test against [`ALLOWED_EXTENSIONS`].
pub fn is_allowed_extension(extension: &str) -> bool {
    ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
}

/// Split a filename into `(base, extension)`.
///
/// The extension starts at the last dot, unless that dot belongs to the
/// leading run of dots (`.bashrc` has no extension). Extension is empty when
/// there is no such dot.
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(pos) => name.split_at(leading + pos),
        None => (name, ""),
    }
}

/// Strip any client-side directory from a submitted filename.
fn final_component(submitted: &str) -> &str {
    submitted
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(submitted)
        .trim()
}

/// Resolve the uploader address.
///
/// The first entry of `X-Forwarded-For` wins when present and parseable;
/// otherwise the transport peer address is used. The header is not verified.
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) come back as plain IPv4.
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    let peer = peer.to_canonical();
    let Some(value) = headers.get(FORWARDED_FOR) else {
        return peer;
    };

    let first = value
        .to_str()
        .ok()
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or_default();

    match first.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical(),
        Err(_) => {
            warn!(
                forwarded_for = first,
                peer = %peer,
                "unparseable X-Forwarded-For entry, using peer address"
            );
            peer
        }
    }
}

/// Make a filename safe to embed in an object key.
///
/// Keeps ASCII alphanumerics, `.`, `_` and `-`; everything else becomes `_`.
/// Runs of dots collapse to one and leading dots are dropped, so the result
/// never contains `..`. Names longer than [`MAX_KEY_COMPONENT_LEN`] bytes are
/// cut short in the base, keeping the extension.
pub fn sanitize_key_component(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        };
        if c == '.' && (cleaned.is_empty() || cleaned.ends_with('.')) {
            continue;
        }
        cleaned.push(c);
    }

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        truncate_keeping_extension(cleaned)
    }
}

/// `name` is ASCII here, so any byte offset is a char boundary.
fn truncate_keeping_extension(name: String) -> String {
    if name.len() <= MAX_KEY_COMPONENT_LEN {
        return name;
    }

    let (base, extension) = split_extension(&name);
    let extension = if extension.len() <= MAX_KEY_COMPONENT_LEN / 2 {
        extension
    } else {
        ""
    };
    let base = base[..MAX_KEY_COMPONENT_LEN - extension.len()].trim_end_matches('.');
    if base.is_empty() {
        format!("file{extension}")
    } else {
        format!("{base}{extension}")
    }
}
