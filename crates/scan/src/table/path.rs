//! Translation between host-facing paths and the URLs the table engine works with.
//!
//! The host hands out plain local paths (`/data/table`) or URLs of remote
//! stores (`s3://bucket/table`). The engine only understands URLs. Both
//! translations are pure string functions; resolving a location against the
//! file system happens once, in [`ensure_table_uri`].

use std::path::{Path as StdPath, PathBuf};

use tracing::error;
use url::Url;

use crate::{DeltaResult, DeltaTableError};

/// Translate a host path into the form the engine expects.
///
/// Absolute local paths become `file://` URLs, anything else (remote URLs,
/// relative paths) is returned as is.
pub fn to_delta_path(path: &str) -> String {
    let local = StdPath::new(path);
    if !local.is_absolute() {
        return path.to_string();
    }
    match Url::from_file_path(local) {
        Ok(url) => {
            let mut url = url.to_string();
            if path.ends_with('/') && !url.ends_with('/') {
                url.push('/');
            }
            url
        }
        Err(_) => path.to_string(),
    }
}

/// Translate an engine path back into the form the host expects.
///
/// Inverse of [`to_delta_path`]: `file://` URLs become local paths, anything
/// else is returned as is.
pub fn to_host_path(path: &str) -> String {
    let Ok(url) = Url::parse(path) else {
        return path.to_string();
    };
    if url.scheme() != "file" {
        return path.to_string();
    }
    match url.to_file_path() {
        Ok(local) => {
            let mut local = local.to_string_lossy().into_owned();
            if path.ends_with('/') && !local.ends_with('/') {
                local.push('/');
            }
            local
        }
        Err(_) => path.to_string(),
    }
}

/// URL schemes of the object stores a table can live in.
const KNOWN_SCHEMES: &[&str] = &[
    "file", "memory", "s3", "s3a", "gs", "az", "adl", "azure", "abfs", "abfss", "http", "https",
];

enum UriType {
    LocalPath(PathBuf),
    Url(Url),
}

fn resolve_uri_type(table_uri: &str) -> DeltaResult<UriType> {
    match Url::parse(table_uri) {
        Ok(url) => {
            if url.scheme() == "file" {
                Ok(UriType::LocalPath(url.to_file_path().map_err(|err| {
                    let msg = format!("Invalid table location: {table_uri}\nError: {err:?}");
                    DeltaTableError::InvalidTableLocation(msg)
                })?))
            // we assume here that a single character scheme is a windows drive letter
            } else if url.scheme().len() == 1 {
                Ok(UriType::LocalPath(PathBuf::from(table_uri)))
            } else if KNOWN_SCHEMES.contains(&url.scheme()) {
                Ok(UriType::Url(url))
            } else {
                Err(DeltaTableError::InvalidTableLocation(format!(
                    "Unknown scheme: {}",
                    url.scheme()
                )))
            }
        }
        // The RelativeUrlWithoutBase error _usually_ means this function has been called
        // with a file path looking thing.
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Ok(UriType::LocalPath(PathBuf::from(table_uri)))
        }
        Err(url_error) => Err(DeltaTableError::InvalidTableLocation(format!(
            "Could not parse {table_uri} as a URL: {url_error}"
        ))),
    }
}

/// Resolve a user supplied table location into a normalized table URL.
///
/// Local paths must exist and are canonicalized. The returned URL always ends
/// with a slash so relative file paths can be joined onto it.
pub fn ensure_table_uri(table_uri: impl AsRef<str>) -> DeltaResult<Url> {
    let table_uri = table_uri.as_ref();
    let url = match resolve_uri_type(table_uri)? {
        UriType::LocalPath(path) => {
            let path = std::fs::canonicalize(path).map_err(|err| {
                let msg = format!("Invalid table location: {table_uri}\nError: {err:?}");
                DeltaTableError::InvalidTableLocation(msg)
            })?;
            Url::from_directory_path(path).map_err(|_| {
                let msg = format!(
                    "Could not construct a URL from the canonical path: {table_uri}.\n\
                    Something must be very wrong with the table path.",
                );
                DeltaTableError::InvalidTableLocation(msg)
            })?
        }
        UriType::Url(url) => url,
    };
    Ok(normalize_table_url(&url))
}

/// Collapse empty path segments and add a trailing slash.
fn normalize_table_url(url: &Url) -> Url {
    let mut path = url
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(String::new(), |mut acc, segment| {
            acc.push('/');
            acc.push_str(segment);
            acc
        });
    path.push('/');

    let mut url = url.clone();
    if url.cannot_be_a_base() {
        error!("Was not able to normalize the table URL. This is non-fatal but may produce curious results!");
        return url;
    }
    url.set_path(&path);
    url
}

/// URL of a file referenced from the log of the table at `root`.
///
/// `path` is either relative to the table root (unencoded, as stored in the
/// log) or an absolute URL.
pub fn join_table_path(root: &Url, path: &str) -> DeltaResult<Url> {
    if path.contains("://") {
        return Ok(Url::parse(path)?);
    }
    let mut url = root.clone();
    url.path_segments_mut()
        .map_err(|_| {
            DeltaTableError::InvalidTableLocation(format!("{root} can not be a base URL"))
        })?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url)
}
