//! Scan options.
//!
//! Options arrive as string pairs. Each options struct implements
//! [`TryUpdateKey`] and picks out the keys it knows; [`ParseResult`] collects
//! what is left over.

use std::collections::HashMap;

use crate::{DeltaResult, DeltaTableError};

/// Default name of the file ordinal provenance column.
pub const DELTA_FILE_NUMBER_COLUMN: &str = "delta_file_number";
/// Default name of the row ordinal provenance column.
pub const FILE_ROW_NUMBER_COLUMN: &str = "file_row_number";
/// Name of the column carrying the path of the file a row was read from.
pub const FILENAME_COLUMN: &str = "filename";

pub trait TryUpdateKey: Default {
    /// Apply one option.
    ///
    /// `Ok(None)` means the key belongs to someone else. A known key with a
    /// value that does not parse is an error.
    fn try_update_key(&mut self, key: &str, value: &str) -> DeltaResult<Option<()>>;
}

/// Outcome of feeding a set of options through a [`TryUpdateKey`] impl.
#[derive(Debug)]
pub struct ParseResult<T: std::fmt::Debug> {
    pub config: T,
    /// Keys `T` did not recognise.
    pub unparsed: HashMap<String, String>,
    /// `(key, reason)` of every value that failed to parse.
    pub errors: Vec<(String, String)>,
    /// No option touched `config`.
    pub is_default: bool,
}

impl<T: std::fmt::Debug> ParseResult<T> {
    /// Report the first failed option as [`DeltaTableError::InvalidOption`].
    pub fn raise_errors(&self) -> DeltaResult<()> {
        match self.errors.first() {
            Some((key, reason)) => Err(DeltaTableError::InvalidOption {
                key: key.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl<T: std::fmt::Debug, K, V> FromIterator<(K, V)> for ParseResult<T>
where
    T: TryUpdateKey,
    K: AsRef<str> + Into<String>,
    V: AsRef<str> + Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = T::default();
        let mut unparsed = HashMap::new();
        let mut errors = Vec::new();
        let mut is_default = true;
        for (k, v) in iter {
            match config.try_update_key(k.as_ref(), v.as_ref()) {
                Ok(None) => {
                    unparsed.insert(k.into(), v.into());
                }
                Ok(Some(_)) => is_default = false,
                Err(e) => errors.push((k.into(), e.to_string())),
            }
        }
        ParseResult {
            config,
            unparsed,
            errors,
            is_default,
        }
    }
}

/// Parse `options` into `T`, returning the options `T` does not know.
pub fn try_parse_impl<T: std::fmt::Debug, K, V, I>(
    options: I,
) -> DeltaResult<(T, HashMap<String, String>)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str> + Into<String>,
    V: AsRef<str> + Into<String>,
    T: TryUpdateKey,
{
    let result = ParseResult::from_iter(options);
    result.raise_errors()?;
    Ok((result.config, result.unparsed))
}

/// Options specific to scanning Delta tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaScanConfig {
    /// Pin the scan to this table version instead of the latest one.
    pub version: Option<i64>,
    /// Emit the ordinal of the file each row was read from.
    pub delta_file_number: bool,
    /// Emit the position of each row within its physical file.
    pub file_row_number: bool,
    /// Name of the file ordinal column.
    pub delta_file_number_column: String,
    /// Name of the row ordinal column.
    pub file_row_number_column: String,
}

impl Default for DeltaScanConfig {
    fn default() -> Self {
        Self {
            version: None,
            delta_file_number: false,
            file_row_number: false,
            delta_file_number_column: DELTA_FILE_NUMBER_COLUMN.to_string(),
            file_row_number_column: FILE_ROW_NUMBER_COLUMN.to_string(),
        }
    }
}

impl TryUpdateKey for DeltaScanConfig {
    fn try_update_key(&mut self, key: &str, value: &str) -> DeltaResult<Option<()>> {
        match key.to_ascii_lowercase().as_str() {
            "version" => {
                let version = parse_i64(value)?;
                if version < 0 {
                    return Err(DeltaTableError::generic(format!(
                        "version must not be negative, got {version}"
                    )));
                }
                self.version = Some(version);
            }
            "delta_file_number" => self.delta_file_number = parse_bool(value)?,
            "file_row_number" => self.file_row_number = parse_bool(value)?,
            "delta_file_number_column" => {
                self.delta_file_number_column = parse_column_name(value)?
            }
            "file_row_number_column" => self.file_row_number_column = parse_column_name(value)?,
            _ => return Ok(None),
        }
        Ok(Some(()))
    }
}

/// Options of the generic multi-file scan pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFileReaderOptions {
    /// Emit the path of the file each row was read from.
    pub filename: bool,
    /// Maximum number of rows per chunk read from a physical file.
    pub batch_size: usize,
    /// Number of files read ahead in parallel.
    pub file_concurrency: usize,
    /// Table format specific options captured while parsing.
    pub custom_options: HashMap<String, String>,
}

impl Default for MultiFileReaderOptions {
    fn default() -> Self {
        Self {
            filename: false,
            batch_size: 8192,
            file_concurrency: 4,
            custom_options: HashMap::new(),
        }
    }
}

impl TryUpdateKey for MultiFileReaderOptions {
    fn try_update_key(&mut self, key: &str, value: &str) -> DeltaResult<Option<()>> {
        match key.to_ascii_lowercase().as_str() {
            "filename" => self.filename = parse_bool(value)?,
            "batch_size" => self.batch_size = parse_positive_usize(value)?,
            "file_concurrency" => self.file_concurrency = parse_positive_usize(value)?,
            _ => return Ok(None),
        }
        Ok(Some(()))
    }
}

pub fn parse_usize(value: &str) -> DeltaResult<usize> {
    value
        .parse::<usize>()
        .map_err(|_| DeltaTableError::Generic(format!("failed to parse \"{value}\" as usize")))
}

fn parse_positive_usize(value: &str) -> DeltaResult<usize> {
    match parse_usize(value)? {
        0 => Err(DeltaTableError::Generic(
            "value must be greater than zero".to_string(),
        )),
        n => Ok(n),
    }
}

pub fn parse_i64(value: &str) -> DeltaResult<i64> {
    value
        .parse::<i64>()
        .map_err(|_| DeltaTableError::Generic(format!("failed to parse \"{value}\" as i64")))
}

pub fn parse_bool(value: &str) -> DeltaResult<bool> {
    Ok(str_is_truthy(value))
}

fn parse_column_name(value: &str) -> DeltaResult<String> {
    let name = value.trim();
    if name.is_empty() {
        return Err(DeltaTableError::Generic(
            "column name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Boolean option values, case-insensitive. Anything unrecognised is false.
///
/// ```rust
/// # use deltalake_scan::table::config::str_is_truthy;
/// assert!(str_is_truthy("Yes"));
/// assert!(str_is_truthy("1"));
/// assert!(!str_is_truthy("off"));
/// assert!(!str_is_truthy("maybe"));
/// ```
pub fn str_is_truthy(val: &str) -> bool {
    ["1", "true", "on", "yes", "y"]
        .iter()
        .any(|truthy| val.eq_ignore_ascii_case(truthy))
}
