// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::api::TaskId;

/// Error type for every fallible operation in the CVAT sync library.
///
/// Recoverable conditions such as unsupported label kinds, unknown document
/// versions or schema drift on download are logged and never surface here.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred during file operations.
    IoError(std::io::Error),
    /// Configuration parsing or loading error.
    ConfigError(config::ConfigError),
    /// JSON serialization or deserialization error.
    JsonError(serde_json::Error),
    /// Transport error from the reqwest client.
    HttpError(reqwest::Error),
    /// The server answered with a non-2xx status.
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    /// URL parsing error.
    UrlParseError(url::ParseError),
    /// XML reading or writing error.
    XmlError(quick_xml::Error),
    /// Integer parsing error.
    ParseIntError(std::num::ParseIntError),
    /// Float parsing error.
    ParseFloatError(std::num::ParseFloatError),
    /// A bounded polling loop ran out of attempts.
    PollTimeout { operation: String, attempts: u32 },
    /// Server returned an invalid or unexpected response.
    InvalidResponse(String),
    /// Username is not known to the server.
    UnknownUser(String),
    /// Class name has no id in the task's class map.
    MissingLabel(String),
    /// Attribute name has no id in the task's attribute map.
    MissingAttribute(String),
    /// Image or video dimensions are required but unavailable.
    MissingMetadata(String),
    /// A remote frame number has no local sample/frame mapping.
    UnmappedFrame { task_id: TaskId, frame: u64 },
    /// The XML document does not have the expected structure.
    InvalidXml(String),
    /// Invalid parameters provided to an operation.
    InvalidParameters(String),
    /// The label field type cannot be handled by the requested operation.
    UnsupportedLabelType(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::HttpError(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParseError(err)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::XmlError(err)
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlError(quick_xml::Error::InvalidAttr(err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ParseIntError(err)
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::ParseFloatError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::JsonError(e) => write!(f, "JSON error: {}", e),
            Error::HttpError(e) => write!(f, "HTTP error: {}", e),
            Error::HttpStatus { status, url, body } => {
                write!(f, "HTTP status {} for {}: {}", status, url, body)
            }
            Error::UrlParseError(e) => write!(f, "URL parse error: {}", e),
            Error::XmlError(e) => write!(f, "XML error: {}", e),
            Error::ParseIntError(e) => write!(f, "Integer parse error: {}", e),
            Error::ParseFloatError(e) => write!(f, "Float parse error: {}", e),
            Error::PollTimeout {
                operation,
                attempts,
            } => write!(
                f,
                "Timed out waiting for {} after {} attempts",
                operation, attempts
            ),
            Error::InvalidResponse(s) => write!(f, "Invalid server response: {}", s),
            Error::UnknownUser(s) => write!(f, "Unknown user: {}", s),
            Error::MissingLabel(s) => write!(f, "Missing label: {}", s),
            Error::MissingAttribute(s) => write!(f, "Missing attribute: {}", s),
            Error::MissingMetadata(s) => write!(f, "Missing metadata: {}", s),
            Error::UnmappedFrame { task_id, frame } => write!(
                f,
                "Frame {} of task {} has no local mapping",
                frame, task_id
            ),
            Error::InvalidXml(s) => write!(f, "Invalid XML document: {}", s),
            Error::InvalidParameters(s) => write!(f, "Invalid parameters: {}", s),
            Error::UnsupportedLabelType(s) => write!(f, "Unsupported label type: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::ConfigError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            Error::HttpError(e) => Some(e),
            Error::UrlParseError(e) => Some(e),
            Error::XmlError(e) => Some(e),
            Error::ParseIntError(e) => Some(e),
            Error::ParseFloatError(e) => Some(e),
            _ => None,
        }
    }
}
