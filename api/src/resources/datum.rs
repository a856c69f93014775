use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use url::Url;

/// The registry's content-addressed record for a single file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Datum {
    pub id: Id,
    /// Suggested file name for the datum's content.
    pub name: String,
}

/// Opaque identifier of a datum.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Id(pub String);

impl Display for Id {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

/// Response of the download-URL resolution endpoint. The URL is short-lived
/// and embeds its own credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedDownload {
    pub url: Url,
}
