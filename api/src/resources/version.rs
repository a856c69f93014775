use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use url::Url;

use crate::resources::datum::Datum;

/// One entry of the paginated dataset-versions listing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatasetVersion {
    pub id: Id,
    pub name: Name,
}

/// Opaque identifier of a dataset version.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Id(pub String);

/// Version name. Doubles as the start marker when walking the listing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct Name(pub String);

impl Display for Id {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

impl Display for Name {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

/// One page of the dataset-versions listing. `next` is the absolute URL of
/// the following page, absent on the last page.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionsPage {
    pub results: Vec<DatasetVersion>,
    pub next: Option<Url>,
}

/// The resolved detail of one version, holding its file manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDetails {
    pub files: Vec<VersionFile>,
}

/// A manifest entry tying a version to one datum.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionFile {
    pub datum: Datum,
}
