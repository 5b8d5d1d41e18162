//! Region catalog: region code → basin gauge ids.
//!
//! Built once (built-in table or a JSON file) and never mutated afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{HydroError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCatalog {
    regions: BTreeMap<String, Vec<String>>,
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "US",
        &[
            "01022500", "02011400", "03010655", "04015330", "05291000", "06221400", "07291000",
            "08013000", "09035800", "10234500", "11124500", "12010000", "13011500", "14020000",
            "01669520", "02481510", "03604000", "04256000", "05120500", "06921200", "07346045",
            "08380500", "09513780", "10259000", "11532500", "12488500",
        ],
    ),
    (
        "NE",
        &[
            "01031500", "01055000", "01078000", "01181000", "01195100", "01440000", "04233000",
            "03049000", "01568000", "01669520", "03213700", "03300400", "07014500", "06906800",
            "05062500", "04024430", "04074950", "05412500", "05495000", "05525500", "04124000",
            "04196800", "04185000", "03237500", "03346000", "03366500",
        ],
    ),
    (
        "SE",
        &[
            "02053200", "02108000", "02128000", "03498500", "02196000", "02202600", "02314500",
            "02235200", "02310947", "02361000", "02469800", "02472000", "07291000", "07375000",
            "08013000", "07362100", "07056000", "03604000", "03592718", "02464000", "08014500",
            "02327100", "02221525", "02350900", "07060710", "02140991",
        ],
    ),
    (
        "NW",
        &[
            "05123400", "05057000", "06353000", "06477500", "06601000", "06784000", "06876700",
            "07149000", "06847900", "06452000", "06289000", "06224000", "06154410", "06043500",
            "09081600", "10242000", "13023000", "12358500", "13337000", "14020000", "11383500",
            "10249300", "14301000", "11522500", "10396000", "09312600",
        ],
    ),
    (
        "SW",
        &[
            "11151300", "11124500", "10259200", "09505800", "08070000", "09447800", "09430500",
            "09484600", "08324000", "07226500", "07301500", "08079600", "07315700", "08086290",
            "08190500", "08194200", "08101000", "07346045", "08066200", "08164300", "08189500",
            "07148400", "08175000", "07299670", "09386900", "07315200",
        ],
    ),
];

impl RegionCatalog {
    pub fn new(regions: BTreeMap<String, Vec<String>>) -> Self {
        Self { regions }
    }

    /// The five CAMELS study regions.
    pub fn builtin() -> &'static RegionCatalog {
        static CATALOG: OnceLock<RegionCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| {
            Self::new(
                BUILTIN
                    .iter()
                    .map(|(code, ids)| (code.to_string(), ids.iter().map(|id| id.to_string()).collect()))
                    .collect(),
            )
        })
    }

    /// Load a `{ "REGION": ["gauge id", ...] }` JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| HydroError::io(path, e))?;
        let catalog: Self = serde_json::from_str(&json)
            .map_err(|e| HydroError::Config(format!("malformed region file {}: {}", path.display(), e)))?;
        if let Some((code, _)) = catalog.regions.iter().find(|(_, ids)| ids.is_empty()) {
            return Err(HydroError::Config(format!("region {} has no basins", code)));
        }
        Ok(catalog)
    }

    pub fn basins(&self, region: &str) -> Result<&[String]> {
        self.regions.get(region).map(Vec::as_slice).ok_or_else(|| {
            HydroError::Config(format!(
                "unknown region {} (known: {})",
                region,
                self.codes().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }
}
