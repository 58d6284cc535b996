//! Municipality registry, loaded from TOML embedded at compile time.
//!
//! Each province file in `packages/config/registry/` lists the
//! municipalities to ingest with their INE codes. Adding a province means
//! adding a TOML file and an entry in [`REGISTRY_TOMLS`].

use catastro_parcel_models::Municipality;
use serde::Deserialize;

/// Province registries embedded at compile time.
const REGISTRY_TOMLS: &[(&str, &str)] = &[(
    "illes_balears",
    include_str!("../registry/illes_balears.toml"),
)];

/// Number of registered municipalities, enabled or not. Enforced by a test.
#[cfg(test)]
const EXPECTED_MUNICIPALITY_COUNT: usize = 67;

#[derive(Debug, Deserialize)]
struct ProvinceFile {
    province: ProvinceHeader,
    #[serde(rename = "municipality")]
    municipalities: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct ProvinceHeader {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    name: String,
    code: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// A registered municipality and whether default runs include it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredMunicipality {
    /// The municipality.
    pub municipality: Municipality,
    /// Whether default runs include this municipality.
    pub enabled: bool,
}

/// Returns every registered municipality, in registry order.
///
/// # Panics
///
/// Panics if an embedded TOML file fails to parse. These are compile-time
/// constants, so a parse failure is a development error caught by tests.
#[must_use]
pub fn all_municipalities() -> Vec<RegisteredMunicipality> {
    REGISTRY_TOMLS
        .iter()
        .flat_map(|(name, toml_str)| {
            let file: ProvinceFile = toml::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse municipality registry '{name}': {e}"));
            let province = file.province;
            file.municipalities
                .into_iter()
                .map(move |entry| RegisteredMunicipality {
                    municipality: Municipality {
                        name: entry.name,
                        code: entry.code,
                        province_name: province.name.clone(),
                        province_code: province.code.clone(),
                    },
                    enabled: entry.enabled,
                })
        })
        .collect()
}

/// Returns the municipalities to process.
///
/// With no filter, every enabled municipality is returned. A filter is a
/// comma-separated list of names (case-insensitive) and may select
/// disabled entries explicitly.
#[must_use]
pub fn selected_municipalities(filter: Option<&str>) -> Vec<Municipality> {
    let all = all_municipalities();

    let Some(filter) = filter else {
        return all
            .into_iter()
            .filter(|m| m.enabled)
            .map(|m| m.municipality)
            .collect();
    };

    let wanted: Vec<String> = filter
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let selected: Vec<Municipality> = all
        .into_iter()
        .filter(|m| wanted.contains(&m.municipality.name.to_uppercase()))
        .map(|m| m.municipality)
        .collect();

    if selected.len() < wanted.len() {
        log::warn!(
            "Municipality filter {wanted:?} matched {} of {} names",
            selected.len(),
            wanted.len()
        );
    }

    selected
}

/// Looks up one municipality by name (case-insensitive), enabled or not.
#[must_use]
pub fn find_municipality(name: &str) -> Option<Municipality> {
    let wanted = name.trim().to_uppercase();
    all_municipalities()
        .into_iter()
        .find(|m| m.municipality.name.to_uppercase() == wanted)
        .map(|m| m.municipality)
}
