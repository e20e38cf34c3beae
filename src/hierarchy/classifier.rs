use std::collections::HashMap;

pub const DEFAULT_CAPITAL_PREFECTURE: &str = "東京都";
pub const CITY_TOKEN: char = '市';
pub const WARD_SUFFIX: char = '区';

/// Where a municipality sits in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionRole {
    /// Level-1 city (or town/village) directly under the prefecture.
    RegularCity,
    /// Ward of the capital prefecture, a level-1 sibling of cities.
    CapitalWard,
    /// Level-2 ward of a designated city; the city itself is synthesized.
    DesignatedCityWard { parent_city: String },
    Unrecognized,
}

/// Name-convention rules plus an explicit override table. Overrides win
/// over the string heuristics.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub capital_prefecture: String,
    pub overrides: HashMap<(String, String), RegionRole>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            capital_prefecture: DEFAULT_CAPITAL_PREFECTURE.to_string(),
            overrides: HashMap::new(),
        }
    }
}

impl ClassifierRules {
    pub fn new(capital_prefecture: impl Into<String>) -> Self {
        Self {
            capital_prefecture: capital_prefecture.into(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(
        mut self,
        prefecture: impl Into<String>,
        municipality: impl Into<String>,
        role: RegionRole,
    ) -> Self {
        self.overrides
            .insert((prefecture.into(), municipality.into()), role);
        self
    }

    pub fn classify(&self, prefecture: &str, municipality: &str) -> RegionRole {
        let prefecture = prefecture.trim();
        let municipality = municipality.trim();
        if prefecture.is_empty() || municipality.is_empty() {
            return RegionRole::Unrecognized;
        }

        if let Some(role) = self
            .overrides
            .get(&(prefecture.to_string(), municipality.to_string()))
        {
            return role.clone();
        }

        let has_city = municipality.contains(CITY_TOKEN);
        let is_ward = municipality.ends_with(WARD_SUFFIX);

        if prefecture == self.capital_prefecture && is_ward && !has_city {
            return RegionRole::CapitalWard;
        }
        if has_city && is_ward {
            return RegionRole::DesignatedCityWard {
                parent_city: parent_city_name(municipality),
            };
        }
        RegionRole::RegularCity
    }
}

/// Classification with the default rules (capital = 東京都, no overrides).
pub fn classify(prefecture: &str, municipality: &str) -> RegionRole {
    ClassifierRules::default().classify(prefecture, municipality)
}

/// "福岡市中央区" -> "福岡市": everything up to and including the first
/// city token.
pub fn parent_city_name(ward_name: &str) -> String {
    match ward_name.find(CITY_TOKEN) {
        Some(idx) => {
            let mut name = ward_name[..idx].to_string();
            name.push(CITY_TOKEN);
            name
        }
        None => ward_name.to_string(),
    }
}

/// Names that carry both tokens but don't end in the ward suffix. They
/// fall through to `RegularCity`; the importer reports them so an operator
/// can add an override if the guess is wrong.
pub fn is_ambiguous(municipality: &str) -> bool {
    let m = municipality.trim();
    m.contains(CITY_TOKEN) && m.contains(WARD_SUFFIX) && !m.ends_with(WARD_SUFFIX)
}
