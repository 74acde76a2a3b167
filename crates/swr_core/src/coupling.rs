//! Coupling vocabulary shared by the remapper and the convergence checker:
//! which side produced a field, in which order the sides run, and how a
//! sender's variable is named on the receiving side.

use serde::{Deserialize, Serialize};

use crate::error::SwrError;

/// The two coupled components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Atmosphere,
    Ocean,
}

impl Side {
    pub fn receiver(self) -> Side {
        match self {
            Side::Atmosphere => Side::Ocean,
            Side::Ocean => Side::Atmosphere,
        }
    }

    /// The scheme under which this side starts each coupling window.
    pub fn leading_scheme(self) -> CouplingScheme {
        match self {
            Side::Atmosphere => CouplingScheme::AtmosphereFirst,
            Side::Ocean => CouplingScheme::OceanFirst,
        }
    }
}

/// Relative execution order of the two components inside one coupling
/// interval. Serialized as the integers 0, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CouplingScheme {
    #[default]
    Parallel,
    AtmosphereFirst,
    OceanFirst,
}

impl CouplingScheme {
    /// Whether data sent by `sender` loses its first sample. Only the side
    /// that leads the coupling window keeps it.
    pub fn trims_leading_sample(self, sender: Side) -> bool {
        self != sender.leading_scheme()
    }
}

impl TryFrom<u8> for CouplingScheme {
    type Error = SwrError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CouplingScheme::Parallel),
            1 => Ok(CouplingScheme::AtmosphereFirst),
            2 => Ok(CouplingScheme::OceanFirst),
            other => Err(SwrError::Config(format!(
                "Coupling scheme {other} not available."
            ))),
        }
    }
}

impl From<CouplingScheme> for u8 {
    fn from(value: CouplingScheme) -> Self {
        match value {
            CouplingScheme::Parallel => 0,
            CouplingScheme::AtmosphereFirst => 1,
            CouplingScheme::OceanFirst => 2,
        }
    }
}

/// EC-Earth generation driving the single column model. It decides how the
/// coupling layer names atmosphere output files. Serialized as 3 or 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModelVariant {
    Ece3,
    Ece4,
}

impl ModelVariant {
    /// Substring in the stem of raw output files written by `side`.
    pub fn separator(self, side: Side) -> &'static str {
        match (self, side) {
            (ModelVariant::Ece3, Side::Atmosphere) => "_ATMIFS_",
            (ModelVariant::Ece4, Side::Atmosphere) => "_OpenIFS_",
            (_, Side::Ocean) => "_oceanx_",
        }
    }

    /// Run script prefix in the model's runtime directory.
    pub fn script_prefix(self) -> &'static str {
        match self {
            ModelVariant::Ece3 => "ece",
            ModelVariant::Ece4 => "ece4",
        }
    }
}

impl TryFrom<u8> for ModelVariant {
    type Error = SwrError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ModelVariant::Ece3),
            4 => Ok(ModelVariant::Ece4),
            other => Err(SwrError::Config(format!(
                "Model version {other} not supported"
            ))),
        }
    }
}

impl From<ModelVariant> for u8 {
    fn from(value: ModelVariant) -> Self {
        match value {
            ModelVariant::Ece3 => 3,
            ModelVariant::Ece4 => 4,
        }
    }
}

const ATMOSPHERE_TO_OCEAN: [(&str, &str); 13] = [
    ("A_TauX_oce", "O_OTaux1"),
    ("A_TauY_oce", "O_OTauy1"),
    ("A_TauX_ice", "O_ITaux1"),
    ("A_TauY_ice", "O_ITauy1"),
    ("A_Qs_mix", "O_QsrMix"),
    ("A_Qns_mix", "O_QnsMix"),
    ("A_Qs_ice", "O_QsrIce"),
    ("A_Qns_ice", "O_QnsIce"),
    ("A_Precip_liquid", "OTotRain"),
    ("A_Precip_solid", "OTotSnow"),
    ("A_Evap_total", "OTotEvap"),
    ("A_Evap_ice", "OIceEvap"),
    ("A_dQns_dT", "O_dQnsdT"),
];

const OCEAN_TO_ATMOSPHERE: [(&str, &str); 6] = [
    ("O_SSTSST", "A_SST"),
    ("O_TepIce", "A_Ice_temp"),
    ("O_AlbIce", "A_Ice_albedo"),
    ("OIceFrc", "A_Ice_frac"),
    ("OIceTck", "A_Ice_thickness"),
    ("OSnwTck", "A_Snow_thickness"),
];

/// Bidirectional dictionary between sender-side and receiver-side variable
/// names, one table per sending side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouplingMap {
    from_atmosphere: Vec<(String, String)>,
    from_ocean: Vec<(String, String)>,
}

impl Default for CouplingMap {
    fn default() -> Self {
        Self::aoscm()
    }
}

impl CouplingMap {
    pub fn empty() -> Self {
        Self {
            from_atmosphere: Vec::new(),
            from_ocean: Vec::new(),
        }
    }

    /// Fields exchanged by the OpenIFS/NEMO single column model.
    pub fn aoscm() -> Self {
        let owned = |table: &[(&str, &str)]| {
            table
                .iter()
                .map(|(s, r)| (s.to_string(), r.to_string()))
                .collect()
        };
        Self {
            from_atmosphere: owned(&ATMOSPHERE_TO_OCEAN),
            from_ocean: owned(&OCEAN_TO_ATMOSPHERE),
        }
    }

    /// Adds a pair, replacing an existing entry for the same sender name.
    pub fn insert(&mut self, sender: Side, sender_name: &str, receiver_name: &str) {
        let table = self.table_mut(sender);
        match table.iter_mut().find(|(s, _)| s == sender_name) {
            Some(entry) => entry.1 = receiver_name.to_string(),
            None => table.push((sender_name.to_string(), receiver_name.to_string())),
        }
    }

    fn table(&self, sender: Side) -> &[(String, String)] {
        match sender {
            Side::Atmosphere => &self.from_atmosphere,
            Side::Ocean => &self.from_ocean,
        }
    }

    fn table_mut(&mut self, sender: Side) -> &mut Vec<(String, String)> {
        match sender {
            Side::Atmosphere => &mut self.from_atmosphere,
            Side::Ocean => &mut self.from_ocean,
        }
    }

    /// Receiver-side name of a variable sent by `sender`. `None` means the
    /// variable is not exchanged.
    pub fn receiver_name(&self, sender: Side, sender_name: &str) -> Option<&str> {
        self.table(sender)
            .iter()
            .find(|(s, _)| s == sender_name)
            .map(|(_, r)| r.as_str())
    }

    /// Inverse lookup: the sender-side name that produces `receiver_name`.
    pub fn sender_name(&self, sender: Side, receiver_name: &str) -> Option<&str> {
        self.table(sender)
            .iter()
            .find(|(_, r)| r == receiver_name)
            .map(|(s, _)| s.as_str())
    }

    /// All sender-side names, atmosphere first, in table order.
    pub fn sender_names(&self) -> impl Iterator<Item = &str> {
        self.from_atmosphere
            .iter()
            .chain(self.from_ocean.iter())
            .map(|(s, _)| s.as_str())
    }
}
