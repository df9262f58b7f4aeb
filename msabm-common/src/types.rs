use serde::{Deserialize, Serialize};
use std::fmt;

/// Diffusible species tracked on the grid.
///
/// The set is closed: cytokines exchanged between tumor cells and macrophages,
/// plus the two drugs (CSF1R inhibitor and IGF1R inhibitor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    /// Secreted by tumor cells; pushes macrophages toward M2.
    Csf1,
    /// Secreted by M2 macrophages; accelerates the tumor cell cycle.
    Igf1,
    /// Secreted by M1 macrophages; drives tumor death signaling.
    Tnf,
    /// Drug A. Blocks CSF1R on macrophages.
    Csf1rInhibitor,
    /// Drug B. Blocks IGF1R on tumor cells.
    Igf1rInhibitor,
}

impl Species {
    pub const COUNT: usize = 5;
    pub const ALL: [Species; Species::COUNT] = [
        Species::Csf1,
        Species::Igf1,
        Species::Tnf,
        Species::Csf1rInhibitor,
        Species::Igf1rInhibitor,
    ];

    /// Dense index used for per-species arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Species::Csf1 => "csf1",
            Species::Igf1 => "igf1",
            Species::Tnf => "tnf",
            Species::Csf1rInhibitor => "csf1r_inhibitor",
            Species::Igf1rInhibitor => "igf1r_inhibitor",
        }
    }

    pub fn is_drug(self) -> bool {
        matches!(self, Species::Csf1rInhibitor | Species::Igf1rInhibitor)
    }

    pub fn parse(name: &str) -> Option<Species> {
        Species::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Tumor,
    Macrophage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TumorPhenotype {
    Proliferative,
    Quiescent,
    Apoptotic,
}

/// Macrophage polarization axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarization {
    M0,
    M1,
    M2,
}

/// Phenotype state of an agent. The variant doubles as the agent's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum Phenotype {
    Tumor(TumorPhenotype),
    Macrophage(Polarization),
}

impl Phenotype {
    pub fn kind(self) -> AgentKind {
        match self {
            Phenotype::Tumor(_) => AgentKind::Tumor,
            Phenotype::Macrophage(_) => AgentKind::Macrophage,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phenotype::Tumor(TumorPhenotype::Proliferative) => "tumor_proliferative",
            Phenotype::Tumor(TumorPhenotype::Quiescent) => "tumor_quiescent",
            Phenotype::Tumor(TumorPhenotype::Apoptotic) => "tumor_apoptotic",
            Phenotype::Macrophage(Polarization::M0) => "macrophage_m0",
            Phenotype::Macrophage(Polarization::M1) => "macrophage_m1",
            Phenotype::Macrophage(Polarization::M2) => "macrophage_m2",
        }
    }

    pub const ALL: [Phenotype; 6] = [
        Phenotype::Tumor(TumorPhenotype::Proliferative),
        Phenotype::Tumor(TumorPhenotype::Quiescent),
        Phenotype::Tumor(TumorPhenotype::Apoptotic),
        Phenotype::Macrophage(Polarization::M0),
        Phenotype::Macrophage(Polarization::M1),
        Phenotype::Macrophage(Polarization::M2),
    ];

    /// Inverse of [`Phenotype::label`].
    pub fn from_label(label: &str) -> Option<Phenotype> {
        Phenotype::ALL.into_iter().find(|p| p.label() == label)
    }
}

/// Where the run seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Configured,
    Entropy,
}
