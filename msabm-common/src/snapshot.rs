use crate::types::{Phenotype, Polarization, SeedSource, Species, TumorPhenotype};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of live agents per phenotype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhenotypeCounts {
    pub tumor_proliferative: u64,
    pub tumor_quiescent: u64,
    pub tumor_apoptotic: u64,
    pub macrophage_m0: u64,
    pub macrophage_m1: u64,
    pub macrophage_m2: u64,
}

impl PhenotypeCounts {
    pub fn from_phenotypes<I: IntoIterator<Item = Phenotype>>(phenotypes: I) -> Self {
        let mut counts = PhenotypeCounts::default();
        for p in phenotypes {
            counts.add(p);
        }
        counts
    }

    fn slot(&mut self, phenotype: Phenotype) -> &mut u64 {
        match phenotype {
            Phenotype::Tumor(TumorPhenotype::Proliferative) => &mut self.tumor_proliferative,
            Phenotype::Tumor(TumorPhenotype::Quiescent) => &mut self.tumor_quiescent,
            Phenotype::Tumor(TumorPhenotype::Apoptotic) => &mut self.tumor_apoptotic,
            Phenotype::Macrophage(Polarization::M0) => &mut self.macrophage_m0,
            Phenotype::Macrophage(Polarization::M1) => &mut self.macrophage_m1,
            Phenotype::Macrophage(Polarization::M2) => &mut self.macrophage_m2,
        }
    }

    pub fn get(&self, phenotype: Phenotype) -> u64 {
        let mut copy = *self;
        *copy.slot(phenotype)
    }

    pub fn add(&mut self, phenotype: Phenotype) {
        *self.slot(phenotype) += 1;
    }

    /// Returns false (and leaves the counts untouched) if the slot is already empty.
    pub fn remove(&mut self, phenotype: Phenotype) -> bool {
        let slot = self.slot(phenotype);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    pub fn transition(&mut self, from: Phenotype, to: Phenotype) -> bool {
        if !self.remove(from) {
            return false;
        }
        self.add(to);
        true
    }

    pub fn tumor_total(&self) -> u64 {
        self.tumor_proliferative + self.tumor_quiescent + self.tumor_apoptotic
    }

    pub fn macrophage_total(&self) -> u64 {
        self.macrophage_m0 + self.macrophage_m1 + self.macrophage_m2
    }

    pub fn total(&self) -> u64 {
        self.tumor_total() + self.macrophage_total()
    }

    /// Share of macrophages in the given polarization, 0 when there are none.
    pub fn polarization_fraction(&self, polarization: Polarization) -> f64 {
        let total = self.macrophage_total();
        if total == 0 {
            return 0.0;
        }
        self.get(Phenotype::Macrophage(polarization)) as f64 / total as f64
    }
}

/// Full concentration array of one species, row-major (`values[j * nx + i]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub species: Species,
    pub nx: u32,
    pub ny: u32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: u64,
    pub phenotype: Phenotype,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub signaling: [f64; 2],
    pub cycle_clock_h: f64,
    pub age_h: f64,
}

/// A snapshot of the simulation state and metrics at a specific time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulated time in hours.
    pub time_h: f64,
    pub coarse_step: u64,
    pub counts: PhenotypeCounts,
    pub total_agents: u64,
    /// Domain-averaged concentration per simulated species.
    pub mean_concentrations: BTreeMap<Species, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentRecord>>,
}

/// Life cycle of a run. Also used as the clock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Aborted,
}

/// Written next to the trajectory so downstream consumers know what produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub case: String,
    pub regimen_id: String,
    pub seed: u64,
    pub seed_source: SeedSource,
    pub reproducible: bool,
    pub threads: usize,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub warning_count: usize,
    pub warnings: Vec<String>,
    pub records: usize,
    pub coarse_steps_completed: u64,
    pub final_time_h: f64,
}
