//! Predefined experiment cases applied on top of a base configuration.

use crate::error::SimError;
use crate::treatment::Piecewise;
use clap::ValueEnum;
use log::info;
use msabm_common::{AgentKind, DrugCourseConfig, RegimenConfig, SimulationConfig, Species};
use std::path::PathBuf;

pub const DEFAULT_DRUG_TARGET: f64 = 1.0;
pub const DEFAULT_DELIVERY_RATE_PER_H: f64 = 2.0;
/// Weeks on the CSF1R inhibitor alone before the second drug comes in.
pub const SWITCH_AFTER_WEEKS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Case {
    /// Tumor cells only, no macrophages, no drug.
    TumorGrowthOnly,
    /// Tumor and macrophages, no drug.
    NoTreatment,
    /// CSF1R inhibitor held at a constant target.
    ContinuousSingleDrug,
    /// CSF1R and IGF1R inhibitors together.
    ContinuousCombination,
    /// CSF1R inhibitor, then the IGF1R inhibitor in its place.
    Switch,
    /// CSF1R inhibitor, then both inhibitors together.
    Add,
    /// Initial agents read from a spatial-transcriptomics table.
    StDerived,
}

/// Command-line regimen and input overrides.
#[derive(Debug, Clone, Default)]
pub struct CaseOverrides {
    pub drug_target: Option<f64>,
    pub drug_start_h: Option<f64>,
    pub st_csv: Option<PathBuf>,
}

impl Case {
    pub const ALL: [Case; 7] = [
        Case::TumorGrowthOnly,
        Case::NoTreatment,
        Case::ContinuousSingleDrug,
        Case::ContinuousCombination,
        Case::Switch,
        Case::Add,
        Case::StDerived,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Case::TumorGrowthOnly => "tumor-growth-only",
            Case::NoTreatment => "no-treatment",
            Case::ContinuousSingleDrug => "continuous-single-drug",
            Case::ContinuousCombination => "continuous-combination",
            Case::Switch => "switch",
            Case::Add => "add",
            Case::StDerived => "st-derived",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Case::TumorGrowthOnly => "tumor cells only; macrophages removed, no treatment",
            Case::NoTreatment => "tumor and macrophages, untreated",
            Case::ContinuousSingleDrug => "continuous CSF1R inhibitor",
            Case::ContinuousCombination => "continuous CSF1R and IGF1R inhibitors",
            Case::Switch => "CSF1R inhibitor for 4 weeks, then IGF1R inhibitor",
            Case::Add => "CSF1R inhibitor for 4 weeks, then CSF1R and IGF1R inhibitors",
            Case::StDerived => "initial agents from a spatial-transcriptomics CSV, untreated",
        }
    }

    /// Rewrites `config` for this case and re-validates it.
    pub fn apply(self, config: &mut SimulationConfig, overrides: &CaseOverrides) -> Result<(), SimError> {
        let target = overrides.drug_target.unwrap_or(DEFAULT_DRUG_TARGET);
        let start_h = overrides.drug_start_h.unwrap_or(0.0);
        let course = |drug: Species| DrugCourseConfig {
            drug,
            target,
            start_h,
            stop_h: None,
            delivery_rate_per_h: DEFAULT_DELIVERY_RATE_PER_H,
        };

        if let Some(path) = &overrides.st_csv {
            config.initial.st_csv = Some(path.clone());
        }

        config.treatment.regimen = match self {
            Case::TumorGrowthOnly => {
                config.initial.populations.retain(|p| p.phenotype.kind() == AgentKind::Tumor);
                config.initial.agents.retain(|a| a.phenotype.kind() == AgentKind::Tumor);
                config.initial.st_csv = None;
                RegimenConfig::None
            }
            Case::NoTreatment => RegimenConfig::None,
            Case::ContinuousSingleDrug => RegimenConfig::ContinuousSingle(course(Species::Csf1rInhibitor)),
            Case::ContinuousCombination => RegimenConfig::ContinuousCombination {
                courses: vec![course(Species::Csf1rInhibitor), course(Species::Igf1rInhibitor)],
            },
            Case::Switch => {
                Piecewise::switch(target, start_h, SWITCH_AFTER_WEEKS, DEFAULT_DELIVERY_RATE_PER_H).to_config()
            }
            Case::Add => Piecewise::add(target, start_h, SWITCH_AFTER_WEEKS, DEFAULT_DELIVERY_RATE_PER_H).to_config(),
            Case::StDerived => {
                if config.initial.st_csv.is_none() {
                    return Err(SimError::Config(msabm_common::ConfigError::invalid(
                        "initial.st_csv",
                        "the st-derived case needs a spatial-transcriptomics table (--st-csv)",
                    )));
                }
                config.initial.populations.clear();
                config.initial.agents.clear();
                RegimenConfig::None
            }
        };

        config.validate()?;
        info!("Applied case '{}': {}.", self.name(), self.description());
        Ok(())
    }
}

impl std::fmt::Display for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treatment::{Regimen, TreatmentScheduler, WEEK_H};
    use msabm_common::{Phenotype, Placement, Polarization, PopulationConfig, TumorPhenotype, Vec2};

    fn mixed_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        for phenotype in [Phenotype::Tumor(TumorPhenotype::Proliferative), Phenotype::Macrophage(Polarization::M0)] {
            config.initial.populations.push(PopulationConfig {
                phenotype,
                count: 5,
                placement: Placement::Uniform,
                signaling: [0.0, 0.0],
            });
        }
        config
    }

    #[test]
    fn names_match_command_line_values() {
        for case in Case::ALL {
            let parsed = Case::from_str(case.name(), false).expect("parse");
            assert_eq!(parsed, case);
        }
    }

    #[test]
    fn tumor_growth_only_drops_macrophages() {
        let mut config = mixed_config();
        Case::TumorGrowthOnly.apply(&mut config, &CaseOverrides::default()).expect("apply");
        assert_eq!(config.initial.populations.len(), 1);
        assert_eq!(config.initial.populations[0].phenotype.kind(), AgentKind::Tumor);
        assert_eq!(config.treatment.regimen, RegimenConfig::None);
    }

    #[test]
    fn overrides_reach_the_regimen() {
        let mut config = mixed_config();
        let overrides = CaseOverrides { drug_target: Some(0.4), drug_start_h: Some(6.0), st_csv: None };
        Case::ContinuousSingleDrug.apply(&mut config, &overrides).expect("apply");
        let scheduler = TreatmentScheduler::from_config(&config.treatment);
        assert!(scheduler.injection(Species::Csf1rInhibitor, 5.0, Vec2::zero()).is_none());
        assert_eq!(
            scheduler.injection(Species::Csf1rInhibitor, 6.0, Vec2::zero()),
            Some((0.4, DEFAULT_DELIVERY_RATE_PER_H))
        );
    }

    #[test]
    fn switch_case_builds_piecewise_schedule() {
        let mut config = mixed_config();
        Case::Switch.apply(&mut config, &CaseOverrides::default()).expect("apply");
        let scheduler = TreatmentScheduler::from_config(&config.treatment);
        assert!(matches!(scheduler.regimen(), Regimen::Custom(_)));
        let later = SWITCH_AFTER_WEEKS * WEEK_H + 1.0;
        assert!(scheduler.injection(Species::Csf1rInhibitor, later, Vec2::zero()).is_none());
        assert!(scheduler.injection(Species::Igf1rInhibitor, later, Vec2::zero()).is_some());
    }

    #[test]
    fn add_case_keeps_first_drug_after_second_arrives() {
        let mut config = mixed_config();
        let overrides = CaseOverrides { drug_target: Some(0.8), drug_start_h: Some(2.0), st_csv: None };
        Case::Add.apply(&mut config, &overrides).expect("apply");
        let scheduler = TreatmentScheduler::from_config(&config.treatment);
        assert!(scheduler.id().starts_with("add:"));

        let add_at = 2.0 + SWITCH_AFTER_WEEKS * WEEK_H;
        let before = add_at - 1.0;
        assert_eq!(scheduler.injection(Species::Csf1rInhibitor, before, Vec2::zero()).map(|(t, _)| t), Some(0.8));
        assert!(scheduler.injection(Species::Igf1rInhibitor, before, Vec2::zero()).is_none());
        for drug in [Species::Csf1rInhibitor, Species::Igf1rInhibitor] {
            assert_eq!(scheduler.injection(drug, add_at, Vec2::zero()).map(|(t, _)| t), Some(0.8));
        }
        assert!(scheduler.injection(Species::Igf1rInhibitor, 1.0, Vec2::zero()).is_none());
    }

    #[test]
    fn st_derived_requires_table() {
        let mut config = mixed_config();
        let err = Case::StDerived.apply(&mut config, &CaseOverrides::default()).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("st_csv"));
    }
}
