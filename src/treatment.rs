//! Drug regimens and their conversion to injection terms.
//!
//! A regimen maps (drug, time, location) to a target concentration. Injection
//! relaxes the local concentration toward that target at a first-order rate,
//! which is the delivery model used for the CSF1R and IGF1R inhibitors.

use msabm_common::{DeliveryConfig, DrugCourseConfig, DrugTargetConfig, PhaseConfig, RegimenConfig, Species, TreatmentConfig, Vec2};
use std::fmt;
use std::sync::Arc;

/// Hours in one week.
pub const WEEK_H: f64 = 168.0;

/// Pluggable time/location to target mapping.
pub trait TargetSchedule: Send + Sync + fmt::Debug {
    /// Identifier written to run metadata.
    fn id(&self) -> String;

    /// Target concentration of `drug` at (`time_h`, `pos`), or `None` when nothing is delivered.
    fn target(&self, drug: Species, time_h: f64, pos: Vec2) -> Option<f64>;

    /// First-order delivery rate (1/h) used while a target exists.
    fn delivery_rate(&self, drug: Species) -> f64;
}

/// One drug held at a fixed target between `start_h` and `stop_h`.
#[derive(Debug, Clone, PartialEq)]
pub struct DrugCourse {
    pub drug: Species,
    pub target: f64,
    pub start_h: f64,
    pub stop_h: Option<f64>,
    pub delivery_rate_per_h: f64,
}

impl DrugCourse {
    pub fn is_active(&self, time_h: f64) -> bool {
        time_h >= self.start_h && self.stop_h.map_or(true, |stop| time_h < stop)
    }
}

impl From<&DrugCourseConfig> for DrugCourse {
    fn from(c: &DrugCourseConfig) -> Self {
        DrugCourse {
            drug: c.drug,
            target: c.target,
            start_h: c.start_h,
            stop_h: c.stop_h,
            delivery_rate_per_h: c.delivery_rate_per_h,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub from_h: f64,
    pub targets: Vec<(Species, f64)>,
}

/// Ordered phases; each phase replaces the whole target set from its start time on.
#[derive(Debug, Clone, PartialEq)]
pub struct Piecewise {
    pub id: String,
    pub delivery_rate_per_h: f64,
    pub phases: Vec<Phase>,
}

impl Piecewise {
    pub fn from_config(id: &str, delivery_rate_per_h: f64, phases: &[PhaseConfig]) -> Self {
        Piecewise {
            id: id.to_string(),
            delivery_rate_per_h,
            phases: phases
                .iter()
                .map(|p| Phase {
                    from_h: p.from_h,
                    targets: p.targets.iter().map(|t| (t.drug, t.target)).collect(),
                })
                .collect(),
        }
    }

    /// CSF1R inhibitor from `start_h`, replaced by the IGF1R inhibitor after `first_weeks`.
    pub fn switch(target: f64, start_h: f64, first_weeks: f64, delivery_rate_per_h: f64) -> Self {
        let switch_at = start_h + first_weeks * WEEK_H;
        Piecewise {
            id: format!("switch:csf1r_inhibitor->igf1r_inhibitor@{switch_at}h"),
            delivery_rate_per_h,
            phases: vec![
                Phase { from_h: start_h, targets: vec![(Species::Csf1rInhibitor, target)] },
                Phase { from_h: switch_at, targets: vec![(Species::Igf1rInhibitor, target)] },
            ],
        }
    }

    /// CSF1R inhibitor from `start_h`, with the IGF1R inhibitor added after `first_weeks`.
    pub fn add(target: f64, start_h: f64, first_weeks: f64, delivery_rate_per_h: f64) -> Self {
        let add_at = start_h + first_weeks * WEEK_H;
        Piecewise {
            id: format!("add:csf1r_inhibitor+igf1r_inhibitor@{add_at}h"),
            delivery_rate_per_h,
            phases: vec![
                Phase { from_h: start_h, targets: vec![(Species::Csf1rInhibitor, target)] },
                Phase {
                    from_h: add_at,
                    targets: vec![(Species::Csf1rInhibitor, target), (Species::Igf1rInhibitor, target)],
                },
            ],
        }
    }

    /// Serializable form, for writing a built schedule back into a config.
    pub fn to_config(&self) -> RegimenConfig {
        RegimenConfig::Piecewise {
            id: self.id.clone(),
            delivery_rate_per_h: self.delivery_rate_per_h,
            phases: self
                .phases
                .iter()
                .map(|p| PhaseConfig {
                    from_h: p.from_h,
                    targets: p.targets.iter().map(|&(drug, target)| DrugTargetConfig { drug, target }).collect(),
                })
                .collect(),
        }
    }

    fn phase_at(&self, time_h: f64) -> Option<&Phase> {
        self.phases.iter().rev().find(|p| time_h >= p.from_h)
    }
}

impl TargetSchedule for Piecewise {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn target(&self, drug: Species, time_h: f64, _pos: Vec2) -> Option<f64> {
        self.phase_at(time_h)?
            .targets
            .iter()
            .find(|(d, _)| *d == drug)
            .map(|(_, t)| *t)
    }

    fn delivery_rate(&self, _drug: Species) -> f64 {
        self.delivery_rate_per_h
    }
}

#[derive(Debug, Clone)]
pub enum Regimen {
    None,
    ContinuousSingle(DrugCourse),
    ContinuousCombination(Vec<DrugCourse>),
    Custom(Arc<dyn TargetSchedule>),
}

impl Regimen {
    pub fn from_config(config: &RegimenConfig) -> Self {
        match config {
            RegimenConfig::None => Regimen::None,
            RegimenConfig::ContinuousSingle(course) => Regimen::ContinuousSingle(course.into()),
            RegimenConfig::ContinuousCombination { courses } => {
                Regimen::ContinuousCombination(courses.iter().map(DrugCourse::from).collect())
            }
            RegimenConfig::Piecewise { id, delivery_rate_per_h, phases } => {
                Regimen::Custom(Arc::new(Piecewise::from_config(id, *delivery_rate_per_h, phases)))
            }
        }
    }

    pub fn id(&self) -> String {
        match self {
            Regimen::None => "none".to_string(),
            Regimen::ContinuousSingle(c) => format!("continuous_single:{}@{}", c.drug, c.target),
            Regimen::ContinuousCombination(courses) => {
                let drugs: Vec<String> = courses.iter().map(|c| format!("{}@{}", c.drug, c.target)).collect();
                format!("continuous_combination:{}", drugs.join("+"))
            }
            Regimen::Custom(schedule) => schedule.id(),
        }
    }

    fn course_for(courses: &[DrugCourse], drug: Species, time_h: f64) -> Option<(f64, f64)> {
        courses
            .iter()
            .find(|c| c.drug == drug && c.is_active(time_h))
            .map(|c| (c.target, c.delivery_rate_per_h))
    }

    /// (target, rate) for `drug`, ignoring the delivery pattern.
    fn injection(&self, drug: Species, time_h: f64, pos: Vec2) -> Option<(f64, f64)> {
        match self {
            Regimen::None => None,
            Regimen::ContinuousSingle(course) => {
                Regimen::course_for(std::slice::from_ref(course), drug, time_h)
            }
            Regimen::ContinuousCombination(courses) => Regimen::course_for(courses, drug, time_h),
            Regimen::Custom(schedule) => schedule
                .target(drug, time_h, pos)
                .map(|t| (t, schedule.delivery_rate(drug))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delivery {
    Uniform,
    Disc { center: Vec2, radius: f64 },
}

impl Delivery {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        match config {
            DeliveryConfig::Uniform => Delivery::Uniform,
            DeliveryConfig::Disc { center, radius_um } => Delivery::Disc {
                center: Vec2::new(center[0], center[1]),
                radius: *radius_um,
            },
        }
    }

    pub fn covers(&self, pos: Vec2) -> bool {
        match self {
            Delivery::Uniform => true,
            Delivery::Disc { center, radius } => pos.distance_squared(*center) <= radius * radius,
        }
    }
}

/// Converts the active regimen into per-location injection terms.
#[derive(Debug, Clone)]
pub struct TreatmentScheduler {
    regimen: Regimen,
    delivery: Delivery,
}

impl TreatmentScheduler {
    pub fn new(regimen: Regimen, delivery: Delivery) -> Self {
        TreatmentScheduler { regimen, delivery }
    }

    pub fn from_config(config: &TreatmentConfig) -> Self {
        TreatmentScheduler::new(Regimen::from_config(&config.regimen), Delivery::from_config(&config.delivery))
    }

    pub fn regimen(&self) -> &Regimen {
        &self.regimen
    }

    pub fn id(&self) -> String {
        self.regimen.id()
    }

    /// Target concentration and delivery rate for `drug` at (`time_h`, `pos`).
    pub fn injection(&self, drug: Species, time_h: f64, pos: Vec2) -> Option<(f64, f64)> {
        if !drug.is_drug() || !self.delivery.covers(pos) {
            return None;
        }
        self.regimen.injection(drug, time_h, pos)
    }

    /// `k * (T - c)` when a target exists, else zero.
    pub fn injection_rate(&self, drug: Species, time_h: f64, pos: Vec2, concentration: f64) -> f64 {
        self.injection(drug, time_h, pos)
            .map_or(0.0, |(target, rate)| rate * (target - concentration))
    }
}

/// Exact solution of `dc/dt = k (T - c)` over `dt`.
#[inline]
pub fn relax_toward(concentration: f64, target: f64, rate: f64, dt: f64) -> f64 {
    target + (concentration - target) * (-rate * dt).exp()
}
