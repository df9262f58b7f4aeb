//! Intracellular signaling kinetics.
//!
//! Each agent carries two receptor-activity style variables in [0, 1]. They
//! relax toward a ligand-dependent steady state and are integrated exactly,
//! so any coarse step keeps them bounded.

use msabm_common::{MacrophageParamsConfig, Species, TumorParamsConfig};

/// Tumor: IGF1R activity.
pub const IGF1R_ACTIVITY: usize = 0;
/// Tumor: TNF-driven death signal.
pub const DEATH_SIGNAL: usize = 1;
/// Macrophage: CSF1R activity.
pub const CSF1R_ACTIVITY: usize = 0;
/// Macrophage: inflammatory (TNF) drive.
pub const INFLAMMATORY_DRIVE: usize = 1;

/// Hill activation `c^n / (K^n + c^n)`.
#[inline]
pub fn hill(concentration: f64, half_max: f64, n: f64) -> f64 {
    if concentration <= 0.0 {
        return 0.0;
    }
    let cn = concentration.powf(n);
    cn / (half_max.powf(n) + cn)
}

/// Fractional receptor block by an inhibitor, `d / (d + IC50)`.
#[inline]
pub fn block(inhibitor: f64, ic50: f64) -> f64 {
    if inhibitor <= 0.0 {
        return 0.0;
    }
    inhibitor / (inhibitor + ic50)
}

/// Exact solution of `x' = on (1 - x) - off x` over `dt`.
#[inline]
pub fn relax(x: f64, on: f64, off: f64, dt: f64) -> f64 {
    let total = on + off;
    if total <= 0.0 {
        return x;
    }
    let steady = on / total;
    (steady + (x - steady) * (-total * dt).exp()).clamp(0.0, 1.0)
}

/// Locally sensed concentrations, indexed by [`Species::index`].
pub type Concentrations = [f64; Species::COUNT];

pub fn step_tumor(signaling: &mut [f64; 2], c: &Concentrations, p: &TumorParamsConfig, dt: f64) {
    let igf1 = c[Species::Igf1.index()];
    let drug = c[Species::Igf1rInhibitor.index()];
    let tnf = c[Species::Tnf.index()];

    let on_igf1r = p.igf1_k_on_per_h
        * hill(igf1, p.igf1_half_max, p.hill_coefficient)
        * (1.0 - block(drug, p.igf1r_inhibitor_ic50));
    signaling[IGF1R_ACTIVITY] = relax(signaling[IGF1R_ACTIVITY], on_igf1r, p.igf1r_k_off_per_h, dt);

    let on_death = p.tnf_k_on_per_h * hill(tnf, p.tnf_half_max, p.hill_coefficient);
    signaling[DEATH_SIGNAL] = relax(signaling[DEATH_SIGNAL], on_death, p.death_signal_k_off_per_h, dt);
}

pub fn step_macrophage(signaling: &mut [f64; 2], c: &Concentrations, p: &MacrophageParamsConfig, dt: f64) {
    let csf1 = c[Species::Csf1.index()];
    let drug = c[Species::Csf1rInhibitor.index()];
    let tnf = c[Species::Tnf.index()];

    let on_csf1r = p.csf1_k_on_per_h
        * hill(csf1, p.csf1_half_max, p.hill_coefficient)
        * (1.0 - block(drug, p.csf1r_inhibitor_ic50));
    signaling[CSF1R_ACTIVITY] = relax(signaling[CSF1R_ACTIVITY], on_csf1r, p.csf1r_k_off_per_h, dt);

    let on_drive = p.tnf_k_on_per_h * hill(tnf, p.tnf_half_max, p.hill_coefficient);
    signaling[INFLAMMATORY_DRIVE] = relax(signaling[INFLAMMATORY_DRIVE], on_drive, p.drive_k_off_per_h, dt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hill_is_half_at_half_max() {
        assert!((hill(0.5, 0.5, 2.0) - 0.5).abs() < 1e-12);
        assert_eq!(hill(0.0, 0.5, 2.0), 0.0);
        assert!(hill(100.0, 0.5, 2.0) > 0.99);
    }

    #[test]
    fn relax_is_bounded_for_any_step() {
        for dt in [1e-3, 0.5, 10.0, 1e6] {
            let x = relax(0.2, 5.0, 0.1, dt);
            assert!((0.0..=1.0).contains(&x));
        }
        assert!((relax(0.0, 1.0, 1.0, 1e6) - 0.5).abs() < 1e-12);
        assert_eq!(relax(0.3, 0.0, 0.0, 1.0), 0.3);
    }

    #[test]
    fn csf1r_inhibitor_suppresses_csf1r_activity() {
        let p = MacrophageParamsConfig::default();
        let mut c = [0.0; Species::COUNT];
        c[Species::Csf1.index()] = 1.0;

        let mut untreated = [0.0, 0.0];
        let mut treated = [0.0, 0.0];
        for _ in 0..50 {
            step_macrophage(&mut untreated, &c, &p, 0.5);
        }
        c[Species::Csf1rInhibitor.index()] = 2.0;
        for _ in 0..50 {
            step_macrophage(&mut treated, &c, &p, 0.5);
        }
        assert!(treated[CSF1R_ACTIVITY] < 0.5 * untreated[CSF1R_ACTIVITY]);
    }

    #[test]
    fn tnf_raises_tumor_death_signal() {
        let p = TumorParamsConfig::default();
        let mut c = [0.0; Species::COUNT];
        let mut s = [0.0, 0.0];
        step_tumor(&mut s, &c, &p, 1.0);
        assert_eq!(s[DEATH_SIGNAL], 0.0);
        c[Species::Tnf.index()] = 5.0;
        step_tumor(&mut s, &c, &p, 1.0);
        assert!(s[DEATH_SIGNAL] > 0.0);
        assert_eq!(s[IGF1R_ACTIVITY], 0.0);
    }
}
