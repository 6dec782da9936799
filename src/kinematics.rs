//! Derived kinematic observables.
//!
//! All functions here are pure: they take lab-frame four-momenta in MeV
//! and return GeV-scale scalars. Degenerate four-momenta (zero parent
//! energy) must be rejected by the caller before these are invoked; see
//! [`Reweighter`](crate::reweight::Reweighter).

use crate::utils::vectors::Vec4;

/// The momentum-transfer squared $`q^2 = (p_B - p_{D^*})^2`$ in GeV².
///
/// This is the invariant mass-squared of the difference four-vector, so
/// no boost is required; it can be computed directly in the lab frame.
pub fn momentum_transfer_squared(parent: &Vec4, resonance: &Vec4) -> f64 {
    (parent - resonance).m2() / 1e6
}

/// The charged-lepton energy in the parent's rest frame, in GeV.
///
/// The lepton is boosted by the negative of the parent's lab-frame
/// velocity; the parent four-momentum itself is never modified.
pub fn lepton_rest_frame_energy(parent: &Vec4, lepton: &Vec4) -> f64 {
    lepton.boost(&-parent.beta()).e() / 1e3
}

/// The invariant mass-squared of a summed system of four-momenta in
/// GeV², typically the undetectable neutrino subsystem.
pub fn invisible_mass_squared(momenta: &[Vec4]) -> f64 {
    momenta.iter().sum::<Vec4>().m2() / 1e6
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::utils::vectors::Vec3;

    #[test]
    fn test_q2_parent_at_rest() {
        // B0 at rest, D* along z: q2 follows by direct algebra.
        let b = Vec4::new(0.0, 0.0, 0.0, 5279.0);
        let dst = Vec4::new(0.0, 0.0, 1000.0, 2240.0);
        let q = b - dst;
        let expected = (q.e * q.e - 1000.0 * 1000.0) / 1e6;
        assert_relative_eq!(momentum_transfer_squared(&b, &dst), expected);
        assert_relative_eq!(momentum_transfer_squared(&b, &dst), 8.235521);
    }

    #[test]
    fn test_el_with_parent_at_rest() {
        // Zero boost velocity: the lab-frame energy passes through,
        // scaled to GeV.
        let b = Vec4::new(0.0, 0.0, 0.0, 5279.0);
        let mu = Vec4::new(300.0, -200.0, 150.0, 1500.0);
        assert_relative_eq!(lepton_rest_frame_energy(&b, &mu), 1.5);
    }

    #[test]
    fn test_el_boost_does_not_touch_parent() {
        let b = Vec4::new(500.0, 0.0, 0.0, 5300.0);
        let b_before = b;
        let mu = Vec4::new(300.0, -200.0, 150.0, 1500.0);
        let _ = lepton_rest_frame_energy(&b, &mu);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_el_matches_manual_boost() {
        let b = Vec4::new(500.0, -250.0, 1250.0, 5400.0);
        let mu = Vec4::new(300.0, -200.0, 150.0, 1500.0);
        let beta = Vec3::new(500.0 / 5400.0, -250.0 / 5400.0, 1250.0 / 5400.0);
        let manual = mu.boost(&-beta).e() / 1e3;
        assert_relative_eq!(lepton_rest_frame_energy(&b, &mu), manual);
    }

    #[test]
    fn test_mm2_permutation_invariant() {
        let a = Vec4::new(100.0, 0.0, 250.0, 900.0);
        let b = Vec4::new(-50.0, 75.0, 0.0, 450.0);
        let c = Vec4::new(0.0, -125.0, 300.0, 600.0);
        let reference = invisible_mass_squared(&[a, b, c]);
        assert_relative_eq!(invisible_mass_squared(&[c, a, b]), reference);
        assert_relative_eq!(invisible_mass_squared(&[b, c, a]), reference);
    }

    #[test]
    fn test_q2_difference_is_frame_independent_of_order() {
        // (p - r)^2 is fixed by the two inputs; swapping them flips the
        // difference vector's sign but not its invariant square.
        let b = Vec4::new(120.0, -40.0, 2000.0, 5600.0);
        let dst = Vec4::new(80.0, 10.0, 1500.0, 2600.0);
        assert_relative_eq!(
            momentum_transfer_squared(&b, &dst),
            momentum_transfer_squared(&dst, &b)
        );
    }

    #[test]
    fn test_mm2_single_neutrino_is_scaled_mass() {
        let nu = Vec4::new(100.0, 200.0, 50.0, 400.0);
        assert_relative_eq!(invisible_mass_squared(&[nu]), nu.m2() / 1e6);
    }
}
