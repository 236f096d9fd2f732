use num::complex::Complex64;

use crate::constants::PhysicalConstants;

/// Grading of the stretched-coordinate PML.
///
/// The conductivity rises polynomially from the inner edge of the layer:
/// `sigma(l) = sigma_max * (l / d)^m` with
/// `sigma_max = -(m + 1) * ln(R) / (2 * eta_0 * d)`, where `d` is the layer
/// thickness and `R` the target reflection at normal incidence.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmlParameters {
    pub grading_order: f64,
    pub ln_reflection: f64,
}

impl Default for PmlParameters {
    fn default() -> Self {
        Self {
            grading_order: 3.0,
            ln_reflection: -30.0,
        }
    }
}

/// Which difference stencil the factors are for.
///
/// Forward differences live on the half-integer cell faces, so their depths
/// are offset by half a cell compared to the backward ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilSide {
    Forward,
    Backward,
}

/// Layer description along a single axis.
#[derive(Clone, Copy, Debug)]
pub struct PmlAxis {
    /// Number of cells on the axis.
    pub cells: usize,
    /// PML thickness in cells (on each side).
    pub thickness: usize,
    /// Cell size in units of the length scale.
    pub spacing: f64,
}

impl PmlParameters {
    fn conductivity(&self, depth: f64, thickness: f64, impedance: f64) -> f64 {
        let m = self.grading_order;
        let sigma_max = -(m + 1.0) * self.ln_reflection / (2.0 * impedance * thickness);
        sigma_max * (depth / thickness).powf(m)
    }

    /// Complex stretch factors `s_w` for every cell of `axis`.
    ///
    /// Cells outside of the layer get exactly 1.
    pub fn stretch_factors(
        &self,
        axis: &PmlAxis,
        side: StencilSide,
        omega: f64,
        length_scale: f64,
        constants: &PhysicalConstants,
    ) -> Vec<Complex64> {
        let n = axis.cells;
        let npml = axis.thickness;

        if npml == 0 {
            return vec![Complex64::new(1.0, 0.0); n];
        }

        let thickness = npml as f64 * axis.spacing;
        let impedance = constants.vacuum_impedance();
        let scale = omega * constants.vacuum_permittivity * length_scale;

        let offset = match side {
            StencilSide::Forward => 0.5,
            StencilSide::Backward => 1.0,
        };

        (0..n)
            .map(|i| {
                let depth = if i <= npml {
                    Some(npml as f64 - i as f64 + offset)
                }
                else if i > n.saturating_sub(npml) {
                    Some(i as f64 - (n - npml) as f64 - offset)
                }
                else {
                    None
                };

                depth.map_or(Complex64::new(1.0, 0.0), |depth| {
                    let sigma = self.conductivity(depth * axis.spacing, thickness, impedance);
                    Complex64::new(1.0, -sigma / scale)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use num::complex::Complex64;

    use crate::{
        constants::{
            DEFAULT_LENGTH_SCALE,
            OMEGA_1550,
            PhysicalConstants,
        },
        pml::{
            PmlAxis,
            PmlParameters,
            StencilSide,
        },
    };

    fn factors(axis: PmlAxis, side: StencilSide) -> Vec<Complex64> {
        PmlParameters::default().stretch_factors(
            &axis,
            side,
            2.0 * OMEGA_1550,
            DEFAULT_LENGTH_SCALE,
            &PhysicalConstants::SI,
        )
    }

    #[test]
    fn it_is_identity_without_pml() {
        let axis = PmlAxis {
            cells: 32,
            thickness: 0,
            spacing: 0.05,
        };
        for side in [StencilSide::Forward, StencilSide::Backward] {
            assert!(
                factors(axis, side)
                    .iter()
                    .all(|s| *s == Complex64::new(1.0, 0.0))
            );
        }
    }

    #[test]
    fn it_only_stretches_inside_the_layer() {
        let axis = PmlAxis {
            cells: 40,
            thickness: 8,
            spacing: 0.05,
        };
        let forward = factors(axis, StencilSide::Forward);

        for (i, s) in forward.iter().enumerate() {
            assert_eq!(s.re, 1.0);
            if i <= 8 || i > 32 {
                assert!(s.im < 0.0, "cell {i} should be absorbing: {s}");
            }
            else {
                assert_eq!(s.im, 0.0, "cell {i} should be untouched: {s}");
            }
        }
    }

    #[test]
    fn it_grades_towards_the_boundary() {
        let axis = PmlAxis {
            cells: 40,
            thickness: 8,
            spacing: 0.05,
        };
        let forward = factors(axis, StencilSide::Forward);
        for i in 0..8 {
            assert!(forward[i].im < forward[i + 1].im);
        }
        for i in 33..39 {
            assert!(forward[i].im > forward[i + 1].im);
        }
    }

    #[test]
    fn it_matches_the_closed_form_profile() {
        let axis = PmlAxis {
            cells: 20,
            thickness: 4,
            spacing: 0.1,
        };
        let omega = 2.0 * OMEGA_1550;
        let constants = PhysicalConstants::SI;
        let backward = factors(axis, StencilSide::Backward);

        // backward depth at cell 1 is 4 - 1 + 1 = 4 cells, i.e. the full layer
        let d = 0.4;
        let sigma_max = 4.0 * 30.0 / (2.0 * constants.vacuum_impedance() * d);
        let expected = sigma_max / (omega * constants.vacuum_permittivity * DEFAULT_LENGTH_SCALE);
        assert_relative_eq!(-backward[1].im, expected, max_relative = 1e-12);
    }
}
