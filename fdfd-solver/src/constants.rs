use std::fmt::Debug;

/// Length unit the grid spacing is measured in (1 µm).
pub const DEFAULT_LENGTH_SCALE: f64 = 1e-6;

/// Relative permittivity of silicon at telecom wavelengths (n = 3.48).
pub const SILICON_PERMITTIVITY: f64 = 3.48 * 3.48;

/// Angular frequency of 1550 nm light in SI units.
pub const OMEGA_1550: f64 = 1.215259075682406e15;

/// Default device size (cells per side) of generated datasets.
pub const DEFAULT_DEVICE_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicalConstants {
    pub vacuum_permittivity: f64,
    pub vacuum_permeability: f64,
}

impl Debug for PhysicalConstants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConstants")
            .field("vacuum_permittivity", &self.vacuum_permittivity)
            .field("vacuum_permeability", &self.vacuum_permeability)
            .field("speed_of_light", &self.speed_of_light())
            .finish()
    }
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self::SI
    }
}

impl PhysicalConstants {
    pub const SI: Self = Self {
        vacuum_permittivity: 8.8541878188e-12,
        vacuum_permeability: 1.25663706127e-6,
    };

    pub fn speed_of_light(&self) -> f64 {
        (self.vacuum_permittivity * self.vacuum_permeability).powf(-0.5)
    }

    /// Wave impedance of free space (eta_0)
    pub fn vacuum_impedance(&self) -> f64 {
        (self.vacuum_permeability / self.vacuum_permittivity).sqrt()
    }

    pub fn wavelength_to_angular_frequency(&self, wavelength: f64) -> f64 {
        2.0 * std::f64::consts::PI * self.speed_of_light() / wavelength
    }

    pub fn angular_frequency_to_wavelength(&self, omega: f64) -> f64 {
        2.0 * std::f64::consts::PI * self.speed_of_light() / omega
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::constants::{
        OMEGA_1550,
        PhysicalConstants,
    };

    #[test]
    fn it_matches_the_1550nm_frequency() {
        let omega = PhysicalConstants::SI.wavelength_to_angular_frequency(1.55e-6);
        assert_relative_eq!(omega, OMEGA_1550, max_relative = 1e-9);
        assert_relative_eq!(
            PhysicalConstants::SI.angular_frequency_to_wavelength(omega),
            1.55e-6,
            max_relative = 1e-12
        );
    }

    #[test]
    fn it_computes_the_vacuum_impedance() {
        assert_relative_eq!(
            PhysicalConstants::SI.vacuum_impedance(),
            376.730313,
            max_relative = 1e-6
        );
    }
}
