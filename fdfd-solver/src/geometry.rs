use std::ops::Range;

use nalgebra::{
    Point2,
    Vector2,
};

use crate::{
    error::ConfigurationError,
    lattice::Axis,
};

/// Cell counts along one axis.
///
/// The axis is laid out as `pml | buffer | device | buffer | pml`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisPadding {
    pub device: usize,
    pub pml: usize,
    pub buffer: usize,
}

impl AxisPadding {
    pub fn new(device: usize, pml: usize, buffer: usize) -> Self {
        Self {
            device,
            pml,
            buffer,
        }
    }

    pub fn total(&self) -> usize {
        self.device + 2 * self.pml + 2 * self.buffer
    }

    /// First device cell.
    pub fn start(&self) -> usize {
        self.pml + self.buffer
    }

    /// One past the last device cell.
    pub fn end(&self) -> usize {
        self.start() + self.device
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridGeometry {
    pub x: AxisPadding,
    pub y: AxisPadding,
}

impl GridGeometry {
    pub fn new(x: AxisPadding, y: AxisPadding) -> Self {
        Self { x, y }
    }

    /// Square device with the same padding on both axes.
    pub fn symmetric(device: usize, pml: usize, buffer: usize) -> Self {
        let padding = AxisPadding::new(device, pml, buffer);
        Self::new(padding, padding)
    }

    /// A line along x. The y axis is a single cell without padding.
    pub fn one_dimensional(device: usize, pml: usize, buffer: usize) -> Self {
        Self::new(
            AxisPadding::new(device, pml, buffer),
            AxisPadding::new(1, 0, 0),
        )
    }

    pub fn axis(&self, axis: Axis) -> &AxisPadding {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn shape(&self) -> Vector2<usize> {
        Vector2::new(self.x.total(), self.y.total())
    }

    pub fn device_shape(&self) -> Vector2<usize> {
        Vector2::new(self.x.device, self.y.device)
    }

    pub fn pml(&self) -> Vector2<usize> {
        Vector2::new(self.x.pml, self.y.pml)
    }

    pub fn device_start(&self) -> Point2<usize> {
        Point2::new(self.x.start(), self.y.start())
    }

    pub fn device_window(&self) -> Range<Point2<usize>> {
        Range {
            start: self.device_start(),
            end: Point2::new(self.x.end(), self.y.end()),
        }
    }

    pub fn center(&self) -> Point2<usize> {
        let shape = self.shape();
        Point2::new(shape.x / 2, shape.y / 2)
    }

    pub fn to_global(&self, local: &Point2<usize>) -> Point2<usize> {
        local + self.device_start().coords
    }

    /// Returns `None` if `global` lies outside the device window.
    pub fn to_local(&self, global: &Point2<usize>) -> Option<Point2<usize>> {
        let window = self.device_window();
        let inside = global.x >= window.start.x
            && global.x < window.end.x
            && global.y >= window.start.y
            && global.y < window.end.y;
        inside.then(|| global - window.start.coords)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for axis in Axis::ALL {
            if self.axis(axis).total() == 0 {
                return Err(ConfigurationError::EmptyGrid { axis });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point2,
        Vector2,
    };

    use crate::{
        error::ConfigurationError,
        geometry::{
            AxisPadding,
            GridGeometry,
        },
        lattice::Axis,
    };

    #[test]
    fn it_pads_each_axis() {
        let padding = AxisPadding::new(64, 16, 16);
        assert_eq!(padding.total(), 128);
        assert_eq!(padding.start(), 32);
        assert_eq!(padding.end(), 96);

        for (device, pml, buffer) in [(0, 0, 1), (7, 3, 0), (10, 0, 4), (1, 1, 1)] {
            let padding = AxisPadding::new(device, pml, buffer);
            assert_eq!(padding.total(), device + 2 * pml + 2 * buffer);
            assert_eq!(padding.end() - padding.start(), device);
        }
    }

    #[test]
    fn it_maps_between_device_and_grid() {
        let geometry = GridGeometry::new(AxisPadding::new(10, 2, 3), AxisPadding::new(6, 0, 4));
        assert_eq!(geometry.shape(), Vector2::new(20, 14));
        assert_eq!(geometry.device_start(), Point2::new(5, 4));

        let global = geometry.to_global(&Point2::new(1, 2));
        assert_eq!(global, Point2::new(6, 6));
        assert_eq!(geometry.to_local(&global), Some(Point2::new(1, 2)));
        assert_eq!(geometry.to_local(&Point2::new(4, 6)), None);
        assert_eq!(geometry.to_local(&Point2::new(15, 6)), None);
    }

    #[test]
    fn it_builds_one_dimensional_grids() {
        let geometry = GridGeometry::one_dimensional(64, 0, 4);
        assert_eq!(geometry.shape(), Vector2::new(72, 1));
        assert_eq!(geometry.center(), Point2::new(36, 0));
        geometry.validate().unwrap();
    }

    #[test]
    fn it_rejects_empty_grids() {
        let geometry = GridGeometry::new(AxisPadding::new(4, 0, 0), AxisPadding::new(0, 0, 0));
        assert!(matches!(
            geometry.validate(),
            Err(ConfigurationError::EmptyGrid { axis: Axis::Y })
        ));
    }
}
