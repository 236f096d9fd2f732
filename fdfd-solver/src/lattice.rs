use std::ops::{
    Bound,
    Index,
    IndexMut,
    Range,
    RangeBounds,
};

use nalgebra::{
    Point2,
    Vector2,
};

use crate::error::ConfigurationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const ALL: [Self; 2] = [Self::X, Self::Y];

    pub fn vector_index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }

    pub fn vector_component<'a, T>(&self, vector: &'a Vector2<T>) -> &'a T {
        &vector[self.vector_index()]
    }
}

/// Maps points of a 2D grid to indices of the flattened (row-major) buffer.
///
/// The first axis is the slow one, i.e. `index = x * ny + y`. This is the
/// flattening order of all operators, so a field vector returned by the linear
/// solver can be reinterpreted as a [`Lattice`] without any reordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strider {
    strides: Vector2<usize>,
    shape: Vector2<usize>,
}

impl Strider {
    pub fn new(shape: &Vector2<usize>) -> Self {
        Self {
            strides: Vector2::new(shape.y, 1),
            shape: *shape,
        }
    }

    pub fn point_unchecked(&self, index: usize) -> Point2<usize> {
        Point2::new(index / self.strides.x, index % self.strides.x)
    }

    pub fn point(&self, index: usize) -> Option<Point2<usize>> {
        (index < self.len()).then(|| self.point_unchecked(index))
    }

    pub fn index_unchecked(&self, point: &Point2<usize>) -> usize {
        point.coords.dot(&self.strides)
    }

    pub fn index(&self, point: &Point2<usize>) -> Option<usize> {
        self.is_inside(point).then(|| self.index_unchecked(point))
    }

    pub fn shape(&self) -> &Vector2<usize> {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.x * self.shape.y
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_inside(&self, point: &Point2<usize>) -> bool {
        point.x < self.shape.x && point.y < self.shape.y
    }

    pub fn iter(&self, range: impl RangeBounds<Point2<usize>>) -> StriderIter {
        StriderIter {
            points: iter_points(range, self.shape),
            strider: *self,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StriderIter {
    points: PointIter,
    strider: Strider,
}

impl Iterator for StriderIter {
    type Item = (usize, Point2<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.points.next()?;
        let index = self.strider.index_unchecked(&point);
        Some((index, point))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

impl ExactSizeIterator for StriderIter {}

pub fn normalize_point_bounds(
    range: impl RangeBounds<Point2<usize>>,
    shape: Vector2<usize>,
) -> Range<Point2<usize>> {
    let start = match range.start_bound() {
        Bound::Included(start) => *start,
        Bound::Excluded(start) => start + Vector2::repeat(1),
        Bound::Unbounded => Point2::origin(),
    };

    let end = match range.end_bound() {
        Bound::Included(end) => end + Vector2::repeat(1),
        Bound::Excluded(end) => *end,
        Bound::Unbounded => shape.into(),
    };

    let end = start
        .coords
        .zip_map(&end.coords, |x0, x1| x0.max(x1))
        .into();

    Range { start, end }
}

/// Iterates over all points in a rectangle, in flattening order (the last axis
/// is the fast one).
pub fn iter_points(range: impl RangeBounds<Point2<usize>>, shape: Vector2<usize>) -> PointIter {
    let Range { start, end } = normalize_point_bounds(range, shape);

    let empty = start.x == end.x || start.y == end.y;

    PointIter {
        x0: start.coords,
        x1: end.coords,
        x: (!empty).then_some(start.coords),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PointIter {
    x0: Vector2<usize>,
    x1: Vector2<usize>,
    x: Option<Vector2<usize>>,
}

impl Iterator for PointIter {
    type Item = Point2<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = |mut x_n: Vector2<usize>| {
            x_n.y += 1;
            if x_n.y >= self.x1.y {
                x_n.y = self.x0.y;
                x_n.x += 1;
                if x_n.x >= self.x1.x {
                    return None;
                }
            }
            Some(x_n)
        };

        let x = self.x?;
        self.x = next(x);
        Some(Point2::from(x))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.x.map_or(0, |x| {
            let width = self.x1.y - self.x0.y;
            (self.x1.x - x.x) * width - (x.y - self.x0.y)
        });
        (n, Some(n))
    }
}

impl ExactSizeIterator for PointIter {}

/// A 2D array stored in flattening order.
///
/// 1D grids are represented with a `y` extent of 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Lattice<T> {
    strider: Strider,
    data: Box<[T]>,
}

impl<T> Lattice<T> {
    pub fn from_fn(shape: Vector2<usize>, mut init: impl FnMut(Point2<usize>) -> T) -> Self {
        let strider = Strider::new(&shape);
        let data = (0..strider.len())
            .map(|index| init(strider.point_unchecked(index)))
            .collect();
        Self { strider, data }
    }

    pub fn from_vec(shape: Vector2<usize>, data: Vec<T>) -> Result<Self, ConfigurationError> {
        let strider = Strider::new(&shape);
        if data.len() != strider.len() {
            return Err(ConfigurationError::InvalidParameter {
                name: "lattice data",
                reason: format!(
                    "{} values don't fill a {}x{} grid",
                    data.len(),
                    shape.x,
                    shape.y
                ),
            });
        }
        Ok(Self {
            strider,
            data: data.into_boxed_slice(),
        })
    }

    pub fn from_rows<const M: usize, const N: usize>(rows: [[T; N]; M]) -> Self {
        let data = rows.into_iter().flatten().collect();
        Self {
            strider: Strider::new(&Vector2::new(M, N)),
            data,
        }
    }

    pub fn shape(&self) -> Vector2<usize> {
        self.strider.shape
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, point: &Point2<usize>) -> Option<&T> {
        let index = self.strider.index(point)?;
        Some(&self.data[index])
    }

    pub fn get_mut(&mut self, point: &Point2<usize>) -> Option<&mut T> {
        let index = self.strider.index(point)?;
        Some(&mut self.data[index])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Point2<usize>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(index, value)| (self.strider.point_unchecked(index), value))
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Lattice<U> {
        Lattice {
            strider: self.strider,
            data: self.data.iter().map(&mut f).collect(),
        }
    }

    pub fn ensure_shape(&self, expected: &Vector2<usize>) -> Result<(), ConfigurationError> {
        if self.shape() == *expected {
            Ok(())
        }
        else {
            Err(ConfigurationError::ShapeMismatch {
                expected: *expected,
                got: self.shape(),
            })
        }
    }
}

impl<T> Lattice<T>
where
    T: Clone,
{
    pub fn from_value(shape: Vector2<usize>, value: T) -> Self {
        Self::from_fn(shape, |_| value.clone())
    }

    /// Copies out the cells in `range`.
    pub fn window(&self, range: impl RangeBounds<Point2<usize>>) -> Self {
        let range = normalize_point_bounds(range, self.shape());
        let end = range.end.coords.zip_map(&self.shape(), |x, n| x.min(n));
        let shape = end.zip_map(&range.start.coords, |x1, x0| x1.saturating_sub(x0));
        Self::from_fn(shape, |point| self[range.start + point.coords].clone())
    }

    /// Writes `block` into this lattice with its origin at `offset`.
    pub fn embed(
        &mut self,
        offset: &Point2<usize>,
        block: &Lattice<T>,
    ) -> Result<(), ConfigurationError> {
        let end = offset + block.shape();
        if end.x > self.shape().x || end.y > self.shape().y {
            return Err(ConfigurationError::ShapeMismatch {
                expected: self.shape() - offset.coords.inf(&self.shape()),
                got: block.shape(),
            });
        }

        for (point, value) in block.iter() {
            self[offset + point.coords] = value.clone();
        }

        Ok(())
    }
}

impl<T> Index<usize> for Lattice<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<usize> for Lattice<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T> Index<Point2<usize>> for Lattice<T> {
    type Output = T;

    fn index(&self, point: Point2<usize>) -> &Self::Output {
        self.get(&point)
            .unwrap_or_else(|| panic!("point {point:?} outside of lattice {:?}", self.shape()))
    }
}

impl<T> IndexMut<Point2<usize>> for Lattice<T> {
    fn index_mut(&mut self, point: Point2<usize>) -> &mut Self::Output {
        let shape = self.shape();
        self.get_mut(&point)
            .unwrap_or_else(|| panic!("point {point:?} outside of lattice {shape:?}"))
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point2,
        Vector2,
    };

    use crate::lattice::{
        Lattice,
        Strider,
        iter_points,
    };

    #[test]
    fn it_iters_in_flattening_order() {
        let points = iter_points(Point2::new(1, 2)..Point2::new(3, 4), Vector2::new(4, 4))
            .collect::<Vec<_>>();
        assert_eq!(
            points,
            vec![
                Point2::new(1, 2),
                Point2::new(1, 3),
                Point2::new(2, 2),
                Point2::new(2, 3),
            ]
        );
    }

    #[test]
    fn it_iters_inclusive() {
        let iter = iter_points(Point2::new(0, 0)..=Point2::new(1, 2), Vector2::new(4, 4));
        assert_eq!(iter.len(), 6);
        assert_eq!(iter.last(), Some(Point2::new(1, 2)));
    }

    #[test]
    fn it_iters_nothing_for_empty_ranges() {
        let iter = iter_points(Point2::new(2, 0)..Point2::new(2, 3), Vector2::new(4, 4));
        assert_eq!(iter.len(), 0);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn it_flattens_row_major() {
        let strider = Strider::new(&Vector2::new(3, 5));
        assert_eq!(strider.index(&Point2::new(2, 1)), Some(11));
        assert_eq!(strider.point(11), Some(Point2::new(2, 1)));
        assert_eq!(strider.index(&Point2::new(3, 0)), None);
        assert_eq!(strider.point(15), None);

        for index in 0..strider.len() {
            let point = strider.point(index).unwrap();
            assert_eq!(strider.index(&point), Some(index));
        }
    }

    #[test]
    fn it_round_trips_through_the_flat_buffer() {
        let lattice = Lattice::from_fn(Vector2::new(4, 3), |p| 10 * p.x + p.y);
        let flat = lattice.clone().into_vec();
        let restored = Lattice::from_vec(lattice.shape(), flat).unwrap();
        assert_eq!(restored, lattice);
        assert_eq!(lattice[Point2::new(3, 2)], 32);
        assert_eq!(lattice[3 * 3 + 2], 32);
    }

    #[test]
    fn it_rejects_wrongly_sized_buffers() {
        assert!(Lattice::from_vec(Vector2::new(2, 2), vec![1.0; 5]).is_err());
    }

    #[test]
    fn it_embeds_and_clips_windows() {
        let mut grid = Lattice::from_value(Vector2::new(6, 6), 0);
        let block = Lattice::from_rows([[1, 2], [3, 4]]);
        grid.embed(&Point2::new(2, 3), &block).unwrap();

        assert_eq!(grid[Point2::new(2, 3)], 1);
        assert_eq!(grid[Point2::new(3, 4)], 4);
        assert_eq!(grid.window(Point2::new(2, 3)..Point2::new(4, 5)), block);

        assert!(grid.embed(&Point2::new(5, 5), &block).is_err());
    }
}
