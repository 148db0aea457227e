// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::ops::Range;

type LeafFn<T, E> = Box<dyn Fn(usize) -> Result<T, E> + Send + Sync>;
type CombineFn<T> = Box<dyn Fn(T, T) -> T + Send + Sync>;

/// User-provided functions of a map-reduce invocation.
pub(crate) struct MapReduce<T, E> {
    leaf: LeafFn<T, E>,
    combine: CombineFn<T>,
}

impl<T, E> MapReduce<T, E> {
    pub(crate) fn new(
        leaf: impl Fn(usize) -> Result<T, E> + Send + Sync + 'static,
        combine: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            leaf: Box::new(leaf),
            combine: Box::new(combine),
        }
    }

    /// Folds the leaf function over the given indices from left to right.
    ///
    /// Returns `None` for an empty range, and the failing index along with its
    /// error if the leaf function fails.
    pub(crate) fn fold(&self, range: Range<usize>) -> Result<Option<T>, (usize, E)> {
        let mut accumulator = None;
        for index in range {
            let value = (self.leaf)(index).map_err(|error| (index, error))?;
            accumulator = Some(match accumulator {
                None => value,
                Some(accumulator) => (self.combine)(accumulator, value),
            });
        }
        Ok(accumulator)
    }

    /// Combines two adjacent results, `left` covering lower indices.
    pub(crate) fn combine(&self, left: T, right: T) -> T {
        (self.combine)(left, right)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fold_left_to_right() {
        let map = MapReduce::new(
            |i| Ok::<_, ()>(vec![i]),
            |mut a: Vec<usize>, b| {
                a.extend(b);
                a
            },
        );
        assert_eq!(map.fold(3..7), Ok(Some(vec![3, 4, 5, 6])));
        assert_eq!(map.fold(5..5), Ok(None));
        assert_eq!(map.combine(vec![1], vec![2]), vec![1, 2]);
    }

    #[test]
    fn fold_stops_at_first_failure() {
        let map = MapReduce::new(
            |i| if i % 4 == 3 { Err(i) } else { Ok(i) },
            |a, b| a + b,
        );
        assert_eq!(map.fold(0..3), Ok(Some(3)));
        assert_eq!(map.fold(0..10), Err((3, 3)));
    }
}
