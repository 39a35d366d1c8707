//! Tensor operations the rendering pipeline needs beyond the backend's own.

pub mod random;

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

pub trait TensorExtension {
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self;

    fn sum_cumulative(
        self,
        dim: usize,
    ) -> Self;
}

impl<B: Backend, const D: usize> TensorExtension for Tensor<B, D> {
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than the tensor rank");

        let mut output = self.to_owned();

        let dims_step = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let mut running = Tensor::ones(dims_step, &self.device());
        let mut ranges_step = dims_step.map(|size| 0..size);

        for (index, step) in self.iter_dim(dim).enumerate() {
            ranges_step[dim] = index..index + 1;
            output =
                output.slice_assign(ranges_step.to_owned(), running.to_owned());
            running = running * step;
        }

        output
    }

    fn sum_cumulative(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than the tensor rank");

        let mut output = self.to_owned();

        let dims_step = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let mut running = Tensor::zeros(dims_step, &self.device());
        let mut ranges_step = dims_step.map(|size| 0..size);

        for (index, step) in self.iter_dim(dim).enumerate() {
            running = running + step;
            ranges_step[dim] = index..index + 1;
            output =
                output.slice_assign(ranges_step.to_owned(), running.to_owned());
        }

        output
    }
}

/// `count` values evenly spaced over `[start, end]`, endpoints exact.
pub fn linspace<B: Backend>(
    start: f32,
    end: f32,
    count: usize,
    device: &B::Device,
) -> Tensor<B, 1> {
    let values = match count {
        1 => vec![start],
        _ => (0..count)
            .map(|index| {
                let t = index as f32 / (count - 1) as f32;
                start * (1.0 - t) + end * t
            })
            .collect(),
    };

    Tensor::from_data(TensorData::new(values, [count]), device)
}

/// For each of `values` (`[R, N]`), the count of entries in the matching row
/// of `sorted` (`[R, M]`) that are less than or equal to it, i.e., the
/// insertion index a right-biased binary search would return.
///
/// Iterates over the `M` entries so no `[R, N, M]` intermediate is formed.
pub fn search_sorted_right<B: Backend>(
    sorted: Tensor<B, 2>,
    values: Tensor<B, 2>,
) -> Tensor<B, 2, Int> {
    let [row_count, _] = sorted.dims();
    let [value_row_count, value_count] = values.dims();
    assert_eq!(
        row_count, value_row_count,
        "sorted and values should have the same row count, \
        but got sorted.dims() = {:?} and values.dims() = {:?}",
        sorted.dims(),
        values.dims()
    );

    let mut counts = Tensor::zeros([row_count, value_count], &sorted.device());

    for entry in sorted.iter_dim(1) {
        let entry = entry.expand([row_count, value_count]);
        counts = counts + entry.lower_equal(values.to_owned()).int();
    }

    counts
}
