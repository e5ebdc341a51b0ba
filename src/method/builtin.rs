use anyhow::{anyhow, bail, ensure, Context};
use ndarray::{concatenate, Axis, IxDyn, Slice};

use crate::{
    method::{AggMethod, MethodError, Weight},
    tensor::NumericArray,
};

/// Checks that there is at least one input, all inputs share a shape and there is one weight per
/// input.
fn check_inputs(inputs: &[NumericArray], weights: Option<&[Weight]>) -> Result<(), MethodError> {
    let first = inputs
        .first()
        .ok_or_else(|| anyhow!("at least one input is required"))?;
    if let Some(input) = inputs.iter().find(|input| input.shape() != first.shape()) {
        bail!(
            "inputs of shapes {:?} and {:?} cannot be aggregated elementwise",
            first.shape(),
            input.shape()
        );
    }
    if let Some(weights) = weights {
        ensure!(
            weights.len() == inputs.len(),
            "expected {} weights but got {}",
            inputs.len(),
            weights.len()
        );
    }
    Ok(())
}

/// Gets the single gradient of an aggregation whose fused representation is a single tensor.
fn single_gradient<'a>(
    gradients: &'a [NumericArray],
    inputs: &[NumericArray],
    parties_num: usize,
) -> Result<&'a NumericArray, MethodError> {
    ensure!(
        inputs.len() == parties_num,
        "expected {} inputs but got {}",
        parties_num,
        inputs.len()
    );
    match gradients {
        [gradient] => Ok(gradient),
        _ => bail!("expected a single gradient but got {}", gradients.len()),
    }
}

/// Broadcasts `weight` to `shape`.
fn weight_array(weight: &Weight, shape: &[usize]) -> Result<NumericArray, MethodError> {
    match weight {
        Weight::Scalar(weight) => Ok(NumericArray::from_elem(IxDyn(shape), *weight)),
        Weight::Tensor(weight) => weight
            .broadcast(IxDyn(shape))
            .map(|weight| weight.to_owned())
            .ok_or_else(|| {
                anyhow!(
                    "a weight of shape {:?} cannot be broadcast to {:?}",
                    weight.shape(),
                    shape
                )
            }),
    }
}

/// Sums up the broadcast weights.
fn total_weight(weights: &[Weight], shape: &[usize]) -> Result<NumericArray, MethodError> {
    let mut total = NumericArray::zeros(IxDyn(shape));
    for weight in weights {
        total += &weight_array(weight, shape)?;
    }
    ensure!(
        total.iter().all(|&weight| weight != 0.),
        "weights sum to zero"
    );
    Ok(total)
}

#[derive(Clone, Copy, Debug, Default)]
/// Fuses by an elementwise, optionally weighted, sum over the parties.
pub struct Sum;

impl AggMethod for Sum {
    fn forward(
        &self,
        inputs: &[NumericArray],
        _axis: usize,
        weights: Option<&[Weight]>,
    ) -> Result<NumericArray, MethodError> {
        check_inputs(inputs, weights)?;
        let mut fused = NumericArray::zeros(inputs[0].raw_dim());
        for (i, input) in inputs.iter().enumerate() {
            match weights {
                Some(weights) => fused += &(input * &weight_array(&weights[i], input.shape())?),
                None => fused += input,
            }
        }
        Ok(fused)
    }

    fn backward(
        &self,
        gradients: &[NumericArray],
        weights: Option<&[Weight]>,
        inputs: &[NumericArray],
        parties_num: usize,
    ) -> Result<Vec<NumericArray>, MethodError> {
        check_inputs(inputs, weights)?;
        let gradient = single_gradient(gradients, inputs, parties_num)?;
        match weights {
            Some(weights) => weights
                .iter()
                .map(|weight| {
                    weight_array(weight, gradient.shape()).map(|weight| gradient * &weight)
                })
                .collect(),
            None => Ok(vec![gradient.clone(); parties_num]),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
/// Fuses by an elementwise, optionally weighted, average over the parties.
///
/// The weighted average divides by the sum of the weights, which must not be zero anywhere.
pub struct Average;

impl AggMethod for Average {
    fn forward(
        &self,
        inputs: &[NumericArray],
        axis: usize,
        weights: Option<&[Weight]>,
    ) -> Result<NumericArray, MethodError> {
        let sum = Sum.forward(inputs, axis, weights)?;
        match weights {
            Some(weights) => Ok(&sum / &total_weight(weights, sum.shape())?),
            None => Ok(sum / inputs.len() as f32),
        }
    }

    fn backward(
        &self,
        gradients: &[NumericArray],
        weights: Option<&[Weight]>,
        inputs: &[NumericArray],
        parties_num: usize,
    ) -> Result<Vec<NumericArray>, MethodError> {
        check_inputs(inputs, weights)?;
        let gradient = single_gradient(gradients, inputs, parties_num)?;
        match weights {
            Some(weights) => {
                let scaled = gradient / &total_weight(weights, gradient.shape())?;
                weights
                    .iter()
                    .map(|weight| {
                        weight_array(weight, gradient.shape()).map(|weight| &scaled * &weight)
                    })
                    .collect()
            }
            None => Ok(vec![gradient / parties_num as f32; parties_num]),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
/// Fuses by concatenating the parties' representations along an axis.
///
/// The axis is fixed at construction and the `axis` argument of the forward pass is ignored.
/// Weights are ignored as well.
pub struct Concat {
    axis: usize,
}

impl Concat {
    /// Creates a concatenation along `axis`.
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }

    /// Gets the axis of the concatenation.
    pub fn axis(&self) -> usize {
        self.axis
    }
}

impl AggMethod for Concat {
    fn forward(
        &self,
        inputs: &[NumericArray],
        _axis: usize,
        _weights: Option<&[Weight]>,
    ) -> Result<NumericArray, MethodError> {
        ensure!(!inputs.is_empty(), "at least one input is required");
        ensure!(
            inputs.iter().all(|input| self.axis < input.ndim()),
            "axis {} is out of bounds",
            self.axis
        );
        let views = inputs.iter().map(|input| input.view()).collect::<Vec<_>>();
        concatenate(Axis(self.axis), &views).context("inputs cannot be concatenated")
    }

    fn backward(
        &self,
        gradients: &[NumericArray],
        _weights: Option<&[Weight]>,
        inputs: &[NumericArray],
        parties_num: usize,
    ) -> Result<Vec<NumericArray>, MethodError> {
        let gradient = single_gradient(gradients, inputs, parties_num)?;
        ensure!(
            self.axis < gradient.ndim() && inputs.iter().all(|input| self.axis < input.ndim()),
            "axis {} is out of bounds",
            self.axis
        );

        let widths = inputs
            .iter()
            .map(|input| input.len_of(Axis(self.axis)))
            .collect::<Vec<_>>();
        let total = widths.iter().sum::<usize>();
        ensure!(
            total == gradient.len_of(Axis(self.axis)),
            "a gradient of width {} cannot be split into inputs of total width {}",
            gradient.len_of(Axis(self.axis)),
            total
        );

        let mut offset = 0;
        Ok(widths
            .into_iter()
            .map(|width| {
                let slice = gradient
                    .slice_axis(Axis(self.axis), Slice::from(offset..offset + width))
                    .to_owned();
                offset += width;
                slice
            })
            .collect())
    }
}
