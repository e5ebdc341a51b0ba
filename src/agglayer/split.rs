use crate::error::ArgumentError;

/// Splits `data` into contiguous slices of the given lengths, in order.
///
/// # Errors
/// Fails if the lengths don't add up to the length of `data`.
pub fn split_to_parties<T: Clone>(
    data: &[T],
    counts: &[usize],
) -> Result<Vec<Vec<T>>, ArgumentError> {
    let expected = counts.iter().sum::<usize>();
    if expected != data.len() {
        return Err(ArgumentError::OutputNumMismatch {
            expected,
            got: data.len(),
        });
    }

    let mut offset = 0;
    let mut slices = Vec::with_capacity(counts.len());
    for &count in counts {
        slices.push(data[offset..offset + count].to_vec());
        offset += count;
    }
    Ok(slices)
}
