use crate::error::{Result, SynthesisError};
use crate::models::ItemReconstruction;
use ndarray::ArrayView2;
use std::collections::HashSet;

pub fn validate_new_item_ids(ids: &[usize], num_items: usize) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());

    for &id in ids {
        if id >= num_items {
            return Err(SynthesisError::InvalidArgument(format!(
                "item id {} out of range (num_items = {})",
                id, num_items
            )));
        }

        if !seen.insert(id) {
            return Err(SynthesisError::InvalidArgument(format!(
                "duplicate item id {}",
                id
            )));
        }
    }

    Ok(())
}

/// `k` must be in `[1, num_items]` and leave enough candidates once the
/// batch itself is excluded from the search.
pub fn validate_neighbor_count(k: usize, num_items: usize, num_new: usize) -> Result<()> {
    if k == 0 || k > num_items {
        return Err(SynthesisError::Configuration(format!(
            "k must be in [1, {}], got {}",
            num_items, k
        )));
    }

    let candidates = num_items.saturating_sub(num_new);
    if candidates < k {
        return Err(SynthesisError::Configuration(format!(
            "k = {} but only {} existing items remain after excluding {} new items",
            k, candidates, num_new
        )));
    }

    Ok(())
}

pub fn validate_forward_shape(
    output: ArrayView2<'_, f32>,
    expected_rows: usize,
    expected_cols: usize,
) -> Result<()> {
    if output.nrows() != expected_rows || output.ncols() != expected_cols {
        return Err(SynthesisError::ShapeMismatch {
            expected_rows,
            expected_cols,
            got_rows: output.nrows(),
            got_cols: output.ncols(),
        });
    }
    Ok(())
}

/// Precomputed targets must name distinct rows of the table and match its
/// dimension.
pub fn validate_targets(
    reconstructions: &[ItemReconstruction],
    num_items: usize,
    dim: usize,
) -> Result<()> {
    let ids: Vec<usize> = reconstructions.iter().map(|r| r.item_id).collect();
    validate_new_item_ids(&ids, num_items)?;

    if let Some(bad) = reconstructions.iter().find(|r| r.delta.len() != dim) {
        return Err(SynthesisError::InvalidArgument(format!(
            "target for item {} has dimension {}, table has {}",
            bad.item_id,
            bad.delta.len(),
            dim
        )));
    }

    Ok(())
}

pub fn validate_batch_size(batch_size: usize, max_batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(SynthesisError::Configuration(
            "batch size cannot be zero".to_string(),
        ));
    }

    if batch_size > max_batch_size {
        return Err(SynthesisError::Configuration(format!(
            "batch size too large: {} (max {})",
            batch_size, max_batch_size
        )));
    }

    Ok(())
}
