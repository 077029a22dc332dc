use crate::config::Target;
use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub target: Target,
    pub count: usize,
}

/// Spread `total` operations over `targets` as evenly as possible.
///
/// Every target gets `total / n`; the first `total % n` targets get one more.
pub fn distribute(total: usize, targets: &[Target]) -> Result<Vec<Allocation>> {
    if targets.is_empty() {
        return Err(Error::validation_with_context(
            "no targets to distribute over",
            ErrorContext::new().with_source("distribution"),
        ));
    }
    let n = targets.len();
    let (each, extra) = (total / n, total % n);
    Ok(targets
        .iter()
        .enumerate()
        .map(|(i, target)| Allocation {
            target: target.clone(),
            count: each + usize::from(i < extra),
        })
        .collect())
}
