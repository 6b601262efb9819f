//! Unit-of-work execution with bounded retry.

use tracing::warn;

use crate::error::ServiceError;
use crate::store::{Store, UnitOfWork};

/// Run `op` inside one unit of work and commit it.
///
/// Retryable failures (concurrent modification, lock timeout) restart the
/// whole operation on a fresh unit of work, at most `max_retries` extra times.
/// Any other error rolls back and is returned unchanged.
pub fn transact<S, T, F>(store: &S, max_retries: u32, op: F) -> Result<T, ServiceError>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T, ServiceError>,
{
    transact_when(store, max_retries, ServiceError::is_retryable, op)
}

/// [`transact`] with a caller-chosen retry predicate.
pub fn transact_when<S, T, F>(
    store: &S,
    max_retries: u32,
    retry_on: fn(&ServiceError) -> bool,
    mut op: F,
) -> Result<T, ServiceError>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T, ServiceError>,
{
    let mut attempt = 0u32;
    loop {
        match run_once(store, &mut op) {
            Err(err) if attempt < max_retries && retry_on(&err) => {
                attempt += 1;
                warn!(attempt, max_retries, error = %err, "unit of work failed, retrying");
            }
            result => return result,
        }
    }
}

fn run_once<S, T, F>(store: &S, op: &mut F) -> Result<T, ServiceError>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T, ServiceError>,
{
    let mut uow = store.begin()?;
    let value = op(&mut *uow)?;
    uow.commit()?;
    Ok(value)
}
