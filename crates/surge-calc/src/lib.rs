//! surge-calc — pure scaling arithmetic.
//!
//! Turns noisy weighted metric samples and a textual scaling policy
//! into a target instance-count range. Three layers:
//!
//! - [`aggregate`] — weighted averages over lossy per-instance samples
//! - [`EndpointCriteria`] — one parsed policy clause
//! - [`ideal_range`] — folds clauses into a single `[min, max]` range
//!   by interval intersection
//!
//! Nothing in this crate performs I/O; the coordinator feeds it store
//! data and acts on the result.

pub mod criteria;
pub mod ideal;

pub use criteria::EndpointCriteria;
pub use ideal::{
    aggregate, clamp_to_config, ideal_range, instances_for_bound, range_for_criterion,
    CalcError, UNBOUNDED,
};
