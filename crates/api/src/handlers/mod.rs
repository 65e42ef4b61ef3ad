pub mod dags;
pub mod proposals;
pub mod runs;

pub(crate) use crate::AppState;

#[cfg(test)]
pub(crate) mod test_support;
