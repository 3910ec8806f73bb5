//! # Fail-Fast Task Group
//!
//! Runs sibling futures under a shared child [`CancellationToken`]. The first
//! future to fail records its error and cancels the token, so siblings observing
//! the token stop early. Errors reported after the first one are discarded.
//!
//! ```rust
//! use release_pipeline_controller::controller::task_group::FailFast;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test_block(async {
//! let parent = CancellationToken::new();
//! let group = FailFast::new(&parent);
//! let (a, b) = futures::join!(
//!     group.run(async { Ok::<_, String>(1) }),
//!     group.run(async { Err::<u32, _>("boom".to_string()) }),
//! );
//! assert_eq!(a, Some(1));
//! assert_eq!(b, None);
//! assert_eq!(group.finish(), Err("boom".to_string()));
//! assert!(!parent.is_cancelled());
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct FailFast<E> {
    token: CancellationToken,
    first_error: Mutex<Option<E>>,
}

impl<E> FailFast<E> {
    /// New group whose token is a child of `parent`
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            first_error: Mutex::new(None),
        }
    }

    /// Token handed to the members of the group
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drive `future` as a member of the group
    ///
    /// Returns `None` when the future failed; the error is kept if it was the first.
    pub async fn run<T, F>(&self, future: F) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
    {
        match future.await {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    fn fail(&self, err: E) {
        let mut first_error = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if first_error.is_none() {
            *first_error = Some(err);
        }
        self.token.cancel();
    }

    /// Consume the group, yielding the first error if any member failed
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed member.
    pub fn finish(self) -> Result<(), E> {
        match self
            .first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
