//! Application and namespace resolution contract.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::models::app::{App, Namespace};
use crate::Result;

/// Resolves app roots to tracked apps and names to namespaces.
pub trait AppResolver: Send + Sync {
    /// Start tracking (or look up) the app rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AppResolution`](crate::AppError::AppResolution)
    /// if the root is not a usable directory.
    fn track<'a>(&'a self, root: &'a Path) -> Pin<Box<dyn Future<Output = Result<App>> + Send + 'a>>;

    /// The namespace called `name`, or the app's active namespace.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Namespace`](crate::AppError::Namespace) on failure.
    fn namespace_or_active<'a>(
        &'a self,
        app: &'a App,
        name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Namespace>> + Send + 'a>>;
}
