//! Current-directory context for rule evaluation.
//!
//! Evaluators run with the directory that owns them as the current context so that relative
//! paths and collaborator calls resolve against it. The context is thread-local and restored by
//! [`DirectoryScope`]'s `Drop`, including on early return and unwinding.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::paths::ResourcePath;

thread_local! {
    static CURRENT_DIR: RefCell<Option<ResourcePath>> = const { RefCell::new(None) };
}

/// The directory scope active on this thread, if any.
pub fn current_directory() -> Option<ResourcePath> {
    CURRENT_DIR.with(|c| c.borrow().clone())
}

/// Guard that makes `dir` current until dropped, then restores whatever was current before.
#[must_use = "the previous directory is restored as soon as the scope is dropped"]
pub struct DirectoryScope {
    previous: Option<ResourcePath>,
    // thread-local state: the guard must drop on the thread that created it
    _not_send: PhantomData<*const ()>,
}

impl DirectoryScope {
    pub fn enter(dir: ResourcePath) -> Self {
        let previous = CURRENT_DIR.with(|c| c.replace(Some(dir)));
        Self { previous, _not_send: PhantomData }
    }
}

impl Drop for DirectoryScope {
    fn drop(&mut self) {
        let prev = self.previous.take();
        CURRENT_DIR.with(|c| *c.borrow_mut() = prev);
    }
}

/// Run `f` with `dir` as the current directory.
pub fn with_directory<R>(dir: ResourcePath, f: impl FnOnce() -> R) -> R {
    let _scope = DirectoryScope::enter(dir);
    f()
}
